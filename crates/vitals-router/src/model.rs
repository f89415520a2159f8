//! Query and sample types, plus lenient parsing of store rows
//!
//! Both stores and the upstream API hand back loosely shaped JSON rows.
//! Rows are parsed field by field with a set of accepted aliases; a row that
//! cannot be understood is counted and dropped, never propagated as an error.

use crate::error::{Result, RouterError};
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use vitals_cache::{QueryKey, validate_path_segment};

const NAME_FIELDS: [&str; 3] = ["point_name", "name", "point"];
const TIME_FIELDS: [&str; 3] = ["timestamp", "time", "ts"];

/// Render an instant as RFC 3339 UTC with millisecond precision.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn serialize_instant<S: Serializer>(
    instant: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_instant(*instant))
}

fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(instant.timestamp_millis()).unwrap_or(instant)
}

/// A single measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    #[serde(serialize_with = "serialize_instant")]
    pub time: DateTime<Utc>,
}

/// Samples for one point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub samples: Vec<Sample>,
}

/// A row as returned by either store.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRow {
    pub point_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Inclusive time range, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(RouterError::Validation(format!(
                "start_time {} is after end_time {}",
                format_instant(start),
                format_instant(end)
            )));
        }
        Ok(Self {
            start: truncate_to_millis(start),
            end: truncate_to_millis(end),
        })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            format_instant(self.start),
            format_instant(self.end)
        )
    }
}

/// A validated, normalized timeseries query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    site: String,
    point_names: Vec<String>,
    range: TimeRange,
}

impl Query {
    /// Validate and normalize a query.
    ///
    /// Point names are trimmed, sorted and de-duplicated; blanks are dropped.
    /// The site must be usable as a storage path segment.
    pub fn new<I, S>(
        site: &str,
        point_names: I,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let site = site.trim();
        if site.is_empty() {
            return Err(RouterError::Validation("site is required".to_string()));
        }
        validate_path_segment(site)?;

        let mut points: Vec<String> = point_names
            .into_iter()
            .map(|p| p.as_ref().trim().to_owned())
            .filter(|p| !p.is_empty())
            .collect();
        points.sort_unstable();
        points.dedup();
        if points.is_empty() {
            return Err(RouterError::Validation(
                "at least one point name is required".to_string(),
            ));
        }

        Ok(Self {
            site: site.to_owned(),
            point_names: points,
            range: TimeRange::new(start, end)?,
        })
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn point_names(&self) -> &[String] {
        &self.point_names
    }

    pub fn range(&self) -> TimeRange {
        self.range
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.range.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.range.end
    }

    /// Whether `name` is one of the requested points.
    pub fn wants(&self, name: &str) -> bool {
        self.point_names
            .binary_search_by(|p| p.as_str().cmp(name))
            .is_ok()
    }

    pub fn cache_key(&self) -> Result<QueryKey> {
        Ok(QueryKey::new(
            &self.site,
            &self.point_names,
            self.range.start,
            self.range.end,
        )?)
    }

    /// Short human-readable identity used in logs and timeout errors.
    pub fn identity(&self) -> String {
        format!(
            "{} [{} points] {}",
            self.site,
            self.point_names.len(),
            self.range
        )
    }
}

/// Parse an instant from an RFC 3339 string, a naive ISO string (taken as
/// UTC) or epoch milliseconds.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(truncate_to_millis(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(truncate_to_millis(dt.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(truncate_to_millis(naive.and_utc()));
        }
    }

    raw.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
}

#[allow(clippy::cast_possible_truncation)]
fn parse_time_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_instant(s),
        Value::Number(n) => {
            if let Some(ms) = n.as_i64() {
                DateTime::from_timestamp_millis(ms)
            } else {
                n.as_f64()
                    .filter(|ms| ms.is_finite())
                    .and_then(|ms| DateTime::from_timestamp_millis(ms.round() as i64))
            }
        }
        _ => None,
    }
}

fn parse_numeric_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn first_field<'a>(
    object: &'a serde_json::Map<String, Value>,
    names: &[&str],
) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| object.get(*name))
        .find(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
}

/// Name of the point a raw row or upstream sample refers to, if any.
pub fn row_point_name(row: &Value) -> Option<&str> {
    let object = row.as_object()?;
    first_field(object, &NAME_FIELDS)?.as_str()
}

/// Parse a single row; `None` if any field is missing or unusable.
pub fn parse_row(row: &Value) -> Option<PointRow> {
    let object = row.as_object()?;
    let point_name = first_field(object, &NAME_FIELDS)?.as_str()?.to_owned();
    let timestamp = parse_time_value(first_field(object, &TIME_FIELDS)?)?;
    let value = parse_numeric_value(object.get("value")?)?;

    Some(PointRow {
        point_name,
        timestamp,
        value,
    })
}

/// Rows that parsed, and how many were rejected.
#[derive(Debug, Default)]
pub struct ParsedRows {
    pub rows: Vec<PointRow>,
    pub rejected: usize,
}

impl ParsedRows {
    pub fn push_raw(&mut self, raw: &Value) {
        match parse_row(raw) {
            Some(row) => self.rows.push(row),
            None => self.rejected += 1,
        }
    }

    pub fn extend(&mut self, other: Self) {
        self.rows.extend(other.rows);
        self.rejected += other.rejected;
    }
}

pub fn parse_rows<'a, I>(values: I) -> ParsedRows
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut parsed = ParsedRows::default();
    for value in values {
        parsed.push_raw(value);
    }
    parsed
}

/// Group rows into per-point series, keeping only requested points within
/// `range`. Sample order within a series follows row order.
pub fn group_rows(rows: Vec<PointRow>, query: &Query, range: TimeRange) -> Vec<Series> {
    let mut by_name: HashMap<String, Vec<Sample>> = HashMap::new();
    for row in rows {
        if !query.wants(&row.point_name) || !range.contains(row.timestamp) {
            continue;
        }
        by_name.entry(row.point_name).or_default().push(Sample {
            value: row.value,
            time: row.timestamp,
        });
    }

    let mut series: Vec<Series> = by_name
        .into_iter()
        .map(|(name, samples)| Series { name, samples })
        .collect();
    series.sort_by(|a, b| a.name.cmp(&b.name));
    series
}

#[derive(Serialize)]
struct Payload<'a> {
    point_samples: &'a [Series],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    partial: bool,
}

/// Serialize merged series as the `point_samples` response body.
pub fn render_payload(series: &[Series], partial: bool) -> Result<Bytes> {
    let body = serde_json::to_vec(&Payload {
        point_samples: series,
        partial,
    })?;
    Ok(Bytes::from(body))
}
