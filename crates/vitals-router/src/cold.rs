//! Cold store adapter
//!
//! Archival samples are stored as newline-delimited JSON rows, optionally
//! gzip-compressed, partitioned by UTC day under `{site}/{YYYY}/{MM}/{DD}`.
//! A partition is either a directory of files or a single `DD.ndjson[.gz]`
//! object.
//!
//! Files are fetched with bounded concurrency. A file that is unreadable or
//! slow is skipped and reported; the query only fails when every file does.

use crate::{
    config::ColdConfig,
    error::{Result, RouterError},
    model::{ParsedRows, Query, Series, TimeRange, group_rows},
    transport::endpoint,
};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::fmt;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;
use vitals_cache::{validate_path_prefix, validate_path_segment};

const FILE_SUFFIXES: [&str; 4] = [".ndjson", ".ndjson.gz", ".jsonl", ".jsonl.gz"];

/// Bulk store holding time-partitioned archival files.
#[async_trait]
pub trait ColdStore: fmt::Debug + Send + Sync {
    /// Files under a partition prefix, as full relative paths in a stable
    /// order. A partition that does not exist lists as empty.
    async fn list(&self, partition: &str) -> Result<Vec<String>>;

    /// Raw file contents; `None` if the file does not exist.
    async fn fetch(&self, path: &str) -> Result<Option<Bytes>>;
}

fn is_data_file(name: &str) -> bool {
    FILE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Cold store on a local or mounted filesystem.
#[derive(Debug, Clone)]
pub struct FsColdStore {
    root: PathBuf,
}

impl FsColdStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ColdStore for FsColdStore {
    async fn list(&self, partition: &str) -> Result<Vec<String>> {
        validate_path_prefix(partition)?;
        let dir = self.root.join(partition);

        match tokio::fs::read_dir(&dir).await {
            Ok(mut entries) => {
                let mut files = Vec::new();
                while let Some(entry) = entries.next_entry().await? {
                    let Ok(name) = entry.file_name().into_string() else {
                        continue;
                    };
                    if !is_data_file(&name) || validate_path_segment(&name).is_err() {
                        continue;
                    }
                    if entry.file_type().await?.is_file() {
                        files.push(format!("{partition}/{name}"));
                    }
                }
                files.sort();
                Ok(files)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Single-file partition: {site}/{YYYY}/{MM}/{DD}.ndjson[.gz]
                for suffix in [".ndjson.gz", ".ndjson"] {
                    let candidate = format!("{partition}{suffix}");
                    if tokio::fs::try_exists(self.root.join(&candidate)).await? {
                        return Ok(vec![candidate]);
                    }
                }
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch(&self, path: &str) -> Result<Option<Bytes>> {
        validate_path_prefix(path)?;
        match tokio::fs::read(self.root.join(path)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Cold store in object storage, one gzip object per partition.
#[derive(Debug, Clone)]
pub struct HttpColdStore {
    client: Client,
    base_url: Url,
}

impl HttpColdStore {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl ColdStore for HttpColdStore {
    async fn list(&self, partition: &str) -> Result<Vec<String>> {
        validate_path_prefix(partition)?;
        Ok(vec![format!("{partition}.ndjson.gz")])
    }

    async fn fetch(&self, path: &str) -> Result<Option<Bytes>> {
        validate_path_prefix(path)?;
        let url = endpoint(&self.base_url, path.split('/'))?;
        let response = self.client.get(url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes().await?)),
            status => Err(RouterError::StoreStatus {
                store: "cold",
                status,
            }),
        }
    }
}

/// Decode one partition file into rows. Gzip is detected by suffix.
pub fn decode_partition_file(path: &str, raw: &[u8]) -> Result<ParsedRows> {
    let text = if path.ends_with(".gz") {
        let mut decoded = String::new();
        GzDecoder::new(raw)
            .read_to_string(&mut decoded)
            .map_err(|e| RouterError::Decode(format!("{path}: {e}")))?;
        decoded
    } else {
        String::from_utf8(raw.to_vec()).map_err(|e| RouterError::Decode(format!("{path}: {e}")))?
    };

    let mut parsed = ParsedRows::default();
    let trimmed = text.trim_start();

    // Whole-file JSON arrays are accepted alongside NDJSON
    if trimmed.starts_with('[') {
        let rows: Vec<Value> = serde_json::from_str(trimmed)
            .map_err(|e| RouterError::Decode(format!("{path}: {e}")))?;
        for row in &rows {
            parsed.push_raw(row);
        }
        return Ok(parsed);
    }

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Value>(line) {
            Ok(row) => parsed.push_raw(&row),
            Err(_) => parsed.rejected += 1,
        }
    }
    Ok(parsed)
}

/// Day partitions overlapping `range`, oldest first.
pub fn partition_prefixes(site: &str, range: TimeRange) -> Result<Vec<String>> {
    let last = range.end().date_naive();
    let mut day = range.start().date_naive();
    let mut prefixes = Vec::new();

    while day <= last {
        let prefix = format!("{site}/{}", day.format("%Y/%m/%d"));
        validate_path_prefix(&prefix)?;
        prefixes.push(prefix);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    Ok(prefixes)
}

/// Result of a cold store query.
#[derive(Debug, Clone)]
pub struct ColdResult {
    pub series: Vec<Series>,
    /// Files that were listed or expected, including failed ones
    pub file_count: usize,
    /// Paths that could not be listed, fetched or decoded
    pub failed_files: Vec<String>,
    pub rejected: usize,
    pub elapsed: Duration,
}

impl ColdResult {
    pub fn is_partial(&self) -> bool {
        !self.failed_files.is_empty()
    }
}

enum FileOutcome {
    Rows(ParsedRows),
    Missing,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ColdAdapter {
    store: Arc<dyn ColdStore>,
    config: ColdConfig,
}

impl ColdAdapter {
    pub fn new(store: Arc<dyn ColdStore>, config: ColdConfig) -> Self {
        Self { store, config }
    }

    async fn fetch_file(&self, path: &str, deadline: Option<Instant>) -> FileOutcome {
        let timeout = deadline.map_or(self.config.per_file_timeout, |deadline| {
            self.config
                .per_file_timeout
                .min(deadline.saturating_duration_since(Instant::now()))
        });
        let fetch = async {
            let Some(raw) = self.store.fetch(path).await? else {
                return Ok(None);
            };
            let owned_path = path.to_owned();
            tokio::task::spawn_blocking(move || decode_partition_file(&owned_path, &raw))
                .await
                .map_err(|e| RouterError::Decode(format!("decode task failed: {e}")))?
                .map(Some)
        };

        match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(Some(rows))) => FileOutcome::Rows(rows),
            Ok(Ok(None)) => {
                debug!(path, "cold partition file missing");
                FileOutcome::Missing
            }
            Ok(Err(e)) => {
                warn!(path, error = %e, "skipping unreadable cold partition file");
                FileOutcome::Failed
            }
            Err(_) => {
                warn!(
                    path,
                    timeout_ms = timeout.as_millis(),
                    "skipping cold partition file after timeout"
                );
                FileOutcome::Failed
            }
        }
    }

    pub async fn query(&self, query: &Query, range: TimeRange) -> Result<ColdResult> {
        self.run(query, range, None).await
    }

    /// Query the cold store, cutting every file fetch off at `deadline`.
    pub async fn query_until(
        &self,
        query: &Query,
        range: TimeRange,
        deadline: Instant,
    ) -> Result<ColdResult> {
        self.run(query, range, Some(deadline)).await
    }

    async fn run(&self, query: &Query, range: TimeRange, deadline: Option<Instant>) -> Result<ColdResult> {
        let started = Instant::now();
        let concurrency = self.config.max_concurrent_files.max(1);
        let prefixes = partition_prefixes(query.site(), range)?;

        debug!(
            query = %query.identity(),
            range = %range,
            partitions = prefixes.len(),
            "querying cold store"
        );

        let listings: Vec<(String, Result<Vec<String>>)> = stream::iter(prefixes)
            .map(|prefix| async move {
                let listing = self.store.list(&prefix).await;
                (prefix, listing)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut failed_files = Vec::new();
        let mut files = Vec::new();
        for (prefix, listing) in listings {
            match listing {
                Ok(paths) => files.extend(paths),
                Err(e) => {
                    warn!(partition = %prefix, error = %e, "cold partition listing failed");
                    failed_files.push(prefix);
                }
            }
        }

        let mut outcomes: Vec<(usize, String, FileOutcome)> = stream::iter(files.into_iter().enumerate())
            .map(|(index, path)| async move {
                let outcome = self.fetch_file(&path, deadline).await;
                (index, path, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        // Completion order is arbitrary; restore path order so duplicate
        // resolution downstream is deterministic
        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut file_count = failed_files.len();
        let mut rows = ParsedRows::default();
        for (_, path, outcome) in outcomes {
            match outcome {
                FileOutcome::Rows(parsed) => {
                    file_count += 1;
                    rows.extend(parsed);
                }
                FileOutcome::Missing => {}
                FileOutcome::Failed => {
                    file_count += 1;
                    failed_files.push(path);
                }
            }
        }

        if file_count > 0 && failed_files.len() == file_count {
            return Err(RouterError::ColdStoreUnavailable {
                failed: failed_files.len(),
                total: file_count,
            });
        }

        let series = group_rows(rows.rows, query, range);
        let elapsed = started.elapsed();

        debug!(
            query = %query.identity(),
            files = file_count,
            failed = failed_files.len(),
            rejected = rows.rejected,
            elapsed_ms = elapsed.as_millis(),
            "cold store query complete"
        );

        Ok(ColdResult {
            series,
            file_count,
            failed_files,
            rejected: rows.rejected,
            elapsed,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;
    use tempfile::TempDir;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, hour, 0, 0)
            .single()
            .expect("valid test date")
    }

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn write_file(root: &TempDir, path: &str, data: &[u8]) {
        let full = root.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, data).unwrap();
    }

    fn row(point: &str, time: DateTime<Utc>, value: f64) -> String {
        serde_json::json!({"point_name": point, "timestamp": time.to_rfc3339(), "value": value})
            .to_string()
    }

    fn adapter(root: &TempDir) -> ColdAdapter {
        ColdAdapter::new(
            Arc::new(FsColdStore::new(root.path())),
            ColdConfig {
                max_concurrent_files: 2,
                ..ColdConfig::default()
            },
        )
    }

    #[test]
    fn test_partition_prefixes_cover_each_day() {
        let range = TimeRange::new(at(30, 22), at(31, 23) + chrono::Duration::hours(2)).unwrap();
        assert_eq!(
            partition_prefixes("hq", range).unwrap(),
            vec!["hq/2025/01/30", "hq/2025/01/31", "hq/2025/02/01"]
        );

        let single = TimeRange::new(at(5, 3), at(5, 3)).unwrap();
        assert_eq!(partition_prefixes("hq", single).unwrap(), vec!["hq/2025/01/05"]);
    }

    #[test]
    fn test_decode_ndjson_plain_and_gzip() {
        let text = format!("{}\n\n{}\nnot json\n", row("a", at(1, 0), 1.0), row("a", at(1, 1), 2.0));

        let plain = decode_partition_file("hq/2025/01/01/a.ndjson", text.as_bytes()).unwrap();
        assert_eq!(plain.rows.len(), 2);
        assert_eq!(plain.rejected, 1);

        let gz = decode_partition_file("hq/2025/01/01.ndjson.gz", &gzip(&text)).unwrap();
        assert_eq!(gz.rows, plain.rows);

        assert!(decode_partition_file("x.ndjson.gz", b"not gzip").is_err());
    }

    #[tokio::test]
    async fn test_fs_store_lists_directory_and_single_file_partitions() {
        let root = TempDir::new().unwrap();
        write_file(&root, "hq/2025/01/01/b.ndjson", b"");
        write_file(&root, "hq/2025/01/01/a.ndjson.gz", &gzip(""));
        write_file(&root, "hq/2025/01/01/notes.txt", b"ignored");
        write_file(&root, "hq/2025/01/02.ndjson.gz", &gzip(""));

        let store = FsColdStore::new(root.path());
        assert_eq!(
            store.list("hq/2025/01/01").await.unwrap(),
            vec!["hq/2025/01/01/a.ndjson.gz", "hq/2025/01/01/b.ndjson"]
        );
        assert_eq!(
            store.list("hq/2025/01/02").await.unwrap(),
            vec!["hq/2025/01/02.ndjson.gz"]
        );
        assert!(store.list("hq/2025/01/03").await.unwrap().is_empty());
        assert!(store.list("hq/../../etc").await.is_err());
        assert!(store.fetch("../outside.ndjson").await.is_err());
    }

    #[tokio::test]
    async fn test_one_unreadable_partition_of_three_yields_partial_result() {
        let root = TempDir::new().unwrap();
        write_file(&root, "hq/2025/01/01.ndjson", row("a", at(1, 12), 1.0).as_bytes());
        write_file(&root, "hq/2025/01/02.ndjson.gz", b"corrupt gzip");
        write_file(&root, "hq/2025/01/03.ndjson.gz", &gzip(&row("a", at(3, 12), 3.0)));

        let query = Query::new("hq", ["a"], at(1, 0), at(3, 23)).unwrap();
        let result = adapter(&root).query(&query, query.range()).await.unwrap();

        assert!(result.is_partial());
        assert_eq!(result.file_count, 3);
        assert_eq!(result.failed_files, vec!["hq/2025/01/02.ndjson.gz"]);
        assert_eq!(result.series.len(), 1);
        let times: Vec<_> = result.series[0].samples.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![at(1, 12), at(3, 12)]);
    }

    #[tokio::test]
    async fn test_all_partitions_failing_is_unavailable() {
        let root = TempDir::new().unwrap();
        write_file(&root, "hq/2025/01/01.ndjson.gz", b"corrupt");
        write_file(&root, "hq/2025/01/02.ndjson.gz", b"corrupt");

        let query = Query::new("hq", ["a"], at(1, 0), at(2, 23)).unwrap();
        let err = adapter(&root).query(&query, query.range()).await.unwrap_err();

        assert!(matches!(
            err,
            RouterError::ColdStoreUnavailable { failed: 2, total: 2 }
        ));
    }

    #[tokio::test]
    async fn test_empty_listing_is_an_empty_success() {
        let root = TempDir::new().unwrap();
        let query = Query::new("hq", ["a"], at(1, 0), at(2, 23)).unwrap();

        let result = adapter(&root).query(&query, query.range()).await.unwrap();

        assert!(result.series.is_empty());
        assert_eq!(result.file_count, 0);
        assert!(!result.is_partial());
    }

    #[tokio::test]
    async fn test_files_concatenate_in_path_order() {
        let root = TempDir::new().unwrap();
        // Same timestamp in two files of one partition; later path comes last
        write_file(&root, "hq/2025/01/01/a.ndjson", row("p", at(1, 6), 1.0).as_bytes());
        write_file(&root, "hq/2025/01/01/b.ndjson", row("p", at(1, 6), 2.0).as_bytes());

        let query = Query::new("hq", ["p"], at(1, 0), at(1, 23)).unwrap();
        for _ in 0..5 {
            let result = adapter(&root).query(&query, query.range()).await.unwrap();
            let values: Vec<f64> = result.series[0].samples.iter().map(|s| s.value).collect();
            assert_eq!(values, vec![1.0, 2.0]);
        }
    }

    /// One file per day; days listed in `slow` never finish fetching.
    #[derive(Debug)]
    struct SlowDays {
        slow: Vec<&'static str>,
    }

    #[async_trait]
    impl ColdStore for SlowDays {
        async fn list(&self, partition: &str) -> Result<Vec<String>> {
            Ok(vec![format!("{partition}.ndjson")])
        }

        async fn fetch(&self, path: &str) -> Result<Option<Bytes>> {
            if self.slow.iter().any(|day| path.contains(day)) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(Some(Bytes::from(row("a", at(1, 12), 1.0))))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_slow_files_short() {
        let adapter = ColdAdapter::new(
            Arc::new(SlowDays {
                slow: vec!["/02.ndjson"],
            }),
            ColdConfig::default(),
        );
        let query = Query::new("hq", ["a"], at(1, 0), at(2, 23)).unwrap();
        let started = Instant::now();

        let result = adapter
            .query_until(&query, query.range(), started + Duration::from_secs(1))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.file_count, 2);
        assert_eq!(result.failed_files, vec!["hq/2025/01/02.ndjson"]);
        assert_eq!(result.series[0].samples.len(), 1);
    }
}
