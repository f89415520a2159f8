//! HTTP front end for the Building Vitals timeseries query router.
//!
//! Serves `GET /api/timeseries` from the hot store, the cold archive or
//! both, falling back to the upstream API, and reports how each response
//! was produced in `X-*` headers.
//!
//! # Architecture
//!
//! - `server`: Server orchestration and shared state
//! - `config`: Configuration loading and validation
//! - `http`: HTTP router and handlers
//!
//! # Example
//!
//! ```no_run
//! use vitals_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     tracing_subscriber::fmt::init();
//!
//!     let config = ServerConfig::from_args();
//!     config.validate()?;
//!
//!     let server = Server::new(config)?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod error;
pub mod http;
pub mod server;

pub use config::ServerConfig;
pub use error::{ConfigError, ServerError};
pub use server::{AppState, Server};
