//! HTTP query server for the TimeSeriesDB.
//!
//! Exposes the query façade over plain JSON: `GET /series`, `GET /events`
//! and `GET /stats`, plus `/metrics` (Prometheus text format) and
//! `/-/healthy`. The server is read-only; ingestion happens through the
//! library API.

mod config;
mod error;
pub mod handlers;
mod http;
pub mod metrics;
mod request;
mod response;

pub use config::{CliArgs, ServerConfig};
pub use error::ApiError;
pub use http::TsdbServer;
