//! HTTP request parameter types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use super::error::ApiError;

/// Query parameters for `GET /series`.
#[derive(Debug, Deserialize)]
pub struct SeriesParams {
    /// Window start; defaults to the epoch.
    pub start: Option<String>,
    /// Window end; defaults to now.
    pub end: Option<String>,
}

/// Query parameters for `GET /events`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsParams {
    pub series: String,
    pub start: String,
    pub end: String,
    pub max_events: usize,
}

/// Query parameters for `GET /stats`.
#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub series: String,
    pub start: String,
    pub end: String,
}

/// Parses a timestamp parameter: integer epoch seconds or milliseconds
/// (values below 10^10 are seconds), or an ISO-8601 datetime, naive
/// datetimes taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<i64, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::bad_request("timestamp value is empty"));
    }

    if let Ok(n) = value.parse::<i64>() {
        if n.abs() < 10_000_000_000 {
            return Ok(n * 1000);
        }
        return Ok(n);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc().timestamp_millis());
    }

    Err(ApiError::bad_request(format!(
        "cannot parse timestamp: {:?}",
        value
    )))
}
