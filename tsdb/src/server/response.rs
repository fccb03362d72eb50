//! HTTP response types.
//!
//! Plain JSON with camelCase fields, mirroring what the dashboard
//! consumes. Raw points serialize as `{timestamp, value}`; downsampling
//! buckets as `{timestamp, start, end, count, min, avg, max}`.

use serde::Serialize;

use crate::{EventPoint, Value};

/// JSON view of a channel value.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum JsonValue {
    Integer(i64),
    Double(f64),
    Text(String),
}

impl From<Value> for JsonValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Integer(v) => JsonValue::Integer(v),
            Value::Double(v) => JsonValue::Double(v),
            Value::Text(v) => JsonValue::Text(v),
        }
    }
}

/// JSON view of one events point.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum JsonPoint {
    Raw {
        timestamp: i64,
        value: JsonValue,
    },
    Bucket {
        timestamp: i64,
        start: i64,
        end: i64,
        count: u64,
        min: f64,
        avg: f64,
        max: f64,
    },
}

impl From<EventPoint> for JsonPoint {
    fn from(point: EventPoint) -> Self {
        match point {
            EventPoint::Raw {
                timestamp_ms,
                value,
            } => JsonPoint::Raw {
                timestamp: timestamp_ms,
                value: value.into(),
            },
            EventPoint::Bucket {
                timestamp_ms,
                start_ms,
                end_ms,
                count,
                min,
                avg,
                max,
            } => JsonPoint::Bucket {
                timestamp: timestamp_ms,
                start: start_ms,
                end: end_ms,
                count,
                min,
                avg,
                max,
            },
        }
    }
}

/// Response body for `GET /series`.
#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub start: i64,
    pub end: i64,
    pub files: Vec<String>,
    pub series: Vec<String>,
}

/// Response body for `GET /events`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub series: String,
    pub start: i64,
    pub end: i64,
    pub requested_max_events: usize,
    pub returned_points: usize,
    pub downsampled: bool,
    pub decimal_places: u8,
    pub files: Vec<String>,
    pub points: Vec<JsonPoint>,
    /// Set when a non-numeric series was truncated instead of aggregated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Response body for `GET /stats`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub series: String,
    pub start: i64,
    pub end: i64,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    pub decimal_places: u8,
    pub files: Vec<String>,
}

/// Response body for `GET /-/healthy`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_serialize_raw_point_flat() {
        // given
        let point: JsonPoint = EventPoint::Raw {
            timestamp_ms: 1_000,
            value: Value::Double(1.5),
        }
        .into();

        // when
        let json = serde_json::to_value(&point).unwrap();

        // then
        assert_eq!(
            json,
            serde_json::json!({"timestamp": 1000, "value": 1.5})
        );
    }

    #[test]
    fn should_serialize_bucket_point_with_aggregates() {
        // given
        let point: JsonPoint = EventPoint::Bucket {
            timestamp_ms: 24,
            start_ms: 0,
            end_ms: 49,
            count: 2,
            min: 1.0,
            avg: 2.0,
            max: 3.0,
        }
        .into();

        // when
        let json = serde_json::to_value(&point).unwrap();

        // then
        assert_eq!(
            json,
            serde_json::json!({
                "timestamp": 24, "start": 0, "end": 49,
                "count": 2, "min": 1.0, "avg": 2.0, "max": 3.0
            })
        );
    }

    #[test]
    fn should_serialize_integer_and_string_values_natively() {
        // given/when/then
        assert_eq!(
            serde_json::to_value(JsonValue::from(Value::Integer(7))).unwrap(),
            serde_json::json!(7)
        );
        assert_eq!(
            serde_json::to_value(JsonValue::from(Value::Text("on".into()))).unwrap(),
            serde_json::json!("on")
        );
    }
}
