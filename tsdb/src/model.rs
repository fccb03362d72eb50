//! Core data types for the TimeSeriesDB engine.
//!
//! This module defines the vocabulary shared by the codec, decoder, writer
//! and query layers: channel handles, decoded values, samples, and the
//! records the stream decoder produces.

/// Compact in-file handle for a channel.
///
/// Ids `0x00..=0xef` are the 8-bit range, written directly as the value
/// entry type byte. Ids `0xf0..=0xffff` are the 16-bit range, reached via
/// the `0xff` escape. Ids are only meaningful within the file that defined
/// them; the same series may carry different ids in different files.
pub type ChannelId = u16;

/// Largest channel id encodable in the 8-bit form.
pub const MAX_NARROW_CHANNEL_ID: u8 = 0xef;

/// A decoded channel value.
///
/// The format id fixes the variant once and for all for a channel: raw
/// integer formats decode to `Integer`, everything numeric with a divisor
/// or a floating layout decodes to `Double`, string formats to `Text`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Double(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Value::Text(_))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

/// One sample of a series: a timestamp and its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Milliseconds since the Unix epoch, UTC.
    pub timestamp_ms: i64,
    pub value: Value,
}

impl Sample {
    pub fn new(timestamp_ms: i64, value: Value) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// A decoded entry from the byte stream.
///
/// Produced by [`StreamDecoder::next_record`](crate::decoder::StreamDecoder).
/// Time and definition entries update decoder state and are surfaced so
/// callers can observe them; value entries carry the resolved timestamp.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A channel definition was read and added to the registry.
    ChannelDefined {
        channel_id: ChannelId,
        format_id: u8,
        name: String,
    },
    /// The current timestamp changed (absolute or relative entry).
    Timestamp { timestamp_ms: i64 },
    /// A value entry, stamped with the timestamp in effect.
    Value {
        channel_id: ChannelId,
        timestamp_ms: i64,
        value: Value,
    },
    /// The end-of-file marker of a finalized file.
    EndOfFile,
}

/// Series names available in a window, with the files that contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesList {
    /// Sorted, deduplicated channel names.
    pub series: Vec<String>,
    /// Day-file names inspected, in ascending date order.
    pub files: Vec<String>,
}

/// One point of a `get_events` response.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPoint {
    /// A raw sample.
    Raw { timestamp_ms: i64, value: Value },
    /// A downsampling bucket aggregated to min/avg/max.
    Bucket {
        /// Midpoint of the bucket, used as the plot timestamp.
        timestamp_ms: i64,
        start_ms: i64,
        end_ms: i64,
        count: u64,
        min: f64,
        avg: f64,
        max: f64,
    },
}

/// Result of `get_events`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesEvents {
    pub points: Vec<EventPoint>,
    /// True when the raw sample count exceeded `max_events` and the points
    /// are buckets rather than samples.
    pub downsampled: bool,
    /// True when a non-numeric series exceeded `max_events` and was cut to
    /// the first `max_events` samples instead of aggregated.
    pub truncated: bool,
    /// Largest display hint observed across the contributing files.
    pub decimal_places: u8,
    pub files: Vec<String>,
}

/// Result of `get_stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesStats {
    /// Number of samples in the window.
    pub count: u64,
    /// Last sample at or before the window end, if it is recent enough.
    pub current_value: Option<Value>,
    /// Largest numeric value in the window; absent for string series.
    pub max_value: Option<f64>,
    pub decimal_places: u8,
    pub files: Vec<String>,
}
