//! Configuration options for the TimeSeriesDB engine.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Configuration for opening a [`Tsdb`](crate::Tsdb) or
/// [`TsdbReader`](crate::TsdbReader).
///
/// # Example
///
/// ```ignore
/// use tsdb::Config;
///
/// let config = Config::new("/var/lib/tsdb");
/// let db = Tsdb::open(config)?;
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the `data_YYYY-MM-DD.tsdb` day files.
    pub data_dir: PathBuf,

    /// How recent the last sample must be for `get_stats` to report it as
    /// the current value. Defaults to 60 seconds.
    pub current_value_window: Duration,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            current_value_window: Duration::from_secs(60),
        }
    }
}

/// Options for query operations.
///
/// Controls per-call behavior of the [`TsdbRead`](crate::TsdbRead)
/// operations. The plain methods use the defaults; the `_with_options`
/// variants take this struct.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Cooperative cancellation signal.
    ///
    /// The per-file scan checks it at entry boundaries; a cancelled query
    /// returns [`QueryError::Cancelled`](crate::QueryError::Cancelled),
    /// yields no partial results and releases all file handles.
    pub cancel: Option<CancellationToken>,
}
