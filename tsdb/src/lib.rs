//! TimeSeriesDB - a filesystem-backed append-only store for sensor time
//! series.
//!
//! Each UTC day is one self-contained `data_YYYY-MM-DD.tsdb` file holding
//! many named channels. The byte stream is a compact, stateful format: a
//! 12-byte header, then self-delimiting entries (values, timestamps,
//! channel definitions, end-of-file marker) in which a current timestamp
//! and a per-file channel table thread through the stream.
//!
//! # Key concepts
//!
//! - **Tsdb**: the main entry point. Owns the single writer per data
//!   directory and implements the read operations.
//! - **TsdbReader**: a read-only view. Any number may run concurrently
//!   with the writer; append-during-read is safe because files only grow
//!   and readers stop at the last complete entry.
//! - **Channels**: named series with a fixed per-file value format.
//!   Channel ids are compact in-file handles; names are the cross-file
//!   key.
//!
//! # Example
//!
//! ```ignore
//! use tsdb::{Config, Tsdb, TsdbRead, Value};
//!
//! let db = Tsdb::open(Config::new("/var/lib/tsdb"))?;
//!
//! // Ingest samples
//! db.append("temp", 0x22, now_ms, &Value::Double(23.45))?;
//!
//! // Query a window
//! let events = db.get_events("temp", start_ms, end_ms, 500).await?;
//! for point in events.points {
//!     println!("{:?}", point);
//! }
//! ```

mod codec;
mod config;
mod decoder;
pub mod directory;
mod error;
mod format;
mod lock;
mod model;
mod query;
mod registry;
#[cfg(feature = "http-server")]
pub mod server;
mod writer;

pub use codec::Cursor;
pub use config::{Config, QueryOptions};
pub use decoder::StreamDecoder;
pub use error::{Error, FormatError, QueryError, Result};
pub use format::{decimal_places, double_format_for_decimals, FormatKind, MAGIC, VERSION};
pub use model::{
    ChannelId, EventPoint, Record, Sample, SeriesEvents, SeriesList, SeriesStats, Value,
    MAX_NARROW_CHANNEL_ID,
};
pub use query::{Tsdb, TsdbRead, TsdbReader};
pub use registry::{ChannelDef, ChannelRegistry};
pub use writer::DayWriter;
