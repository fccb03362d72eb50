//! Error taxonomy for the TimeSeriesDB engine.
//!
//! Three layers:
//!
//! - [`FormatError`]: byte-stream level problems. Produced by the codec,
//!   registry and decoder, which know offsets but not file paths.
//! - [`QueryError`]: problems with a query request itself.
//! - [`Error`]: the crate-level error. File-level code wraps a
//!   `FormatError` together with the path and byte offset it occurred at.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// A problem in the byte stream of a day file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The file does not start with the `TSDB` magic.
    BadMagic,
    /// The header carries a version this build does not understand.
    UnsupportedVersion(u32),
    /// An entry type byte outside the defined instruction set.
    UnknownEntryType(u8),
    /// A channel definition carries an unrecognized format id.
    UnknownFormat(u8),
    /// A value entry references a channel id with no prior definition.
    UnknownChannel(u16),
    /// A second definition for an already-defined channel id.
    DuplicateChannel(u16),
    /// An 8-bit channel id was allocated out of dense order (writer path).
    DenseAllocation(u8),
    /// A value or relative-time entry appeared before any timestamp was set.
    MissingTimestamp,
    /// The stream ended in the middle of the named field.
    ShortRead(&'static str),
    /// A finalized file has a damaged or over-long tail.
    Truncated,
    /// A string length prefix exceeds the bytes remaining in the file.
    StringTooLong { len: u64, remaining: usize },
    /// A channel id outside the range its entry type permits.
    InvalidChannelIdRange(u16),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::BadMagic => write!(f, "bad magic, not a TSDB file"),
            FormatError::UnsupportedVersion(v) => write!(f, "unsupported TSDB version {}", v),
            FormatError::UnknownEntryType(t) => write!(f, "unknown entry type 0x{:02x}", t),
            FormatError::UnknownFormat(id) => write!(f, "unknown format id 0x{:02x}", id),
            FormatError::UnknownChannel(id) => write!(f, "undefined channel id {}", id),
            FormatError::DuplicateChannel(id) => {
                write!(f, "duplicate definition for channel id {}", id)
            }
            FormatError::DenseAllocation(id) => {
                write!(f, "8-bit channel id {} skips an unused lower id", id)
            }
            FormatError::MissingTimestamp => {
                write!(f, "entry encountered before any timestamp was set")
            }
            FormatError::ShortRead(what) => {
                write!(f, "unexpected end of stream while reading {}", what)
            }
            FormatError::Truncated => write!(f, "finalized file is truncated or has trailing data"),
            FormatError::StringTooLong { len, remaining } => write!(
                f,
                "string length {} exceeds {} remaining bytes",
                len, remaining
            ),
            FormatError::InvalidChannelIdRange(id) => {
                write!(f, "channel id {} out of range for its entry type", id)
            }
        }
    }
}

impl std::error::Error for FormatError {}

/// A problem with a query request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The window end precedes its start.
    WindowInvalid { start_ms: i64, end_ms: i64 },
    /// The caller cancelled the query before it completed.
    Cancelled,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::WindowInvalid { start_ms, end_ms } => {
                write!(f, "invalid window: end {} < start {}", end_ms, start_ms)
            }
            QueryError::Cancelled => write!(f, "query cancelled"),
        }
    }
}

impl std::error::Error for QueryError {}

/// Crate-level error.
#[derive(Debug)]
pub enum Error {
    /// A format error, located in a specific file at a specific byte offset.
    Format {
        path: PathBuf,
        offset: u64,
        source: FormatError,
    },
    /// An underlying read, write or lock failure.
    Io(io::Error),
    /// A query-level failure.
    Query(QueryError),
    /// An append request the writer rejected before touching the file,
    /// e.g. an unknown format id or a format conflict with the existing
    /// definition of the series.
    Append {
        series: String,
        source: FormatError,
    },
    /// Append attempted on a day file that has been finalized.
    Finalized(PathBuf),
    /// Another writer holds the exclusive append lock on the day file.
    WriterActive(PathBuf),
    /// The value cannot be encoded in the channel's format.
    ValueMismatch { series: String, format_id: u8 },
    /// A channel name longer than the 255 bytes the definition entry allows.
    NameTooLong(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Format {
                path,
                offset,
                source,
            } => write!(f, "{} at offset {} in {}", source, offset, path.display()),
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Query(err) => write!(f, "{}", err),
            Error::Append { series, source } => {
                write!(f, "cannot append to series {:?}: {}", series, source)
            }
            Error::Finalized(path) => {
                write!(f, "day file {} is finalized, no appends", path.display())
            }
            Error::WriterActive(path) => write!(
                f,
                "another writer holds the append lock on {}",
                path.display()
            ),
            Error::ValueMismatch { series, format_id } => write!(
                f,
                "value for series {:?} cannot be encoded with format id 0x{:02x}",
                series, format_id
            ),
            Error::NameTooLong(len) => {
                write!(f, "series name too long ({} bytes > 255)", len)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Format { source, .. } => Some(source),
            Error::Append { source, .. } => Some(source),
            Error::Io(err) => Some(err),
            Error::Query(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<QueryError> for Error {
    fn from(value: QueryError) -> Self {
        Error::Query(value)
    }
}

impl Error {
    /// Attaches file context to a bare [`FormatError`].
    pub(crate) fn format_at(path: &std::path::Path, offset: u64, source: FormatError) -> Self {
        Error::Format {
            path: path.to_path_buf(),
            offset,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
