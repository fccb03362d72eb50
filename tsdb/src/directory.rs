//! Day-file directory and the per-file scan engine.
//!
//! Day files are named `data_YYYY-MM-DD.tsdb` after the UTC day they
//! cover, with the boundary at `00:00:00.000Z`. A range query enumerates
//! the files whose date intersects the window and scans each one
//! independently; channel ids never cross files, names are the cross-file
//! key.
//!
//! [`scan_file`] is the read-side entry point: blocking, crash-tolerant,
//! cancellable at entry boundaries. Format errors in the trailing 64 KiB
//! of an unfinalized file are treated as end-of-stream (a crashed append
//! leaves exactly such a tail); anywhere else they are fatal and carry the
//! file path and byte offset.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;

use crate::codec::Cursor;
use crate::decoder::StreamDecoder;
use crate::error::{Error, FormatError, QueryError, Result};
use crate::format::{self, HEADER_LEN};
use crate::lock;
use crate::model::{Record, Sample};

const FILE_PREFIX: &str = "data_";
const FILE_SUFFIX: &str = ".tsdb";

/// Crashed-append tolerance window at the tail of an unfinalized file.
const TRAILING_TOLERANCE: usize = 64 * 1024;

/// The UTC calendar day a timestamp belongs to.
pub fn day_of_timestamp_ms(ts_ms: i64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

/// `data_YYYY-MM-DD.tsdb` for a UTC day.
pub fn file_name_for_day(day: NaiveDate) -> String {
    format!("{}{}{}", FILE_PREFIX, day.format("%Y-%m-%d"), FILE_SUFFIX)
}

pub fn path_for_day(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(file_name_for_day(day))
}

/// Parses a day-file name back to its UTC day. Returns `None` for
/// anything that is not a day file.
pub fn parse_file_name(name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// A day file discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayFile {
    pub day: NaiveDate,
    pub path: PathBuf,
}

impl DayFile {
    /// The bare file name, as reported back in query responses.
    pub fn file_name(&self) -> String {
        file_name_for_day(self.day)
    }
}

/// Enumerates the day files whose date intersects `[start_ms, end_ms]`,
/// ascending by date. Both ends are inclusive; a missing data directory
/// yields an empty list.
pub fn candidate_files(dir: &Path, start_ms: i64, end_ms: i64) -> Result<Vec<DayFile>> {
    let start_day = day_of_timestamp_ms(start_ms);
    let end_day = day_of_timestamp_ms(end_ms);

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(day) = parse_file_name(name) else {
            continue;
        };
        if day >= start_day && day <= end_day && entry.file_type()?.is_file() {
            files.push(DayFile {
                day,
                path: entry.path(),
            });
        }
    }
    files.sort_by_key(|f| f.day);
    Ok(files)
}

/// Everything a range query needs from one file: samples per series name,
/// the first format id each name was defined with, and whether the file
/// carries the end-of-file marker.
#[derive(Debug, Default)]
pub struct ScannedFile {
    pub series: HashMap<String, Vec<Sample>>,
    pub formats: HashMap<String, u8>,
    pub finalized: bool,
}

/// Reads and decodes a whole day file.
///
/// Takes a shared advisory lock for the duration of the read. Safe to run
/// against the file the writer is currently appending to: the scan stops
/// at the last complete entry.
pub fn scan_file(path: &Path, cancel: Option<&CancellationToken>) -> Result<ScannedFile> {
    let mut file = File::open(path)?;
    lock::lock_shared(&file)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    scan_bytes(path, &data, cancel)
}

/// Decodes a day-file image already in memory.
pub(crate) fn scan_bytes(
    path: &Path,
    data: &[u8],
    cancel: Option<&CancellationToken>,
) -> Result<ScannedFile> {
    format::validate_header(data).map_err(|e| Error::format_at(path, 0, e))?;

    let mut out = ScannedFile::default();
    let mut decoder = StreamDecoder::new();
    let mut cur = Cursor::new(&data[HEADER_LEN..]);

    loop {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(QueryError::Cancelled.into());
            }
        }
        let entry_start = cur.position();
        match decoder.next_record(&mut cur) {
            Ok(Some(Record::EndOfFile)) => {
                out.finalized = true;
                if !cur.is_empty() {
                    return Err(Error::format_at(
                        path,
                        (HEADER_LEN + cur.position()) as u64,
                        FormatError::Truncated,
                    ));
                }
                break;
            }
            Ok(Some(Record::ChannelDefined {
                format_id, name, ..
            })) => {
                out.formats.entry(name).or_insert(format_id);
            }
            Ok(Some(Record::Value {
                channel_id,
                timestamp_ms,
                value,
            })) => {
                let abs = (HEADER_LEN + entry_start) as u64;
                let name = decoder
                    .registry()
                    .lookup(channel_id)
                    .map_err(|e| Error::format_at(path, abs, e))?
                    .name
                    .clone();
                out.series
                    .entry(name)
                    .or_default()
                    .push(Sample::new(timestamp_ms, value));
            }
            Ok(Some(Record::Timestamp { .. })) => {}
            Ok(None) => break,
            Err(source) => {
                let abs = HEADER_LEN + entry_start;
                if data.len() - abs <= TRAILING_TOLERANCE {
                    // Not yet written, as far as readers are concerned.
                    cur.rewind_to(entry_start);
                    break;
                }
                return Err(Error::format_at(path, abs as u64, source));
            }
        }
    }

    Ok(out)
}
