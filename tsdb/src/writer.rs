//! Day-file writer / appender.
//!
//! One [`DayWriter`] exclusively owns one day file. Opening scans the
//! existing byte stream to rebuild the channel registry and the last
//! timestamp, truncates a partial tail left by a crashed append, and
//! refuses files that were already finalized. Appends emit the smallest
//! legal encoding: a channel definition only on first use of a name, a
//! time entry only when the timestamp moved (narrowest relative form that
//! fits, absolute as the fallback), then the value entry itself.
//!
//! Durability: entries reach the kernel on every append in a single
//! write; `fsync` happens on [`sync`](DayWriter::sync), `close` and
//! `finalize`. Losing at most the last in-flight entry on a crash is
//! accepted, and both readers and the next writer recover from a torn
//! tail by stopping at the last complete entry.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};

use crate::codec::{self, Cursor};
use crate::decoder::{put_channel_definition, StreamDecoder};
use crate::error::{Error, FormatError, Result};
use crate::format::{
    self, FormatKind, ENTRY_TIME_ABSOLUTE, ENTRY_TIME_REL_16, ENTRY_TIME_REL_24, ENTRY_TIME_REL_32,
    ENTRY_TIME_REL_8, ENTRY_VALUE_WIDE, HEADER_LEN,
};
use crate::lock;
use crate::model::{ChannelId, Record, Value, MAX_NARROW_CHANNEL_ID};
use crate::registry::ChannelRegistry;

/// Exclusive appender for one day file.
pub struct DayWriter {
    path: PathBuf,
    file: File,
    /// Holds the advisory writer lock for as long as the writer lives.
    _lock_file: File,
    registry: ChannelRegistry,
    last_ts: Option<i64>,
    /// Set after a failed write; the next append re-scans the file before
    /// trusting the cached registry and timestamp again.
    needs_rescan: bool,
}

impl DayWriter {
    /// Opens or creates the day file at `path`.
    ///
    /// A fresh file gets the header. An existing file is scanned to
    /// rebuild the registry and last-timestamp state; a torn trailing
    /// entry is truncated away, dense 8-bit allocation is verified, and a
    /// finalized file is rejected with [`Error::Finalized`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        if !lock::try_lock_exclusive(&lock_file)? {
            return Err(Error::WriterActive(path));
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut writer = Self {
            path,
            file,
            _lock_file: lock_file,
            registry: ChannelRegistry::new(),
            last_ts: None,
            needs_rescan: false,
        };
        writer.rescan()?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The timestamp in effect after the last entry, as a reader would see.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_ts
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Appends one sample with the smallest legal encoding.
    pub fn append(
        &mut self,
        name: &str,
        format_id: u8,
        timestamp_ms: i64,
        value: &Value,
    ) -> Result<()> {
        if self.needs_rescan {
            self.rescan()?;
        }
        if name.len() > usize::from(u8::MAX) {
            return Err(Error::NameTooLong(name.len()));
        }
        let kind = FormatKind::from_id(format_id).map_err(|source| Error::Append {
            series: name.to_string(),
            source,
        })?;

        // Encode the payload before allocating anything, so a rejected
        // value leaves no trace in the registry or the file.
        let mut payload = BytesMut::new();
        if !kind.encode(value, &mut payload) {
            return Err(Error::ValueMismatch {
                series: name.to_string(),
                format_id,
            });
        }

        let (channel_id, newly_defined) =
            self.registry
                .allocate(name, format_id)
                .map_err(|source| Error::Append {
                    series: name.to_string(),
                    source,
                })?;

        let mut entry = BytesMut::new();
        if newly_defined {
            put_channel_definition(&mut entry, channel_id, format_id, name);
        }
        put_time_entry(&mut entry, self.last_ts, timestamp_ms);
        if channel_id <= ChannelId::from(MAX_NARROW_CHANNEL_ID) {
            entry.put_u8(channel_id as u8);
        } else {
            entry.put_u8(ENTRY_VALUE_WIDE);
            entry.put_u16_le(channel_id);
        }
        entry.put_slice(&payload);

        if let Err(err) = self.file.write_all(&entry) {
            self.needs_rescan = true;
            return Err(err.into());
        }
        self.last_ts = Some(timestamp_ms);
        Ok(())
    }

    /// Durability barrier without closing the writer.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Appends the end-of-file marker and syncs. One-way: the writer is
    /// consumed and the file accepts no further appends, ever.
    pub fn finalize(mut self) -> Result<()> {
        if self.needs_rescan {
            self.rescan()?;
        }
        self.file.write_all(&[format::ENTRY_EOF])?;
        self.file.sync_all()?;
        tracing::info!(path = %self.path.display(), "finalized day file");
        Ok(())
    }

    /// Syncs and closes without finalizing; the file stays appendable.
    pub fn close(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Rebuilds registry and timestamp state from the bytes on disk and
    /// truncates back to the last complete entry.
    fn rescan(&mut self) -> Result<()> {
        self.registry = ChannelRegistry::new();
        self.last_ts = None;

        self.file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        self.file.read_to_end(&mut data)?;

        if data.is_empty() {
            let mut header = BytesMut::new();
            format::write_header(&mut header);
            self.file.write_all(&header)?;
            self.needs_rescan = false;
            tracing::debug!(path = %self.path.display(), "created day file");
            return Ok(());
        }

        format::validate_header(&data).map_err(|e| Error::format_at(&self.path, 0, e))?;

        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data[HEADER_LEN..]);
        let consumed;
        loop {
            let entry_start = cur.position();
            match decoder.next_record(&mut cur) {
                Ok(Some(Record::EndOfFile)) => {
                    return Err(Error::Finalized(self.path.clone()));
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    consumed = cur.position();
                    break;
                }
                // A torn append can only manifest as a short read; back out
                // to the entry boundary and drop the tail.
                Err(FormatError::ShortRead(_)) => {
                    consumed = entry_start;
                    break;
                }
                Err(source) => {
                    return Err(Error::format_at(
                        &self.path,
                        (HEADER_LEN + entry_start) as u64,
                        source,
                    ));
                }
            }
        }

        let last_ts = decoder.current_timestamp();
        let registry = decoder.into_registry();
        registry
            .verify_dense()
            .map_err(|e| Error::format_at(&self.path, HEADER_LEN as u64, e))?;

        let valid_len = (HEADER_LEN + consumed) as u64;
        if valid_len < data.len() as u64 {
            tracing::warn!(
                path = %self.path.display(),
                dropped = data.len() as u64 - valid_len,
                "truncating torn tail from crashed append"
            );
            self.file.set_len(valid_len)?;
        }
        self.file.seek(SeekFrom::End(0))?;

        self.registry = registry;
        self.last_ts = last_ts;
        self.needs_rescan = false;
        Ok(())
    }
}

/// Emits the smallest time entry that moves `last_ts` to `ts`, or nothing
/// when the timestamp is unchanged.
fn put_time_entry(buf: &mut BytesMut, last_ts: Option<i64>, ts: i64) {
    let delta = match last_ts {
        Some(last) if ts >= last => ts - last,
        // First entry of the file, or the clock went backward.
        _ => {
            put_absolute_time(buf, ts);
            return;
        }
    };
    if delta == 0 {
        return;
    }
    if delta <= 0xff {
        buf.put_u8(ENTRY_TIME_REL_8);
        buf.put_u8(delta as u8);
    } else if delta <= 0xffff {
        buf.put_u8(ENTRY_TIME_REL_16);
        buf.put_u16_le(delta as u16);
    } else if delta <= 0xff_ffff {
        buf.put_u8(ENTRY_TIME_REL_24);
        codec::put_u24(buf, delta as u32);
    } else if delta <= 0xffff_ffff {
        buf.put_u8(ENTRY_TIME_REL_32);
        buf.put_u32_le(delta as u32);
    } else {
        // No relative form carries more than 32 bits.
        put_absolute_time(buf, ts);
    }
}

fn put_absolute_time(buf: &mut BytesMut, ts: i64) {
    buf.put_u8(ENTRY_TIME_ABSOLUTE);
    buf.put_u64_le(ts as u64);
}
