//! Stream decoder.
//!
//! The entry stream is stateful: time entries set or advance the current
//! timestamp, channel definitions extend the registry, and value entries
//! depend on both. [`StreamDecoder`] keeps that state explicit and yields
//! one [`Record`] per call.
//!
//! The decoder is pure and synchronous. It has no notion of files or
//! finalization; end-of-input handling, the crashed-append tolerance rule
//! and EOF-marker placement checks live in the file scan layer
//! ([`crate::directory`]).

use crate::codec::Cursor;
use crate::error::FormatError;
use crate::format::{
    FormatKind, ENTRY_CHANNEL_DEF_16, ENTRY_CHANNEL_DEF_8, ENTRY_EOF, ENTRY_TIME_ABSOLUTE,
    ENTRY_TIME_REL_16, ENTRY_TIME_REL_24, ENTRY_TIME_REL_32, ENTRY_TIME_REL_8, ENTRY_VALUE_WIDE,
};
use crate::model::{ChannelId, Record, MAX_NARROW_CHANNEL_ID};
use crate::registry::{ChannelRegistry, FIRST_WIDE_CHANNEL_ID};

/// Decoder state threaded through the entry stream of one file.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    registry: ChannelRegistry,
    current_ts: Option<i64>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The timestamp in effect for the next value entry.
    pub fn current_timestamp(&self) -> Option<i64> {
        self.current_ts
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Hands the registry to a writer continuing this file.
    pub fn into_registry(self) -> ChannelRegistry {
        self.registry
    }

    /// Decodes the next entry, or returns `None` at clean end of input.
    ///
    /// On an error the cursor is left mid-entry; callers that tolerate
    /// partial tails remember the entry start and rewind.
    pub fn next_record(&mut self, cur: &mut Cursor<'_>) -> Result<Option<Record>, FormatError> {
        if cur.is_empty() {
            return Ok(None);
        }
        let entry_type = cur.read_u8("entry type")?;

        match entry_type {
            0x00..=MAX_NARROW_CHANNEL_ID => {
                self.decode_value(ChannelId::from(entry_type), cur).map(Some)
            }
            ENTRY_VALUE_WIDE => {
                let channel_id = cur.read_u16("16-bit channel id")?;
                if channel_id < FIRST_WIDE_CHANNEL_ID {
                    return Err(FormatError::InvalidChannelIdRange(channel_id));
                }
                self.decode_value(channel_id, cur).map(Some)
            }
            ENTRY_TIME_ABSOLUTE => {
                let ts = cur.read_u64("absolute timestamp")? as i64;
                self.current_ts = Some(ts);
                Ok(Some(Record::Timestamp { timestamp_ms: ts }))
            }
            ENTRY_TIME_REL_8 => {
                let delta = i64::from(cur.read_u8("relative timestamp (8-bit)")?);
                self.advance_time(delta).map(Some)
            }
            ENTRY_TIME_REL_16 => {
                let delta = i64::from(cur.read_u16("relative timestamp (16-bit)")?);
                self.advance_time(delta).map(Some)
            }
            ENTRY_TIME_REL_24 => {
                let delta = i64::from(cur.read_u24("relative timestamp (24-bit)")?);
                self.advance_time(delta).map(Some)
            }
            ENTRY_TIME_REL_32 => {
                let delta = i64::from(cur.read_u32("relative timestamp (32-bit)")?);
                self.advance_time(delta).map(Some)
            }
            ENTRY_CHANNEL_DEF_8 => {
                let channel_id = ChannelId::from(cur.read_u8("8-bit channel id")?);
                if channel_id > ChannelId::from(MAX_NARROW_CHANNEL_ID) {
                    return Err(FormatError::InvalidChannelIdRange(channel_id));
                }
                self.decode_definition(channel_id, cur).map(Some)
            }
            ENTRY_CHANNEL_DEF_16 => {
                let channel_id = cur.read_u16("16-bit channel id")?;
                if channel_id < FIRST_WIDE_CHANNEL_ID {
                    return Err(FormatError::InvalidChannelIdRange(channel_id));
                }
                self.decode_definition(channel_id, cur).map(Some)
            }
            ENTRY_EOF => Ok(Some(Record::EndOfFile)),
            other => Err(FormatError::UnknownEntryType(other)),
        }
    }

    fn advance_time(&mut self, delta: i64) -> Result<Record, FormatError> {
        let Some(current) = self.current_ts else {
            return Err(FormatError::MissingTimestamp);
        };
        let ts = current + delta;
        self.current_ts = Some(ts);
        Ok(Record::Timestamp { timestamp_ms: ts })
    }

    fn decode_value(
        &mut self,
        channel_id: ChannelId,
        cur: &mut Cursor<'_>,
    ) -> Result<Record, FormatError> {
        let Some(timestamp_ms) = self.current_ts else {
            return Err(FormatError::MissingTimestamp);
        };
        let def = self.registry.lookup(channel_id)?;
        let kind = FormatKind::from_id(def.format_id)?;
        let value = kind.decode(cur)?;
        Ok(Record::Value {
            channel_id,
            timestamp_ms,
            value,
        })
    }

    fn decode_definition(
        &mut self,
        channel_id: ChannelId,
        cur: &mut Cursor<'_>,
    ) -> Result<Record, FormatError> {
        let format_id = cur.read_u8("format id")?;
        let name_len = cur.read_u8("name length")?;
        let raw = cur.read_bytes(usize::from(name_len), "channel name")?;
        let name = String::from_utf8_lossy(raw).into_owned();
        self.registry.define(channel_id, format_id, &name)?;
        Ok(Record::ChannelDefined {
            channel_id,
            format_id,
            name,
        })
    }
}

/// Encodes a channel-definition entry. Shared with the writer so both
/// sides agree on the layout byte for byte.
pub(crate) fn put_channel_definition(
    buf: &mut bytes::BytesMut,
    channel_id: ChannelId,
    format_id: u8,
    name: &str,
) {
    use bytes::BufMut;

    let name_bytes = name.as_bytes();
    debug_assert!(name_bytes.len() <= usize::from(u8::MAX));
    if channel_id <= ChannelId::from(MAX_NARROW_CHANNEL_ID) {
        buf.put_u8(ENTRY_CHANNEL_DEF_8);
        buf.put_u8(channel_id as u8);
    } else {
        buf.put_u8(ENTRY_CHANNEL_DEF_16);
        buf.put_u16_le(channel_id);
    }
    buf.put_u8(format_id);
    buf.put_u8(name_bytes.len() as u8);
    buf.put_slice(name_bytes);
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::model::Value;

    fn stream(build: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
        let mut buf = BytesMut::new();
        build(&mut buf);
        buf.to_vec()
    }

    fn drain(data: &[u8]) -> Vec<Record> {
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(data);
        let mut records = Vec::new();
        while let Some(record) = decoder.next_record(&mut cur).unwrap() {
            records.push(record);
        }
        records
    }

    #[test]
    fn should_decode_definition_time_and_value_sequence() {
        // given
        let data = stream(|buf| {
            put_channel_definition(buf, 0, 0x22, "temp");
            buf.put_u8(0xf0);
            buf.put_u64_le(1_700_000_000_000);
            buf.put_u8(0x00);
            buf.put_i16_le(2345);
        });

        // when
        let records = drain(&data);

        // then
        assert_eq!(
            records,
            vec![
                Record::ChannelDefined {
                    channel_id: 0,
                    format_id: 0x22,
                    name: "temp".to_string(),
                },
                Record::Timestamp {
                    timestamp_ms: 1_700_000_000_000,
                },
                Record::Value {
                    channel_id: 0,
                    timestamp_ms: 1_700_000_000_000,
                    value: Value::Double(23.45),
                },
            ]
        );
    }

    #[test]
    fn should_accumulate_relative_timestamps() {
        // given: absolute then +5ms (8-bit), +0x1234ms (16-bit)
        let data = stream(|buf| {
            buf.put_u8(0xf0);
            buf.put_u64_le(1_000);
            buf.put_u8(0xf1);
            buf.put_u8(5);
            buf.put_u8(0xf2);
            buf.put_u16_le(0x1234);
        });

        // when
        let records = drain(&data);

        // then
        assert_eq!(
            records,
            vec![
                Record::Timestamp { timestamp_ms: 1_000 },
                Record::Timestamp { timestamp_ms: 1_005 },
                Record::Timestamp {
                    timestamp_ms: 1_005 + 0x1234,
                },
            ]
        );
    }

    #[test]
    fn should_fail_value_before_timestamp() {
        // given: a defined channel but no time entry
        let data = stream(|buf| {
            put_channel_definition(buf, 0, 0x01, "a");
            buf.put_u8(0x00);
            buf.put_f64_le(1.0);
        });

        // when
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data);
        decoder.next_record(&mut cur).unwrap();
        let result = decoder.next_record(&mut cur);

        // then
        assert_eq!(result, Err(FormatError::MissingTimestamp));
    }

    #[test]
    fn should_fail_relative_time_before_absolute() {
        // given
        let data = stream(|buf| {
            buf.put_u8(0xf1);
            buf.put_u8(5);
        });

        // when
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data);
        let result = decoder.next_record(&mut cur);

        // then
        assert_eq!(result, Err(FormatError::MissingTimestamp));
    }

    #[test]
    fn should_fail_value_for_undefined_channel() {
        // given
        let data = stream(|buf| {
            buf.put_u8(0xf0);
            buf.put_u64_le(1_000);
            buf.put_u8(0x07);
        });

        // when
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data);
        decoder.next_record(&mut cur).unwrap();
        let result = decoder.next_record(&mut cur);

        // then
        assert_eq!(result, Err(FormatError::UnknownChannel(7)));
    }

    #[test]
    fn should_decode_wide_value_via_escape() {
        // given
        let data = stream(|buf| {
            put_channel_definition(buf, 0x0f00, 0x01, "wide");
            buf.put_u8(0xf0);
            buf.put_u64_le(1_000);
            buf.put_u8(0xff);
            buf.put_u16_le(0x0f00);
            buf.put_f64_le(2.5);
        });

        // when
        let records = drain(&data);

        // then
        assert_eq!(
            records[2],
            Record::Value {
                channel_id: 0x0f00,
                timestamp_ms: 1_000,
                value: Value::Double(2.5),
            }
        );
    }

    #[test]
    fn should_reject_wide_escape_with_narrow_id() {
        // given: 0xff escape carrying id 5
        let data = stream(|buf| {
            buf.put_u8(0xf0);
            buf.put_u64_le(1_000);
            buf.put_u8(0xff);
            buf.put_u16_le(5);
        });

        // when
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data);
        decoder.next_record(&mut cur).unwrap();
        let result = decoder.next_record(&mut cur);

        // then
        assert_eq!(result, Err(FormatError::InvalidChannelIdRange(5)));
    }

    #[test]
    fn should_reject_definition_ids_outside_their_range() {
        // 0xf5 with an id in the wide range
        let data = stream(|buf| {
            buf.put_u8(0xf5);
            buf.put_u8(0xf0);
            buf.put_u8(0x01);
            buf.put_u8(1);
            buf.put_u8(b'x');
        });
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data);
        assert_eq!(
            decoder.next_record(&mut cur),
            Err(FormatError::InvalidChannelIdRange(0xf0))
        );

        // 0xf6 with an id in the narrow range
        let data = stream(|buf| {
            buf.put_u8(0xf6);
            buf.put_u16_le(3);
            buf.put_u8(0x01);
            buf.put_u8(1);
            buf.put_u8(b'x');
        });
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data);
        assert_eq!(
            decoder.next_record(&mut cur),
            Err(FormatError::InvalidChannelIdRange(3))
        );
    }

    #[test]
    fn should_reject_duplicate_definition() {
        // given
        let data = stream(|buf| {
            put_channel_definition(buf, 0, 0x01, "a");
            put_channel_definition(buf, 0, 0x01, "a");
        });

        // when
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data);
        decoder.next_record(&mut cur).unwrap();
        let result = decoder.next_record(&mut cur);

        // then
        assert_eq!(result, Err(FormatError::DuplicateChannel(0)));
    }

    #[test]
    fn should_reject_unknown_entry_type() {
        // given: 0xf7 is outside the instruction set
        let data = [0xf7u8];
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data);

        // then
        assert_eq!(
            decoder.next_record(&mut cur),
            Err(FormatError::UnknownEntryType(0xf7))
        );
    }

    #[test]
    fn should_emit_end_of_file_record() {
        // given
        let data = [0xfeu8];
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data);

        // then
        assert_eq!(
            decoder.next_record(&mut cur).unwrap(),
            Some(Record::EndOfFile)
        );
    }

    #[test]
    fn should_return_none_at_clean_end() {
        // given
        let data = stream(|buf| {
            buf.put_u8(0xf0);
            buf.put_u64_le(1_000);
        });

        // when
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data);
        decoder.next_record(&mut cur).unwrap();

        // then
        assert_eq!(decoder.next_record(&mut cur).unwrap(), None);
    }

    #[test]
    fn should_leave_cursor_rewindable_on_partial_entry() {
        // given: a value entry whose payload is one byte short
        let data = stream(|buf| {
            put_channel_definition(buf, 0, 0x22, "temp");
            buf.put_u8(0xf0);
            buf.put_u64_le(1_000);
            buf.put_u8(0x00);
            buf.put_u8(0x29); // int16 payload cut in half
        });

        // when
        let mut decoder = StreamDecoder::new();
        let mut cur = Cursor::new(&data);
        decoder.next_record(&mut cur).unwrap();
        decoder.next_record(&mut cur).unwrap();
        let entry_start = cur.position();
        let result = decoder.next_record(&mut cur);

        // then: the caller can rewind to the entry boundary
        assert_eq!(result, Err(FormatError::ShortRead("int16")));
        cur.rewind_to(entry_start);
        assert_eq!(cur.position(), entry_start);
    }
}
