//! Per-file channel registry.
//!
//! Maps channel ids to `(name, format_id)` for one open day file. The
//! registry is rebuilt from the channel-definition entries every time a
//! file is opened and is never persisted separately.
//!
//! The 8-bit id range `0x00..=0xef` is a flat arena; the 16-bit range
//! `0xf0..=0xffff` is an overflow map that a writer only reaches after all
//! 240 narrow ids are taken. Readers accept any non-duplicate definition
//! sequence; the writer additionally verifies dense narrow allocation
//! before it continues an existing file.

use std::collections::{BTreeMap, HashMap};

use crate::error::FormatError;
use crate::model::{ChannelId, MAX_NARROW_CHANNEL_ID};

/// First channel id of the 16-bit overflow range.
pub(crate) const FIRST_WIDE_CHANNEL_ID: ChannelId = MAX_NARROW_CHANNEL_ID as ChannelId + 1;

/// One channel definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDef {
    pub format_id: u8,
    pub name: String,
}

/// The in-memory channel table of one open file.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    /// Arena for ids `0x00..=0xef`, indexed by id.
    narrow: Vec<Option<ChannelDef>>,
    /// Overflow map for ids `0xf0..=0xffff`.
    wide: BTreeMap<ChannelId, ChannelDef>,
    /// Reverse index, name to id. Last definition wins on (corrupt)
    /// duplicate names.
    by_name: HashMap<String, ChannelId>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a definition observed in the stream.
    ///
    /// Fails with [`FormatError::DuplicateChannel`] when the id already has
    /// one. Range fitness of the id for its entry type is the decoder's
    /// concern; any id is accepted here.
    pub fn define(
        &mut self,
        channel_id: ChannelId,
        format_id: u8,
        name: &str,
    ) -> Result<(), FormatError> {
        let def = ChannelDef {
            format_id,
            name: name.to_string(),
        };
        if channel_id <= ChannelId::from(MAX_NARROW_CHANNEL_ID) {
            let idx = channel_id as usize;
            if idx >= self.narrow.len() {
                self.narrow.resize(idx + 1, None);
            }
            if self.narrow[idx].is_some() {
                return Err(FormatError::DuplicateChannel(channel_id));
            }
            self.narrow[idx] = Some(def);
        } else {
            if self.wide.contains_key(&channel_id) {
                return Err(FormatError::DuplicateChannel(channel_id));
            }
            self.wide.insert(channel_id, def);
        }
        self.by_name.insert(name.to_string(), channel_id);
        Ok(())
    }

    /// Resolves a channel id to its definition.
    pub fn lookup(&self, channel_id: ChannelId) -> Result<&ChannelDef, FormatError> {
        let def = if channel_id <= ChannelId::from(MAX_NARROW_CHANNEL_ID) {
            self.narrow.get(channel_id as usize).and_then(Option::as_ref)
        } else {
            self.wide.get(&channel_id)
        };
        def.ok_or(FormatError::UnknownChannel(channel_id))
    }

    /// The id a name is currently bound to, if any.
    pub fn channel_by_name(&self, name: &str) -> Option<(ChannelId, &ChannelDef)> {
        let id = *self.by_name.get(name)?;
        self.lookup(id).ok().map(|def| (id, def))
    }

    /// Writer-side id allocation.
    ///
    /// Returns `(id, newly_defined)`. Idempotent for a name already defined
    /// with the same format id; a format mismatch is
    /// [`FormatError::DuplicateChannel`]. New names take the smallest
    /// unused 8-bit id, or the smallest unused 16-bit id once all 240
    /// narrow ids are in use.
    pub fn allocate(
        &mut self,
        name: &str,
        format_id: u8,
    ) -> Result<(ChannelId, bool), FormatError> {
        if let Some((id, def)) = self.channel_by_name(name) {
            if def.format_id != format_id {
                return Err(FormatError::DuplicateChannel(id));
            }
            return Ok((id, false));
        }

        let id = self.smallest_unused_id()?;
        self.define(id, format_id, name)?;
        Ok((id, true))
    }

    fn smallest_unused_id(&self) -> Result<ChannelId, FormatError> {
        for id in 0..=ChannelId::from(MAX_NARROW_CHANNEL_ID) {
            match self.narrow.get(id as usize) {
                Some(Some(_)) => continue,
                _ => return Ok(id),
            }
        }
        let mut id = FIRST_WIDE_CHANNEL_ID;
        loop {
            if !self.wide.contains_key(&id) {
                return Ok(id);
            }
            if id == ChannelId::MAX {
                return Err(FormatError::InvalidChannelIdRange(id));
            }
            id += 1;
        }
    }

    /// Verifies the writer invariant: narrow ids form `{0, 1, .., k-1}` and
    /// wide ids only exist once all narrow ids do.
    ///
    /// Reports the first skipped id.
    pub fn verify_dense(&self) -> Result<(), FormatError> {
        let mut first_gap: Option<ChannelId> = None;
        for (id, slot) in self.narrow.iter().enumerate() {
            match slot {
                Some(_) => {
                    if let Some(gap) = first_gap {
                        return Err(FormatError::DenseAllocation(gap as u8));
                    }
                }
                None => {
                    if first_gap.is_none() {
                        first_gap = Some(id as ChannelId);
                    }
                }
            }
        }
        if first_gap.is_none() && self.narrow.len() <= MAX_NARROW_CHANNEL_ID as usize {
            first_gap = Some(self.narrow.len() as ChannelId);
        }
        if !self.wide.is_empty() {
            if let Some(gap) = first_gap {
                return Err(FormatError::DenseAllocation(gap as u8));
            }
        }
        Ok(())
    }

    /// Number of defined channels.
    pub fn len(&self) -> usize {
        self.narrow.iter().filter(|slot| slot.is_some()).count() + self.wide.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates `(id, def)` in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &ChannelDef)> {
        self.narrow
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|def| (id as ChannelId, def)))
            .chain(self.wide.iter().map(|(id, def)| (*id, def)))
    }
}
