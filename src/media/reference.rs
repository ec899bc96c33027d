//! Media references and slot mapping
//!
//! A `MediaReference` is decided when media is written and carries enough
//! shape information to resolve it without a lookup table. The string forms
//! stay compatible with ids saved before references were typed:
//!
//! | form                    | variant    |
//! |-------------------------|------------|
//! | `data:...`              | `Inline`   |
//! | `http...`, `blob:...`   | `External` |
//! | `chunked:{id}:{count}`  | `Chunked`  |
//! | any other non-empty id  | `Record`   |

use crate::error::{Error, Result};
use crate::store::MediaRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Prefix of the chunked reference form
pub const CHUNKED_PREFIX: &str = "chunked:";

/// Reference to a piece of media
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaReference {
    /// Self-contained payload (data URI)
    Inline(String),
    /// Opaque URL resolved by the consumer
    External(String),
    /// Unfragmented record stored under a generated id
    Record(String),
    /// Manifest `id` declaring `fragment_count` fragments
    Chunked { id: String, fragment_count: usize },
}

impl MediaReference {
    /// Classify a stored reference string
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidReference("empty reference".to_string()));
        }

        if s.starts_with("data:") {
            return Ok(MediaReference::Inline(s.to_string()));
        }
        if s.starts_with("http") || s.starts_with("blob:") {
            return Ok(MediaReference::External(s.to_string()));
        }
        if is_chunked_form(s) {
            let (id, fragment_count) = parse_chunked(s)?;
            return Ok(MediaReference::Chunked { id, fragment_count });
        }

        Ok(MediaReference::Record(s.to_string()))
    }

    /// Id of the backing record, if the media lives in the store
    pub fn stored_id(&self) -> Option<&str> {
        match self {
            MediaReference::Record(id) | MediaReference::Chunked { id, .. } => Some(id),
            MediaReference::Inline(_) | MediaReference::External(_) => None,
        }
    }

    /// Whether resolving this reference needs no store access
    pub fn is_direct(&self) -> bool {
        matches!(self, MediaReference::Inline(_) | MediaReference::External(_))
    }
}

impl fmt::Display for MediaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaReference::Inline(payload) => f.write_str(payload),
            MediaReference::External(url) => f.write_str(url),
            MediaReference::Record(id) => f.write_str(id),
            MediaReference::Chunked { id, fragment_count } => {
                write!(f, "{}{}:{}", CHUNKED_PREFIX, id, fragment_count)
            }
        }
    }
}

impl FromStr for MediaReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for MediaReference {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MediaReference {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        MediaReference::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Whether `s` uses the `chunked:{id}:{count}` form
pub fn is_chunked_form(s: &str) -> bool {
    s.starts_with(CHUNKED_PREFIX)
}

/// Parse `chunked:{id}:{count}` into its id and fragment count
pub fn parse_chunked(s: &str) -> Result<(String, usize)> {
    let rest = s
        .strip_prefix(CHUNKED_PREFIX)
        .ok_or_else(|| Error::InvalidReference(format!("not a chunked reference: {}", s)))?;

    let (id, count) = rest
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidReference(format!("missing fragment count: {}", s)))?;

    if id.is_empty() {
        return Err(Error::InvalidReference(format!("missing media id: {}", s)));
    }

    let count: usize = count
        .parse()
        .map_err(|_| Error::InvalidReference(format!("bad fragment count: {}", s)))?;
    if count == 0 {
        return Err(Error::InvalidReference(format!("fragment count must be >= 1: {}", s)));
    }

    Ok((id.to_string(), count))
}

/// What the manifests collection holds for one id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEntry {
    /// Direct record with its payload
    Direct(String),
    /// Chunk manifest with its declared fragment count
    Chunked { fragment_count: usize },
}

impl From<&MediaRecord> for IndexEntry {
    fn from(record: &MediaRecord) -> Self {
        match record {
            MediaRecord::Direct(r) => IndexEntry::Direct(r.payload.clone()),
            MediaRecord::Chunked(m) => IndexEntry::Chunked {
                fragment_count: m.fragment_count,
            },
        }
    }
}

/// Snapshot of the manifests collection, id → entry
#[derive(Debug, Clone, Default)]
pub struct ManifestIndex {
    entries: HashMap<String, IndexEntry>,
}

impl ManifestIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from listed records
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a (String, MediaRecord)>) -> Self {
        let entries = records
            .into_iter()
            .map(|(id, record)| (id.clone(), IndexEntry::from(record)))
            .collect();
        ManifestIndex { entries }
    }

    /// Add or replace an entry
    pub fn insert(&mut self, id: impl Into<String>, entry: IndexEntry) {
        self.entries.insert(id.into(), entry);
    }

    /// Remove an entry
    pub fn remove(&mut self, id: &str) -> Option<IndexEntry> {
        self.entries.remove(id)
    }

    /// Look up an entry
    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }
}

/// Classifies raw stored identifiers into references
///
/// Only needed for ids saved as bare strings; references produced by the
/// writer already carry their shape.
#[derive(Debug, Clone, Default)]
pub struct ReferenceResolver {
    index: ManifestIndex,
}

impl ReferenceResolver {
    /// Create a resolver over an index snapshot
    pub fn new(index: ManifestIndex) -> Self {
        ReferenceResolver { index }
    }

    /// The index in use
    pub fn index(&self) -> &ManifestIndex {
        &self.index
    }

    /// Replace the index snapshot
    pub fn set_index(&mut self, index: ManifestIndex) {
        self.index = index;
    }

    /// Map a raw stored id to a reference
    ///
    /// Returns None for an empty id or a bare id the index does not know.
    pub fn to_reference(&self, raw_id: &str) -> Option<MediaReference> {
        match MediaReference::parse(raw_id).ok()? {
            MediaReference::Record(id) => match self.index.get(&id)? {
                IndexEntry::Direct(payload) => MediaReference::parse(payload).ok(),
                IndexEntry::Chunked { fragment_count } => Some(MediaReference::Chunked {
                    id,
                    fragment_count: *fragment_count,
                }),
            },
            other => Some(other),
        }
    }

    /// Whether `s` uses the chunked form
    pub fn is_chunked_form(&self, s: &str) -> bool {
        is_chunked_form(s)
    }

    /// Parse the chunked form
    pub fn parse_chunked(&self, s: &str) -> Result<(String, usize)> {
        parse_chunked(s)
    }
}

/// Logical media slots ("slider/2", "post/abc/thumbnail") and their references
///
/// Slots hold weak references: deleting media does not clear them, callers
/// use `detach_reference` to update their state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct MediaSlots {
    slots: BTreeMap<String, MediaReference>,
}

impl MediaSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `slot` at `reference`, returning the previous reference
    pub fn assign(&mut self, slot: impl Into<String>, reference: MediaReference) -> Option<MediaReference> {
        self.slots.insert(slot.into(), reference)
    }

    /// Reference currently held by `slot`
    pub fn get(&self, slot: &str) -> Option<&MediaReference> {
        self.slots.get(slot)
    }

    /// Empty `slot`, returning what it held
    pub fn release(&mut self, slot: &str) -> Option<MediaReference> {
        self.slots.remove(slot)
    }

    /// Slots holding `reference`
    pub fn slots_for(&self, reference: &MediaReference) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|(_, r)| same_media(r, reference))
            .map(|(slot, _)| slot.as_str())
            .collect()
    }

    /// Empty every slot holding `reference`, returning the slot names
    pub fn detach_reference(&mut self, reference: &MediaReference) -> Vec<String> {
        let detached: Vec<String> = self
            .slots_for(reference)
            .into_iter()
            .map(str::to_string)
            .collect();
        for slot in &detached {
            self.slots.remove(slot);
        }
        detached
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MediaReference)> {
        self.slots.iter()
    }
}

/// Two references name the same media when their stored ids match
fn same_media(a: &MediaReference, b: &MediaReference) -> bool {
    match (a.stored_id(), b.stored_id()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}
