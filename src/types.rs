use bson::Document as BsonDocument;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use uuid::Uuid;

/// Fixed-size page identifier. Page 0 is always the file header.
pub type PageId = u32;

/// A wrapper around `uuid::Uuid` kept separate so the primary-key codec can
/// encode it into an `IndexKey` without reaching into `uuid` at every call
/// site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A wrapper for `bson::Document` with an explicit byte-codec `Serialize`
/// impl so it can ride inside bincode-encoded records without pulling BSON's
/// own (incompatible) wire format into the page/WAL formats.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializableBsonDocument(pub BsonDocument);

impl Serialize for SerializableBsonDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = bson::to_vec(&self.0).map_err(serde::ser::Error::custom)?;
        serializer.serialize_bytes(&bytes)
    }
}

impl<'de> Deserialize<'de> for SerializableBsonDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = serde_bytes::ByteBuf::deserialize(deserializer)?.into_vec();
        let doc = bson::from_slice(&bytes).map_err(serde::de::Error::custom)?;
        Ok(Self(doc))
    }
}

/// The location of a document inside a collection's slotted pages.
///
/// `page_id == 0` is the "none" sentinel; page 0 is always the Header page
/// and can never host a live document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLocation {
    pub page_id: PageId,
    pub slot_index: u16,
}

impl DocumentLocation {
    pub const NONE: DocumentLocation = DocumentLocation { page_id: 0, slot_index: 0 };

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.page_id == 0
    }
}

/// Page type tag carried in every page header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    Empty = 0,
    Header = 1,
    Collection = 2,
    Data = 3,
    Index = 4,
    FreeList = 5,
    Overflow = 6,
    Free = 7,
    Dictionary = 8,
    Schema = 9,
    Spatial = 10,
    Vector = 11,
    TimeSeries = 12,
}

impl PageType {
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Empty,
            1 => Self::Header,
            2 => Self::Collection,
            3 => Self::Data,
            4 => Self::Index,
            5 => Self::FreeList,
            6 => Self::Overflow,
            7 => Self::Free,
            8 => Self::Dictionary,
            9 => Self::Schema,
            10 => Self::Spatial,
            11 => Self::Vector,
            12 => Self::TimeSeries,
            _ => return None,
        })
    }
}

/// An opaque, totally-ordered byte string used as a B+Tree key.
///
/// Every key-carrying BSON type has a defined encoding (see `index_key.rs`)
/// such that lexicographic byte order matches the intended semantic order.
/// `MinKey`/`MaxKey` are represented out-of-band by this enum rather than as
/// magic byte sequences, so comparisons never depend on a reserved prefix
/// colliding with real data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKey {
    MinKey,
    Bytes(Vec<u8>),
    MaxKey,
}

impl IndexKey {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            IndexKey::Bytes(b) => b,
            IndexKey::MinKey | IndexKey::MaxKey => &[],
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexKey::MinKey, IndexKey::MinKey) => Ordering::Equal,
            (IndexKey::MinKey, _) => Ordering::Less,
            (_, IndexKey::MinKey) => Ordering::Greater,
            (IndexKey::MaxKey, IndexKey::MaxKey) => Ordering::Equal,
            (IndexKey::MaxKey, _) => Ordering::Greater,
            (_, IndexKey::MaxKey) => Ordering::Less,
            (IndexKey::Bytes(a), IndexKey::Bytes(b)) => a.cmp(b),
        }
    }
}

/// A leaf entry: key plus the document it points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: IndexKey,
    pub location: DocumentLocation,
}

/// Direction of a B+Tree range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

/// The kind of a secondary (or primary) index, used for dynamic dispatch at
/// the collection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    BTree,
    Hash,
    Unique,
    Vector,
    Spatial,
}
