use thiserror::Error;

/// Error taxonomy for the storage engine (spec §7).
///
/// `NotFound` conditions are expressed as `Option` at call sites per the
/// propagation policy and do not appear here; everything that does surface
/// as an error rolls up into one of these kinds.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("BSON error: {0}")]
    Bson(#[from] bson::ser::Error),

    #[error("BSON decode error: {0}")]
    BsonDe(#[from] bson::de::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("document too large: {0} bytes exceeds the serialization step ladder")]
    TooLarge(usize),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("no such collection: {0}")]
    NoSuchCollection(String),

    #[error("collection already exists: {0}")]
    CollectionAlreadyExists(String),
}

pub type DbResult<T> = Result<T, DbError>;
