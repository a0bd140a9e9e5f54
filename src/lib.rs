#![forbid(unsafe_code)]

//! An embedded, single-process document store: paged storage, a
//! write-ahead log, a B+Tree index engine shared by the primary and
//! secondary indexes, and a document collection layer on top. Two satellite
//! indexes (HNSW vector, R-Tree spatial) and an append-only time-series
//! chain share the page read/write contract without going through the
//! B+Tree.
//!
//! The crate exposes [`engine::StorageEngine`] and [`collection::DocumentCollection`]
//! as its public surface; richer query/context APIs are expected to be built
//! on top, not inside, this layer.

pub mod btree;
pub mod buffer_pool;
pub mod catalog;
pub mod collection;
pub mod config;
pub mod dictionary;
pub mod engine;
pub mod index_key;
pub mod pager;
pub mod satellite;
pub mod slotted_page;
pub mod timeseries;
pub mod types;
pub mod utils;
pub mod wal;

pub use utils::errors;
pub use utils::fsutil;
pub use utils::logger;

pub use catalog::{CollectionCatalog, CollectionMetadata, IndexMetadata, TimeSeriesConfig, VectorSourceConfig};
pub use collection::DocumentCollection;
pub use config::EngineConfig;
pub use engine::{StorageEngine, TxnId};
pub use satellite::{hnsw::HnswIndex, rtree::RTree};
pub use timeseries::TimeSeriesCollection;
pub use types::{DocumentId, DocumentLocation, IndexKey, IndexKind};
pub use utils::errors::{DbError, DbResult};
