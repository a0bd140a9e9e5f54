//! L5 collection catalog: one record per collection, persisted on the
//! `Collection`-typed slotted-page chain rooted at page 1.
//!
//! Grounded on the dictionary page's chain-on-full-page pattern
//! (`dictionary.rs`): when the current catalog page has no room for a new
//! record, it is chained via the slotted page's `next_overflow_page` field to
//! a freshly allocated `Collection` page, exactly as the dictionary chains on
//! `next_page`. Catalog writes use the engine's immediate path, like the
//! dictionary: collection creation is a structural, cross-transaction
//! operation that must be visible to bootstrap code before any user
//! transaction exists.

use crate::engine::StorageEngine;
use crate::slotted_page::{self, SlotFlags};
use crate::types::{DocumentLocation, IndexKind, PageType};
use crate::utils::errors::{DbError, DbResult};

fn write_lp_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn read_lp_string(buf: &[u8], pos: &mut usize) -> DbResult<String> {
    if *pos + 4 > buf.len() {
        return Err(DbError::Corruption("catalog record truncated (string length)".into()));
    }
    let len = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    if *pos + len > buf.len() {
        return Err(DbError::Corruption("catalog record truncated (string body)".into()));
    }
    let s = String::from_utf8(buf[*pos..*pos + len].to_vec()).map_err(|e| DbError::Corruption(e.to_string()))?;
    *pos += len;
    Ok(s)
}

fn index_kind_tag(kind: IndexKind) -> u8 {
    match kind {
        IndexKind::BTree => 0,
        IndexKind::Hash => 1,
        IndexKind::Unique => 2,
        IndexKind::Vector => 3,
        IndexKind::Spatial => 4,
    }
}

fn index_kind_from_tag(tag: u8) -> DbResult<IndexKind> {
    Ok(match tag {
        0 => IndexKind::BTree,
        1 => IndexKind::Hash,
        2 => IndexKind::Unique,
        3 => IndexKind::Vector,
        4 => IndexKind::Spatial,
        other => return Err(DbError::Corruption(format!("unknown index kind tag {other}"))),
    })
}

/// One secondary (or primary) index's catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMetadata {
    pub name: String,
    pub is_unique: bool,
    pub kind: IndexKind,
    pub property_paths: Vec<String>,
    pub root_page_id: u32,
    pub vector_dimensions: Option<i32>,
    pub vector_metric: Option<u8>,
}

/// Append-only time-series sink attached to a collection: the head page of
/// the append chain plus the retention cutoff, in seconds, applied at prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSeriesConfig {
    pub head_page_id: u32,
    pub retention_seconds: u64,
}

/// Persisted HNSW entry point, resolving the open question in spec §9: the
/// entry point is stored here rather than rebuilt by a fresh graph walk at
/// open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorSourceConfig {
    pub root_page_id: u32,
    pub entry_point_location: DocumentLocation,
    pub entry_point_level: u16,
}

/// A single collection's catalog record.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMetadata {
    pub name: String,
    pub primary_root_page_id: u32,
    pub schema_root_page_id: u32,
    pub indexes: Vec<IndexMetadata>,
    pub time_series: Option<TimeSeriesConfig>,
    pub vector_source: Option<VectorSourceConfig>,
}

impl CollectionMetadata {
    #[must_use]
    pub fn new(name: impl Into<String>, primary_root_page_id: u32) -> Self {
        Self {
            name: name.into(),
            primary_root_page_id,
            schema_root_page_id: 0,
            indexes: Vec::new(),
            time_series: None,
            vector_source: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_lp_string(&mut out, &self.name);
        out.extend_from_slice(&self.primary_root_page_id.to_le_bytes());
        out.extend_from_slice(&self.schema_root_page_id.to_le_bytes());
        out.extend_from_slice(&(self.indexes.len() as u32).to_le_bytes());
        for idx in &self.indexes {
            write_lp_string(&mut out, &idx.name);
            out.push(u8::from(idx.is_unique));
            out.push(index_kind_tag(idx.kind));
            out.extend_from_slice(&idx.root_page_id.to_le_bytes());
            out.extend_from_slice(&(idx.property_paths.len() as u32).to_le_bytes());
            for p in &idx.property_paths {
                write_lp_string(&mut out, p);
            }
            let has_vector = idx.vector_dimensions.is_some();
            out.push(u8::from(has_vector));
            if let (Some(dims), Some(metric)) = (idx.vector_dimensions, idx.vector_metric) {
                out.extend_from_slice(&dims.to_le_bytes());
                out.push(metric);
            }
        }
        // Backward-compatible trailing sections: only consumed if bytes remain.
        out.push(u8::from(self.time_series.is_some()));
        if let Some(ts) = self.time_series {
            out.extend_from_slice(&ts.head_page_id.to_le_bytes());
            out.extend_from_slice(&ts.retention_seconds.to_le_bytes());
        }
        out.push(u8::from(self.vector_source.is_some()));
        if let Some(vs) = self.vector_source {
            out.extend_from_slice(&vs.root_page_id.to_le_bytes());
            out.extend_from_slice(&vs.entry_point_location.page_id.to_le_bytes());
            out.extend_from_slice(&vs.entry_point_location.slot_index.to_le_bytes());
            out.extend_from_slice(&vs.entry_point_level.to_le_bytes());
        }
        out
    }

    pub fn decode(buf: &[u8]) -> DbResult<Self> {
        let mut pos = 0usize;
        let name = read_lp_string(buf, &mut pos)?;
        let take4 = |buf: &[u8], pos: &mut usize| -> DbResult<[u8; 4]> {
            if *pos + 4 > buf.len() {
                return Err(DbError::Corruption("catalog record truncated".into()));
            }
            let v = buf[*pos..*pos + 4].try_into().unwrap();
            *pos += 4;
            Ok(v)
        };
        let primary_root_page_id = u32::from_le_bytes(take4(buf, &mut pos)?);
        let schema_root_page_id = u32::from_le_bytes(take4(buf, &mut pos)?);
        let index_count = u32::from_le_bytes(take4(buf, &mut pos)?);

        let mut indexes = Vec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            let name = read_lp_string(buf, &mut pos)?;
            let is_unique = buf[pos] != 0;
            pos += 1;
            let kind = index_kind_from_tag(buf[pos])?;
            pos += 1;
            let root_page_id = u32::from_le_bytes(take4(buf, &mut pos)?);
            let paths_count = u32::from_le_bytes(take4(buf, &mut pos)?);
            let mut property_paths = Vec::with_capacity(paths_count as usize);
            for _ in 0..paths_count {
                property_paths.push(read_lp_string(buf, &mut pos)?);
            }
            let has_vector = buf[pos] != 0;
            pos += 1;
            let (vector_dimensions, vector_metric) = if has_vector {
                let dims = i32::from_le_bytes(take4(buf, &mut pos)?);
                let metric = buf[pos];
                pos += 1;
                (Some(dims), Some(metric))
            } else {
                (None, None)
            };
            indexes.push(IndexMetadata { name, is_unique, kind, property_paths, root_page_id, vector_dimensions, vector_metric });
        }

        let mut time_series = None;
        let mut vector_source = None;
        if pos < buf.len() {
            let has_ts = buf[pos] != 0;
            pos += 1;
            if has_ts {
                let head_page_id = u32::from_le_bytes(take4(buf, &mut pos)?);
                let retention_seconds = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
                pos += 8;
                time_series = Some(TimeSeriesConfig { head_page_id, retention_seconds });
            }
            if pos < buf.len() {
                let has_vs = buf[pos] != 0;
                pos += 1;
                if has_vs {
                    let root_page_id = u32::from_le_bytes(take4(buf, &mut pos)?);
                    let page_id = u32::from_le_bytes(take4(buf, &mut pos)?);
                    let slot_index = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
                    pos += 2;
                    let entry_point_level = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
                    pos += 2;
                    vector_source = Some(VectorSourceConfig {
                        root_page_id,
                        entry_point_location: DocumentLocation { page_id, slot_index },
                        entry_point_level,
                    });
                }
            }
        }

        Ok(Self { name, primary_root_page_id, schema_root_page_id, indexes, time_series, vector_source })
    }
}

/// Reads and writes `CollectionMetadata` records over the `Collection` page
/// chain rooted at page 1.
pub struct CollectionCatalog;

impl CollectionCatalog {
    /// Lists every collection record, paired with its slot location (needed
    /// by `update`/`delete` to target the right page and slot).
    pub fn list(engine: &StorageEngine) -> DbResult<Vec<(DocumentLocation, CollectionMetadata)>> {
        let mut out = Vec::new();
        let mut page_id = 1u32;
        while page_id != 0 {
            let buf = engine.read_page_immediate(page_id)?;
            let count = slotted_page::slot_count(&buf);
            for slot in 0..count {
                match slotted_page::read(&buf, slot) {
                    Ok(bytes) => out.push((DocumentLocation { page_id, slot_index: slot }, CollectionMetadata::decode(bytes)?)),
                    Err(DbError::Corruption(_)) => continue, // deleted slot
                    Err(e) => return Err(e),
                }
            }
            page_id = slotted_page::next_overflow_page(&buf);
        }
        Ok(out)
    }

    pub fn find(engine: &StorageEngine, name: &str) -> DbResult<Option<(DocumentLocation, CollectionMetadata)>> {
        Ok(Self::list(engine)?.into_iter().find(|(_, m)| m.name == name))
    }

    /// Appends a new collection record, chaining to a new catalog page if the
    /// tail page has no room.
    pub fn insert(engine: &StorageEngine, metadata: &CollectionMetadata) -> DbResult<DocumentLocation> {
        if Self::find(engine, &metadata.name)?.is_some() {
            return Err(DbError::CollectionAlreadyExists(metadata.name.clone()));
        }
        let encoded = metadata.encode();
        let mut page_id = 1u32;
        loop {
            let mut buf = engine.read_page_immediate(page_id)?;
            match slotted_page::insert(&mut buf, &encoded) {
                Ok(slot) => {
                    engine.write_page_immediate(page_id, &buf)?;
                    log::info!("catalog: registered collection {:?} at {page_id}:{slot}", metadata.name);
                    return Ok(DocumentLocation { page_id, slot_index: slot });
                }
                Err(DbError::TooLarge(_)) => {
                    let next = slotted_page::next_overflow_page(&buf);
                    if next != 0 {
                        page_id = next;
                        continue;
                    }
                    let new_page_id = engine.allocate_page_immediate()?;
                    let mut new_buf = vec![0u8; engine.page_size() as usize];
                    slotted_page::init_slotted_page(&mut new_buf, new_page_id, PageType::Collection, 0);
                    let slot = slotted_page::insert(&mut new_buf, &encoded)?;
                    engine.write_page_immediate(new_page_id, &new_buf)?;
                    slotted_page::set_next_overflow_page(&mut buf, new_page_id);
                    engine.write_page_immediate(page_id, &buf)?;
                    log::info!("catalog: chained new page {new_page_id}, registered {:?}", metadata.name);
                    return Ok(DocumentLocation { page_id: new_page_id, slot_index: slot });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Rewrites the record at `location`: in place if it still fits, else
    /// deletes and re-inserts (which may move it to a different page/slot).
    pub fn update(engine: &StorageEngine, location: DocumentLocation, metadata: &CollectionMetadata) -> DbResult<DocumentLocation> {
        let encoded = metadata.encode();
        let mut buf = engine.read_page_immediate(location.page_id)?;
        if encoded.len() as u16 <= slotted_page::slot_length(&buf, location.slot_index) {
            slotted_page::update_inplace(&mut buf, location.slot_index, &encoded)?;
            engine.write_page_immediate(location.page_id, &buf)?;
            return Ok(location);
        }
        slotted_page::mark_deleted(&mut buf, location.slot_index)?;
        engine.write_page_immediate(location.page_id, &buf)?;
        Self::insert_encoded(engine, &encoded)
    }

    fn insert_encoded(engine: &StorageEngine, encoded: &[u8]) -> DbResult<DocumentLocation> {
        let mut page_id = 1u32;
        loop {
            let mut buf = engine.read_page_immediate(page_id)?;
            match slotted_page::insert(&mut buf, encoded) {
                Ok(slot) => {
                    engine.write_page_immediate(page_id, &buf)?;
                    return Ok(DocumentLocation { page_id, slot_index: slot });
                }
                Err(DbError::TooLarge(_)) => {
                    let next = slotted_page::next_overflow_page(&buf);
                    if next != 0 {
                        page_id = next;
                        continue;
                    }
                    let new_page_id = engine.allocate_page_immediate()?;
                    let mut new_buf = vec![0u8; engine.page_size() as usize];
                    slotted_page::init_slotted_page(&mut new_buf, new_page_id, PageType::Collection, 0);
                    let slot = slotted_page::insert(&mut new_buf, encoded)?;
                    engine.write_page_immediate(new_page_id, &new_buf)?;
                    slotted_page::set_next_overflow_page(&mut buf, new_page_id);
                    engine.write_page_immediate(page_id, &buf)?;
                    return Ok(DocumentLocation { page_id: new_page_id, slot_index: slot });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn setup() -> (tempfile::TempDir, StorageEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(dir.path().join("t.db"), EngineConfig::new_16k()).unwrap();
        (dir, engine)
    }

    #[test]
    fn insert_then_list_round_trips() {
        let (_dir, engine) = setup();
        let mut meta = CollectionMetadata::new("widgets", 2);
        meta.indexes.push(IndexMetadata {
            name: "by_age".into(),
            is_unique: false,
            kind: IndexKind::BTree,
            property_paths: vec!["age".into()],
            root_page_id: 3,
            vector_dimensions: None,
            vector_metric: None,
        });
        CollectionCatalog::insert(&engine, &meta).unwrap();
        let found = CollectionCatalog::find(&engine, "widgets").unwrap().unwrap().1;
        assert_eq!(found, meta);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (_dir, engine) = setup();
        let meta = CollectionMetadata::new("widgets", 2);
        CollectionCatalog::insert(&engine, &meta).unwrap();
        assert!(matches!(CollectionCatalog::insert(&engine, &meta), Err(DbError::CollectionAlreadyExists(_))));
    }

    #[test]
    fn update_with_growth_preserves_content() {
        let (_dir, engine) = setup();
        let meta = CollectionMetadata::new("widgets", 2);
        let loc = CollectionCatalog::insert(&engine, &meta).unwrap();
        let mut grown = meta.clone();
        for i in 0..50 {
            grown.indexes.push(IndexMetadata {
                name: format!("idx_{i}"),
                is_unique: false,
                kind: IndexKind::BTree,
                property_paths: vec![format!("field_{i}")],
                root_page_id: i,
                vector_dimensions: None,
                vector_metric: None,
            });
        }
        CollectionCatalog::update(&engine, loc, &grown).unwrap();
        let found = CollectionCatalog::find(&engine, "widgets").unwrap().unwrap().1;
        assert_eq!(found, grown);
    }
}
