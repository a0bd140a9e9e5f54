//! L5: the document collection. The record-level API over the slotted page
//! layout (L3a) and the B+Tree primary/secondary indexes (L4) — inserts,
//! finds, updates, deletes, and full scans of BSON documents keyed by a
//! `DocumentId` primary key.

use crate::btree::BTree;
use crate::catalog::{CollectionCatalog, CollectionMetadata, IndexMetadata};
use crate::engine::{StorageEngine, TxnId};
use crate::index_key::{composite_key, composite_range, encode_bson, encode_document_id};
use crate::slotted_page::{self, SlotFlags};
use crate::types::{DocumentId, DocumentLocation, IndexEntry, IndexKey, IndexKind, PageType, ScanDirection, SerializableBsonDocument};
use crate::utils::errors::{DbError, DbResult};
use bson::Document as BsonDocument;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Serialization buffer step ladder (§4.7's adaptive-buffer contract):
/// attempt encoding into progressively larger scratch buffers, failing with
/// `DocumentTooLarge` only once the largest step is also insufficient.
const BUFFER_STEPS: [usize; 3] = [64 * 1024, 2 * 1024 * 1024, 16 * 1024 * 1024];

/// Micro-batch size for bulk insert: serialization is parallelized across
/// this many documents at a time, while page writes and index maintenance
/// stay strictly sequential on the caller's thread.
const BULK_BATCH_SIZE: usize = 50;

fn serialize_document(doc: &BsonDocument) -> DbResult<Vec<u8>> {
    for &step in &BUFFER_STEPS {
        let bytes = bson::to_vec(doc)?;
        if bytes.len() <= step {
            return Ok(bytes);
        }
    }
    Err(DbError::TooLarge(bson::to_vec(doc).map(|b| b.len()).unwrap_or(usize::MAX)))
}

/// A secondary index attached to a collection: the field path it is built
/// over, and the B+Tree (keyed by composite `field || primary_id`) backing
/// it.
struct SecondaryIndex {
    name: String,
    property_path: String,
    is_unique: bool,
    tree: BTree,
}

/// Insertion-target hint state: a map from data-page id to its last-known
/// free space, plus the page most recently used for an insert. Both are
/// heuristics only — correctness does not depend on their accuracy, just on
/// re-reading the page before trusting the hint.
struct FreeSpaceHints {
    free_bytes: HashMap<u32, u16>,
    current_insert_page: Option<u32>,
}

/// The document-level API: insert/find/update/delete/scan, backed by a
/// primary B+Tree and zero or more secondary indexes.
///
/// Per spec §5, the free-space hint map is owned by the collection and must
/// be mutated only under the collection's own serialization — this type
/// assumes single-threaded use per process unless the caller adds external
/// coordination (documented, not enforced).
pub struct DocumentCollection {
    name: String,
    location: DocumentLocation,
    primary: BTree,
    secondary: Vec<SecondaryIndex>,
    hints: Mutex<FreeSpaceHints>,
}

impl DocumentCollection {
    /// Creates a brand-new collection: allocates an empty primary B+Tree
    /// root and registers the catalog record.
    pub fn create(engine: &StorageEngine, txn: TxnId, name: impl Into<String>) -> DbResult<Self> {
        let name = name.into();
        let root = BTree::create_empty(engine, txn)?;
        let metadata = CollectionMetadata::new(name.clone(), root);
        let location = CollectionCatalog::insert(engine, &metadata)?;
        log::info!("collection {name:?}: created, primary root {root}");
        Ok(Self {
            name,
            location,
            primary: BTree::with_default_fanout(root),
            secondary: Vec::new(),
            hints: Mutex::new(FreeSpaceHints { free_bytes: HashMap::new(), current_insert_page: None }),
        })
    }

    /// Opens an existing collection by name, rebuilding its in-memory
    /// B+Tree handles from the catalog record.
    pub fn open(engine: &StorageEngine, name: &str) -> DbResult<Self> {
        let (location, metadata) = CollectionCatalog::find(engine, name)?.ok_or_else(|| DbError::NoSuchCollection(name.to_string()))?;
        let secondary = metadata
            .indexes
            .iter()
            .map(|idx| SecondaryIndex {
                name: idx.name.clone(),
                property_path: idx.property_paths.first().cloned().unwrap_or_default(),
                is_unique: idx.is_unique,
                tree: BTree::with_default_fanout(idx.root_page_id),
            })
            .collect();
        Ok(Self {
            name: metadata.name,
            location,
            primary: BTree::with_default_fanout(metadata.primary_root_page_id),
            secondary,
            hints: Mutex::new(FreeSpaceHints { free_bytes: HashMap::new(), current_insert_page: None }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds a new secondary B+Tree index over `property_path` and persists
    /// its root in the catalog record.
    pub fn create_index(&mut self, engine: &StorageEngine, txn: TxnId, name: impl Into<String>, property_path: impl Into<String>, is_unique: bool) -> DbResult<()> {
        let name = name.into();
        let property_path = property_path.into();
        let root = BTree::create_empty(engine, txn)?;
        self.secondary.push(SecondaryIndex { name: name.clone(), property_path, is_unique, tree: BTree::with_default_fanout(root) });
        self.persist_catalog(engine)?;
        log::info!("collection {:?}: created index {name:?}, root {root}", self.name);
        Ok(())
    }

    fn persist_catalog(&mut self, engine: &StorageEngine) -> DbResult<()> {
        let metadata = CollectionMetadata {
            name: self.name.clone(),
            primary_root_page_id: self.primary.root_page_id(),
            schema_root_page_id: 0,
            indexes: self
                .secondary
                .iter()
                .map(|s| IndexMetadata {
                    name: s.name.clone(),
                    is_unique: s.is_unique,
                    kind: IndexKind::BTree,
                    property_paths: vec![s.property_path.clone()],
                    root_page_id: s.tree.root_page_id(),
                    vector_dimensions: None,
                    vector_metric: None,
                })
                .collect(),
            time_series: None,
            vector_source: None,
        };
        self.location = CollectionCatalog::update(engine, self.location, &metadata)?;
        Ok(())
    }

    fn primary_key(id: DocumentId) -> IndexKey {
        IndexKey::Bytes(encode_document_id(id))
    }

    /// Finds or allocates a data page with enough free space for `len`
    /// bytes, trusting the hint map but re-checking the actual page before
    /// committing to it.
    fn find_insert_page(&self, engine: &StorageEngine, txn: TxnId, len: usize) -> DbResult<(u32, Vec<u8>)> {
        let needed = len as u16 + slotted_page::SLOT_SIZE as u16;
        let mut hints = self.hints.lock();
        if let Some(page_id) = hints.current_insert_page {
            let buf = engine.read_page(page_id, Some(txn))?;
            let free = slotted_page::available_free_space(&buf);
            hints.free_bytes.insert(page_id, free);
            if free >= needed {
                return Ok((page_id, buf));
            }
        }
        for (&page_id, &free) in &hints.free_bytes {
            if free >= needed && Some(page_id) != hints.current_insert_page {
                let buf = engine.read_page(page_id, Some(txn))?;
                if slotted_page::available_free_space(&buf) >= needed {
                    return Ok((page_id, buf));
                }
            }
        }
        let page_id = engine.allocate_page()?;
        let mut buf = vec![0u8; engine.page_size() as usize];
        slotted_page::init_slotted_page(&mut buf, page_id, PageType::Data, txn.0);
        hints.current_insert_page = Some(page_id);
        Ok((page_id, buf))
    }

    fn record_free_space(&self, page_id: u32, buf: &[u8]) {
        let mut hints = self.hints.lock();
        hints.free_bytes.insert(page_id, slotted_page::available_free_space(buf));
        hints.current_insert_page = Some(page_id);
    }

    /// Writes `bytes` into a data page, running the overflow protocol of
    /// §4.4 when it exceeds `max_single_page`.
    fn write_document_bytes(&self, engine: &StorageEngine, txn: TxnId, bytes: &[u8]) -> DbResult<DocumentLocation> {
        let max_single_page = engine.config().max_single_page as usize;
        if bytes.len() <= max_single_page {
            let (page_id, mut buf) = self.find_insert_page(engine, txn, bytes.len())?;
            let slot = slotted_page::insert(&mut buf, bytes)?;
            self.record_free_space(page_id, &buf);
            engine.write_page(page_id, txn, &buf)?;
            return Ok(DocumentLocation { page_id, slot_index: slot });
        }
        self.write_overflowing(engine, txn, bytes)
    }

    /// Overflow protocol: primary slot holds `{total_length, first_overflow_page_id,
    /// primary_chunk_bytes}`; overflow pages are chunked head-to-tail so
    /// every page but the last is fully populated, with page ids allocated
    /// and written in that same head-first order.
    fn write_overflowing(&self, engine: &StorageEngine, txn: TxnId, bytes: &[u8]) -> DbResult<DocumentLocation> {
        let page_size = engine.page_size() as usize;
        let chunk = page_size - crate::slotted_page::SLOTTED_HEADER_SIZE;
        let max_single_page = engine.config().max_single_page as usize;
        let max_primary_payload = max_single_page - 8;

        let remainder = &bytes[max_primary_payload..];
        let mut pages_to_write: Vec<(u32, &[u8])> = Vec::new();
        let mut next_page_id = 0u32;
        let mut offset = 0usize;
        while offset < remainder.len() {
            let end = (offset + chunk).min(remainder.len());
            let slice = &remainder[offset..end];
            let page_id = engine.allocate_page()?;
            pages_to_write.push((page_id, slice));
            offset = end;
        }
        // Allocated head-first in chunk order, so only the last entry (the
        // tail page) can be short; every intermediate page is full.
        for (i, &(page_id, slice)) in pages_to_write.iter().enumerate() {
            let next = pages_to_write.get(i + 1).map_or(0, |&(p, _)| p);
            let mut buf = vec![0u8; page_size];
            slotted_page::init_slotted_page(&mut buf, page_id, PageType::Overflow, txn.0);
            slotted_page::insert(&mut buf, slice)?;
            slotted_page::set_next_overflow_page(&mut buf, next);
            engine.write_page(page_id, txn, &buf)?;
        }
        if let Some(&(first, _)) = pages_to_write.first() {
            next_page_id = first;
        }

        let mut primary_payload = Vec::with_capacity(8 + max_primary_payload);
        primary_payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        primary_payload.extend_from_slice(&next_page_id.to_le_bytes());
        primary_payload.extend_from_slice(&bytes[..max_primary_payload]);

        let (page_id, mut buf) = self.find_insert_page(engine, txn, primary_payload.len())?;
        let slot = slotted_page::insert_with_flags(&mut buf, &primary_payload, SlotFlags::HasOverflow)?;
        self.record_free_space(page_id, &buf);
        engine.write_page(page_id, txn, &buf)?;
        log::debug!("collection {:?}: wrote overflowing document, {} overflow pages", self.name, pages_to_write.len());
        Ok(DocumentLocation { page_id, slot_index: slot })
    }

    /// Reassembles an overflowing document's bytes by walking its chain.
    fn read_overflowing(&self, engine: &StorageEngine, txn: TxnId, primary: &[u8]) -> DbResult<Vec<u8>> {
        let total_length = u32::from_le_bytes(primary[0..4].try_into().unwrap()) as usize;
        let first_overflow = u32::from_le_bytes(primary[4..8].try_into().unwrap());
        let mut out = Vec::with_capacity(total_length);
        out.extend_from_slice(&primary[8..]);
        let mut page_id = first_overflow;
        while page_id != 0 {
            let buf = engine.read_page(page_id, Some(txn))?;
            out.extend_from_slice(slotted_page::read(&buf, 0)?);
            page_id = slotted_page::next_overflow_page(&buf);
        }
        out.truncate(total_length);
        Ok(out)
    }

    fn free_overflow_chain(&self, engine: &StorageEngine, first_overflow: u32) -> DbResult<()> {
        let mut page_id = first_overflow;
        while page_id != 0 {
            let buf = engine.read_page_immediate(page_id)?;
            let next = slotted_page::next_overflow_page(&buf);
            engine.free_page_immediate(page_id)?;
            page_id = next;
        }
        Ok(())
    }

    fn index_secondary_entries(&self, doc: &BsonDocument, id: DocumentId) -> Vec<(usize, IndexKey)> {
        self.secondary
            .iter()
            .enumerate()
            .filter_map(|(i, idx)| {
                let value = doc.get(&idx.property_path)?;
                let field_key = encode_bson(value)?;
                Some((i, composite_key(&field_key, id)))
            })
            .collect()
    }

    /// Inserts a new document under a fresh `DocumentId`, maintaining the
    /// primary index and every secondary index.
    pub fn insert(&self, engine: &StorageEngine, txn: TxnId, doc: &BsonDocument) -> DbResult<DocumentId> {
        let id = DocumentId::new();
        let bytes = serialize_document(doc)?;
        let location = self.write_document_bytes(engine, txn, &bytes)?;
        self.primary.insert(engine, txn, Self::primary_key(id), location)?;
        for (i, key) in self.index_secondary_entries(doc, id) {
            self.secondary[i].tree.insert(engine, txn, key, location)?;
        }
        Ok(id)
    }

    /// Bulk insert in micro-batches: serialization parallelizes across a
    /// batch (pure CPU work), while every page write and index update stays
    /// sequential on the caller's thread so the B+Tree and free-space map
    /// never see concurrent mutation.
    pub fn insert_many(&self, engine: &StorageEngine, txn: TxnId, docs: &[BsonDocument]) -> DbResult<Vec<DocumentId>> {
        let mut ids = Vec::with_capacity(docs.len());
        for batch in docs.chunks(BULK_BATCH_SIZE) {
            let serialized: Vec<DbResult<Vec<u8>>> = std::thread::scope(|scope| {
                let handles: Vec<_> = batch.iter().map(|doc| scope.spawn(move || serialize_document(doc))).collect();
                handles.into_iter().map(|h| h.join().expect("serialize worker panicked")).collect()
            });
            for (doc, bytes) in batch.iter().zip(serialized) {
                let bytes = bytes?;
                let id = DocumentId::new();
                let location = self.write_document_bytes(engine, txn, &bytes)?;
                self.primary.insert(engine, txn, Self::primary_key(id), location)?;
                for (i, key) in self.index_secondary_entries(doc, id) {
                    self.secondary[i].tree.insert(engine, txn, key, location)?;
                }
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Looks up and deserializes a document by primary key.
    pub fn find(&self, engine: &StorageEngine, txn: TxnId, id: DocumentId) -> DbResult<Option<BsonDocument>> {
        let Some(location) = self.primary.try_find(engine, txn, &Self::primary_key(id))? else {
            return Ok(None);
        };
        self.read_at(engine, txn, location).map(Some)
    }

    fn read_at(&self, engine: &StorageEngine, txn: TxnId, location: DocumentLocation) -> DbResult<BsonDocument> {
        let buf = engine.read_page(location.page_id, Some(txn))?;
        let raw = slotted_page::read(&buf, location.slot_index)?;
        let bytes = if slotted_page::slot_has_overflow(&buf, location.slot_index) {
            self.read_overflowing(engine, txn, raw)?
        } else {
            raw.to_vec()
        };
        Ok(bson::from_slice(&bytes)?)
    }

    /// Finds every document whose `property_path` equals `value` via a
    /// secondary index, using the composite-key range trick of §4.6.
    pub fn find_by_index(&self, engine: &StorageEngine, txn: TxnId, index_name: &str, value: &bson::Bson) -> DbResult<Vec<BsonDocument>> {
        let idx = self.secondary.iter().find(|s| s.name == index_name).ok_or_else(|| DbError::Invariant(format!("no such index {index_name:?}")))?;
        let Some(field_key) = encode_bson(value) else {
            return Ok(Vec::new());
        };
        let (lo, hi) = composite_range(&field_key);
        let entries = idx.tree.range(engine, txn, &lo, &hi, ScanDirection::Forward)?;
        entries.into_iter().map(|e: IndexEntry| self.read_at(engine, txn, e.location)).collect()
    }

    /// Update-in-place when the new encoding fits the old slot and it has no
    /// overflow chain; otherwise frees the old storage and reinserts at a
    /// new location, updating the primary index and any secondary index
    /// whose indexed value changed.
    pub fn update(&self, engine: &StorageEngine, txn: TxnId, id: DocumentId, new_doc: &BsonDocument) -> DbResult<bool> {
        let key = Self::primary_key(id);
        let Some(old_location) = self.primary.try_find(engine, txn, &key)? else {
            return Ok(false);
        };
        let old_doc = self.read_at(engine, txn, old_location)?;
        let new_bytes = serialize_document(new_doc)?;

        let mut old_buf = engine.read_page(old_location.page_id, Some(txn))?;
        let has_overflow = slotted_page::slot_has_overflow(&old_buf, old_location.slot_index);
        let old_slot_len = slotted_page::slot_length(&old_buf, old_location.slot_index);

        let new_location = if !has_overflow && new_bytes.len() as u16 <= old_slot_len {
            slotted_page::update_inplace(&mut old_buf, old_location.slot_index, &new_bytes)?;
            engine.write_page(old_location.page_id, txn, &old_buf)?;
            old_location
        } else {
            if has_overflow {
                let raw = slotted_page::read(&old_buf, old_location.slot_index)?;
                let first_overflow = u32::from_le_bytes(raw[4..8].try_into().unwrap());
                self.free_overflow_chain(engine, first_overflow)?;
            }
            slotted_page::mark_deleted(&mut old_buf, old_location.slot_index)?;
            engine.write_page(old_location.page_id, txn, &old_buf)?;
            let new_location = self.write_document_bytes(engine, txn, &new_bytes)?;
            self.primary.delete(engine, txn, &key, old_location)?;
            self.primary.insert(engine, txn, key, new_location)?;
            new_location
        };

        for idx in &self.secondary {
            let old_value = old_doc.get(&idx.property_path).and_then(encode_bson);
            let new_value = new_doc.get(&idx.property_path).and_then(encode_bson);
            if old_value == new_value && new_location == old_location {
                continue;
            }
            if let Some(ref v) = old_value {
                idx.tree.delete(engine, txn, &composite_key(v, id), old_location)?;
            }
            if let Some(ref v) = new_value {
                idx.tree.insert(engine, txn, composite_key(v, id), new_location)?;
            }
        }
        Ok(true)
    }

    /// Deletes a document: frees its storage (and overflow chain, if any)
    /// and removes it from the primary and every secondary index.
    pub fn delete(&self, engine: &StorageEngine, txn: TxnId, id: DocumentId) -> DbResult<bool> {
        let key = Self::primary_key(id);
        let Some(location) = self.primary.try_find(engine, txn, &key)? else {
            return Ok(false);
        };
        let doc = self.read_at(engine, txn, location)?;
        let mut buf = engine.read_page(location.page_id, Some(txn))?;
        if slotted_page::slot_has_overflow(&buf, location.slot_index) {
            let raw = slotted_page::read(&buf, location.slot_index)?;
            let first_overflow = u32::from_le_bytes(raw[4..8].try_into().unwrap());
            self.free_overflow_chain(engine, first_overflow)?;
        }
        slotted_page::mark_deleted(&mut buf, location.slot_index)?;
        engine.write_page(location.page_id, txn, &buf)?;
        self.primary.delete(engine, txn, &key, location)?;
        for idx in &self.secondary {
            if let Some(v) = doc.get(&idx.property_path).and_then(encode_bson) {
                idx.tree.delete(engine, txn, &composite_key(&v, id), location)?;
            }
        }
        Ok(true)
    }

    /// Full scan: a predicate over raw bytes (to skip deserializing
    /// non-matching documents) applied to every live slot of every `Data`
    /// page, from page 2 up to whatever `page_count_hint` covers. Matches are
    /// deserialized and returned.
    pub fn scan(&self, engine: &StorageEngine, txn: TxnId, page_count_hint: u32, predicate: impl Fn(&[u8]) -> bool) -> DbResult<Vec<BsonDocument>> {
        let mut out = Vec::new();
        for page_id in 2..page_count_hint {
            let buf = engine.read_page(page_id, Some(txn))?;
            if crate::pager::read_page_type(&buf) != Some(PageType::Data) {
                continue;
            }
            for slot in 0..slotted_page::slot_count(&buf) {
                let Ok(raw) = slotted_page::read(&buf, slot) else { continue };
                if slotted_page::slot_has_overflow(&buf, slot) {
                    if !predicate(raw) {
                        continue;
                    }
                    let bytes = self.read_overflowing(engine, txn, raw)?;
                    out.push(bson::from_slice(&bytes)?);
                } else if predicate(raw) {
                    out.push(bson::from_slice(raw)?);
                }
            }
        }
        Ok(out)
    }
}

/// Convenience wrapper pairing a document with its `SerializableBsonDocument`
/// codec, used by callers that need to persist a BSON value through a
/// bincode-encoded envelope (e.g. time-series pages).
#[must_use]
pub fn as_serializable(doc: BsonDocument) -> SerializableBsonDocument {
    SerializableBsonDocument(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use bson::doc;

    fn setup() -> (tempfile::TempDir, StorageEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(dir.path().join("t.db"), EngineConfig::new_16k()).unwrap();
        (dir, engine)
    }

    #[test]
    fn insert_then_find_round_trips() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let coll = DocumentCollection::create(&engine, txn, "widgets").unwrap();
        let id = coll.insert(&engine, txn, &doc! { "name": "gizmo", "qty": 3i32 }).unwrap();
        engine.commit(txn).unwrap();

        let txn2 = engine.begin_transaction().unwrap();
        let found = coll.find(&engine, txn2, id).unwrap().unwrap();
        assert_eq!(found.get_str("name").unwrap(), "gizmo");
    }

    #[test]
    fn update_in_place_preserves_location() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let coll = DocumentCollection::create(&engine, txn, "widgets").unwrap();
        let id = coll.insert(&engine, txn, &doc! { "name": "gizmo" }).unwrap();
        coll.update(&engine, txn, id, &doc! { "name": "gadge" }).unwrap();
        let found = coll.find(&engine, txn, id).unwrap().unwrap();
        assert_eq!(found.get_str("name").unwrap(), "gadge");
    }

    #[test]
    fn delete_then_find_returns_none() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let coll = DocumentCollection::create(&engine, txn, "widgets").unwrap();
        let id = coll.insert(&engine, txn, &doc! { "name": "gizmo" }).unwrap();
        assert!(coll.delete(&engine, txn, id).unwrap());
        assert!(coll.find(&engine, txn, id).unwrap().is_none());
    }

    #[test]
    fn overflowing_document_round_trips() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let coll = DocumentCollection::create(&engine, txn, "widgets").unwrap();
        let blob = vec![0x5Au8; 40_000];
        let id = coll.insert(&engine, txn, &doc! { "blob": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: blob.clone() } }).unwrap();
        let found = coll.find(&engine, txn, id).unwrap().unwrap();
        let bson::Bson::Binary(b) = found.get("blob").unwrap() else { panic!("expected binary") };
        assert_eq!(b.bytes, blob);
    }

    #[test]
    fn secondary_index_finds_matching_documents() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let mut coll = DocumentCollection::create(&engine, txn, "people").unwrap();
        coll.create_index(&engine, txn, "by_age", "age", false).unwrap();
        coll.insert(&engine, txn, &doc! { "name": "A", "age": 30i32 }).unwrap();
        coll.insert(&engine, txn, &doc! { "name": "B", "age": 30i32 }).unwrap();
        coll.insert(&engine, txn, &doc! { "name": "C", "age": 31i32 }).unwrap();

        let matches = coll.find_by_index(&engine, txn, "by_age", &bson::Bson::Int32(30)).unwrap();
        let mut names: Vec<_> = matches.iter().map(|d| d.get_str("name").unwrap().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn reopen_recovers_existing_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let cfg = EngineConfig::new_16k();
        let id;
        {
            let engine = StorageEngine::open(&path, cfg).unwrap();
            let txn = engine.begin_transaction().unwrap();
            let coll = DocumentCollection::create(&engine, txn, "widgets").unwrap();
            id = coll.insert(&engine, txn, &doc! { "name": "gizmo" }).unwrap();
            engine.commit(txn).unwrap();
            engine.checkpoint().unwrap();
        }
        let engine = StorageEngine::open(&path, cfg).unwrap();
        let coll = DocumentCollection::open(&engine, "widgets").unwrap();
        let found = coll.find(&engine, TxnId(0), id).unwrap().unwrap();
        assert_eq!(found.get_str("name").unwrap(), "gizmo");
    }
}
