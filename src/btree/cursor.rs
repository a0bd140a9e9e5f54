//! Sync and async B+Tree cursors.
//!
//! The sync cursor holds the parsed entries of its current leaf page and an
//! index into them. The async cursor mirrors the same API but fetches pages
//! via `read_page_async`: per §4.6 and §5, it rents a buffer from the pool,
//! parses it, and returns the buffer to the pool *before* yielding, so a
//! rented buffer never crosses an `await` point.

use crate::btree::BTree;
use crate::btree::node::{self, Node};
use crate::buffer_pool::BufferPool;
use crate::engine::{StorageEngine, TxnId};
use crate::types::{DocumentLocation, IndexEntry, IndexKey};
use crate::utils::errors::{DbError, DbResult};

/// A forward/backward cursor over a single B+Tree's leaf chain.
pub struct Cursor<'a> {
    engine: &'a StorageEngine,
    tree: &'a BTree,
    txn: TxnId,
    entries: Vec<(IndexKey, DocumentLocation)>,
    next_leaf_page_id: u32,
    prev_leaf_page_id: u32,
    index: Option<usize>,
}

impl<'a> Cursor<'a> {
    #[must_use]
    pub fn new(engine: &'a StorageEngine, tree: &'a BTree, txn: TxnId) -> Self {
        Self { engine, tree, txn, entries: Vec::new(), next_leaf_page_id: 0, prev_leaf_page_id: 0, index: None }
    }

    fn load_leaf_containing(&mut self, key: &IndexKey) -> DbResult<()> {
        let mut current = self.tree.root_page_id();
        loop {
            let buf = self.engine.read_page(current, Some(self.txn))?;
            match node::parse(&buf)? {
                Node::Internal(internal) => current = node::find_child(&internal, key),
                Node::Leaf(leaf) => {
                    self.entries = leaf.entries;
                    self.next_leaf_page_id = leaf.next_leaf_page_id;
                    self.prev_leaf_page_id = leaf.prev_leaf_page_id;
                    return Ok(());
                }
            }
        }
    }

    pub fn move_to_first(&mut self) -> DbResult<()> {
        self.load_leaf_containing(&IndexKey::MinKey)?;
        self.index = if self.entries.is_empty() { None } else { Some(0) };
        Ok(())
    }

    pub fn move_to_last(&mut self) -> DbResult<()> {
        self.load_leaf_containing(&IndexKey::MaxKey)?;
        self.index = if self.entries.is_empty() { None } else { Some(self.entries.len() - 1) };
        Ok(())
    }

    /// Positions on `key` if present; otherwise positions at the
    /// next-greater entry within the same leaf (or the leaf's end if none).
    /// Returns whether the positioning was an exact hit.
    pub fn seek(&mut self, key: &IndexKey) -> DbResult<bool> {
        self.load_leaf_containing(key)?;
        let pos = self.entries.partition_point(|(k, _)| k < key);
        let hit = self.entries.get(pos).is_some_and(|(k, _)| k == key);
        self.index = if pos < self.entries.len() { Some(pos) } else { None };
        Ok(hit)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.index.is_some()
    }

    #[must_use]
    pub fn current(&self) -> Option<IndexEntry> {
        let i = self.index?;
        let (key, location) = self.entries.get(i)?;
        Some(IndexEntry { key: key.clone(), location: *location })
    }

    pub fn move_next(&mut self) -> DbResult<()> {
        let Some(i) = self.index else { return Err(DbError::Invariant("cursor-current on invalid cursor".into())) };
        if i + 1 < self.entries.len() {
            self.index = Some(i + 1);
            return Ok(());
        }
        if self.next_leaf_page_id == 0 {
            self.index = None;
            return Ok(());
        }
        let buf = self.engine.read_page(self.next_leaf_page_id, Some(self.txn))?;
        match node::parse(&buf)? {
            Node::Leaf(leaf) => {
                self.entries = leaf.entries;
                self.next_leaf_page_id = leaf.next_leaf_page_id;
                self.prev_leaf_page_id = leaf.prev_leaf_page_id;
                self.index = if self.entries.is_empty() { None } else { Some(0) };
                Ok(())
            }
            Node::Internal(_) => Err(DbError::Corruption("leaf chain points at an internal node".into())),
        }
    }

    pub fn move_prev(&mut self) -> DbResult<()> {
        let Some(i) = self.index else { return Err(DbError::Invariant("cursor-current on invalid cursor".into())) };
        if i > 0 {
            self.index = Some(i - 1);
            return Ok(());
        }
        if self.prev_leaf_page_id == 0 {
            self.index = None;
            return Ok(());
        }
        let buf = self.engine.read_page(self.prev_leaf_page_id, Some(self.txn))?;
        match node::parse(&buf)? {
            Node::Leaf(leaf) => {
                let last = leaf.entries.len().checked_sub(1);
                self.entries = leaf.entries;
                self.next_leaf_page_id = leaf.next_leaf_page_id;
                self.prev_leaf_page_id = leaf.prev_leaf_page_id;
                self.index = last;
                Ok(())
            }
            Node::Internal(_) => Err(DbError::Corruption("leaf chain points at an internal node".into())),
        }
    }
}

/// Async mirror of `Cursor`. Every page fetch rents a buffer from the pool,
/// parses it into owned, non-aliasing entries, and returns the buffer before
/// the next `await` — so nothing borrowed from the pool survives a yield.
pub struct AsyncCursor<'a> {
    engine: &'a StorageEngine,
    tree: &'a BTree,
    txn: TxnId,
    pool: &'a BufferPool,
    entries: Vec<(IndexKey, DocumentLocation)>,
    next_leaf_page_id: u32,
    index: Option<usize>,
}

impl<'a> AsyncCursor<'a> {
    #[must_use]
    pub fn new(engine: &'a StorageEngine, tree: &'a BTree, txn: TxnId, pool: &'a BufferPool) -> Self {
        Self { engine, tree, txn, pool, entries: Vec::new(), next_leaf_page_id: 0, index: None }
    }

    async fn fetch_leaf(&self, page_id: u32) -> DbResult<(Vec<(IndexKey, DocumentLocation)>, u32)> {
        let fetched = self.engine.read_page_async(page_id, Some(self.txn)).await?;
        // Rent only after the await completes, so the rented buffer never
        // crosses a suspension point.
        let rented = self.pool.rent();
        let mut bytes = rented.bytes;
        bytes.copy_from_slice(&fetched);
        let parsed = node::parse(&bytes)?;
        self.pool.release(crate::buffer_pool::RentedBuffer { bytes, slot: 0 });
        match parsed {
            Node::Leaf(leaf) => Ok((leaf.entries, leaf.next_leaf_page_id)),
            Node::Internal(_) => Err(DbError::Corruption("expected a leaf page".into())),
        }
    }

    pub async fn move_to_first(&mut self) -> DbResult<()> {
        let mut current = self.tree.root_page_id();
        loop {
            let fetched = self.engine.read_page_async(current, Some(self.txn)).await?;
            let rented = self.pool.rent();
            let mut bytes = rented.bytes;
            bytes.copy_from_slice(&fetched);
            let parsed = node::parse(&bytes)?;
            self.pool.release(crate::buffer_pool::RentedBuffer { bytes, slot: 0 });
            match parsed {
                Node::Internal(internal) => current = internal.p0,
                Node::Leaf(leaf) => {
                    self.entries = leaf.entries;
                    self.next_leaf_page_id = leaf.next_leaf_page_id;
                    self.index = if self.entries.is_empty() { None } else { Some(0) };
                    return Ok(());
                }
            }
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<IndexEntry> {
        let i = self.index?;
        let (key, location) = self.entries.get(i)?;
        Some(IndexEntry { key: key.clone(), location: *location })
    }

    pub async fn move_next(&mut self) -> DbResult<()> {
        let Some(i) = self.index else { return Err(DbError::Invariant("cursor-current on invalid cursor".into())) };
        if i + 1 < self.entries.len() {
            self.index = Some(i + 1);
            return Ok(());
        }
        if self.next_leaf_page_id == 0 {
            self.index = None;
            return Ok(());
        }
        let (entries, next) = self.fetch_leaf(self.next_leaf_page_id).await?;
        self.entries = entries;
        self.next_leaf_page_id = next;
        self.index = if self.entries.is_empty() { None } else { Some(0) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::index_key::encode_i64_key;

    fn setup() -> (tempfile::TempDir, StorageEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::open(dir.path().join("t.db"), EngineConfig::new_16k()).unwrap();
        (dir, engine)
    }

    #[test]
    fn cursor_walks_leaf_chain_in_order() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let root = BTree::create_empty(&engine, txn).unwrap();
        let tree = BTree::new(root, 4);
        for i in 0..40i64 {
            tree.insert(&engine, txn, encode_i64_key(i), DocumentLocation { page_id: (i as u32) + 2, slot_index: 0 }).unwrap();
        }
        engine.commit(txn).unwrap();

        let txn2 = engine.begin_transaction().unwrap();
        let mut cursor = Cursor::new(&engine, &tree, txn2);
        cursor.move_to_first().unwrap();
        let mut seen = Vec::new();
        while cursor.is_valid() {
            seen.push(cursor.current().unwrap().key);
            cursor.move_next().unwrap();
        }
        assert_eq!(seen.len(), 40);
        for w in seen.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn seek_reports_exact_hit() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let root = BTree::create_empty(&engine, txn).unwrap();
        let tree = BTree::new(root, 4);
        for i in [1i64, 3, 5, 7] {
            tree.insert(&engine, txn, encode_i64_key(i), DocumentLocation { page_id: 2, slot_index: i as u16 }).unwrap();
        }
        let mut cursor = Cursor::new(&engine, &tree, txn);
        assert!(cursor.seek(&encode_i64_key(5)).unwrap());
        assert!(!cursor.seek(&encode_i64_key(4)).unwrap());
    }
}
