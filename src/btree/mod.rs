//! L4: the B+Tree index. An ordered `IndexKey → DocumentLocation` map,
//! reused both as the primary index and (via composite keys) as secondary
//! indexes. This is the hardest single subsystem in the engine: splits,
//! underflow/merge, doubly-linked leaves, and sync/async cursors all live
//! here.

pub mod cursor;
pub mod node;

use crate::engine::{StorageEngine, TxnId};
use crate::types::{DocumentLocation, IndexEntry, IndexKey, ScanDirection};
use crate::utils::errors::{DbError, DbResult};
use node::{InternalNode, LeafNode, Node};
use parking_lot::RwLock;

/// Default fan-out threshold; both leaves and internal nodes split once
/// `entry_count` reaches this. Small enough to exercise splits in tests
/// without needing thousands of keys, large enough to be a realistic page
/// fan-out at 16 KiB pages with short keys.
pub const DEFAULT_MAX_ENTRIES: u16 = 128;

/// An ordered key→location map over pages. Holds only the root page id in
/// memory; every other piece of state lives in pages read through the
/// owning `StorageEngine`. Persisting a new root after a split is the
/// caller's responsibility (the collection catalog record).
pub struct BTree {
    root_page_id: RwLock<u32>,
    max_entries: u16,
}

fn children_of(internal: &InternalNode) -> Vec<u32> {
    let mut out = Vec::with_capacity(internal.entries.len() + 1);
    out.push(internal.p0);
    out.extend(internal.entries.iter().map(|(_, c)| *c));
    out
}

impl BTree {
    #[must_use]
    pub fn new(root_page_id: u32, max_entries: u16) -> Self {
        Self { root_page_id: RwLock::new(root_page_id), max_entries }
    }

    #[must_use]
    pub fn with_default_fanout(root_page_id: u32) -> Self {
        Self::new(root_page_id, DEFAULT_MAX_ENTRIES)
    }

    #[must_use]
    pub fn root_page_id(&self) -> u32 {
        *self.root_page_id.read()
    }

    /// Allocates and writes a fresh, empty root leaf. Callers persist the
    /// returned page id into the owning collection's catalog record.
    pub fn create_empty(engine: &StorageEngine, txn: TxnId) -> DbResult<u32> {
        let root = engine.allocate_page()?;
        let leaf = LeafNode { page_id: root, parent_page_id: 0, next_leaf_page_id: 0, prev_leaf_page_id: 0, entries: vec![] };
        let buf = node::encode_leaf(&leaf, engine.page_size() as usize)?;
        engine.write_page(root, txn, &buf)?;
        Ok(root)
    }

    fn read_node(&self, engine: &StorageEngine, txn: TxnId, page_id: u32) -> DbResult<Node> {
        let buf = engine.read_page(page_id, Some(txn))?;
        node::parse(&buf)
    }

    fn write_leaf(&self, engine: &StorageEngine, txn: TxnId, leaf: &LeafNode) -> DbResult<()> {
        let buf = node::encode_leaf(leaf, engine.page_size() as usize)?;
        engine.write_page(leaf.page_id, txn, &buf)
    }

    fn write_internal(&self, engine: &StorageEngine, txn: TxnId, node: &InternalNode) -> DbResult<()> {
        let buf = node::encode_internal(node, engine.page_size() as usize)?;
        engine.write_page(node.page_id, txn, &buf)
    }

    fn set_parent(&self, engine: &StorageEngine, txn: TxnId, page_id: u32, parent: u32) -> DbResult<()> {
        match self.read_node(engine, txn, page_id)? {
            Node::Leaf(mut l) => {
                l.parent_page_id = parent;
                self.write_leaf(engine, txn, &l)
            }
            Node::Internal(mut i) => {
                i.parent_page_id = parent;
                self.write_internal(engine, txn, &i)
            }
        }
    }

    fn set_leaf_prev(&self, engine: &StorageEngine, txn: TxnId, page_id: u32, prev: u32) -> DbResult<()> {
        if page_id == 0 {
            return Ok(());
        }
        if let Node::Leaf(mut l) = self.read_node(engine, txn, page_id)? {
            l.prev_leaf_page_id = prev;
            self.write_leaf(engine, txn, &l)?;
        }
        Ok(())
    }

    // --- lookup ---

    pub fn try_find(&self, engine: &StorageEngine, txn: TxnId, key: &IndexKey) -> DbResult<Option<DocumentLocation>> {
        let mut current = self.root_page_id();
        loop {
            match self.read_node(engine, txn, current)? {
                Node::Internal(internal) => current = node::find_child(&internal, key),
                Node::Leaf(leaf) => return Ok(leaf.entries.iter().find(|(k, _)| k == key).map(|(_, l)| *l)),
            }
        }
    }

    fn leaf_containing(&self, engine: &StorageEngine, txn: TxnId, key: &IndexKey) -> DbResult<LeafNode> {
        let mut current = self.root_page_id();
        loop {
            match self.read_node(engine, txn, current)? {
                Node::Internal(internal) => current = node::find_child(&internal, key),
                Node::Leaf(leaf) => return Ok(leaf),
            }
        }
    }

    /// Forward or backward range scan between `min_key` and `max_key`
    /// (inclusive). Wrapper predicates (`greater_than`, `between`, ...) all
    /// reduce to this plus per-entry filtering at the caller.
    pub fn range(
        &self,
        engine: &StorageEngine,
        txn: TxnId,
        min_key: &IndexKey,
        max_key: &IndexKey,
        direction: ScanDirection,
    ) -> DbResult<Vec<IndexEntry>> {
        let mut out = Vec::new();
        match direction {
            ScanDirection::Forward => {
                let mut leaf = self.leaf_containing(engine, txn, min_key)?;
                loop {
                    for (k, loc) in &leaf.entries {
                        if k >= min_key && k <= max_key {
                            out.push(IndexEntry { key: k.clone(), location: *loc });
                        }
                    }
                    if leaf.entries.last().is_some_and(|(k, _)| k >= max_key) || leaf.next_leaf_page_id == 0 {
                        break;
                    }
                    match self.read_node(engine, txn, leaf.next_leaf_page_id)? {
                        Node::Leaf(next) => leaf = next,
                        Node::Internal(_) => break,
                    }
                }
            }
            ScanDirection::Backward => {
                let mut leaf = self.leaf_containing(engine, txn, max_key)?;
                loop {
                    for (k, loc) in leaf.entries.iter().rev() {
                        if k >= min_key && k <= max_key {
                            out.push(IndexEntry { key: k.clone(), location: *loc });
                        }
                    }
                    if leaf.entries.first().is_some_and(|(k, _)| k <= min_key) || leaf.prev_leaf_page_id == 0 {
                        break;
                    }
                    match self.read_node(engine, txn, leaf.prev_leaf_page_id)? {
                        Node::Leaf(prev) => leaf = prev,
                        Node::Internal(_) => break,
                    }
                }
            }
        }
        Ok(out)
    }

    // --- insert ---

    pub fn insert(&self, engine: &StorageEngine, txn: TxnId, key: IndexKey, location: DocumentLocation) -> DbResult<()> {
        let root = self.root_page_id();
        if let Some((promote_key, new_right)) = self.insert_recursive(engine, txn, root, key, location)? {
            let new_root_id = engine.allocate_page()?;
            let new_root = InternalNode { page_id: new_root_id, parent_page_id: 0, p0: root, entries: vec![(promote_key, new_right)] };
            self.write_internal(engine, txn, &new_root)?;
            self.set_parent(engine, txn, root, new_root_id)?;
            self.set_parent(engine, txn, new_right, new_root_id)?;
            *self.root_page_id.write() = new_root_id;
            log::debug!("btree: root split, new root {new_root_id}");
        }
        Ok(())
    }

    fn insert_recursive(
        &self,
        engine: &StorageEngine,
        txn: TxnId,
        page_id: u32,
        key: IndexKey,
        location: DocumentLocation,
    ) -> DbResult<Option<(IndexKey, u32)>> {
        match self.read_node(engine, txn, page_id)? {
            Node::Leaf(mut leaf) => {
                let pos = leaf.entries.partition_point(|(k, _)| k < &key);
                leaf.entries.insert(pos, (key, location));
                if leaf.entries.len() as u16 >= self.max_entries {
                    let mid = leaf.entries.len().div_ceil(2);
                    let right_entries = leaf.entries.split_off(mid);
                    let right_page_id = engine.allocate_page()?;
                    let promote_key = right_entries[0].0.clone();
                    let old_next = leaf.next_leaf_page_id;
                    leaf.next_leaf_page_id = right_page_id;
                    let right = LeafNode {
                        page_id: right_page_id,
                        parent_page_id: leaf.parent_page_id,
                        next_leaf_page_id: old_next,
                        prev_leaf_page_id: page_id,
                        entries: right_entries,
                    };
                    self.write_leaf(engine, txn, &leaf)?;
                    self.write_leaf(engine, txn, &right)?;
                    self.set_leaf_prev(engine, txn, old_next, right_page_id)?;
                    log::debug!("btree: leaf {page_id} split, new right leaf {right_page_id}");
                    Ok(Some((promote_key, right_page_id)))
                } else {
                    self.write_leaf(engine, txn, &leaf)?;
                    Ok(None)
                }
            }
            Node::Internal(mut internal) => {
                let child = node::find_child(&internal, &key);
                let split = self.insert_recursive(engine, txn, child, key, location)?;
                let Some((promote_key, new_right)) = split else { return Ok(None) };
                let pos = internal.entries.partition_point(|(k, _)| k < &promote_key);
                internal.entries.insert(pos, (promote_key, new_right));
                self.set_parent(engine, txn, new_right, page_id)?;
                if internal.entries.len() as u16 >= self.max_entries {
                    let mid = internal.entries.len() / 2;
                    let promote = internal.entries[mid].0.clone();
                    let right_p0 = internal.entries[mid].1;
                    let mut right_entries = internal.entries.split_off(mid + 1);
                    internal.entries.truncate(mid);
                    let right_page_id = engine.allocate_page()?;
                    self.set_parent(engine, txn, right_p0, right_page_id)?;
                    for (_, c) in &right_entries {
                        self.set_parent(engine, txn, *c, right_page_id)?;
                    }
                    right_entries.shrink_to_fit();
                    let right = InternalNode { page_id: right_page_id, parent_page_id: internal.parent_page_id, p0: right_p0, entries: right_entries };
                    self.write_internal(engine, txn, &internal)?;
                    self.write_internal(engine, txn, &right)?;
                    log::debug!("btree: internal {page_id} split, new right internal {right_page_id}");
                    Ok(Some((promote, right_page_id)))
                } else {
                    self.write_internal(engine, txn, &internal)?;
                    Ok(None)
                }
            }
        }
    }

    // --- delete ---

    /// Finds the exact `(key, location)` pair (needed because secondary
    /// indexes encode duplicates via composite keys) and removes it,
    /// running the underflow protocol if the leaf drops below half full.
    pub fn delete(&self, engine: &StorageEngine, txn: TxnId, key: &IndexKey, location: DocumentLocation) -> DbResult<bool> {
        let mut current = self.root_page_id();
        loop {
            match self.read_node(engine, txn, current)? {
                Node::Internal(internal) => current = node::find_child(&internal, key),
                Node::Leaf(_) => break,
            }
        }
        let Node::Leaf(mut leaf) = self.read_node(engine, txn, current)? else { unreachable!() };
        let Some(pos) = leaf.entries.iter().position(|(k, l)| k == key && *l == location) else {
            return Ok(false);
        };
        leaf.entries.remove(pos);

        let is_root = leaf.parent_page_id == 0;
        let min_fill = (self.max_entries / 2) as usize;
        if !is_root && leaf.entries.len() < min_fill {
            self.underflow_leaf(engine, txn, leaf)?;
        } else {
            self.write_leaf(engine, txn, &leaf)?;
        }
        Ok(true)
    }

    fn underflow_leaf(&self, engine: &StorageEngine, txn: TxnId, leaf: LeafNode) -> DbResult<()> {
        let parent_id = leaf.parent_page_id;
        let Node::Internal(mut parent) = self.read_node(engine, txn, parent_id)? else {
            return Err(DbError::Corruption("leaf parent is not an internal node".into()));
        };
        let children = children_of(&parent);
        let idx = children
            .iter()
            .position(|&c| c == leaf.page_id)
            .ok_or_else(|| DbError::Corruption("leaf not found among parent's children".into()))?;

        if idx == 0 {
            let right_id = children[1];
            let Node::Leaf(right) = self.read_node(engine, txn, right_id)? else {
                return Err(DbError::Corruption("sibling is not a leaf".into()));
            };
            let mut merged = leaf;
            merged.entries.extend(right.entries);
            merged.next_leaf_page_id = right.next_leaf_page_id;
            self.write_leaf(engine, txn, &merged)?;
            self.set_leaf_prev(engine, txn, right.next_leaf_page_id, merged.page_id)?;
            engine.free_page_immediate(right_id)?;
            parent.entries.remove(0);
        } else {
            let left_id = children[idx - 1];
            let Node::Leaf(mut left) = self.read_node(engine, txn, left_id)? else {
                return Err(DbError::Corruption("sibling is not a leaf".into()));
            };
            left.entries.extend(leaf.entries);
            left.next_leaf_page_id = leaf.next_leaf_page_id;
            self.write_leaf(engine, txn, &left)?;
            self.set_leaf_prev(engine, txn, leaf.next_leaf_page_id, left_id)?;
            engine.free_page_immediate(leaf.page_id)?;
            parent.entries.remove(idx - 1);
        }

        self.fixup_after_removal(engine, txn, parent)
    }

    /// Writes the parent back, recursing into its own underflow handling
    /// (merge with a sibling, or collapse the root) if it now has too few
    /// entries.
    fn fixup_after_removal(&self, engine: &StorageEngine, txn: TxnId, node: InternalNode) -> DbResult<()> {
        let is_root = node.page_id == self.root_page_id();
        let min_fill = (self.max_entries / 2) as usize;

        if is_root {
            if node.entries.is_empty() {
                let new_root = node.p0;
                self.set_parent(engine, txn, new_root, 0)?;
                engine.free_page_immediate(node.page_id)?;
                *self.root_page_id.write() = new_root;
                log::debug!("btree: root collapsed to {new_root}");
            } else {
                self.write_internal(engine, txn, &node)?;
            }
            return Ok(());
        }

        if node.entries.len() >= min_fill {
            self.write_internal(engine, txn, &node)?;
            return Ok(());
        }
        self.underflow_internal(engine, txn, node)
    }

    fn underflow_internal(&self, engine: &StorageEngine, txn: TxnId, node: InternalNode) -> DbResult<()> {
        let parent_id = node.parent_page_id;
        let Node::Internal(mut parent) = self.read_node(engine, txn, parent_id)? else {
            return Err(DbError::Corruption("internal node parent is not internal".into()));
        };
        let children = children_of(&parent);
        let idx = children
            .iter()
            .position(|&c| c == node.page_id)
            .ok_or_else(|| DbError::Corruption("node not found among parent's children".into()))?;

        if idx == 0 {
            let right_id = children[1];
            let Node::Internal(right) = self.read_node(engine, txn, right_id)? else {
                return Err(DbError::Corruption("sibling is not internal".into()));
            };
            let separator = parent.entries[0].0.clone();
            let mut merged = node;
            merged.entries.push((separator, right.p0));
            self.set_parent(engine, txn, right.p0, merged.page_id)?;
            for (k, c) in right.entries {
                self.set_parent(engine, txn, c, merged.page_id)?;
                merged.entries.push((k, c));
            }
            self.write_internal(engine, txn, &merged)?;
            engine.free_page_immediate(right_id)?;
            parent.entries.remove(0);
        } else {
            let left_id = children[idx - 1];
            let Node::Internal(mut left) = self.read_node(engine, txn, left_id)? else {
                return Err(DbError::Corruption("sibling is not internal".into()));
            };
            let separator = parent.entries[idx - 1].0.clone();
            left.entries.push((separator, node.p0));
            self.set_parent(engine, txn, node.p0, left_id)?;
            for (k, c) in node.entries {
                self.set_parent(engine, txn, c, left_id)?;
                left.entries.push((k, c));
            }
            self.write_internal(engine, txn, &left)?;
            engine.free_page_immediate(node.page_id)?;
            parent.entries.remove(idx - 1);
        }

        self.fixup_after_removal(engine, txn, parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::index_key::encode_i64_key;

    fn open_engine(dir: &tempfile::TempDir) -> StorageEngine {
        StorageEngine::open(dir.path().join("t.db"), EngineConfig::new_16k()).unwrap()
    }

    fn loc(n: u32) -> DocumentLocation {
        DocumentLocation { page_id: n.max(2), slot_index: 0 }
    }

    #[test]
    fn insert_and_find_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);
        let txn = engine.begin_transaction().unwrap();
        let root = BTree::create_empty(&engine, txn).unwrap();
        let tree = BTree::new(root, 4);
        for i in 0..20i64 {
            tree.insert(&engine, txn, encode_i64_key(i), loc(i as u32)).unwrap();
        }
        engine.commit(txn).unwrap();

        let txn2 = engine.begin_transaction().unwrap();
        for i in 0..20i64 {
            let found = tree.try_find(&engine, txn2, &encode_i64_key(i)).unwrap();
            assert_eq!(found, Some(loc(i as u32)));
        }
    }

    #[test]
    fn range_scan_is_ascending_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);
        let txn = engine.begin_transaction().unwrap();
        let root = BTree::create_empty(&engine, txn).unwrap();
        let tree = BTree::new(root, 4);
        for i in 1..=100i64 {
            tree.insert(&engine, txn, encode_i64_key(i), loc(i as u32)).unwrap();
        }
        engine.commit(txn).unwrap();

        let txn2 = engine.begin_transaction().unwrap();
        let entries = tree
            .range(&engine, txn2, &encode_i64_key(1), &encode_i64_key(100), ScanDirection::Forward)
            .unwrap();
        assert_eq!(entries.len(), 100);
        for w in entries.windows(2) {
            assert!(w[0].key < w[1].key);
        }
    }

    #[test]
    fn delete_then_find_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);
        let txn = engine.begin_transaction().unwrap();
        let root = BTree::create_empty(&engine, txn).unwrap();
        let tree = BTree::new(root, 4);
        for i in 0..30i64 {
            tree.insert(&engine, txn, encode_i64_key(i), loc(i as u32)).unwrap();
        }
        for i in 0..30i64 {
            assert!(tree.delete(&engine, txn, &encode_i64_key(i), loc(i as u32)).unwrap());
        }
        for i in 0..30i64 {
            assert_eq!(tree.try_find(&engine, txn, &encode_i64_key(i)).unwrap(), None);
        }
    }

    #[test]
    fn leaf_chain_stays_linked_through_splits_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);
        let txn = engine.begin_transaction().unwrap();
        let root = BTree::create_empty(&engine, txn).unwrap();
        let tree = BTree::new(root, 4);
        for i in 0..50i64 {
            tree.insert(&engine, txn, encode_i64_key(i), loc(i as u32)).unwrap();
        }
        for i in 0..40i64 {
            tree.delete(&engine, txn, &encode_i64_key(i), loc(i as u32)).unwrap();
        }
        let entries = tree
            .range(&engine, txn, &IndexKey::MinKey, &IndexKey::MaxKey, ScanDirection::Forward)
            .unwrap();
        assert_eq!(entries.len(), 10);
        for w in entries.windows(2) {
            assert!(w[0].key < w[1].key);
        }
    }
}
