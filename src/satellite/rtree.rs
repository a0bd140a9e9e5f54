//! R-Tree spatial index over axis-aligned bounding boxes (MBRs). Quadratic
//! split on leaf/internal overflow, MBR enlargement propagated upward on
//! insert. Per spec §9's documented open question, leaf underflow on delete
//! is left unmerged: a leaf may end up with fewer than the minimum fill
//! entries and is simply left in place rather than triggering a reinsertion
//! pass, trading a slightly less compact tree for a much simpler delete
//! path.

use crate::engine::{StorageEngine, TxnId};
use crate::pager::{PAGE_HEADER_SIZE, finalize_checksum, write_page_header};
use crate::types::{DocumentLocation, PageType};
use crate::utils::errors::{DbError, DbResult};

const MAX_ENTRIES: usize = 16;
const MIN_ENTRIES: usize = MAX_ENTRIES / 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mbr {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl Mbr {
    #[must_use]
    pub fn point(x: f32, y: f32) -> Self {
        Self { min: [x, y], max: [x, y] }
    }

    #[must_use]
    fn area(&self) -> f32 {
        (self.max[0] - self.min[0]).max(0.0) * (self.max[1] - self.min[1]).max(0.0)
    }

    #[must_use]
    fn union(&self, other: &Mbr) -> Mbr {
        Mbr {
            min: [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            max: [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        }
    }

    #[must_use]
    fn enlargement(&self, other: &Mbr) -> f32 {
        self.union(other).area() - self.area()
    }

    #[must_use]
    pub fn intersects(&self, other: &Mbr) -> bool {
        self.min[0] <= other.max[0] && self.max[0] >= other.min[0] && self.min[1] <= other.max[1] && self.max[1] >= other.min[1]
    }
}

/// One entry in a node: its MBR, and either a child page id (internal) or a
/// document location (leaf), discriminated by the node's own `is_leaf` flag.
#[derive(Clone, Copy)]
struct Entry {
    mbr: Mbr,
    child_page_id: u32,
    location: DocumentLocation,
}

struct RNode {
    page_id: u32,
    is_leaf: bool,
    entries: Vec<Entry>,
}

const ENTRY_SIZE: usize = 16 + 4 + 4 + 2; // mbr + child_page_id + location.page_id + location.slot_index
const NODE_HEADER_SIZE: usize = 1 + 2; // is_leaf, entry_count

fn encode_node(node: &RNode, page_size: usize) -> DbResult<Vec<u8>> {
    if NODE_HEADER_SIZE + node.entries.len() * ENTRY_SIZE > page_size - PAGE_HEADER_SIZE {
        return Err(DbError::Invariant("R-tree node overflowed its page".into()));
    }
    let mut buf = vec![0u8; page_size];
    write_page_header(&mut buf, node.page_id, PageType::Spatial, 0, 0, 0);
    let mut pos = PAGE_HEADER_SIZE;
    buf[pos] = u8::from(node.is_leaf);
    pos += 1;
    buf[pos..pos + 2].copy_from_slice(&(node.entries.len() as u16).to_le_bytes());
    pos += 2;
    for e in &node.entries {
        for v in e.mbr.min.iter().chain(e.mbr.max.iter()) {
            buf[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
            pos += 4;
        }
        buf[pos..pos + 4].copy_from_slice(&e.child_page_id.to_le_bytes());
        pos += 4;
        buf[pos..pos + 4].copy_from_slice(&e.location.page_id.to_le_bytes());
        pos += 4;
        buf[pos..pos + 2].copy_from_slice(&e.location.slot_index.to_le_bytes());
        pos += 2;
    }
    finalize_checksum(&mut buf);
    Ok(buf)
}

fn parse_node(buf: &[u8]) -> RNode {
    let page_id = crate::pager::read_page_id(buf);
    let mut pos = PAGE_HEADER_SIZE;
    let is_leaf = buf[pos] != 0;
    pos += 1;
    let count = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap()) as usize;
    pos += 2;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let mut comps = [0f32; 4];
        for c in &mut comps {
            *c = f32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
            pos += 4;
        }
        let mbr = Mbr { min: [comps[0], comps[1]], max: [comps[2], comps[3]] };
        let child_page_id = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let location_page_id = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let slot_index = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
        pos += 2;
        entries.push(Entry { mbr, child_page_id, location: DocumentLocation { page_id: location_page_id, slot_index } });
    }
    RNode { page_id, is_leaf, entries }
}

/// Quadratic split: seed with the pair whose combined MBR wastes the most
/// area, then greedily assign the rest to whichever group enlarges least.
fn quadratic_split(mut entries: Vec<Entry>) -> (Vec<Entry>, Vec<Entry>) {
    let mut seed_a = 0;
    let mut seed_b = 1;
    let mut worst_waste = f32::NEG_INFINITY;
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let combined = entries[i].mbr.union(&entries[j].mbr);
            let waste = combined.area() - entries[i].mbr.area() - entries[j].mbr.area();
            if waste > worst_waste {
                worst_waste = waste;
                seed_a = i;
                seed_b = j;
            }
        }
    }
    let b_entry = entries.remove(seed_b);
    let a_entry = entries.remove(seed_a);
    let mut group_a = vec![a_entry];
    let mut group_b = vec![b_entry];
    let mut mbr_a = a_entry.mbr;
    let mut mbr_b = b_entry.mbr;

    let mut remaining: Vec<Entry> = entries.drain(..).collect();
    while let Some(e) = remaining.pop() {
        let left = remaining.len();
        // Force remaining entries to whichever group still needs them to hit
        // the minimum fill, once the other group can no longer catch up.
        if group_a.len() + left + 1 <= MIN_ENTRIES {
            group_a.push(e);
            mbr_a = mbr_a.union(&e.mbr);
            continue;
        }
        if group_b.len() + left + 1 <= MIN_ENTRIES {
            group_b.push(e);
            mbr_b = mbr_b.union(&e.mbr);
            continue;
        }
        if mbr_a.enlargement(&e.mbr) <= mbr_b.enlargement(&e.mbr) {
            group_a.push(e);
            mbr_a = mbr_a.union(&e.mbr);
        } else {
            group_b.push(e);
            mbr_b = mbr_b.union(&e.mbr);
        }
    }
    (group_a, group_b)
}

fn node_mbr(entries: &[Entry]) -> Mbr {
    entries.iter().skip(1).fold(entries[0].mbr, |acc, e| acc.union(&e.mbr))
}

/// An R-Tree over a single root page, reusing the storage engine's page
/// read/write contract directly rather than the B+Tree's node machinery.
pub struct RTree {
    root_page_id: u32,
}

impl RTree {
    #[must_use]
    pub fn new(root_page_id: u32) -> Self {
        Self { root_page_id }
    }

    #[must_use]
    pub fn root_page_id(&self) -> u32 {
        self.root_page_id
    }

    pub fn create_empty(engine: &StorageEngine, txn: TxnId) -> DbResult<u32> {
        let page_id = engine.allocate_page()?;
        let node = RNode { page_id, is_leaf: true, entries: Vec::new() };
        engine.write_page(page_id, txn, &encode_node(&node, engine.page_size() as usize)?)?;
        Ok(page_id)
    }

    fn read_node(&self, engine: &StorageEngine, txn: TxnId, page_id: u32) -> DbResult<RNode> {
        Ok(parse_node(&engine.read_page(page_id, Some(txn))?))
    }

    fn write_node(&self, engine: &StorageEngine, txn: TxnId, node: &RNode) -> DbResult<()> {
        let buf = encode_node(node, engine.page_size() as usize)?;
        engine.write_page(node.page_id, txn, &buf)
    }

    /// Inserts a new entry, splitting overflowing nodes bottom-up and
    /// growing the tree by one level if the root itself splits.
    pub fn insert(&mut self, engine: &StorageEngine, txn: TxnId, mbr: Mbr, location: DocumentLocation) -> DbResult<()> {
        let mut path = vec![self.root_page_id];
        let mut current = self.read_node(engine, txn, self.root_page_id)?;
        while !current.is_leaf {
            let best = current
                .entries
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.mbr.enlargement(&mbr).partial_cmp(&b.mbr.enlargement(&mbr)).unwrap())
                .map(|(i, _)| i)
                .expect("internal node has at least one entry");
            let child_id = current.entries[best].child_page_id;
            path.push(child_id);
            current = self.read_node(engine, txn, child_id)?;
        }

        current.entries.push(Entry { mbr, child_page_id: 0, location });
        self.insert_and_propagate(engine, txn, current, &path)
    }

    fn insert_and_propagate(&mut self, engine: &StorageEngine, txn: TxnId, mut node: RNode, path: &[u32]) -> DbResult<()> {
        if node.entries.len() <= MAX_ENTRIES {
            self.write_node(engine, txn, &node)?;
            return self.update_ancestors(engine, txn, path);
        }

        let is_leaf = node.is_leaf;
        let (group_a, group_b) = quadratic_split(std::mem::take(&mut node.entries));
        node.entries = group_a;
        let sibling_page_id = engine.allocate_page()?;
        let sibling = RNode { page_id: sibling_page_id, is_leaf, entries: group_b };
        self.write_node(engine, txn, &node)?;
        self.write_node(engine, txn, &sibling)?;

        match path.split_last() {
            None => unreachable!("a split node always has a page id recorded in path"),
            Some((&this_page_id, parent_path)) => {
                if let Some(&parent_page_id) = parent_path.last() {
                    let mut parent = self.read_node(engine, txn, parent_page_id)?;
                    if let Some(e) = parent.entries.iter_mut().find(|e| e.child_page_id == this_page_id) {
                        e.mbr = node_mbr(&node.entries);
                    }
                    parent.entries.push(Entry { mbr: node_mbr(&sibling.entries), child_page_id: sibling_page_id, location: DocumentLocation::NONE });
                    self.insert_and_propagate(engine, txn, parent, parent_path)
                } else {
                    // The root split: grow the tree by one level.
                    let new_root_id = engine.allocate_page()?;
                    let new_root = RNode {
                        page_id: new_root_id,
                        is_leaf: false,
                        entries: vec![
                            Entry { mbr: node_mbr(&node.entries), child_page_id: this_page_id, location: DocumentLocation::NONE },
                            Entry { mbr: node_mbr(&sibling.entries), child_page_id: sibling_page_id, location: DocumentLocation::NONE },
                        ],
                    };
                    self.write_node(engine, txn, &new_root)?;
                    self.root_page_id = new_root_id;
                    Ok(())
                }
            }
        }
    }

    fn update_ancestors(&mut self, engine: &StorageEngine, txn: TxnId, path: &[u32]) -> DbResult<()> {
        let Some((&this_page_id, rest)) = path.split_last() else { return Ok(()) };
        let Some(&parent_page_id) = rest.last() else { return Ok(()) };
        let this = self.read_node(engine, txn, this_page_id)?;
        let mut parent = self.read_node(engine, txn, parent_page_id)?;
        if let Some(e) = parent.entries.iter_mut().find(|e| e.child_page_id == this_page_id) {
            e.mbr = node_mbr(&this.entries);
        }
        self.write_node(engine, txn, &parent)?;
        self.update_ancestors(engine, txn, rest)
    }

    /// Returns every stored location whose MBR intersects `query`.
    pub fn search(&self, engine: &StorageEngine, txn: TxnId, query: &Mbr) -> DbResult<Vec<DocumentLocation>> {
        let mut results = Vec::new();
        self.search_node(engine, txn, self.root_page_id, query, &mut results)?;
        Ok(results)
    }

    fn search_node(&self, engine: &StorageEngine, txn: TxnId, page_id: u32, query: &Mbr, results: &mut Vec<DocumentLocation>) -> DbResult<()> {
        let node = self.read_node(engine, txn, page_id)?;
        for e in &node.entries {
            if !e.mbr.intersects(query) {
                continue;
            }
            if node.is_leaf {
                results.push(e.location);
            } else {
                self.search_node(engine, txn, e.child_page_id, query, results)?;
            }
        }
        Ok(())
    }

    /// Removes the first entry exactly matching `location` within `mbr`.
    /// Per the documented open-question decision, an underflowing leaf is
    /// left as-is rather than merged or redistributed.
    pub fn delete(&self, engine: &StorageEngine, txn: TxnId, mbr: &Mbr, location: DocumentLocation) -> DbResult<bool> {
        self.delete_node(engine, txn, self.root_page_id, mbr, location)
    }

    fn delete_node(&self, engine: &StorageEngine, txn: TxnId, page_id: u32, mbr: &Mbr, location: DocumentLocation) -> DbResult<bool> {
        let mut node = self.read_node(engine, txn, page_id)?;
        if node.is_leaf {
            let Some(pos) = node.entries.iter().position(|e| e.mbr == *mbr && e.location == location) else { return Ok(false) };
            node.entries.remove(pos);
            self.write_node(engine, txn, &node)?;
            return Ok(true);
        }
        for i in 0..node.entries.len() {
            if !node.entries[i].mbr.intersects(mbr) {
                continue;
            }
            if self.delete_node(engine, txn, node.entries[i].child_page_id, mbr, location)? {
                let child = self.read_node(engine, txn, node.entries[i].child_page_id)?;
                if !child.entries.is_empty() {
                    node.entries[i].mbr = node_mbr(&child.entries);
                    self.write_node(engine, txn, &node)?;
                }
                return Ok(true);
            }
        }
        Ok(false)
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
    fn search_finds_intersecting_points() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let root = RTree::create_empty(&engine, txn).unwrap();
        let mut tree = RTree::new(root);
        for i in 0..60i32 {
            let p = Mbr::point(i as f32, i as f32);
            tree.insert(&engine, txn, p, DocumentLocation { page_id: 2, slot_index: i as u16 }).unwrap();
        }
        let hits = tree.search(&engine, txn, &Mbr { min: [10.0, 10.0], max: [20.0, 20.0] }).unwrap();
        assert_eq!(hits.len(), 11);
    }

    #[test]
    fn delete_removes_matching_entry() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let root = RTree::create_empty(&engine, txn).unwrap();
        let mut tree = RTree::new(root);
        let p = Mbr::point(1.0, 1.0);
        tree.insert(&engine, txn, p, DocumentLocation { page_id: 2, slot_index: 0 }).unwrap();
        assert!(tree.delete(&engine, txn, &p, DocumentLocation { page_id: 2, slot_index: 0 }).unwrap());
        assert!(tree.search(&engine, txn, &p).unwrap().is_empty());
    }
}
