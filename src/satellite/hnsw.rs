//! HNSW vector index: greedy descent through upper layers down to a single
//! entry candidate, then a bounded best-first search at layer 0 (spec
//! §4.7's one-paragraph contract). Each node is one fixed-size page holding
//! the document location, its embedding, and a capped neighbor list per
//! level it participates in.
//!
//! Per spec §9's documented open question, the entry point is not rebuilt by
//! walking the graph at open: callers persist it in
//! `CollectionMetadata.vector_source` and pass it back in on every call.

use crate::engine::{StorageEngine, TxnId};
use crate::pager::{PAGE_HEADER_SIZE, finalize_checksum, write_page_header};
use crate::types::{DocumentLocation, PageType};
use crate::utils::errors::{DbError, DbResult};
use ordered_float::OrderedFloat;
use std::collections::{BinaryHeap, HashSet};

/// Neighbors kept per level. A real deployment would size this from
/// expected dataset scale; fixed here so every node page has a predictable
/// layout.
const M: usize = 12;
/// Highest level a node may be promoted to; levels above this are never
/// assigned; in practice the geometric level distribution makes reaching
/// this cap exceedingly rare.
const MAX_LEVEL: u16 = 8;
const EF_CONSTRUCTION: usize = 64;

const NODE_HEADER_SIZE: usize = 2 + 2 + 4 + 2; // level, dims, location.page_id, location.slot_index

struct HnswNode {
    page_id: u32,
    level: u16,
    location: DocumentLocation,
    embedding: Vec<f32>,
    /// `neighbors[l]` holds up to `M` neighbor page ids at level `l`, `0` = empty slot.
    neighbors: Vec<Vec<u32>>,
}

fn node_size(dims: u16, level: u16) -> usize {
    PAGE_HEADER_SIZE + NODE_HEADER_SIZE + dims as usize * 4 + (level as usize + 1) * (2 + M * 4)
}

fn encode_node(node: &HnswNode, page_size: usize) -> DbResult<Vec<u8>> {
    let needed = node_size(node.embedding.len() as u16, node.level);
    if needed > page_size {
        return Err(DbError::Invariant(format!("HNSW node ({} dims, level {}) exceeds page size", node.embedding.len(), node.level)));
    }
    let mut buf = vec![0u8; page_size];
    write_page_header(&mut buf, node.page_id, PageType::Vector, 0, 0, 0);
    let mut pos = PAGE_HEADER_SIZE;
    buf[pos..pos + 2].copy_from_slice(&node.level.to_le_bytes());
    pos += 2;
    buf[pos..pos + 2].copy_from_slice(&(node.embedding.len() as u16).to_le_bytes());
    pos += 2;
    buf[pos..pos + 4].copy_from_slice(&node.location.page_id.to_le_bytes());
    pos += 4;
    buf[pos..pos + 2].copy_from_slice(&node.location.slot_index.to_le_bytes());
    pos += 2;
    for v in &node.embedding {
        buf[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
        pos += 4;
    }
    for level_neighbors in &node.neighbors {
        buf[pos..pos + 2].copy_from_slice(&(level_neighbors.len() as u16).to_le_bytes());
        pos += 2;
        for i in 0..M {
            let id = level_neighbors.get(i).copied().unwrap_or(0);
            buf[pos..pos + 4].copy_from_slice(&id.to_le_bytes());
            pos += 4;
        }
    }
    finalize_checksum(&mut buf);
    Ok(buf)
}

fn parse_node(buf: &[u8]) -> HnswNode {
    let page_id = crate::pager::read_page_id(buf);
    let mut pos = PAGE_HEADER_SIZE;
    let level = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
    pos += 2;
    let dims = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
    pos += 2;
    let location_page_id = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let slot_index = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap());
    pos += 2;
    let mut embedding = Vec::with_capacity(dims as usize);
    for _ in 0..dims {
        embedding.push(f32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()));
        pos += 4;
    }
    let mut neighbors = Vec::with_capacity(level as usize + 1);
    for _ in 0..=level {
        let count = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;
        let mut level_neighbors = Vec::with_capacity(count);
        for i in 0..M {
            let id = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
            pos += 4;
            if i < count && id != 0 {
                level_neighbors.push(id);
            }
        }
        neighbors.push(level_neighbors);
    }
    HnswNode { page_id, level, location: DocumentLocation { page_id: location_page_id, slot_index }, embedding, neighbors }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Deterministic, allocation-free level sampler: a splitmix64 step keyed by
/// the node's own page id (assigned immediately before this is called), so
/// no external RNG dependency is needed for the geometric level
/// distribution standard HNSW implementations use.
fn sample_level(seed: u64) -> u16 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    let u = (z as f64 / u64::MAX as f64).max(f64::MIN_POSITIVE);
    let m_l = 1.0 / (M as f64).ln();
    let level = (-u.ln() * m_l).floor() as u16;
    level.min(MAX_LEVEL)
}

/// A vector index over fixed-dimension embeddings. Stateless beyond `dims`:
/// callers own and persist the entry point (`(page_id, level)`), per the
/// documented open-question resolution.
pub struct HnswIndex {
    dims: u16,
}

type EntryPoint = (u32, u16);

impl HnswIndex {
    #[must_use]
    pub fn new(dims: u16) -> Self {
        Self { dims }
    }

    fn read_node(&self, engine: &StorageEngine, txn: TxnId, page_id: u32) -> DbResult<HnswNode> {
        let buf = engine.read_page(page_id, Some(txn))?;
        Ok(parse_node(&buf))
    }

    fn write_node(&self, engine: &StorageEngine, txn: TxnId, node: &HnswNode) -> DbResult<()> {
        let buf = encode_node(node, engine.page_size() as usize)?;
        engine.write_page(node.page_id, txn, &buf)
    }

    /// Bounded best-first search within a single layer, expanding from
    /// `entry_points`. Returns up to `ef` nearest candidates found.
    fn search_layer(&self, engine: &StorageEngine, txn: TxnId, query: &[f32], entry_points: &[(u32, f32)], ef: usize, level: u16) -> DbResult<Vec<(f32, u32)>> {
        let mut visited: HashSet<u32> = entry_points.iter().map(|&(id, _)| id).collect();
        let mut candidates: BinaryHeap<(std::cmp::Reverse<OrderedFloat<f32>>, u32)> =
            entry_points.iter().map(|&(id, d)| (std::cmp::Reverse(OrderedFloat(d)), id)).collect();
        let mut found: Vec<(f32, u32)> = entry_points.to_vec();

        while let Some((std::cmp::Reverse(OrderedFloat(dist)), id)) = candidates.pop() {
            let worst = found.iter().map(|&(d, _)| d).fold(f32::NEG_INFINITY, f32::max);
            if found.len() >= ef && dist > worst {
                break;
            }
            let node = self.read_node(engine, txn, id)?;
            let Some(level_neighbors) = node.neighbors.get(level as usize) else { continue };
            for &neighbor_id in level_neighbors {
                if neighbor_id == 0 || !visited.insert(neighbor_id) {
                    continue;
                }
                let neighbor = self.read_node(engine, txn, neighbor_id)?;
                let d = squared_distance(query, &neighbor.embedding);
                candidates.push((std::cmp::Reverse(OrderedFloat(d)), neighbor_id));
                found.push((d, neighbor_id));
            }
        }
        found.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        found.truncate(ef.max(1));
        Ok(found)
    }

    /// Inserts a new embedding, linking it bidirectionally into every level
    /// it participates in. Returns the new node's page id and, if it raised
    /// the graph's maximum level, the entry point callers should persist.
    pub fn insert(&self, engine: &StorageEngine, txn: TxnId, location: DocumentLocation, embedding: Vec<f32>, entry: Option<EntryPoint>) -> DbResult<(u32, Option<EntryPoint>)> {
        if embedding.len() != self.dims as usize {
            return Err(DbError::Invariant(format!("embedding has {} dims, index expects {}", embedding.len(), self.dims)));
        }
        let page_id = engine.allocate_page()?;
        let level = sample_level(u64::from(page_id));

        let Some((entry_page, entry_level)) = entry else {
            let node = HnswNode { page_id, level, location, embedding, neighbors: vec![Vec::new(); level as usize + 1] };
            self.write_node(engine, txn, &node)?;
            return Ok((page_id, Some((page_id, level))));
        };

        let mut current = entry_page;
        let mut current_dist = squared_distance(&embedding, &self.read_node(engine, txn, entry_page)?.embedding);
        for l in ((level + 1)..=entry_level).rev() {
            let found = self.search_layer(engine, txn, &embedding, &[(current, current_dist)], 1, l)?;
            if let Some(&(d, id)) = found.first() {
                current = id;
                current_dist = d;
            }
        }

        let mut neighbors_per_level = vec![Vec::new(); level as usize + 1];
        for l in (0..=level.min(entry_level)).rev() {
            let found = self.search_layer(engine, txn, &embedding, &[(current, current_dist)], EF_CONSTRUCTION, l)?;
            let chosen: Vec<u32> = found.iter().take(M).map(|&(_, id)| id).collect();
            neighbors_per_level[l as usize] = chosen.clone();
            if let Some(&(d, id)) = found.first() {
                current = id;
                current_dist = d;
            }
            for neighbor_id in chosen {
                let mut neighbor = self.read_node(engine, txn, neighbor_id)?;
                if let Some(nl) = neighbor.neighbors.get_mut(l as usize) {
                    nl.push(page_id);
                    if nl.len() > M {
                        nl.sort_by_key(|&id| {
                            OrderedFloat(if id == 0 { f32::MAX } else { squared_distance(&embedding, &neighbor.embedding) })
                        });
                        nl.truncate(M);
                    }
                    self.write_node(engine, txn, &neighbor)?;
                }
            }
        }

        let node = HnswNode { page_id, level, location, embedding, neighbors: neighbors_per_level };
        self.write_node(engine, txn, &node)?;

        let new_entry = if level > entry_level { Some((page_id, level)) } else { Some((entry_page, entry_level)) };
        Ok((page_id, new_entry))
    }

    /// Greedy descent through the upper layers to a single candidate, then a
    /// bounded best-first search at layer 0 for the `k` nearest neighbors.
    pub fn search(&self, engine: &StorageEngine, txn: TxnId, entry: Option<EntryPoint>, query: &[f32], k: usize) -> DbResult<Vec<(f32, DocumentLocation)>> {
        let Some((entry_page, entry_level)) = entry else { return Ok(Vec::new()) };
        let mut current = entry_page;
        let mut current_dist = squared_distance(query, &self.read_node(engine, txn, entry_page)?.embedding);
        for l in (1..=entry_level).rev() {
            let found = self.search_layer(engine, txn, query, &[(current, current_dist)], 1, l)?;
            if let Some(&(d, id)) = found.first() {
                current = id;
                current_dist = d;
            }
        }
        let found = self.search_layer(engine, txn, query, &[(current, current_dist)], k.max(EF_CONSTRUCTION), 0)?;
        let mut out = Vec::with_capacity(k);
        for (dist, id) in found.into_iter().take(k) {
            out.push((dist, self.read_node(engine, txn, id)?.location));
        }
        Ok(out)
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
    fn nearest_neighbor_is_closest_point() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let index = HnswIndex::new(2);
        let mut entry = None;
        let points = [[0.0f32, 0.0], [10.0, 10.0], [0.5, 0.5], [20.0, 20.0]];
        for (i, p) in points.iter().enumerate() {
            let (_, new_entry) = index.insert(&engine, txn, DocumentLocation { page_id: 2, slot_index: i as u16 }, p.to_vec(), entry).unwrap();
            entry = new_entry;
        }
        let results = index.search(&engine, txn, entry, &[0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].1, DocumentLocation { page_id: 2, slot_index: 0 });
    }
}
