//! On-disk B+Tree node format: `[page_header][node_header][payload]`.
//!
//! Unlike the slotted document page, nodes are small and rewritten whole on
//! every mutation: parse the full entry list, mutate it in memory, and
//! re-serialize. This keeps the split/merge logic readable while still
//! satisfying the on-disk layout and invariants in full.

use crate::pager::{PAGE_HEADER_SIZE, finalize_checksum, write_page_header};
use crate::types::{DocumentLocation, IndexKey, PageType};
use crate::utils::errors::{DbError, DbResult};

pub const NODE_HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct NodeHeader {
    pub page_id: u32,
    pub is_leaf: bool,
    pub entry_count: u16,
    pub parent_page_id: u32,
    pub next_leaf_page_id: u32,
    pub prev_leaf_page_id: u32,
}

fn read_node_header(buf: &[u8]) -> NodeHeader {
    let h = &buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + NODE_HEADER_SIZE];
    NodeHeader {
        page_id: u32::from_le_bytes(h[0..4].try_into().unwrap()),
        is_leaf: h[4] != 0,
        entry_count: u16::from_le_bytes(h[5..7].try_into().unwrap()),
        parent_page_id: u32::from_le_bytes(h[8..12].try_into().unwrap()),
        next_leaf_page_id: u32::from_le_bytes(h[12..16].try_into().unwrap()),
        prev_leaf_page_id: u32::from_le_bytes(h[16..20].try_into().unwrap()),
    }
}

fn write_node_header(buf: &mut [u8], nh: NodeHeader) {
    let h = &mut buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + NODE_HEADER_SIZE];
    h[0..4].copy_from_slice(&nh.page_id.to_le_bytes());
    h[4] = u8::from(nh.is_leaf);
    h[5..7].copy_from_slice(&nh.entry_count.to_le_bytes());
    h[7] = 0;
    h[8..12].copy_from_slice(&nh.parent_page_id.to_le_bytes());
    h[12..16].copy_from_slice(&nh.next_leaf_page_id.to_le_bytes());
    h[16..20].copy_from_slice(&nh.prev_leaf_page_id.to_le_bytes());
}

fn payload_start() -> usize {
    PAGE_HEADER_SIZE + NODE_HEADER_SIZE
}

fn encode_key(out: &mut Vec<u8>, key: &IndexKey) {
    let bytes = key.as_bytes();
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn decode_key(buf: &[u8], pos: &mut usize) -> IndexKey {
    let len = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    let bytes = buf[*pos..*pos + len].to_vec();
    *pos += len;
    IndexKey::Bytes(bytes)
}

/// A parsed leaf node: entries in key order, plus sibling links.
#[derive(Debug, Clone)]
pub struct LeafNode {
    pub page_id: u32,
    pub parent_page_id: u32,
    pub next_leaf_page_id: u32,
    pub prev_leaf_page_id: u32,
    pub entries: Vec<(IndexKey, DocumentLocation)>,
}

/// A parsed internal node: `p0` is the left-most child; `entries[i]` pairs a
/// separator key with its right child.
#[derive(Debug, Clone)]
pub struct InternalNode {
    pub page_id: u32,
    pub parent_page_id: u32,
    pub p0: u32,
    pub entries: Vec<(IndexKey, u32)>,
}

pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

pub fn parse(buf: &[u8]) -> DbResult<Node> {
    let nh = read_node_header(buf);
    let mut pos = payload_start();
    if nh.is_leaf {
        let mut entries = Vec::with_capacity(nh.entry_count as usize);
        for _ in 0..nh.entry_count {
            let key = decode_key(buf, &mut pos);
            let loc = crate::slotted_page::decode_location(&buf[pos..pos + 6]);
            pos += 6;
            entries.push((key, loc));
        }
        Ok(Node::Leaf(LeafNode {
            page_id: nh.page_id,
            parent_page_id: nh.parent_page_id,
            next_leaf_page_id: nh.next_leaf_page_id,
            prev_leaf_page_id: nh.prev_leaf_page_id,
            entries,
        }))
    } else {
        let p0 = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
        pos += 4;
        let mut entries = Vec::with_capacity(nh.entry_count as usize);
        for _ in 0..nh.entry_count {
            let key = decode_key(buf, &mut pos);
            let child = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
            pos += 4;
            entries.push((key, child));
        }
        Ok(Node::Internal(InternalNode { page_id: nh.page_id, parent_page_id: nh.parent_page_id, p0, entries }))
    }
}

fn encode_common(page_id: u32, page_size: usize) -> Vec<u8> {
    vec![0u8; page_size]
}

pub fn encode_leaf(leaf: &LeafNode, page_size: usize) -> DbResult<Vec<u8>> {
    let mut buf = encode_common(leaf.page_id, page_size);
    write_page_header(&mut buf, leaf.page_id, PageType::Index, 0, 0, 0);
    write_node_header(
        &mut buf,
        NodeHeader {
            page_id: leaf.page_id,
            is_leaf: true,
            entry_count: leaf.entries.len() as u16,
            parent_page_id: leaf.parent_page_id,
            next_leaf_page_id: leaf.next_leaf_page_id,
            prev_leaf_page_id: leaf.prev_leaf_page_id,
        },
    );
    let mut payload = Vec::new();
    for (key, loc) in &leaf.entries {
        encode_key(&mut payload, key);
        payload.extend_from_slice(&crate::slotted_page::encode_location(*loc));
    }
    if payload_start() + payload.len() > page_size {
        return Err(DbError::Invariant("leaf node payload exceeds page size".into()));
    }
    buf[payload_start()..payload_start() + payload.len()].copy_from_slice(&payload);
    finalize_checksum(&mut buf);
    Ok(buf)
}

pub fn encode_internal(node: &InternalNode, page_size: usize) -> DbResult<Vec<u8>> {
    let mut buf = encode_common(node.page_id, page_size);
    write_page_header(&mut buf, node.page_id, PageType::Index, 0, 0, 0);
    write_node_header(
        &mut buf,
        NodeHeader {
            page_id: node.page_id,
            is_leaf: false,
            entry_count: node.entries.len() as u16,
            parent_page_id: node.parent_page_id,
            next_leaf_page_id: 0,
            prev_leaf_page_id: 0,
        },
    );
    let mut payload = Vec::new();
    payload.extend_from_slice(&node.p0.to_le_bytes());
    for (key, child) in &node.entries {
        encode_key(&mut payload, key);
        payload.extend_from_slice(&child.to_le_bytes());
    }
    if payload_start() + payload.len() > page_size {
        return Err(DbError::Invariant("internal node payload exceeds page size".into()));
    }
    buf[payload_start()..payload_start() + payload.len()].copy_from_slice(&payload);
    finalize_checksum(&mut buf);
    Ok(buf)
}

/// Picks the child pointer for `key`: the right child of the last separator
/// `<= key`, or `p0` if `key` is smaller than every separator.
#[must_use]
pub fn find_child(node: &InternalNode, key: &IndexKey) -> u32 {
    let mut child = node.p0;
    for (sep, c) in &node.entries {
        if key >= sep {
            child = *c;
        } else {
            break;
        }
    }
    child
}
