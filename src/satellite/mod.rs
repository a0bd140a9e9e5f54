//! L5': satellite indexes that share only the page read/write contract with
//! the storage engine (spec §4.7) — not the B+Tree machinery. Each has its
//! own page layout and traversal algorithm.

pub mod hnsw;
pub mod rtree;
