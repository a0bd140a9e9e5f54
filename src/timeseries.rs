//! Time-series append pages (satellite, §4.7): append-only pages of packed
//! BSON documents keyed by timestamp, chained via the page header's
//! `next_page_id` field. Pruning removes whole pages whose newest
//! timestamp predates a retention cutoff, unlinking them from the chain and
//! returning them to the free list — no partial-page compaction.

use crate::engine::{StorageEngine, TxnId};
use crate::pager::{PAGE_HEADER_SIZE, finalize_checksum, read_next_page_id, set_next_page_id, write_page_header};
use crate::types::{DocumentLocation, PageType};
use bson::Document as BsonDocument;
use crate::utils::errors::{DbError, DbResult};
use parking_lot::Mutex;

const PAGE_BODY_HEADER: usize = 2 + 8; // entry_count:u16, newest_timestamp:i64
const ENTRY_HEADER: usize = 8 + 4; // timestamp:i64, length:u32

fn init_page(page_id: u32, page_size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; page_size];
    write_page_header(&mut buf, page_id, PageType::Data, 0, 0, 0);
    buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 2].copy_from_slice(&0u16.to_le_bytes());
    buf[PAGE_HEADER_SIZE + 2..PAGE_HEADER_SIZE + 10].copy_from_slice(&i64::MIN.to_le_bytes());
    finalize_checksum(&mut buf);
    buf
}

fn entry_count(buf: &[u8]) -> u16 {
    u16::from_le_bytes(buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 2].try_into().unwrap())
}

fn newest_timestamp(buf: &[u8]) -> i64 {
    i64::from_le_bytes(buf[PAGE_HEADER_SIZE + 2..PAGE_HEADER_SIZE + 10].try_into().unwrap())
}

fn used_bytes(buf: &[u8]) -> usize {
    let mut pos = PAGE_HEADER_SIZE + PAGE_BODY_HEADER;
    for _ in 0..entry_count(buf) {
        let len = u32::from_le_bytes(buf[pos + 8..pos + 12].try_into().unwrap()) as usize;
        pos += ENTRY_HEADER + len;
    }
    pos
}

fn append_entry(buf: &mut Vec<u8>, timestamp: i64, doc_bytes: &[u8]) {
    let pos = used_bytes(buf);
    buf[pos..pos + 8].copy_from_slice(&timestamp.to_le_bytes());
    buf[pos + 8..pos + 12].copy_from_slice(&(doc_bytes.len() as u32).to_le_bytes());
    buf[pos + 12..pos + 12 + doc_bytes.len()].copy_from_slice(doc_bytes);
    let count = entry_count(buf) + 1;
    buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 2].copy_from_slice(&count.to_le_bytes());
    let newest = newest_timestamp(buf).max(timestamp);
    buf[PAGE_HEADER_SIZE + 2..PAGE_HEADER_SIZE + 10].copy_from_slice(&newest.to_le_bytes());
    finalize_checksum(buf);
}

fn read_entries(buf: &[u8]) -> DbResult<Vec<(i64, BsonDocument)>> {
    let mut pos = PAGE_HEADER_SIZE + PAGE_BODY_HEADER;
    let mut out = Vec::with_capacity(entry_count(buf) as usize);
    for _ in 0..entry_count(buf) {
        let timestamp = i64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
        let len = u32::from_le_bytes(buf[pos + 8..pos + 12].try_into().unwrap()) as usize;
        let doc: BsonDocument = bson::from_slice(&buf[pos + 12..pos + 12 + len])?;
        out.push((timestamp, doc));
        pos += ENTRY_HEADER + len;
    }
    Ok(out)
}

/// A single append-only time-series chain. `retention_seconds` is expressed
/// as a duration; callers pass an absolute cutoff timestamp to `prune`.
pub struct TimeSeriesCollection {
    head_page_id: Mutex<u32>,
    tail_page_id: Mutex<u32>,
    retention_seconds: u64,
}

impl TimeSeriesCollection {
    pub fn create_empty(engine: &StorageEngine, txn: TxnId, retention_seconds: u64) -> DbResult<Self> {
        let page_id = engine.allocate_page()?;
        let buf = init_page(page_id, engine.page_size() as usize);
        engine.write_page(page_id, txn, &buf)?;
        Ok(Self { head_page_id: Mutex::new(page_id), tail_page_id: Mutex::new(page_id), retention_seconds })
    }

    /// Reopens a chain from its persisted head, walking forward to find the
    /// current tail.
    pub fn open(engine: &StorageEngine, txn: TxnId, head_page_id: u32, retention_seconds: u64) -> DbResult<Self> {
        let mut current = head_page_id;
        loop {
            let buf = engine.read_page(current, Some(txn))?;
            let next = read_next_page_id(&buf);
            if next == 0 {
                break;
            }
            current = next;
        }
        Ok(Self { head_page_id: Mutex::new(head_page_id), tail_page_id: Mutex::new(current), retention_seconds })
    }

    #[must_use]
    pub fn head_page_id(&self) -> u32 {
        *self.head_page_id.lock()
    }

    #[must_use]
    pub fn retention_seconds(&self) -> u64 {
        self.retention_seconds
    }

    /// Appends one document, rolling over to a freshly allocated page when
    /// the current tail has no room left for it.
    pub fn append(&self, engine: &StorageEngine, txn: TxnId, timestamp: i64, doc: &BsonDocument) -> DbResult<DocumentLocation> {
        let doc_bytes = bson::to_vec(doc)?;
        let needed = ENTRY_HEADER + doc_bytes.len();
        let page_size = engine.page_size() as usize;
        if PAGE_HEADER_SIZE + PAGE_BODY_HEADER + needed > page_size {
            return Err(DbError::TooLarge(doc_bytes.len()));
        }

        let mut tail = self.tail_page_id.lock();
        let mut buf = engine.read_page(*tail, Some(txn))?;
        if used_bytes(&buf) + needed > page_size {
            let new_tail = engine.allocate_page()?;
            set_next_page_id(&mut buf, new_tail);
            finalize_checksum(&mut buf);
            engine.write_page(*tail, txn, &buf)?;
            buf = init_page(new_tail, page_size);
            *tail = new_tail;
        }
        let slot_index = entry_count(&buf);
        append_entry(&mut buf, timestamp, &doc_bytes);
        engine.write_page(*tail, txn, &buf)?;
        Ok(DocumentLocation { page_id: *tail, slot_index })
    }

    /// Returns every document whose timestamp falls in `[from, to]`,
    /// skipping whole pages whose newest timestamp is older than `from`.
    pub fn scan(&self, engine: &StorageEngine, txn: TxnId, from: i64, to: i64) -> DbResult<Vec<(i64, BsonDocument)>> {
        let mut out = Vec::new();
        let mut current = self.head_page_id();
        while current != 0 {
            let buf = engine.read_page(current, Some(txn))?;
            if newest_timestamp(&buf) >= from {
                for (timestamp, doc) in read_entries(&buf)? {
                    if timestamp >= from && timestamp <= to {
                        out.push((timestamp, doc));
                    }
                }
            }
            current = read_next_page_id(&buf);
        }
        Ok(out)
    }

    /// Frees every page whose newest timestamp predates `cutoff`, advancing
    /// the chain's head past them. Always leaves at least one page (the
    /// current tail) even if every page is expired.
    pub fn prune(&self, engine: &StorageEngine, cutoff: i64) -> DbResult<u32> {
        let mut head = self.head_page_id.lock();
        let tail = *self.tail_page_id.lock();
        loop {
            if *head == tail {
                break;
            }
            let buf = engine.read_page_immediate(*head)?;
            if newest_timestamp(&buf) >= cutoff {
                break;
            }
            let next = read_next_page_id(&buf);
            engine.free_page_immediate(*head)?;
            *head = next;
        }
        Ok(*head)
    }
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
    fn append_then_scan_round_trips_in_order() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let series = TimeSeriesCollection::create_empty(&engine, txn, 3600).unwrap();
        for i in 0..10i64 {
            series.append(&engine, txn, i, &doc! { "v": i }).unwrap();
        }
        let results = series.scan(&engine, txn, 0, 9).unwrap();
        assert_eq!(results.len(), 10);
        for (i, (ts, _)) in results.iter().enumerate() {
            assert_eq!(*ts, i as i64);
        }
    }

    #[test]
    fn prune_frees_pages_older_than_cutoff() {
        let (_dir, engine) = setup();
        let txn = engine.begin_transaction().unwrap();
        let series = TimeSeriesCollection::create_empty(&engine, txn, 3600).unwrap();
        // Force several page rollovers with a large payload per entry.
        let big = "x".repeat(4000);
        for i in 0..20i64 {
            series.append(&engine, txn, i, &doc! { "v": big.clone() }).unwrap();
        }
        engine.commit(txn).unwrap();
        let original_head = series.head_page_id();

        let new_head = series.prune(&engine, 15).unwrap();
        assert_ne!(new_head, original_head);
        assert_eq!(series.head_page_id(), new_head);
    }
}
