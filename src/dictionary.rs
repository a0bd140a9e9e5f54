//! L3b: the dictionary page — sorted key→id mapping used to intern BSON
//! field names into 16-bit IDs, chained across pages for growth.

use crate::engine::StorageEngine;
use crate::pager::{PAGE_HEADER_SIZE, finalize_checksum, write_page_header};
use crate::types::PageType;
use crate::utils::errors::{DbError, DbResult};
use parking_lot::RwLock;
use std::collections::HashMap;

const DICT_HEADER_SIZE: usize = 32;

fn read_dict_header(buf: &[u8]) -> (u16, u16, u32) {
    let h = &buf[PAGE_HEADER_SIZE..];
    let count = u16::from_le_bytes(h[0..2].try_into().unwrap());
    let free_space_end = u16::from_le_bytes(h[2..4].try_into().unwrap());
    let next_page = u32::from_le_bytes(h[4..8].try_into().unwrap());
    (count, free_space_end, next_page)
}

fn write_dict_header(buf: &mut [u8], count: u16, free_space_end: u16, next_page: u32) {
    let h = &mut buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + DICT_HEADER_SIZE];
    h[0..2].copy_from_slice(&count.to_le_bytes());
    h[2..4].copy_from_slice(&free_space_end.to_le_bytes());
    h[4..8].copy_from_slice(&next_page.to_le_bytes());
}

fn offsets_base() -> usize {
    PAGE_HEADER_SIZE + DICT_HEADER_SIZE
}

fn read_offset(buf: &[u8], i: u16) -> u16 {
    let o = offsets_base() + i as usize * 2;
    u16::from_le_bytes(buf[o..o + 2].try_into().unwrap())
}

fn write_offset(buf: &mut [u8], i: u16, offset: u16) {
    let o = offsets_base() + i as usize * 2;
    buf[o..o + 2].copy_from_slice(&offset.to_le_bytes());
}

fn entry_at<'a>(buf: &'a [u8], offset: u16) -> (&'a [u8], u16) {
    let o = offset as usize;
    let key_len = buf[o] as usize;
    let key = &buf[o + 1..o + 1 + key_len];
    let value_off = o + 1 + key_len;
    let value = u16::from_le_bytes(buf[value_off..value_off + 2].try_into().unwrap());
    (key, value)
}

fn entry_size(key: &[u8]) -> u16 {
    1 + key.len() as u16 + 2
}

/// Initializes a fresh, empty dictionary page.
pub fn init_dictionary_page(buf: &mut [u8], page_id: u32) {
    let page_size = buf.len() as u16;
    write_page_header(buf, page_id, PageType::Dictionary, 0, 0, 0);
    write_dict_header(buf, 0, page_size, 0);
    finalize_checksum(buf);
}

fn dict_next_page(buf: &[u8]) -> u32 {
    read_dict_header(buf).2
}

fn set_dict_next_page(buf: &mut [u8], next: u32) {
    let (count, end, _) = read_dict_header(buf);
    write_dict_header(buf, count, end, next);
}

/// Finds `key` within a single page via binary search over the sorted
/// offset array. `O(log n)` comparisons, each touching one entry.
fn find_in_page(buf: &[u8], key: &[u8]) -> Option<u16> {
    let (count, ..) = read_dict_header(buf);
    let mut lo = 0i32;
    let mut hi = i32::from(count) - 1;
    while lo <= hi {
        let mid = (lo + hi) / 2;
        let offset = read_offset(buf, mid as u16);
        let (k, v) = entry_at(buf, offset);
        match k.cmp(key) {
            std::cmp::Ordering::Equal => return Some(v),
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid - 1,
        }
    }
    None
}

/// Inserts `key → value` keeping the offset array sorted by key. Fails if
/// there is not enough room left on this page.
fn insert_in_page(buf: &mut [u8], key: &[u8], value: u16) -> DbResult<()> {
    let (count, free_space_end, next_page) = read_dict_header(buf);
    let needed = entry_size(key) + 2;
    let dir_end = offsets_base() + count as usize * 2;
    if (free_space_end as usize).saturating_sub(dir_end) < needed as usize {
        return Err(DbError::TooLarge(needed as usize));
    }
    let new_end = free_space_end - entry_size(key);
    let o = new_end as usize;
    buf[o] = key.len() as u8;
    buf[o + 1..o + 1 + key.len()].copy_from_slice(key);
    buf[o + 1 + key.len()..o + 1 + key.len() + 2].copy_from_slice(&value.to_le_bytes());

    let mut insert_at = count;
    for i in 0..count {
        let off = read_offset(buf, i);
        let (k, _) = entry_at(buf, off);
        if key < k {
            insert_at = i;
            break;
        }
    }
    for i in (insert_at..count).rev() {
        let v = read_offset(buf, i);
        write_offset(buf, i + 1, v);
    }
    write_offset(buf, insert_at, new_end);
    write_dict_header(buf, count + 1, new_end, next_page);
    finalize_checksum(buf);
    Ok(())
}

/// All `(key, id)` pairs on a single page, for cache warm-up.
fn all_entries(buf: &[u8]) -> Vec<(Vec<u8>, u16)> {
    let (count, ..) = read_dict_header(buf);
    (0..count)
        .map(|i| {
            let off = read_offset(buf, i);
            let (k, v) = entry_at(buf, off);
            (k.to_vec(), v)
        })
        .collect()
}

/// Process-wide (per-database-instance) `key ↔ id` cache plus the lock that
/// serializes growth of the dictionary page chain.
pub struct Dictionary {
    key_to_id: RwLock<HashMap<String, u16>>,
    id_to_key: RwLock<HashMap<u16, String>>,
    write_lock: parking_lot::Mutex<()>,
    next_id: std::sync::atomic::AtomicU32,
    reserved_dictionary_ids: u16,
}

impl Dictionary {
    #[must_use]
    pub fn new(reserved_dictionary_ids: u16) -> Self {
        Self {
            key_to_id: RwLock::new(HashMap::new()),
            id_to_key: RwLock::new(HashMap::new()),
            write_lock: parking_lot::Mutex::new(()),
            next_id: std::sync::atomic::AtomicU32::new(u32::from(reserved_dictionary_ids) + 1),
            reserved_dictionary_ids,
        }
    }

    /// Walks the dictionary page chain rooted at `engine`'s header pointer
    /// and populates the in-memory caches. Call once at engine start.
    pub fn warm_up(&self, engine: &StorageEngine) -> DbResult<()> {
        let mut page_id = engine.dictionary_root_page_id();
        let mut max_id = u32::from(self.reserved_dictionary_ids);
        let mut key_to_id = self.key_to_id.write();
        let mut id_to_key = self.id_to_key.write();
        while page_id != 0 {
            let buf = engine.read_page_immediate(page_id)?;
            for (key, id) in all_entries(&buf) {
                let key = String::from_utf8_lossy(&key).into_owned();
                key_to_id.insert(key.clone(), id);
                id_to_key.insert(id, key);
                max_id = max_id.max(u32::from(id));
            }
            page_id = dict_next_page(&buf);
        }
        drop(key_to_id);
        drop(id_to_key);
        self.next_id.store(max_id + 1, std::sync::atomic::Ordering::SeqCst);
        log::info!("dictionary warm-up complete, {} entries", self.key_to_id.read().len());
        Ok(())
    }

    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<u16> {
        self.key_to_id.read().get(key).copied()
    }

    #[must_use]
    pub fn lookup_key(&self, id: u16) -> Option<String> {
        self.id_to_key.read().get(&id).cloned()
    }

    /// Returns the interned ID for `key`, assigning and persisting a new one
    /// if it is not yet known. Dictionary writes bypass the transaction path:
    /// entries are never retracted and the in-memory cache is authoritative
    /// after warm-up in a single-process database.
    pub fn get_or_add(&self, engine: &StorageEngine, key: &str) -> DbResult<u16> {
        if let Some(id) = self.lookup(key) {
            return Ok(id);
        }
        let _guard = self.write_lock.lock();
        if let Some(id) = self.lookup(key) {
            return Ok(id);
        }
        let id = u16::try_from(self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
            .map_err(|_| DbError::Invariant("dictionary id space exhausted".into()))?;

        let mut root = engine.dictionary_root_page_id();
        if root == 0 {
            root = engine.allocate_page_immediate()?;
            let mut buf = vec![0u8; engine.page_size() as usize];
            init_dictionary_page(&mut buf, root);
            engine.write_page_immediate(root, &buf)?;
            engine.set_dictionary_root_page_id(root)?;
        }

        let mut page_id = root;
        loop {
            let mut buf = engine.read_page_immediate(page_id)?;
            match insert_in_page(&mut buf, key.as_bytes(), id) {
                Ok(()) => {
                    engine.write_page_immediate(page_id, &buf)?;
                    break;
                }
                Err(DbError::TooLarge(_)) => {
                    let next = dict_next_page(&buf);
                    if next != 0 {
                        page_id = next;
                        continue;
                    }
                    let new_page_id = engine.allocate_page_immediate()?;
                    let mut new_buf = vec![0u8; engine.page_size() as usize];
                    init_dictionary_page(&mut new_buf, new_page_id);
                    insert_in_page(&mut new_buf, key.as_bytes(), id)?;
                    engine.write_page_immediate(new_page_id, &new_buf)?;
                    set_dict_next_page(&mut buf, new_page_id);
                    engine.write_page_immediate(page_id, &buf)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        self.key_to_id.write().insert(key.to_string(), id);
        self.id_to_key.write().insert(id, key.to_string());
        log::debug!("dictionary: interned {key:?} as {id}");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_page_find_after_insert() {
        let mut buf = vec![0u8; 16384];
        init_dictionary_page(&mut buf, 2);
        insert_in_page(&mut buf, b"name", 65).unwrap();
        insert_in_page(&mut buf, b"age", 66).unwrap();
        insert_in_page(&mut buf, b"_id", 67).unwrap();
        assert_eq!(find_in_page(&buf, b"name"), Some(65));
        assert_eq!(find_in_page(&buf, b"age"), Some(66));
        assert_eq!(find_in_page(&buf, b"_id"), Some(67));
        assert_eq!(find_in_page(&buf, b"missing"), None);
    }

    #[test]
    fn entries_sorted_by_key() {
        let mut buf = vec![0u8; 16384];
        init_dictionary_page(&mut buf, 2);
        insert_in_page(&mut buf, b"zebra", 1).unwrap();
        insert_in_page(&mut buf, b"apple", 2).unwrap();
        insert_in_page(&mut buf, b"mango", 3).unwrap();
        let (count, ..) = read_dict_header(&buf);
        let keys: Vec<_> = (0..count)
            .map(|i| entry_at(&buf, read_offset(&buf, i)).0.to_vec())
            .collect();
        assert_eq!(keys, vec![b"apple".to_vec(), b"mango".to_vec(), b"zebra".to_vec()]);
    }
}
