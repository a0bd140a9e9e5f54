//! L3a: the slotted-page layout shared by data, overflow, and
//! collection-catalog pages. Slot directory grows up from the page header;
//! payloads grow down from the end of the page.

use crate::pager::{PAGE_HEADER_SIZE, finalize_checksum, write_page_header};
use crate::types::{DocumentLocation, PageType};
use crate::utils::errors::{DbError, DbResult};

/// `{page_id:4, page_type:1, slot_count:2, free_space_start:2,
/// free_space_end:2, next_overflow_page:4, transaction_id:8}` — placed right
/// after the common 32-byte page header.
pub const SLOTTED_HEADER_SIZE: usize = 32;
/// `{offset:2, length:2, flags:1}` rounded to 6 bytes in the directory.
pub const SLOT_SIZE: usize = 6;

/// Slot status flags, stored as the 5th byte of a `SlotEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotFlags {
    None = 0,
    Deleted = 1,
    HasOverflow = 2,
}

impl SlotFlags {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Deleted,
            2 => Self::HasOverflow,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotEntry {
    offset: u16,
    length: u16,
    flags: SlotFlags,
}

fn slot_dir_offset(slot_index: u16) -> usize {
    PAGE_HEADER_SIZE + SLOTTED_HEADER_SIZE + slot_index as usize * SLOT_SIZE
}

fn read_header(buf: &[u8]) -> (u16, u16, u16, u32, u64) {
    let h = &buf[PAGE_HEADER_SIZE..];
    let slot_count = u16::from_le_bytes(h[0..2].try_into().unwrap());
    let free_space_start = u16::from_le_bytes(h[2..4].try_into().unwrap());
    let free_space_end = u16::from_le_bytes(h[4..6].try_into().unwrap());
    let next_overflow_page = u32::from_le_bytes(h[6..10].try_into().unwrap());
    let transaction_id = u64::from_le_bytes(h[10..18].try_into().unwrap());
    (slot_count, free_space_start, free_space_end, next_overflow_page, transaction_id)
}

fn write_slotted_fields(
    buf: &mut [u8],
    slot_count: u16,
    free_space_start: u16,
    free_space_end: u16,
    next_overflow_page: u32,
    transaction_id: u64,
) {
    let h = &mut buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + SLOTTED_HEADER_SIZE];
    h[0..2].copy_from_slice(&slot_count.to_le_bytes());
    h[2..4].copy_from_slice(&free_space_start.to_le_bytes());
    h[4..6].copy_from_slice(&free_space_end.to_le_bytes());
    h[6..10].copy_from_slice(&next_overflow_page.to_le_bytes());
    h[10..18].copy_from_slice(&transaction_id.to_le_bytes());
}

fn read_slot(buf: &[u8], slot_index: u16) -> SlotEntry {
    let o = slot_dir_offset(slot_index);
    let offset = u16::from_le_bytes(buf[o..o + 2].try_into().unwrap());
    let length = u16::from_le_bytes(buf[o + 2..o + 4].try_into().unwrap());
    let flags = SlotFlags::from_u8(buf[o + 4]);
    SlotEntry { offset, length, flags }
}

fn write_slot(buf: &mut [u8], slot_index: u16, slot: SlotEntry) {
    let o = slot_dir_offset(slot_index);
    buf[o..o + 2].copy_from_slice(&slot.offset.to_le_bytes());
    buf[o + 2..o + 4].copy_from_slice(&slot.length.to_le_bytes());
    buf[o + 4] = slot.flags as u8;
    buf[o + 5] = 0;
}

/// Initializes a fresh slotted page in place.
pub fn init_slotted_page(buf: &mut [u8], page_id: u32, page_type: PageType, transaction_id: u64) {
    let page_size = buf.len() as u16;
    write_page_header(buf, page_id, page_type, 0, 0, transaction_id);
    let free_space_start = (PAGE_HEADER_SIZE + SLOTTED_HEADER_SIZE) as u16;
    write_slotted_fields(buf, 0, free_space_start, page_size, 0, transaction_id);
    let free_bytes = page_size - free_space_start;
    buf[5..9].copy_from_slice(&u32::from(free_bytes).to_le_bytes());
    finalize_checksum(buf);
}

#[must_use]
pub fn available_free_space(buf: &[u8]) -> u16 {
    let (_, start, end, _, _) = read_header(buf);
    end.saturating_sub(start)
}

#[must_use]
pub fn slot_count(buf: &[u8]) -> u16 {
    read_header(buf).0
}

#[must_use]
pub fn next_overflow_page(buf: &[u8]) -> u32 {
    read_header(buf).3
}

pub fn set_next_overflow_page(buf: &mut [u8], next: u32) {
    let (slot_count, start, end, _, txn) = read_header(buf);
    write_slotted_fields(buf, slot_count, start, end, next, txn);
}

fn find_free_slot(buf: &[u8], slot_count: u16) -> Option<u16> {
    (0..slot_count).find(|&i| read_slot(buf, i).flags == SlotFlags::Deleted)
}

/// Inserts `data`, returning the slot index it was written to. Fails if
/// there is not enough contiguous free space for both the payload and a new
/// directory entry.
pub fn insert(buf: &mut [u8], data: &[u8]) -> DbResult<u16> {
    insert_with_flags(buf, data, SlotFlags::None)
}

pub fn insert_with_flags(buf: &mut [u8], data: &[u8], flags: SlotFlags) -> DbResult<u16> {
    let (slot_count, free_space_start, free_space_end, next_overflow, txn) = read_header(buf);
    let reuse = find_free_slot(buf, slot_count);
    let needs_new_slot = reuse.is_none();
    let needed_dir = if needs_new_slot { SLOT_SIZE as u16 } else { 0 };
    let available = free_space_end.saturating_sub(free_space_start);
    if available < data.len() as u16 + needed_dir {
        return Err(DbError::TooLarge(data.len()));
    }
    let new_offset = free_space_end - data.len() as u16;
    buf[new_offset as usize..free_space_end as usize].copy_from_slice(data);

    let slot_index = match reuse {
        Some(i) => i,
        None => slot_count,
    };
    write_slot(buf, slot_index, SlotEntry { offset: new_offset, length: data.len() as u16, flags });

    let new_slot_count = if needs_new_slot { slot_count + 1 } else { slot_count };
    let new_free_space_start = if needs_new_slot {
        free_space_start + SLOT_SIZE as u16
    } else {
        free_space_start
    };
    write_slotted_fields(buf, new_slot_count, new_free_space_start, new_offset, next_overflow, txn);
    let new_free = new_offset.saturating_sub(new_free_space_start);
    buf[5..9].copy_from_slice(&u32::from(new_free).to_le_bytes());
    finalize_checksum(buf);
    Ok(slot_index)
}

/// Reads a slot's payload. Refuses slots marked `Deleted` or out of bounds.
pub fn read(buf: &[u8], slot_index: u16) -> DbResult<&[u8]> {
    let (slot_count, ..) = read_header(buf);
    if slot_index >= slot_count {
        return Err(DbError::Corruption(format!("slot {slot_index} out of bounds")));
    }
    let slot = read_slot(buf, slot_index);
    if slot.flags == SlotFlags::Deleted {
        return Err(DbError::Corruption(format!("slot {slot_index} is deleted")));
    }
    let start = slot.offset as usize;
    let end = start + slot.length as usize;
    if end > buf.len() {
        return Err(DbError::Corruption(format!("slot {slot_index} payload out of range")));
    }
    Ok(&buf[start..end])
}

#[must_use]
pub fn slot_has_overflow(buf: &[u8], slot_index: u16) -> bool {
    read_slot(buf, slot_index).flags == SlotFlags::HasOverflow
}

#[must_use]
pub fn slot_length(buf: &[u8], slot_index: u16) -> u16 {
    read_slot(buf, slot_index).length
}

/// Marks a slot deleted. Caller must free any overflow chain first.
pub fn mark_deleted(buf: &mut [u8], slot_index: u16) -> DbResult<()> {
    let (slot_count, ..) = read_header(buf);
    if slot_index >= slot_count {
        return Err(DbError::Corruption(format!("slot {slot_index} out of bounds")));
    }
    let mut slot = read_slot(buf, slot_index);
    slot.flags = SlotFlags::Deleted;
    write_slot(buf, slot_index, slot);
    finalize_checksum(buf);
    Ok(())
}

/// In-place overwrite, allowed only when `data` fits in the existing slot's
/// length and the slot carries no overflow chain.
pub fn update_inplace(buf: &mut [u8], slot_index: u16, data: &[u8]) -> DbResult<()> {
    let (slot_count, ..) = read_header(buf);
    if slot_index >= slot_count {
        return Err(DbError::Corruption(format!("slot {slot_index} out of bounds")));
    }
    let mut slot = read_slot(buf, slot_index);
    if slot.flags == SlotFlags::HasOverflow {
        return Err(DbError::Invariant("update_inplace on overflowing slot".into()));
    }
    if data.len() as u16 > slot.length {
        return Err(DbError::Invariant("update_inplace payload exceeds slot capacity".into()));
    }
    let start = slot.offset as usize;
    buf[start..start + data.len()].copy_from_slice(data);
    slot.length = data.len() as u16;
    write_slot(buf, slot_index, slot);
    finalize_checksum(buf);
    Ok(())
}

/// Packs `{page_id, slot_index}` into the 6-byte on-disk `DocumentLocation`.
#[must_use]
pub fn encode_location(loc: DocumentLocation) -> [u8; 6] {
    let mut out = [0u8; 6];
    out[0..4].copy_from_slice(&loc.page_id.to_le_bytes());
    out[4..6].copy_from_slice(&loc.slot_index.to_le_bytes());
    out
}

#[must_use]
pub fn decode_location(bytes: &[u8]) -> DocumentLocation {
    DocumentLocation {
        page_id: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        slot_index: u16::from_le_bytes(bytes[4..6].try_into().unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(page_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; page_size];
        init_slotted_page(&mut buf, 1, PageType::Data, 0);
        buf
    }

    #[test]
    fn insert_then_read_round_trips() {
        let mut buf = fresh(16384);
        let idx = insert(&mut buf, b"hello").unwrap();
        assert_eq!(read(&buf, idx).unwrap(), b"hello");
    }

    #[test]
    fn deleted_slot_is_reused() {
        let mut buf = fresh(16384);
        let idx = insert(&mut buf, b"a").unwrap();
        mark_deleted(&mut buf, idx).unwrap();
        let idx2 = insert(&mut buf, b"bb").unwrap();
        assert_eq!(idx, idx2);
        assert_eq!(read(&buf, idx2).unwrap(), b"bb");
    }

    #[test]
    fn free_space_never_negative() {
        let mut buf = fresh(16384);
        loop {
            let free = available_free_space(&buf);
            if insert(&mut buf, &vec![7u8; 50]).is_err() {
                assert!(free < 56);
                break;
            }
        }
    }

    #[test]
    fn update_inplace_rejects_oversize() {
        let mut buf = fresh(16384);
        let idx = insert(&mut buf, b"abc").unwrap();
        assert!(update_inplace(&mut buf, idx, b"abcd").is_err());
        assert!(update_inplace(&mut buf, idx, b"xy").is_ok());
    }
}
