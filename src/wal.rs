//! L1: the write-ahead log. An append-only, length-prefixed record stream
//! providing redo-only durability: `Begin`/`Write`/`Commit`/`Abort` records,
//! each carrying a checksum over its payload.

use crate::utils::errors::{DbError, DbResult};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const RECORD_TYPE_BEGIN: u8 = 1;
const RECORD_TYPE_WRITE: u8 = 2;
const RECORD_TYPE_COMMIT: u8 = 3;
const RECORD_TYPE_ABORT: u8 = 4;

/// One decoded WAL record, as read back during recovery.
#[derive(Debug, Clone)]
pub enum WalRecord {
    Begin { transaction_id: u64 },
    Write { transaction_id: u64, page_id: u32, after_image: Vec<u8> },
    Commit { transaction_id: u64 },
    Abort { transaction_id: u64 },
}

impl WalRecord {
    #[must_use]
    pub fn transaction_id(&self) -> u64 {
        match self {
            WalRecord::Begin { transaction_id }
            | WalRecord::Write { transaction_id, .. }
            | WalRecord::Commit { transaction_id }
            | WalRecord::Abort { transaction_id } => *transaction_id,
        }
    }
}

fn encode_record(record_type: u8, transaction_id: u64, page_id: Option<(u32, &[u8])>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&transaction_id.to_le_bytes());
    if let Some((page_id, after_image)) = page_id {
        payload.extend_from_slice(&page_id.to_le_bytes());
        payload.extend_from_slice(after_image);
    }
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    let checksum = hasher.finalize();

    let mut out = Vec::with_capacity(1 + 4 + payload.len() + 4);
    out.push(record_type);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&checksum.to_le_bytes());
    out
}

/// The `.wal` file sibling to the database's `.db` file.
pub struct WriteAheadLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl WriteAheadLog {
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = crate::utils::fsutil::open_rw_no_trunc(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &[u8]) -> DbResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(record)?;
        Ok(())
    }

    pub fn write_begin(&self, transaction_id: u64) -> DbResult<()> {
        self.append(&encode_record(RECORD_TYPE_BEGIN, transaction_id, None))
    }

    pub fn write_data(&self, transaction_id: u64, page_id: u32, after_image: &[u8]) -> DbResult<()> {
        self.append(&encode_record(RECORD_TYPE_WRITE, transaction_id, Some((page_id, after_image))))
    }

    pub fn write_commit(&self, transaction_id: u64) -> DbResult<()> {
        self.append(&encode_record(RECORD_TYPE_COMMIT, transaction_id, None))
    }

    pub fn write_abort(&self, transaction_id: u64) -> DbResult<()> {
        self.append(&encode_record(RECORD_TYPE_ABORT, transaction_id, None))
    }

    /// Forces OS durability; the commit barrier per §4.2's durability contract.
    pub fn flush(&self) -> DbResult<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }

    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.file.lock().metadata().map(|m| m.len()).unwrap_or(0)
    }

    /// Truncates the log to zero length after a successful checkpoint.
    pub fn truncate(&self) -> DbResult<()> {
        let mut file = self.file.lock();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Reads every well-formed record in the log, in order.
    ///
    /// Tolerates trailing corruption per §7's recovery contract: stops (without
    /// erroring) at the first record whose length, checksum, or EOF boundary
    /// doesn't check out, since a crash mid-append leaves exactly that shape.
    pub fn read_all(&self, page_size: u32) -> DbResult<Vec<WalRecord>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        drop(file);

        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < buf.len() {
            let Some(record) = Self::decode_one(&buf[pos..], page_size) else {
                log::warn!("WAL truncated at offset {pos}, discarding tail");
                break;
            };
            pos += record.1;
            records.push(record.0);
        }
        Ok(records)
    }

    fn decode_one(buf: &[u8], page_size: u32) -> Option<(WalRecord, usize)> {
        if buf.len() < 5 {
            return None;
        }
        let record_type = buf[0];
        let payload_length = u32::from_le_bytes(buf[1..5].try_into().ok()?) as usize;
        let total = 1 + 4 + payload_length + 4;
        if buf.len() < total || payload_length < 8 {
            return None;
        }
        let payload = &buf[5..5 + payload_length];
        let stored_checksum = u32::from_le_bytes(buf[5 + payload_length..total].try_into().ok()?);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != stored_checksum {
            return None;
        }
        let transaction_id = u64::from_le_bytes(payload[0..8].try_into().ok()?);
        let record = match record_type {
            RECORD_TYPE_BEGIN => WalRecord::Begin { transaction_id },
            RECORD_TYPE_COMMIT => WalRecord::Commit { transaction_id },
            RECORD_TYPE_ABORT => WalRecord::Abort { transaction_id },
            RECORD_TYPE_WRITE => {
                if payload_length < 12 || payload_length - 12 != page_size as usize {
                    return None;
                }
                let page_id = u32::from_le_bytes(payload[8..12].try_into().ok()?);
                let after_image = payload[12..].to_vec();
                WalRecord::Write { transaction_id, page_id, after_image }
            }
            _ => return None,
        };
        Some((record, total))
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn is_send_sync<T: Send + Sync>() {}
    is_send_sync::<WriteAheadLog>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_begin_write_commit() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("t.wal")).unwrap();
        wal.write_begin(1).unwrap();
        wal.write_data(1, 3, &vec![0xAB; 16384]).unwrap();
        wal.write_commit(1).unwrap();
        wal.flush().unwrap();

        let records = wal.read_all(16384).unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[0], WalRecord::Begin { transaction_id: 1 }));
        assert!(matches!(records[2], WalRecord::Commit { transaction_id: 1 }));
    }

    #[test]
    fn truncate_resets_size() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("t.wal")).unwrap();
        wal.write_begin(1).unwrap();
        assert!(wal.current_size() > 0);
        wal.truncate().unwrap();
        assert_eq!(wal.current_size(), 0);
    }

    #[test]
    fn trailing_garbage_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wal");
        let wal = WriteAheadLog::open(&path).unwrap();
        wal.write_begin(1).unwrap();
        wal.write_commit(1).unwrap();
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9, 9, 9]).unwrap();
        }
        let records = wal.read_all(16384).unwrap();
        assert_eq!(records.len(), 2);
    }
}
