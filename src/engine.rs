//! L2: the storage engine. Composes the paged file (L0) and the WAL (L1)
//! into transactions, snapshot-style read isolation, checkpoints, and crash
//! recovery.

use crate::config::EngineConfig;
use crate::dictionary::Dictionary;
use crate::pager::PagedFile;
use crate::utils::errors::{DbError, DbResult};
use crate::wal::{WalRecord, WriteAheadLog};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// A handle to an in-flight transaction. `0` is a reserved sentinel never
/// issued by `begin_transaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(pub u64);

struct PendingTransaction {
    writes: HashMap<u32, Vec<u8>>,
}

/// Composes L0+L1; owns the per-transaction write buffer, the
/// committed-but-uncheckpointed overlay, checkpointing, and recovery.
pub struct StorageEngine {
    paged_file: PagedFile,
    wal: WriteAheadLog,
    wal_cache: Mutex<HashMap<u64, PendingTransaction>>,
    wal_index: RwLock<HashMap<u32, Vec<u8>>>,
    next_transaction_id: AtomicU64,
    commit_lock: Mutex<()>,
    pub dictionary: Dictionary,
    config: EngineConfig,
}

impl StorageEngine {
    /// Opens (creating if absent) the database at `path`, running recovery
    /// against the sibling `.wal` file if it is non-empty.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> DbResult<Self> {
        config.validate()?;
        let paged_file = PagedFile::open(&path, &config)?;
        let wal_path = crate::utils::fsutil::wal_path_for(path.as_ref());
        let wal = WriteAheadLog::open(&wal_path)?;

        let engine = Self {
            paged_file,
            wal,
            wal_cache: Mutex::new(HashMap::new()),
            wal_index: RwLock::new(HashMap::new()),
            next_transaction_id: AtomicU64::new(1),
            commit_lock: Mutex::new(()),
            dictionary: Dictionary::new(config.reserved_dictionary_ids),
            config,
        };

        if engine.wal.current_size() > 0 {
            engine.recover()?;
        }
        engine.dictionary.warm_up(&engine)?;
        Ok(engine)
    }

    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replays committed transactions from the WAL into the paged file.
    /// Transactions without a `Commit` record left no trace and need no
    /// undo: this is redo-only recovery.
    fn recover(&self) -> DbResult<()> {
        let records = self.wal.read_all(self.config.page_size)?;
        let mut committed = std::collections::HashSet::new();
        for r in &records {
            if let WalRecord::Commit { transaction_id } = r {
                committed.insert(*transaction_id);
            }
        }
        let mut replayed = 0u64;
        for r in &records {
            if let WalRecord::Write { transaction_id, page_id, after_image } = r {
                if committed.contains(transaction_id) {
                    self.paged_file.write_page(*page_id, after_image)?;
                    replayed += 1;
                }
            }
        }
        self.paged_file.flush()?;
        self.wal_index.write().clear();
        self.wal.truncate()?;
        log::info!(
            "recovery complete: {} committed transactions, {replayed} pages replayed",
            committed.len()
        );
        Ok(())
    }

    /// Acquires `commit_lock` just long enough to allocate a fresh id and
    /// register the transaction's write buffer.
    pub fn begin_transaction(&self) -> DbResult<TxnId> {
        let _guard = self.commit_lock.lock();
        let id = self.next_transaction_id.fetch_add(1, Ordering::SeqCst);
        self.wal_cache.lock().insert(id, PendingTransaction { writes: HashMap::new() });
        Ok(TxnId(id))
    }

    /// Three-tier read: own uncommitted writes, then the committed overlay,
    /// then the durable paged file.
    pub fn read_page(&self, page_id: u32, txn: Option<TxnId>) -> DbResult<Vec<u8>> {
        if let Some(txn) = txn {
            if txn.0 != 0 {
                if let Some(pending) = self.wal_cache.lock().get(&txn.0) {
                    if let Some(data) = pending.writes.get(&page_id) {
                        return Ok(data.clone());
                    }
                }
            }
        }
        if let Some(data) = self.wal_index.read().get(&page_id) {
            return Ok(data.clone());
        }
        let mut buf = vec![0u8; self.config.page_size as usize];
        self.paged_file.read_page(page_id, &mut buf)?;
        Ok(buf)
    }

    /// Async mirror of `read_page`'s third tier; the overlay lookups stay
    /// synchronous since they are in-memory map reads, not I/O.
    pub async fn read_page_async(&self, page_id: u32, txn: Option<TxnId>) -> DbResult<Vec<u8>> {
        if let Some(txn) = txn {
            if txn.0 != 0 {
                if let Some(pending) = self.wal_cache.lock().get(&txn.0) {
                    if let Some(data) = pending.writes.get(&page_id) {
                        return Ok(data.clone());
                    }
                }
            }
        }
        if let Some(data) = self.wal_index.read().get(&page_id) {
            return Ok(data.clone());
        }
        self.paged_file.read_page_async(page_id).await
    }

    /// Buffers a write against the transaction; no WAL or paged-file I/O
    /// happens until commit.
    pub fn write_page(&self, page_id: u32, txn: TxnId, data: &[u8]) -> DbResult<()> {
        if txn.0 == 0 {
            return Err(DbError::Conflict("write outside a transaction".into()));
        }
        let mut cache = self.wal_cache.lock();
        let pending = cache
            .get_mut(&txn.0)
            .ok_or_else(|| DbError::Invariant(format!("unknown transaction {}", txn.0)))?;
        pending.writes.insert(page_id, data.to_vec());
        Ok(())
    }

    /// Begin/Write*/Commit into the WAL, flush, publish into the overlay,
    /// then checkpoint if the WAL has grown past `max_wal_size`.
    pub fn commit(&self, txn: TxnId) -> DbResult<()> {
        let _guard = self.commit_lock.lock();
        let pending = {
            let mut cache = self.wal_cache.lock();
            cache.remove(&txn.0).ok_or_else(|| DbError::Invariant(format!("unknown transaction {}", txn.0)))?
        };

        let commit_result = (|| -> DbResult<()> {
            self.wal.write_begin(txn.0)?;
            for (page_id, after_image) in &pending.writes {
                self.wal.write_data(txn.0, *page_id, after_image)?;
            }
            self.wal.write_commit(txn.0)?;
            self.wal.flush()
        })();

        if let Err(e) = commit_result {
            log::error!("commit failed for txn {}: {e}", txn.0);
            self.wal.write_abort(txn.0).ok();
            return Err(e);
        }

        {
            let mut index = self.wal_index.write();
            for (page_id, after_image) in pending.writes {
                index.insert(page_id, after_image);
            }
        }
        log::info!("committed txn {}", txn.0);

        if self.wal.current_size() > self.config.max_wal_size {
            self.checkpoint_locked()?;
        }
        Ok(())
    }

    /// Discards the transaction's buffered writes. The `Abort` record is
    /// best-effort: recovery ignores any transaction lacking a `Commit`.
    pub fn rollback(&self, txn: TxnId) -> DbResult<()> {
        self.wal_cache.lock().remove(&txn.0);
        self.wal.write_abort(txn.0).ok();
        log::info!("rolled back txn {}", txn.0);
        Ok(())
    }

    /// Flushes the committed overlay into the paged file and truncates the
    /// WAL. Public entry point acquires `commit_lock`; `commit` calls the
    /// locked variant directly since it already holds it.
    pub fn checkpoint(&self) -> DbResult<()> {
        let _guard = self.commit_lock.lock();
        self.checkpoint_locked()
    }

    fn checkpoint_locked(&self) -> DbResult<()> {
        let mut index = self.wal_index.write();
        for (page_id, after_image) in index.iter() {
            self.paged_file.write_page(*page_id, after_image)?;
        }
        self.paged_file.flush()?;
        index.clear();
        drop(index);
        self.wal.truncate()?;
        log::info!("checkpoint complete");
        Ok(())
    }

    /// Checkpoints then copies the (now self-consistent) paged file.
    pub fn backup(&self, destination: impl AsRef<Path>) -> DbResult<()> {
        let _guard = self.commit_lock.lock();
        self.checkpoint_locked()?;
        self.paged_file.backup(destination)
    }

    pub fn allocate_page(&self) -> DbResult<u32> {
        self.paged_file.allocate_page()
    }

    pub fn free_page_immediate(&self, page_id: u32) -> DbResult<()> {
        self.paged_file.free_page(page_id)
    }

    // --- Immediate (non-transactional) path: bootstrap and dictionary/catalog only ---

    pub fn read_page_immediate(&self, page_id: u32) -> DbResult<Vec<u8>> {
        let mut buf = vec![0u8; self.config.page_size as usize];
        self.paged_file.read_page(page_id, &mut buf)?;
        Ok(buf)
    }

    pub fn write_page_immediate(&self, page_id: u32, data: &[u8]) -> DbResult<()> {
        self.paged_file.write_page(page_id, data)
    }

    pub fn allocate_page_immediate(&self) -> DbResult<u32> {
        self.paged_file.allocate_page()
    }

    #[must_use]
    pub fn dictionary_root_page_id(&self) -> u32 {
        self.paged_file.dictionary_root_page_id()
    }

    pub fn set_dictionary_root_page_id(&self, root: u32) -> DbResult<()> {
        self.paged_file.set_dictionary_root_page_id(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn open(dir: &tempfile::TempDir) -> StorageEngine {
        StorageEngine::open(dir.path().join("t.db"), EngineConfig::new_16k()).unwrap()
    }

    #[test]
    fn read_your_own_writes_then_committed_visibility() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open(&dir);
        let page_id = engine.allocate_page().unwrap();
        let txn = engine.begin_transaction().unwrap();
        let data = vec![7u8; engine.page_size() as usize];
        engine.write_page(page_id, txn, &data).unwrap();
        assert_eq!(engine.read_page(page_id, Some(txn)).unwrap(), data);

        let other_txn = engine.begin_transaction().unwrap();
        let before_commit = engine.read_page(page_id, Some(other_txn)).unwrap();
        assert_ne!(before_commit, data);

        engine.commit(txn).unwrap();
        let after_commit = engine.read_page(page_id, Some(other_txn)).unwrap();
        assert_eq!(after_commit, data);
    }

    #[test]
    fn checkpoint_is_neutral() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open(&dir);
        let page_id = engine.allocate_page().unwrap();
        let txn = engine.begin_transaction().unwrap();
        let data = vec![3u8; engine.page_size() as usize];
        engine.write_page(page_id, txn, &data).unwrap();
        engine.commit(txn).unwrap();

        let before = engine.read_page(page_id, None).unwrap();
        engine.checkpoint().unwrap();
        let after = engine.read_page(page_id, None).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn recovery_discards_uncommitted_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let cfg = EngineConfig::new_16k();
        let page_id;
        {
            let engine = StorageEngine::open(&path, cfg).unwrap();
            page_id = engine.allocate_page().unwrap();
            let t1 = engine.begin_transaction().unwrap();
            engine.write_page(page_id, t1, &vec![0x01u8; engine.page_size() as usize]).unwrap();
            engine.commit(t1).unwrap();

            let t2 = engine.begin_transaction().unwrap();
            engine.write_page(page_id, t2, &vec![0x02u8; engine.page_size() as usize]).unwrap();
            // Simulate a crash: t2 never commits, so its WAL bytes (if any
            // were written) lack a Commit record and are ignored on replay.
        }
        let engine = StorageEngine::open(&path, cfg).unwrap();
        let data = engine.read_page(page_id, None).unwrap();
        assert_eq!(data, vec![0x01u8; engine.page_size() as usize]);
    }
}
