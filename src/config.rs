use crate::utils::errors::{DbError, DbResult};

/// Page sizes the format permits (§6).
pub const VALID_PAGE_SIZES: [u32; 3] = [8192, 16384, 32768];

/// Tunables for a single `StorageEngine` instance.
///
/// Every field here is named in spec §6 except `max_single_page` (the
/// overflow threshold of §4.4) and `buffer_pool_capacity` (the page-buffer
/// pool of §5), which round out what a real deployment needs to configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Size of every page in the paged file, in bytes.
    pub page_size: u32,
    /// The file is grown in multiples of this many bytes.
    pub growth_block_size: u32,
    /// A checkpoint runs automatically once the WAL exceeds this size.
    pub max_wal_size: u64,
    /// IDs `[0, reserved_dictionary_ids)` are reserved for built-in field names.
    pub reserved_dictionary_ids: u16,
    /// Documents whose serialized length exceeds this many bytes are written
    /// via the overflow protocol instead of a single slot.
    pub max_single_page: u32,
    /// Number of page buffers held by the shared buffer pool.
    pub buffer_pool_capacity: usize,
}

impl EngineConfig {
    /// Defaults tuned for a 16 KiB page, matching spec §3's documented default.
    #[must_use]
    pub fn new_16k() -> Self {
        Self {
            page_size: 16384,
            growth_block_size: 16384 * 64,
            max_wal_size: 4 * 1024 * 1024,
            reserved_dictionary_ids: 64,
            max_single_page: 15000,
            buffer_pool_capacity: 256,
        }
    }

    /// # Errors
    /// Returns `DbError::Invariant` if `page_size` is not one of
    /// `{8192, 16384, 32768}` or `growth_block_size` is not a multiple of it.
    pub fn validate(&self) -> DbResult<()> {
        if !VALID_PAGE_SIZES.contains(&self.page_size) {
            return Err(DbError::Invariant(format!(
                "page_size {} is not one of {VALID_PAGE_SIZES:?}",
                self.page_size
            )));
        }
        if self.growth_block_size % self.page_size != 0 {
            return Err(DbError::Invariant(format!(
                "growth_block_size {} is not a multiple of page_size {}",
                self.growth_block_size, self.page_size
            )));
        }
        if self.max_single_page == 0 || self.max_single_page > self.page_size {
            return Err(DbError::Invariant(format!(
                "max_single_page {} must be in (0, page_size={}]",
                self.max_single_page, self.page_size
            )));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new_16k()
    }
}
