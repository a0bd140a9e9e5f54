//! L0: the paged file. A fixed-size, random-access byte array backed by a
//! single OS file, with block-aligned growth and a free-page list threaded
//! through the pages themselves.
//!
//! Grounded on the Meta/Bitmap page split and positioned-I/O style of
//! `nervusdb-v2-storage`'s pager, redesigned around this format's header
//! page (free-list head lives in page 0, not a separate bitmap page) and
//! configurable page sizes.

use crate::config::EngineConfig;
use crate::types::PageType;
use crate::utils::errors::{DbError, DbResult};
use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::FileExt as _;
#[cfg(windows)]
use std::os::windows::fs::FileExt as _;

/// Common 32-byte prefix carried by most pages.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Header page (page 0) layout, after the common 32-byte prefix:
/// `dictionary_root_page_id: u32`.
const HEADER_EXTRA_SIZE: usize = 4;

/// A raw, owned page buffer.
pub type PageBuf = Vec<u8>;

fn read_page_raw(file: &File, page_id: u32, page_size: u32, dst: &mut [u8]) -> io::Result<()> {
    let offset = u64::from(page_id) * u64::from(page_size);
    #[cfg(unix)]
    {
        file.read_at(dst, offset)?;
    }
    #[cfg(windows)]
    {
        let mut read = 0usize;
        while read < dst.len() {
            let n = file.seek_read(&mut dst[read..], offset + read as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
    }
    Ok(())
}

fn write_page_raw(file: &File, page_id: u32, page_size: u32, src: &[u8]) -> io::Result<()> {
    let offset = u64::from(page_id) * u64::from(page_size);
    #[cfg(unix)]
    {
        file.write_at(src, offset)?;
    }
    #[cfg(windows)]
    {
        let mut written = 0usize;
        while written < src.len() {
            let n = file.seek_write(&src[written..], offset + written as u64)?;
            written += n;
        }
    }
    Ok(())
}

fn align_up(len: u64, block: u64) -> u64 {
    if block == 0 {
        return len;
    }
    len.div_ceil(block) * block
}

/// Writes the common page-header prefix into `buf[0..PAGE_HEADER_SIZE]`.
pub fn write_page_header(
    buf: &mut [u8],
    page_id: u32,
    page_type: PageType,
    free_bytes: u32,
    next_page_id: u32,
    transaction_id: u64,
) {
    buf[0..4].copy_from_slice(&page_id.to_le_bytes());
    buf[4] = page_type as u8;
    buf[5..9].copy_from_slice(&free_bytes.to_le_bytes());
    buf[9..13].copy_from_slice(&next_page_id.to_le_bytes());
    buf[13..21].copy_from_slice(&transaction_id.to_le_bytes());
    // checksum (4 bytes at [21..25]) is filled in by `finalize_checksum`.
    buf[21..25].fill(0);
}

/// Computes and writes the CRC32 checksum over the page (checksum field
/// itself zeroed during the computation) into `buf[21..25]`.
pub fn finalize_checksum(buf: &mut [u8]) {
    buf[21..25].fill(0);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(buf);
    let sum = hasher.finalize();
    buf[21..25].copy_from_slice(&sum.to_le_bytes());
}

/// Verifies the checksum written by `finalize_checksum`.
#[must_use]
pub fn verify_checksum(buf: &[u8]) -> bool {
    let mut scratch = buf.to_vec();
    let stored = u32::from_le_bytes(buf[21..25].try_into().unwrap());
    scratch[21..25].fill(0);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&scratch);
    hasher.finalize() == stored
}

pub fn read_page_id(buf: &[u8]) -> u32 {
    u32::from_le_bytes(buf[0..4].try_into().unwrap())
}

pub fn read_page_type(buf: &[u8]) -> Option<PageType> {
    PageType::from_u8(buf[4])
}

pub fn read_next_page_id(buf: &[u8]) -> u32 {
    u32::from_le_bytes(buf[9..13].try_into().unwrap())
}

pub fn set_next_page_id(buf: &mut [u8], next: u32) {
    buf[9..13].copy_from_slice(&next.to_le_bytes());
}

/// Serializes a `Header` page (page 0): common header plus the dictionary
/// root pointer. `next_page_id` doubles as the free-list head per §3.
fn encode_header_page(page_size: u32, free_list_head: u32, dictionary_root_page_id: u32) -> PageBuf {
    let mut buf = vec![0u8; page_size as usize];
    write_page_header(&mut buf, 0, PageType::Header, page_size - PAGE_HEADER_SIZE as u32 - HEADER_EXTRA_SIZE as u32, free_list_head, 0);
    buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 4].copy_from_slice(&dictionary_root_page_id.to_le_bytes());
    finalize_checksum(&mut buf);
    buf
}

fn decode_header_page(buf: &[u8]) -> (u32, u32) {
    let free_list_head = read_next_page_id(buf);
    let dictionary_root_page_id =
        u32::from_le_bytes(buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 4].try_into().unwrap());
    (free_list_head, dictionary_root_page_id)
}

struct PagerState {
    file: File,
    free_list_head: u32,
    dictionary_root_page_id: u32,
    next_page_id: u32,
}

/// The durable, random-access byte array of fixed-size pages (L0).
///
/// A single mutex serializes `open`, growth, and `flush`, matching the
/// "single semaphore" concurrency note in §4.1; independent `read_page`
/// calls to different pages do not contend on it once the file is grown.
pub struct PagedFile {
    path: PathBuf,
    page_size: u32,
    growth_block_size: u32,
    state: Mutex<PagerState>,
}

impl PagedFile {
    /// Opens (creating if absent) the paged file at `path`. A fresh file
    /// gets a `Header` page at index 0 and an empty `Collection` slotted
    /// page at index 1, with the initial length aligned to `growth_block_size`.
    pub fn open(path: impl AsRef<Path>, config: &EngineConfig) -> DbResult<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let existed = path.exists() && path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        let file = crate::utils::fsutil::open_rw_no_trunc(&path)?;

        if !existed {
            let page_size = config.page_size;
            file.set_len(align_up(u64::from(page_size) * 2, u64::from(config.growth_block_size)))?;
            let header = encode_header_page(page_size, 0, 0);
            write_page_raw(&file, 0, page_size, &header)?;

            let mut collection_page = vec![0u8; page_size as usize];
            crate::slotted_page::init_slotted_page(
                &mut collection_page,
                1,
                PageType::Collection,
                0,
            );
            write_page_raw(&file, 1, page_size, &collection_page)?;
            file.sync_all()?;

            log::info!("created paged file at {} (page_size={page_size})", path.display());
            return Ok(Self {
                path,
                page_size,
                growth_block_size: config.growth_block_size,
                state: Mutex::new(PagerState {
                    file,
                    free_list_head: 0,
                    dictionary_root_page_id: 0,
                    next_page_id: 2,
                }),
            });
        }

        let page_size = config.page_size;
        let mut header_buf = vec![0u8; page_size as usize];
        read_page_raw(&file, 0, page_size, &mut header_buf)?;
        if !verify_checksum(&header_buf) {
            return Err(DbError::Corruption("header page checksum mismatch".into()));
        }
        let (free_list_head, dictionary_root_page_id) = decode_header_page(&header_buf);
        let file_len = file.metadata()?.len();
        let next_page_id = u32::try_from(file_len / u64::from(page_size)).unwrap_or(2).max(2);

        log::info!("opened paged file at {} (page_size={page_size})", path.display());
        Ok(Self {
            path,
            page_size,
            growth_block_size: config.growth_block_size,
            state: Mutex::new(PagerState { file, free_list_head, dictionary_root_page_id, next_page_id }),
        })
    }

    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn dictionary_root_page_id(&self) -> u32 {
        self.state.lock().dictionary_root_page_id
    }

    /// Persists a new dictionary root pointer into the header page.
    pub fn set_dictionary_root_page_id(&self, root: u32) -> DbResult<()> {
        let mut st = self.state.lock();
        st.dictionary_root_page_id = root;
        self.rewrite_header_locked(&mut st)
    }

    fn rewrite_header_locked(&self, st: &mut PagerState) -> DbResult<()> {
        let buf = encode_header_page(self.page_size, st.free_list_head, st.dictionary_root_page_id);
        write_page_raw(&st.file, 0, self.page_size, &buf).map_err(DbError::Io)
    }

    fn grow_to_locked(&self, st: &PagerState, required_len: u64) -> DbResult<()> {
        let current = st.file.metadata()?.len();
        if required_len > current {
            let aligned = align_up(required_len, u64::from(self.growth_block_size));
            st.file.set_len(aligned)?;
        }
        Ok(())
    }

    /// `dst` must be at least `page_size` bytes.
    pub fn read_page(&self, page_id: u32, dst: &mut [u8]) -> DbResult<()> {
        if dst.len() < self.page_size as usize {
            return Err(DbError::Invariant("read_page destination smaller than page_size".into()));
        }
        let st = self.state.lock();
        read_page_raw(&st.file, page_id, self.page_size, &mut dst[..self.page_size as usize])
            .map_err(DbError::Io)
    }

    /// True async read, bypassing any overlay (the Storage Engine resolves
    /// WAL overlays before falling through to this).
    pub async fn read_page_async(&self, page_id: u32) -> DbResult<PageBuf> {
        let page_size = self.page_size;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> DbResult<PageBuf> {
            let file = crate::utils::fsutil::open_rw_no_trunc(&path)?;
            let mut buf = vec![0u8; page_size as usize];
            read_page_raw(&file, page_id, page_size, &mut buf)?;
            Ok(buf)
        })
        .await
        .map_err(|e| DbError::Io(io::Error::other(e)))?
    }

    /// Writes `page_size` bytes, growing the file first if the page lies
    /// beyond the current end-of-file.
    pub fn write_page(&self, page_id: u32, src: &[u8]) -> DbResult<()> {
        if src.len() < self.page_size as usize {
            return Err(DbError::Invariant("write_page source smaller than page_size".into()));
        }
        let st = self.state.lock();
        let required = (u64::from(page_id) + 1) * u64::from(self.page_size);
        self.grow_to_locked(&st, required)?;
        write_page_raw(&st.file, page_id, self.page_size, &src[..self.page_size as usize])
            .map_err(DbError::Io)
    }

    /// Allocates a page: recycles the free-list head if non-empty, else
    /// extends the logical page count by one (growing the file as needed).
    pub fn allocate_page(&self) -> DbResult<u32> {
        let mut st = self.state.lock();
        if st.free_list_head != 0 {
            let id = st.free_list_head;
            let mut buf = vec![0u8; self.page_size as usize];
            read_page_raw(&st.file, id, self.page_size, &mut buf).map_err(DbError::Io)?;
            let next = read_next_page_id(&buf);
            st.free_list_head = next;
            self.rewrite_header_locked(&mut st)?;
            log::debug!("allocate_page: recycled page {id} from free list");
            return Ok(id);
        }
        let id = st.next_page_id;
        st.next_page_id += 1;
        let required = u64::from(st.next_page_id) * u64::from(self.page_size);
        self.grow_to_locked(&st, required)?;
        log::debug!("allocate_page: extended file, new page {id}");
        Ok(id)
    }

    /// Prepends `page_id` to the free list. Fails if `page_id == 0`: the
    /// header page can never be freed.
    pub fn free_page(&self, page_id: u32) -> DbResult<()> {
        if page_id == 0 {
            return Err(DbError::Conflict("cannot free page 0".into()));
        }
        let mut st = self.state.lock();
        let mut buf = vec![0u8; self.page_size as usize];
        write_page_header(&mut buf, page_id, PageType::Free, self.page_size - PAGE_HEADER_SIZE as u32, st.free_list_head, 0);
        finalize_checksum(&mut buf);
        write_page_raw(&st.file, page_id, self.page_size, &buf).map_err(DbError::Io)?;
        st.free_list_head = page_id;
        self.rewrite_header_locked(&mut st)?;
        log::debug!("free_page: {page_id} prepended to free list");
        Ok(())
    }

    pub fn flush(&self) -> DbResult<()> {
        let st = self.state.lock();
        st.file.sync_all().map_err(DbError::Io)
    }

    /// Copies the file to `destination` under the file lock. Callers must
    /// quiesce the engine (via `commit_lock`) before calling this.
    pub fn backup(&self, destination: impl AsRef<Path>) -> DbResult<()> {
        let st = self.state.lock();
        st.file.sync_all()?;
        std::fs::copy(&self.path, destination.as_ref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn cfg() -> EngineConfig {
        EngineConfig::new_16k()
    }

    #[test]
    fn open_creates_header_and_collection_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let pf = PagedFile::open(&path, &cfg()).unwrap();
        let mut buf = vec![0u8; pf.page_size() as usize];
        pf.read_page(0, &mut buf).unwrap();
        assert_eq!(read_page_type(&buf), Some(PageType::Header));
        pf.read_page(1, &mut buf).unwrap();
        assert_eq!(read_page_type(&buf), Some(PageType::Collection));
    }

    #[test]
    fn allocate_then_free_recycles_head() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let pf = PagedFile::open(&path, &cfg()).unwrap();
        let a = pf.allocate_page().unwrap();
        let b = pf.allocate_page().unwrap();
        pf.free_page(a).unwrap();
        let recycled = pf.allocate_page().unwrap();
        assert_eq!(recycled, a);
        assert_ne!(a, b);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let pf = PagedFile::open(&path, &cfg()).unwrap();
        let id = pf.allocate_page().unwrap();
        let data = vec![0x42u8; pf.page_size() as usize];
        pf.write_page(id, &data).unwrap();
        let mut out = vec![0u8; pf.page_size() as usize];
        pf.read_page(id, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn free_page_zero_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let pf = PagedFile::open(&path, &cfg()).unwrap();
        assert!(matches!(pf.free_page(0), Err(DbError::Conflict(_))));
    }
}
