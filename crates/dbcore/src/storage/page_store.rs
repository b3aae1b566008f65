//! Module: storage::page_store
//! Responsibility: `PageStore`, the paged byte-store collaborator
//! standing in for the buffer pool and page allocator. Exposes exactly
//! pin/unpin/fetch/flush and nothing about eviction policy or frame
//! accounting — those are out of scope.
//! Does not own: slotted-page layout (that is `storage::heap`) or key
//! ordering (that is `storage::btree`).

use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

pub type PageId = u32;

/// A paged byte-store. Pages are fixed-size; callers own the layout of
/// the bytes within a page.
pub trait PageStore: Send + Sync {
    fn page_size(&self) -> usize;

    /// Allocate a new zeroed page and return its id.
    fn new_page(&self) -> Result<PageId, DbError>;

    /// Pin a page in memory ahead of a fetch. The in-memory store treats
    /// this as a no-op; the file-backed store uses it to mark a page dirty
    /// once unpinned after a mutation.
    fn pin(&self, page_id: PageId) -> Result<(), DbError>;

    fn unpin(&self, page_id: PageId, dirty: bool) -> Result<(), DbError>;

    fn fetch(&self, page_id: PageId) -> Result<Vec<u8>, DbError>;

    fn write_page(&self, page_id: PageId, bytes: &[u8]) -> Result<(), DbError>;

    fn flush(&self, page_id: PageId) -> Result<(), DbError>;

    fn flush_all(&self) -> Result<(), DbError>;

    fn num_pages(&self) -> u32;
}

fn io_err(message: impl Into<String>) -> DbError {
    DbError::new(ErrorKind::IoError, ErrorOrigin::Storage, message)
}

///
/// InMemoryPageStore
///
/// Reference implementation used by every test and by sessions that do
/// not need to survive a restart.
///

pub struct InMemoryPageStore {
    page_size: usize,
    pages: std::sync::Mutex<Vec<Vec<u8>>>,
}

impl InMemoryPageStore {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            pages: std::sync::Mutex::new(Vec::new()),
        }
    }
}

impl PageStore for InMemoryPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn new_page(&self) -> Result<PageId, DbError> {
        let mut pages = self.pages.lock().unwrap();
        pages.push(vec![0u8; self.page_size]);
        Ok((pages.len() - 1) as PageId)
    }

    fn pin(&self, _page_id: PageId) -> Result<(), DbError> {
        Ok(())
    }

    fn unpin(&self, _page_id: PageId, _dirty: bool) -> Result<(), DbError> {
        Ok(())
    }

    fn fetch(&self, page_id: PageId) -> Result<Vec<u8>, DbError> {
        let pages = self.pages.lock().unwrap();
        pages
            .get(page_id as usize)
            .cloned()
            .ok_or_else(|| io_err(format!("page {page_id} does not exist")))
    }

    fn write_page(&self, page_id: PageId, bytes: &[u8]) -> Result<(), DbError> {
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .get_mut(page_id as usize)
            .ok_or_else(|| io_err(format!("page {page_id} does not exist")))?;
        page.copy_from_slice(bytes);
        Ok(())
    }

    fn flush(&self, _page_id: PageId) -> Result<(), DbError> {
        Ok(())
    }

    fn flush_all(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn num_pages(&self) -> u32 {
        self.pages.lock().unwrap().len() as u32
    }
}

///
/// FilePageStore
///
/// File-backed implementation exercised by the crash/recovery scenario:
/// pages survive a process restart.
///

pub struct FilePageStore {
    page_size: usize,
    file: std::sync::Mutex<File>,
    num_pages: std::sync::atomic::AtomicU32,
}

impl FilePageStore {
    pub fn open(path: impl Into<PathBuf>, page_size: usize) -> Result<Self, DbError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_err(format!("open {}: {e}", path.display())))?;
        let len = file
            .metadata()
            .map_err(|e| io_err(format!("stat {}: {e}", path.display())))?
            .len();
        let num_pages = (len / page_size as u64) as u32;
        Ok(Self {
            page_size,
            file: std::sync::Mutex::new(file),
            num_pages: std::sync::atomic::AtomicU32::new(num_pages),
        })
    }
}

impl PageStore for FilePageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn new_page(&self) -> Result<PageId, DbError> {
        let id = self
            .num_pages
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.write_page(id, &vec![0u8; self.page_size])?;
        Ok(id)
    }

    fn pin(&self, _page_id: PageId) -> Result<(), DbError> {
        Ok(())
    }

    fn unpin(&self, _page_id: PageId, _dirty: bool) -> Result<(), DbError> {
        Ok(())
    }

    fn fetch(&self, page_id: PageId) -> Result<Vec<u8>, DbError> {
        let mut file = self.file.lock().unwrap();
        let mut buf = vec![0u8; self.page_size];
        file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))
            .map_err(|e| io_err(e.to_string()))?;
        file.read_exact(&mut buf).map_err(|e| io_err(e.to_string()))?;
        Ok(buf)
    }

    fn write_page(&self, page_id: PageId, bytes: &[u8]) -> Result<(), DbError> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))
            .map_err(|e| io_err(e.to_string()))?;
        file.write_all(bytes).map_err(|e| io_err(e.to_string()))?;
        Ok(())
    }

    fn flush(&self, _page_id: PageId) -> Result<(), DbError> {
        self.flush_all()
    }

    fn flush_all(&self) -> Result<(), DbError> {
        let file = self.file.lock().unwrap();
        file.sync_data().map_err(|e| io_err(e.to_string()))
    }

    fn num_pages(&self) -> u32 {
        self.num_pages.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Registry keeping per-table page stores reachable by table name, used
/// by a `Database` to hand the DML executors and recovery a handle.
#[derive(Default)]
pub struct PageStoreRegistry {
    stores: HashMap<String, std::sync::Arc<dyn PageStore>>,
}

impl PageStoreRegistry {
    pub fn insert(&mut self, table: impl Into<String>, store: std::sync::Arc<dyn PageStore>) {
        self.stores.insert(table.into(), store);
    }

    #[must_use]
    pub fn get(&self, table: &str) -> Option<std::sync::Arc<dyn PageStore>> {
        self.stores.get(table).cloned()
    }
}
