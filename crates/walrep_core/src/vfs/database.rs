//! The main database file: an ordered sequence of fixed-size pages.

use crate::error::{VfsError, VfsResult};
use walrep_format::{database_page_size, DB_HEADER_SIZE};
use walrep_storage::PageStore;

/// In-memory contents of one main database file.
///
/// The page size is fixed for the lifetime of the file by the first write
/// of page 1, whose header carries the page-size field. Pages are only
/// mutated by the engine applying committed frames (checkpointing) and the
/// file is only shrunk by an explicit truncate.
#[derive(Debug, Default)]
pub(crate) struct DatabaseFile {
    store: Option<PageStore>,
}

impl DatabaseFile {
    /// Returns the number of pages in the file.
    pub(crate) fn n_pages(&self) -> u32 {
        self.store.as_ref().map_or(0, |s| s.n_pages() as u32)
    }

    /// Returns the file size in bytes.
    pub(crate) fn size(&self) -> u64 {
        self.store.as_ref().map_or(0, PageStore::size_bytes)
    }

    /// Reads `len` bytes at `offset`.
    ///
    /// The engine reads whole pages, plus sub-page ranges within page 1
    /// when probing the 100-byte header. Reads never span pages.
    pub(crate) fn read_at(&self, offset: u64, len: usize) -> VfsResult<Vec<u8>> {
        let Some(store) = &self.store else {
            return Err(VfsError::ShortRead {
                requested: len,
                available: 0,
            });
        };
        let page_size = store.page_size() as u64;
        let page = offset / page_size;
        let within = (offset % page_size) as usize;

        if within + len > store.page_size() {
            return Err(VfsError::UnalignedAccess { offset, len });
        }
        match store.read(page, within, len) {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(_) => Err(VfsError::ShortRead {
                requested: len,
                available: 0,
            }),
        }
    }

    /// Writes one page at `offset`.
    ///
    /// The first write must be page 1 carrying the header; it fixes the
    /// page size. Every write must be a whole page at a page boundary.
    pub(crate) fn write_at(&mut self, offset: u64, data: &[u8]) -> VfsResult<()> {
        if offset == 0 {
            if data.len() < DB_HEADER_SIZE {
                return Err(VfsError::UnalignedAccess { offset, len: data.len() });
            }
            let page_size = database_page_size(data)?;
            if page_size == 0 {
                return Err(VfsError::InvalidPageSize { value: 0 });
            }
            if data.len() != page_size as usize {
                return Err(VfsError::UnalignedAccess { offset, len: data.len() });
            }
            let store = self
                .store
                .get_or_insert_with(|| PageStore::new(page_size as usize));
            if store.page_size() != page_size as usize {
                return Err(VfsError::invalid_operation(
                    "page size of an existing database cannot change",
                ));
            }
            store.write(0, 0, data)?;
            return Ok(());
        }

        let Some(store) = &mut self.store else {
            return Err(VfsError::invalid_operation(
                "page 1 must be written before any other page",
            ));
        };
        let page_size = store.page_size() as u64;
        if offset % page_size != 0 || data.len() as u64 != page_size {
            return Err(VfsError::UnalignedAccess { offset, len: data.len() });
        }
        store.write(offset / page_size, 0, data)?;
        Ok(())
    }

    /// Truncates the file to `size` bytes, which must be a whole number of
    /// pages.
    pub(crate) fn truncate(&mut self, size: u64) -> VfsResult<()> {
        if size == 0 {
            self.store = None;
            return Ok(());
        }
        let Some(store) = &mut self.store else {
            return Err(VfsError::invalid_operation(
                "an empty file can only be truncated to zero",
            ));
        };
        let page_size = store.page_size() as u64;
        if size % page_size != 0 {
            return Err(VfsError::UnalignedAccess { offset: size, len: 0 });
        }
        store.truncate(size / page_size);
        Ok(())
    }

}
