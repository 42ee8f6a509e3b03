//! A minimal WAL-mode engine harness.
//!
//! Reproduces the file-I/O pattern the SQL engine issues against the VFS:
//! the header probe on open, shared-memory mapping, WAL-index recovery by
//! scanning the log, read-mark pinned page reads and write transactions
//! that append frames and publish the index header. This lets tests
//! exercise the VFS end to end - including the poll/commit/revert
//! protocol - without the engine itself.
//!
//! The harness encodes frames and headers with the same format routines
//! the engine's on-disk format mandates, so frames appended locally and
//! frames re-encoded by the commit path are byte-identical.

use walrep_core::{FileHandle, ShmLockKind, Vfs, VfsError, VfsResult};
use walrep_format::{
    checksum_bytes, encode_wal_frame_header, encode_wal_header, wal_checksum_native,
    wal_checksums, wal_frame_count, wal_frame_database_size, wal_frame_offset,
    wal_frame_page_number, wal_frame_checksums, wal_index_mx_frame, wal_index_read_marks,
    wal_page_size, wal_read_lock, DB_HEADER_SIZE, WAL_FORMAT_VERSION, WAL_FRAME_HEADER_SIZE,
    WAL_HEADER_SIZE, WAL_INDEX_HEADER_SIZE, WAL_NREADER,
};

/// The WAL write lock slot.
const WRITE_LOCK: usize = 0;
/// The recovery lock slot.
const RECOVER_LOCK: usize = 2;

/// Reader-mark value of an unused slot.
const READMARK_NOT_USED: u32 = 0xffff_ffff;

/// WAL-index header field offsets (native word order).
const HDR_ISINIT: usize = 12;
const HDR_BIGEND: usize = 13;
const HDR_SZPAGE: usize = 14;
const HDR_MXFRAME: usize = 16;
const HDR_NPAGE: usize = 20;
const HDR_FRAME_CKSUM: usize = 24;
const HDR_SALT: usize = 32;
const HDR_CKSUM: usize = 40;
/// Byte offset of the reader-mark array within region 0.
const CKPT_READMARKS: usize = 100;

/// Connection options, in the spirit of the engine's per-connection
/// pragmas.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    page_size: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { page_size: 512 }
    }
}

impl EngineOptions {
    /// Creates options with the default 512-byte page size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Snapshot of the WAL-index header a reader or writer starts from.
#[derive(Debug, Clone, Copy)]
struct IndexState {
    mx_frame: u32,
    n_pages: u32,
    frame_checksum: (u32, u32),
    salts: [u8; 8],
}

/// One engine connection: a main-file handle, a WAL handle and the mapped
/// shared memory.
pub struct Connection {
    main: FileHandle,
    wal: FileHandle,
    page_size: u32,
}

impl Connection {
    /// Opens a connection on `filename` through the given VFS, probing
    /// the database header and mapping shared memory the way the engine
    /// does.
    pub fn open(vfs: &Vfs, filename: &str, options: EngineOptions) -> VfsResult<Self> {
        let mut main = vfs.open(filename)?;
        let wal = vfs.open(&format!("{filename}-wal"))?;

        // Header probe; a short read means a fresh database.
        match main.read_at(0, DB_HEADER_SIZE) {
            Ok(_) | Err(VfsError::ShortRead { .. }) => {}
            Err(error) => return Err(error),
        }
        main.shm_map(0, true)?;

        Ok(Self {
            main,
            wal,
            page_size: options.page_size,
        })
    }

    /// The connection's page size.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Returns both copies of the WAL-index header critical prefix.
    pub fn index_bytes(&self) -> VfsResult<Vec<u8>> {
        self.main.shm_read(0, 0, 2 * WAL_INDEX_HEADER_SIZE)
    }

    /// Runs a write transaction setting the given pages, then releases
    /// the write lock. The frames stay buffered in the VFS until polled.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::Busy`] without side effects when another
    /// writer or a pending transaction holds the write lock.
    pub fn write_transaction(&mut self, pages: &[(u32, Vec<u8>)]) -> VfsResult<()> {
        assert!(!pages.is_empty(), "a write transaction needs pages");
        self.main.shm_lock(WRITE_LOCK, 1, ShmLockKind::Exclusive)?;
        let result = self.write_frames_locked(pages);
        let unlock = self.main.shm_unlock(WRITE_LOCK, 1, ShmLockKind::Exclusive);
        result.and(unlock)
    }

    fn write_frames_locked(&mut self, pages: &[(u32, Vec<u8>)]) -> VfsResult<()> {
        let snapshot = self.index_state_or_recover()?;

        let (mx_frame, mut checksum, salts, n_pages);
        if snapshot.mx_frame == 0 {
            // Restarting an empty log: fresh random salts, new header.
            let header = encode_wal_header(
                self.page_size,
                0,
                rand::random::<u32>(),
                rand::random::<u32>(),
            );
            self.wal.write_at(0, &header)?;
            let mut salt_bytes = [0u8; 8];
            salt_bytes.copy_from_slice(&header[16..24]);
            mx_frame = 0;
            checksum = wal_checksums(&header)?;
            salts = salt_bytes;
            n_pages = snapshot.n_pages;
        } else {
            mx_frame = snapshot.mx_frame;
            checksum = snapshot.frame_checksum;
            salts = snapshot.salts;
            n_pages = snapshot.n_pages;
        }

        let wal_header = self.wal.read_at(0, WAL_HEADER_SIZE)?;
        let native = wal_checksum_native(&wal_header)?;
        let salt1 = u32::from_ne_bytes([salts[0], salts[1], salts[2], salts[3]]);
        let salt2 = u32::from_ne_bytes([salts[4], salts[5], salts[6], salts[7]]);

        let highest = pages.iter().map(|(page, _)| *page).max().unwrap_or(0);
        let database_size = n_pages.max(highest);

        for (i, (page_number, data)) in pages.iter().enumerate() {
            assert_eq!(
                data.len(),
                self.page_size as usize,
                "payload must be one page"
            );
            let commit_size = if i == pages.len() - 1 { database_size } else { 0 };
            let mut frame_header = [0u8; WAL_FRAME_HEADER_SIZE];
            checksum = encode_wal_frame_header(
                native,
                *page_number,
                commit_size,
                salt1,
                salt2,
                checksum,
                &mut frame_header,
                data,
            );
            let offset = wal_frame_offset(self.page_size, u64::from(mx_frame) + i as u64 + 1);
            self.wal.write_at(offset, &frame_header)?;
            self.wal.write_at(offset + WAL_FRAME_HEADER_SIZE as u64, data)?;
        }

        self.publish_index_header(IndexState {
            mx_frame: mx_frame + pages.len() as u32,
            n_pages: database_size,
            frame_checksum: checksum,
            salts,
        })
    }

    /// Reads a page at the current mxFrame snapshot, pinned through a
    /// read-mark lock. Returns `None` when the page exists in neither the
    /// WAL nor the database file.
    pub fn read_page(&mut self, page_number: u32) -> VfsResult<Option<Vec<u8>>> {
        let snapshot = self.index_state_or_recover()?;
        let slot = self.acquire_read_mark(snapshot.mx_frame)?;
        let result = self.read_page_at(&snapshot, page_number);
        let unlock = self.main.shm_unlock(slot, 1, ShmLockKind::Shared);
        result.and_then(|page| unlock.map(|()| page))
    }

    fn read_page_at(
        &self,
        snapshot: &IndexState,
        page_number: u32,
    ) -> VfsResult<Option<Vec<u8>>> {
        // The newest frame up to the snapshot wins.
        for frame in (1..=u64::from(snapshot.mx_frame)).rev() {
            let offset = wal_frame_offset(self.page_size, frame);
            let header = self.wal.read_at(offset, WAL_FRAME_HEADER_SIZE)?;
            if wal_frame_page_number(&header)? == page_number {
                let page = self
                    .wal
                    .read_at(offset + WAL_FRAME_HEADER_SIZE as u64, self.page_size as usize)?;
                return Ok(Some(page));
            }
        }

        let offset = u64::from(page_number - 1) * u64::from(self.page_size);
        match self.main.read_at(offset, self.page_size as usize) {
            Ok(page) => Ok(Some(page)),
            Err(VfsError::ShortRead { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Rebuilds the WAL-index header by scanning the log, under the
    /// recovery lock. Frames past a salt mismatch or a broken checksum
    /// chain are ignored, and only commit frames advance the snapshot.
    pub fn recover(&mut self) -> VfsResult<()> {
        self.main
            .shm_lock(RECOVER_LOCK, 1, ShmLockKind::Exclusive)?;
        let result = self.rebuild_index();
        let unlock = self.main.shm_unlock(RECOVER_LOCK, 1, ShmLockKind::Exclusive);
        result.and(unlock)
    }

    fn rebuild_index(&mut self) -> VfsResult<()> {
        let db_pages = (self.main.size() / u64::from(self.page_size)) as u32;
        let mut state = IndexState {
            mx_frame: 0,
            n_pages: db_pages,
            frame_checksum: (0, 0),
            salts: [0u8; 8],
        };

        let wal_size = self.wal.size();
        if wal_size >= WAL_HEADER_SIZE as u64 {
            let header = self.wal.read_at(0, WAL_HEADER_SIZE)?;
            let native = wal_checksum_native(&header)?;
            let page_size = wal_page_size(&header)?;
            let stored = wal_checksums(&header)?;
            if page_size == self.page_size
                && checksum_bytes(native, &header[..24], None) == stored
            {
                let mut salts = [0u8; 8];
                salts.copy_from_slice(&header[16..24]);
                let mut checksum = stored;
                state.salts = salts;
                state.frame_checksum = stored;

                for frame in 1..=wal_frame_count(page_size, wal_size) {
                    let offset = wal_frame_offset(page_size, frame);
                    let frame_header = self.wal.read_at(offset, WAL_FRAME_HEADER_SIZE)?;
                    let page = self
                        .wal
                        .read_at(offset + WAL_FRAME_HEADER_SIZE as u64, page_size as usize)?;
                    if frame_header[8..16] != salts {
                        break;
                    }
                    checksum = checksum_bytes(native, &frame_header[..8], Some(checksum));
                    checksum = checksum_bytes(native, &page, Some(checksum));
                    if wal_frame_checksums(&frame_header)? != checksum {
                        break;
                    }
                    let commit_size = wal_frame_database_size(&frame_header)?;
                    if commit_size > 0 {
                        state.mx_frame = frame as u32;
                        state.n_pages = commit_size;
                        state.frame_checksum = checksum;
                    }
                }
            }
        }

        self.publish_index_header(state)?;

        // Fresh checkpoint info: reader-mark 0 pins the empty WAL, the
        // rest are unused.
        let mut marks = [READMARK_NOT_USED; WAL_NREADER];
        marks[0] = 0;
        for (i, mark) in marks.iter().enumerate() {
            self.main
                .shm_write(0, CKPT_READMARKS + i * 4, &mark.to_ne_bytes())?;
        }
        Ok(())
    }

    fn publish_index_header(&mut self, state: IndexState) -> VfsResult<()> {
        let mut header = [0u8; WAL_INDEX_HEADER_SIZE];
        header[0..4].copy_from_slice(&WAL_FORMAT_VERSION.to_ne_bytes());
        header[HDR_ISINIT] = 1;
        header[HDR_BIGEND] = u8::from(cfg!(target_endian = "big"));
        header[HDR_SZPAGE..HDR_SZPAGE + 2]
            .copy_from_slice(&(self.page_size as u16).to_ne_bytes());
        header[HDR_MXFRAME..HDR_MXFRAME + 4].copy_from_slice(&state.mx_frame.to_ne_bytes());
        header[HDR_NPAGE..HDR_NPAGE + 4].copy_from_slice(&state.n_pages.to_ne_bytes());
        header[HDR_FRAME_CKSUM..HDR_FRAME_CKSUM + 4]
            .copy_from_slice(&state.frame_checksum.0.to_ne_bytes());
        header[HDR_FRAME_CKSUM + 4..HDR_FRAME_CKSUM + 8]
            .copy_from_slice(&state.frame_checksum.1.to_ne_bytes());
        header[HDR_SALT..HDR_SALT + 8].copy_from_slice(&state.salts);

        let native = header[HDR_BIGEND] == 0;
        let own = checksum_bytes(native, &header[..40], None);
        header[HDR_CKSUM..HDR_CKSUM + 4].copy_from_slice(&own.0.to_ne_bytes());
        header[HDR_CKSUM + 4..HDR_CKSUM + 8].copy_from_slice(&own.1.to_ne_bytes());

        self.main.shm_write(0, 0, &header)?;
        self.main.shm_write(0, WAL_INDEX_HEADER_SIZE, &header)?;
        Ok(())
    }

    fn index_state_or_recover(&mut self) -> VfsResult<IndexState> {
        if let Some(state) = self.index_state()? {
            return Ok(state);
        }
        self.recover()?;
        self.index_state()?
            .ok_or_else(|| VfsError::invalid_operation("recovery left no readable index"))
    }

    /// Decodes the index header, returning `None` when it is
    /// uninitialized, torn (the copies differ) or carries a bad checksum.
    fn index_state(&self) -> VfsResult<Option<IndexState>> {
        let header = self.index_bytes()?;
        if header[HDR_ISINIT] == 0
            || header[..WAL_INDEX_HEADER_SIZE]
                != header[WAL_INDEX_HEADER_SIZE..2 * WAL_INDEX_HEADER_SIZE]
        {
            return Ok(None);
        }
        let native = header[HDR_BIGEND] == 0;
        let expected = checksum_bytes(native, &header[..40], None);
        if (word(&header, HDR_CKSUM), word(&header, HDR_CKSUM + 4)) != expected {
            return Ok(None);
        }
        let mut salts = [0u8; 8];
        salts.copy_from_slice(&header[HDR_SALT..HDR_SALT + 8]);
        Ok(Some(IndexState {
            mx_frame: wal_index_mx_frame(&header)?,
            n_pages: word(&header, HDR_NPAGE),
            frame_checksum: (word(&header, HDR_FRAME_CKSUM), word(&header, HDR_FRAME_CKSUM + 4)),
            salts,
        }))
    }

    fn acquire_read_mark(&mut self, mx_frame: u32) -> VfsResult<usize> {
        for i in 1..WAL_NREADER {
            let slot = wal_read_lock(i);
            if self
                .main
                .shm_lock(slot, 1, ShmLockKind::Exclusive)
                .is_ok()
            {
                self.main
                    .shm_write(0, CKPT_READMARKS + i * 4, &mx_frame.to_ne_bytes())?;
                self.main.shm_unlock(slot, 1, ShmLockKind::Exclusive)?;
            } else {
                let marks = wal_index_read_marks(&self.main.shm_read(0, 0, 120)?)?;
                if marks[i] != mx_frame {
                    continue;
                }
            }
            if self.main.shm_lock(slot, 1, ShmLockKind::Shared).is_ok() {
                return Ok(slot);
            }
        }
        Err(VfsError::Busy)
    }
}

fn word(buf: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}
