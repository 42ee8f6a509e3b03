//! The write-ahead log file and the transaction frame buffer.
//!
//! A WAL file is a 32-byte header followed by frames of one page each.
//! Committed frames live in a page store, one full frame (header plus
//! page) per store page. Frames written by an in-flight transaction are
//! buffered separately and stay invisible to readers: visibility is
//! governed solely by the mxFrame field of the WAL-index header, which
//! this file never advances.

use crate::error::{VfsError, VfsResult};
use crate::replication::Frame;
use tracing::debug;
use walrep_format::{
    decode_page_size, encode_wal_frame_header, encode_wal_header, wal_checksum_native,
    wal_checksums, wal_frame_checksums, wal_frame_database_size, wal_frame_page_number, wal_salts,
    wal_frame_size, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE,
};
use walrep_storage::PageStore;

/// One frame captured from the engine during a write transaction.
///
/// The engine writes the frame header and the page payload separately;
/// `page` stays empty between the two writes.
#[derive(Debug)]
struct TxFrame {
    header: [u8; WAL_FRAME_HEADER_SIZE],
    page: Vec<u8>,
}

/// Contents of a WAL file once its header has been written. The header,
/// the page size it carries and the committed-frame store always change
/// together.
#[derive(Debug)]
struct WalState {
    header: [u8; WAL_HEADER_SIZE],
    page_size: u32,
    frames: PageStore,
}

/// In-memory contents of one WAL file.
#[derive(Debug, Default)]
pub(crate) struct WalFile {
    state: Option<WalState>,
    tx: Vec<TxFrame>,
}

impl WalFile {
    /// Returns the page size, or 0 before the header is written. Tests
    /// use it to compute frame offsets.
    #[cfg(test)]
    pub(crate) fn page_size(&self) -> u32 {
        self.state.as_ref().map_or(0, |s| s.page_size)
    }

    /// Returns the number of committed frames.
    pub(crate) fn n_frames(&self) -> u32 {
        self.state.as_ref().map_or(0, |s| s.frames.n_pages() as u32)
    }

    /// Returns the WAL file size in bytes.
    ///
    /// Buffered transaction frames are excluded: recovery after a crash
    /// must not see uncommitted frames, and the engine tracks its own
    /// offsets within a transaction.
    pub(crate) fn size(&self) -> u64 {
        match &self.state {
            Some(state) => {
                WAL_HEADER_SIZE as u64
                    + u64::from(self.n_frames()) * wal_frame_size(state.page_size)
            }
            None => 0,
        }
    }

    /// True if a transaction has buffered frames.
    pub(crate) fn has_pending(&self) -> bool {
        !self.tx.is_empty()
    }

    /// Returns the raw salt bytes of the current generation, as the
    /// WAL-index header stores them.
    pub(crate) fn salt_bytes(&self) -> Option<[u8; 8]> {
        self.state.as_ref().map(|state| {
            let mut salts = [0u8; 8];
            salts.copy_from_slice(&state.header[16..24]);
            salts
        })
    }

    /// True if writing `header` would reset the WAL to a new generation:
    /// frames exist and the salts differ from the current generation's.
    pub(crate) fn would_reset(&self, header: &[u8]) -> VfsResult<bool> {
        let Some(state) = &self.state else {
            return Ok(false);
        };
        if state.frames.is_empty() {
            return Ok(false);
        }
        Ok(wal_salts(&state.header)? != wal_salts(header)?)
    }

    /// Handles an engine write to the WAL file.
    ///
    /// Offset 0 with a 32-byte buffer writes the header; a header carrying
    /// new salts while frames exist resets the WAL. All other writes must
    /// be a frame header or a page payload at its exact frame-relative
    /// offset, and land in the transaction buffer.
    pub(crate) fn write_at(&mut self, offset: u64, data: &[u8]) -> VfsResult<()> {
        if offset == 0 && data.len() == WAL_HEADER_SIZE {
            return self.write_header(data);
        }

        let Some(state) = &self.state else {
            return Err(VfsError::invalid_operation(
                "frame written before the log header",
            ));
        };
        let page_size = state.page_size;
        if offset < WAL_HEADER_SIZE as u64 {
            return Err(VfsError::UnalignedAccess { offset, len: data.len() });
        }

        let frame_size = wal_frame_size(page_size);
        let rel = offset - WAL_HEADER_SIZE as u64;
        let frame_no = rel / frame_size + 1;
        let within = rel % frame_size;
        let committed = u64::from(self.n_frames());

        if frame_no <= committed {
            return Err(VfsError::invalid_operation(
                "committed frames cannot be overwritten",
            ));
        }
        let slot = (frame_no - committed) as usize;

        if within == 0 && data.len() == WAL_FRAME_HEADER_SIZE {
            let mut header = [0u8; WAL_FRAME_HEADER_SIZE];
            header.copy_from_slice(data);
            if slot == self.tx.len() + 1 {
                self.tx.push(TxFrame {
                    header,
                    page: Vec::new(),
                });
            } else if let Some(frame) = self.tx.get_mut(slot - 1) {
                // The engine rewrites a buffered frame when the same page
                // is written again within one transaction.
                frame.header = header;
            } else {
                return Err(VfsError::invalid_operation(
                    "frame written out of sequence",
                ));
            }
            Ok(())
        } else if within == WAL_FRAME_HEADER_SIZE as u64 && data.len() == page_size as usize {
            let Some(frame) = self.tx.get_mut(slot - 1) else {
                return Err(VfsError::invalid_operation(
                    "page payload written before its frame header",
                ));
            };
            frame.page = data.to_vec();
            Ok(())
        } else {
            Err(VfsError::UnalignedAccess { offset, len: data.len() })
        }
    }

    fn write_header(&mut self, data: &[u8]) -> VfsResult<()> {
        let page_size = walrep_format::wal_page_size(data)?;
        if page_size == 0 {
            return Err(VfsError::InvalidPageSize { value: 0 });
        }
        wal_checksum_native(data)?;

        let mut header = [0u8; WAL_HEADER_SIZE];
        header.copy_from_slice(data);

        if self.would_reset(data)? {
            if self.has_pending() {
                return Err(VfsError::invalid_operation(
                    "log restarted with frames still buffered",
                ));
            }
            debug!(page_size, "wal reset to a new generation");
            self.state = Some(WalState {
                header,
                page_size,
                frames: PageStore::new(wal_frame_size(page_size) as usize),
            });
            return Ok(());
        }

        match &mut self.state {
            Some(state) if !state.frames.is_empty() => {
                if page_size != state.page_size {
                    return Err(VfsError::invalid_operation(
                        "page size of a non-empty log cannot change",
                    ));
                }
                state.header = header;
            }
            _ => {
                self.state = Some(WalState {
                    header,
                    page_size,
                    frames: PageStore::new(wal_frame_size(page_size) as usize),
                });
            }
        }
        Ok(())
    }

    /// Reads `len` bytes at `offset`, serving the header, committed frames
    /// and the connection's own buffered frames.
    pub(crate) fn read_at(&self, offset: u64, len: usize) -> VfsResult<Vec<u8>> {
        let Some(state) = &self.state else {
            return Err(VfsError::ShortRead {
                requested: len,
                available: 0,
            });
        };

        if offset + len as u64 <= WAL_HEADER_SIZE as u64 {
            let start = offset as usize;
            return Ok(state.header[start..start + len].to_vec());
        }
        if offset < WAL_HEADER_SIZE as u64 {
            return Err(VfsError::UnalignedAccess { offset, len });
        }

        let frame_size = wal_frame_size(state.page_size);
        let rel = offset - WAL_HEADER_SIZE as u64;
        let frame_no = rel / frame_size + 1;
        let within = (rel % frame_size) as usize;

        if within + len > frame_size as usize {
            return Err(VfsError::UnalignedAccess { offset, len });
        }

        let committed = u64::from(self.n_frames());
        if frame_no <= committed {
            return Ok(state.frames.read(frame_no - 1, within, len)?.to_vec());
        }

        let slot = (frame_no - committed) as usize;
        let Some(frame) = self.tx.get(slot - 1) else {
            return Err(VfsError::ShortRead {
                requested: len,
                available: 0,
            });
        };
        let mut out = Vec::with_capacity(len);
        for pos in within..within + len {
            let byte = if pos < WAL_FRAME_HEADER_SIZE {
                Some(frame.header[pos])
            } else {
                frame.page.get(pos - WAL_FRAME_HEADER_SIZE).copied()
            };
            match byte {
                Some(byte) => out.push(byte),
                None => {
                    return Err(VfsError::ShortRead {
                        requested: len,
                        available: out.len(),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Truncates the WAL. Only truncation to zero is meaningful; it drops
    /// the header and all committed frames.
    pub(crate) fn truncate(&mut self, size: u64) -> VfsResult<()> {
        if size != 0 {
            return Err(VfsError::invalid_argument(
                "the log can only be truncated to zero",
            ));
        }
        if self.has_pending() {
            return Err(VfsError::invalid_operation(
                "log truncated with frames still buffered",
            ));
        }
        self.state = None;
        Ok(())
    }

    /// Removes and returns the buffered transaction frames in write order.
    ///
    /// # Errors
    ///
    /// Returns an error if any buffered frame never received its page
    /// payload; the buffer is left untouched in that case.
    pub(crate) fn take_pending(&mut self) -> VfsResult<Vec<Frame>> {
        if self.tx.iter().any(|frame| frame.page.is_empty()) {
            return Err(VfsError::invalid_operation(
                "transaction buffer holds an incomplete frame",
            ));
        }
        std::mem::take(&mut self.tx)
            .into_iter()
            .map(|frame| {
                Ok(Frame {
                    page_number: wal_frame_page_number(&frame.header)?,
                    data: frame.page,
                })
            })
            .collect()
    }

    /// Discards the buffered transaction frames.
    pub(crate) fn clear_pending(&mut self) {
        self.tx.clear();
    }

    /// Returns the committed tail of the WAL: the frame count, the
    /// database size in pages as of that frame, and the checksum the next
    /// frame must chain from.
    ///
    /// With no committed frames the checksum comes from the WAL header and
    /// the size from the database file (`db_pages`); with no header at all
    /// everything is zero.
    pub(crate) fn committed_state(&self, db_pages: u32) -> VfsResult<(u32, u32, (u32, u32))> {
        let Some(state) = &self.state else {
            return Ok((0, db_pages, (0, 0)));
        };
        let n = self.n_frames();
        if n == 0 {
            return Ok((0, db_pages, wal_checksums(&state.header)?));
        }
        let header = state
            .frames
            .read(u64::from(n) - 1, 0, WAL_FRAME_HEADER_SIZE)?;
        Ok((
            n,
            wal_frame_database_size(header)?,
            wal_frame_checksums(header)?,
        ))
    }

    /// Appends externally committed frames, encoding each header with the
    /// checksum chain continued from the committed tail.
    ///
    /// Starts a new WAL generation with fresh random salts when the node
    /// has no WAL yet (frames received from another node before any local
    /// write). Returns the new `(mx_frame, n_pages, checksum)` tail for
    /// WAL-index maintenance. On error the committed frames are unchanged.
    pub(crate) fn append_committed(
        &mut self,
        frames: &[Frame],
        db_pages: u32,
    ) -> VfsResult<(u32, u32, (u32, u32))> {
        if frames.is_empty() {
            return Err(VfsError::invalid_argument("empty frame batch"));
        }

        // Validate payload sizes before touching any state.
        let page_size = match &self.state {
            Some(state) => state.page_size,
            None => {
                let len = frames[0].data.len() as u32;
                if len == 0 || decode_page_size(len.to_be_bytes()) != len {
                    return Err(VfsError::InvalidPageSize { value: len });
                }
                len
            }
        };
        if let Some(frame) = frames.iter().find(|f| f.data.len() != page_size as usize) {
            return Err(VfsError::invalid_argument(format!(
                "frame for page {} has {} bytes, page size is {}",
                frame.page_number,
                frame.data.len(),
                page_size
            )));
        }

        if self.state.is_none() {
            let salt1 = rand::random::<u32>();
            let salt2 = rand::random::<u32>();
            debug!(page_size, "starting wal generation for replicated frames");
            self.state = Some(WalState {
                header: encode_wal_header(page_size, 0, salt1, salt2),
                page_size,
                frames: PageStore::new(wal_frame_size(page_size) as usize),
            });
        }

        let (mx_frame, committed_pages, mut checksum) = self.committed_state(db_pages)?;
        let Some(state) = &mut self.state else {
            return Err(VfsError::invalid_operation("wal state missing"));
        };
        let native = wal_checksum_native(&state.header)?;
        let (salt1, salt2) = wal_salts(&state.header)?;

        let highest_page = frames.iter().map(|f| f.page_number).max().unwrap_or(0);
        let database_size = committed_pages.max(highest_page);

        let result: VfsResult<()> = (|| {
            for (i, frame) in frames.iter().enumerate() {
                let commit_size = if i == frames.len() - 1 { database_size } else { 0 };
                let mut header = [0u8; WAL_FRAME_HEADER_SIZE];
                checksum = encode_wal_frame_header(
                    native,
                    frame.page_number,
                    commit_size,
                    salt1,
                    salt2,
                    checksum,
                    &mut header,
                    &frame.data,
                );
                let index = u64::from(mx_frame) + i as u64;
                state.frames.write(index, 0, &header)?;
                state.frames.write(index, WAL_FRAME_HEADER_SIZE, &frame.data)?;
            }
            Ok(())
        })();
        if let Err(error) = result {
            // Drop any partially appended frames so the tail stays valid.
            state.frames.truncate(u64::from(mx_frame));
            return Err(error);
        }

        Ok((mx_frame + frames.len() as u32, database_size, checksum))
    }
}
