//! Encoding of WAL structures and WAL-index header maintenance.

use crate::checksum::checksum_bytes;
use crate::error::{FormatError, FormatResult};
use crate::{WAL_FORMAT_VERSION, WAL_HEADER_SIZE, WAL_INDEX_HEADER_SIZE, WAL_MAGIC};

/// Encodes a WAL frame header and extends the checksum chain.
///
/// Writes the page number and database-size-after-commit fields
/// (big-endian), extends `checksum` over the first 8 header bytes and then
/// over the full page payload, writes the salts verbatim and the resulting
/// checksum pair (big-endian), and returns the new chain value so the
/// caller can encode the next frame.
///
/// `database_size` must be 0 on interior frames and the database size in
/// pages on the final frame of a committed transaction.
pub fn encode_wal_frame_header(
    native: bool,
    page_number: u32,
    database_size: u32,
    salt1: u32,
    salt2: u32,
    checksum: (u32, u32),
    header: &mut [u8; 24],
    page: &[u8],
) -> (u32, u32) {
    header[0..4].copy_from_slice(&page_number.to_be_bytes());
    header[4..8].copy_from_slice(&database_size.to_be_bytes());

    let checksum = checksum_bytes(native, &header[..8], Some(checksum));
    let checksum = checksum_bytes(native, page, Some(checksum));

    header[8..12].copy_from_slice(&salt1.to_ne_bytes());
    header[12..16].copy_from_slice(&salt2.to_ne_bytes());
    header[16..20].copy_from_slice(&checksum.0.to_be_bytes());
    header[20..24].copy_from_slice(&checksum.1.to_be_bytes());

    checksum
}

/// Encodes a fresh WAL header, starting a new WAL generation.
///
/// The magic's low bit reflects the host byte order so that checksums can
/// be computed in native order; the header's own checksum covers its first
/// 24 bytes from a zero seed.
#[must_use]
pub fn encode_wal_header(
    page_size: u32,
    checkpoint_seq: u32,
    salt1: u32,
    salt2: u32,
) -> [u8; WAL_HEADER_SIZE] {
    let magic = if cfg!(target_endian = "big") {
        WAL_MAGIC | 1
    } else {
        WAL_MAGIC
    };
    let native = magic & 1 == 0;

    let mut header = [0u8; WAL_HEADER_SIZE];
    header[0..4].copy_from_slice(&magic.to_be_bytes());
    header[4..8].copy_from_slice(&WAL_FORMAT_VERSION.to_be_bytes());
    header[8..12].copy_from_slice(&page_size.to_be_bytes());
    header[12..16].copy_from_slice(&checkpoint_seq.to_be_bytes());
    header[16..20].copy_from_slice(&salt1.to_ne_bytes());
    header[20..24].copy_from_slice(&salt2.to_ne_bytes());

    let checksum = checksum_bytes(native, &header[..24], None);
    header[24..28].copy_from_slice(&checksum.0.to_be_bytes());
    header[28..32].copy_from_slice(&checksum.1.to_be_bytes());

    header
}

/// Rewrites the critical prefix of a WAL-index header and mirrors it.
///
/// Writes mxFrame, the database page count and the frame checksum pair
/// (native word order), recomputes the header's own checksum over its
/// first 40 bytes from a zero seed using the byte-order flag at byte 13,
/// writes the result at bytes 40-47, then copies the whole critical
/// prefix onto the secondary copy so both copies agree.
///
/// This is the single mutation path for the critical prefix: the revert
/// operation uses it to rewind mxFrame to the committed state and the
/// commit operation uses it to advance past newly appended frames.
///
/// # Errors
///
/// Returns [`FormatError::ShortBuffer`] if `header` cannot hold both
/// copies of the critical prefix.
pub fn rewrite_wal_index_header(
    header: &mut [u8],
    mx_frame: u32,
    n_pages: u32,
    frame_checksum: (u32, u32),
) -> FormatResult<()> {
    if header.len() < 2 * WAL_INDEX_HEADER_SIZE {
        return Err(FormatError::short_buffer(
            2 * WAL_INDEX_HEADER_SIZE,
            header.len(),
        ));
    }

    let native = header[13] == 0;

    header[16..20].copy_from_slice(&mx_frame.to_ne_bytes());
    header[20..24].copy_from_slice(&n_pages.to_ne_bytes());
    header[24..28].copy_from_slice(&frame_checksum.0.to_ne_bytes());
    header[28..32].copy_from_slice(&frame_checksum.1.to_ne_bytes());

    let own = checksum_bytes(native, &header[..40], None);
    header[40..44].copy_from_slice(&own.0.to_ne_bytes());
    header[44..48].copy_from_slice(&own.1.to_ne_bytes());

    let (first, second) = header.split_at_mut(WAL_INDEX_HEADER_SIZE);
    second[..WAL_INDEX_HEADER_SIZE].copy_from_slice(&first[..WAL_INDEX_HEADER_SIZE]);

    Ok(())
}
