//! Property-based test generators using proptest.

use proptest::prelude::*;

/// Strategy over the valid page sizes: powers of two in [512, 32768].
pub fn valid_page_size() -> impl Strategy<Value = u32> {
    (9u32..=15).prop_map(|shift| 1 << shift)
}

/// Strategy over one page payload of the given size.
pub fn page_payload(page_size: u32) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), page_size as usize..=page_size as usize)
}

/// Strategy over a write-transaction batch: up to `max_frames` pages with
/// page numbers in [1, 8], so batches overwrite each other's pages.
pub fn frame_batch(page_size: u32, max_frames: usize) -> impl Strategy<Value = Vec<(u32, Vec<u8>)>> {
    proptest::collection::vec((1u32..=8, page_payload(page_size)), 1..=max_frames)
}
