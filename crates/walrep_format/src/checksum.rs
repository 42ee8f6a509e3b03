//! The two-word running checksum used throughout the WAL format.

use crate::{PAGE_SIZE_MAX, WAL_FRAME_HEADER_SIZE};

/// Largest buffer a single checksum call may cover: one maximum-size page
/// plus a frame header.
const MAX_CHECKSUM_BYTES: usize = PAGE_SIZE_MAX as usize + WAL_FRAME_HEADER_SIZE;

/// Generates or extends the two-word WAL checksum over `data`.
///
/// The two 32-bit sums are updated two words at a time:
///
/// ```text
/// s1 += w0 + s2
/// s2 += w1 + s1
/// ```
///
/// with wrapping arithmetic. When `native` is false each 4-byte group is
/// interpreted as a big-endian word; when true, host order is used. The
/// byte-order flag carried in the WAL magic decides which variant applies,
/// so a WAL written on one host can be validated on a host of the other
/// endianness.
///
/// `seed` is the checksum of everything already covered by the chain, or
/// `None` to start from zero.
///
/// # Panics
///
/// `data.len()` must be a positive multiple of 8 and no larger than the
/// maximum frame size. Violations are contract errors in the caller, not
/// recoverable conditions.
#[must_use]
pub fn checksum_bytes(native: bool, data: &[u8], seed: Option<(u32, u32)>) -> (u32, u32) {
    assert!(
        !data.is_empty() && data.len() % 8 == 0,
        "checksum length must be a positive multiple of 8, got {}",
        data.len()
    );
    assert!(
        data.len() <= MAX_CHECKSUM_BYTES,
        "checksum length {} exceeds maximum frame size",
        data.len()
    );

    let (mut s1, mut s2) = seed.unwrap_or((0, 0));

    for pair in data.chunks_exact(8) {
        let (w0, w1) = if native {
            (
                u32::from_ne_bytes([pair[0], pair[1], pair[2], pair[3]]),
                u32::from_ne_bytes([pair[4], pair[5], pair[6], pair[7]]),
            )
        } else {
            (
                u32::from_be_bytes([pair[0], pair[1], pair[2], pair[3]]),
                u32::from_be_bytes([pair[4], pair[5], pair[6], pair[7]]),
            )
        };
        s1 = s1.wrapping_add(w0).wrapping_add(s2);
        s2 = s2.wrapping_add(w1).wrapping_add(s1);
    }

    (s1, s2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zeroes_checksum_to_zero() {
        assert_eq!(checksum_bytes(true, &[0u8; 8], None), (0, 0));
        assert_eq!(checksum_bytes(false, &[0u8; 16], None), (0, 0));
    }

    #[test]
    fn native_known_value() {
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&1u32.to_ne_bytes());
        data[4..].copy_from_slice(&2u32.to_ne_bytes());

        // s1 = 0 + 1 + 0 = 1; s2 = 0 + 2 + 1 = 3
        assert_eq!(checksum_bytes(true, &data, None), (1, 3));
    }

    #[test]
    fn big_endian_known_value() {
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&1u32.to_be_bytes());
        data[4..].copy_from_slice(&2u32.to_be_bytes());

        assert_eq!(checksum_bytes(false, &data, None), (1, 3));
    }

    #[test]
    fn chained_blocks_known_value() {
        let mut data = [0u8; 16];
        data[..4].copy_from_slice(&1u32.to_ne_bytes());
        data[4..8].copy_from_slice(&2u32.to_ne_bytes());
        data[8..12].copy_from_slice(&3u32.to_ne_bytes());
        data[12..].copy_from_slice(&4u32.to_ne_bytes());

        // After the first pair: (1, 3). Then s1 = 1 + 3 + 3 = 7,
        // s2 = 3 + 4 + 7 = 14.
        assert_eq!(checksum_bytes(true, &data, None), (7, 14));
    }

    #[test]
    fn seed_matters() {
        let data = [0xABu8; 8];
        let a = checksum_bytes(true, &data, None);
        let b = checksum_bytes(true, &data, Some((1, 1)));
        assert_ne!(a, b);
    }

    #[test]
    fn word_order_matters() {
        let mut forward = [0u8; 8];
        forward[..4].copy_from_slice(&1u32.to_ne_bytes());
        forward[4..].copy_from_slice(&2u32.to_ne_bytes());

        let mut swapped = [0u8; 8];
        swapped[..4].copy_from_slice(&2u32.to_ne_bytes());
        swapped[4..].copy_from_slice(&1u32.to_ne_bytes());

        assert_ne!(
            checksum_bytes(true, &forward, None),
            checksum_bytes(true, &swapped, None)
        );
    }

    #[test]
    #[should_panic(expected = "positive multiple of 8")]
    fn rejects_unaligned_length() {
        let _ = checksum_bytes(true, &[0u8; 7], None);
    }

    #[test]
    #[should_panic(expected = "positive multiple of 8")]
    fn rejects_empty_input() {
        let _ = checksum_bytes(true, &[], None);
    }

    proptest! {
        /// Checksumming A‖B equals checksumming B seeded with the checksum
        /// of A, for any split at an 8-byte boundary.
        #[test]
        fn chaining_splits(data in proptest::collection::vec(any::<u8>(), 8..512), native: bool) {
            let len = data.len() / 8 * 8;
            let data = &data[..len];
            let whole = checksum_bytes(native, data, None);
            for split in (8..len).step_by(8) {
                let head = checksum_bytes(native, &data[..split], None);
                let chained = checksum_bytes(native, &data[split..], Some(head));
                prop_assert_eq!(whole, chained);
            }
        }
    }
}
