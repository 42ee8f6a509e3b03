//! Error types for format operations.

use thiserror::Error;

/// Result type for format operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// Errors that can occur while decoding or encoding on-disk structures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// The supplied buffer is smaller than the structure being accessed.
    #[error("buffer too short: expected at least {expected} bytes, got {actual}")]
    ShortBuffer {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes supplied.
        actual: usize,
    },

    /// The WAL magic value is not the expected base value.
    #[error("invalid WAL magic: 0x{found:08x}")]
    InvalidMagic {
        /// The 32-bit value found at the start of the WAL header.
        found: u32,
    },
}

impl FormatError {
    /// Creates a short-buffer error.
    #[must_use]
    pub const fn short_buffer(expected: usize, actual: usize) -> Self {
        Self::ShortBuffer { expected, actual }
    }
}
