use thiserror::Error;

/// Defects in the binary atom container detected by the codec.
///
/// Each variant corresponds to one of the independent decode checks; a
/// truncated buffer can look CRC-valid, so none of them subsumes another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Input shorter than header plus footer.
    #[error("buffer too small: {len} bytes (minimum {min})")]
    Undersized {
        /// Actual buffer length.
        len: usize,
        /// Minimum decodable length.
        min: usize,
    },
    /// Leading magic bytes are not `ATOM`.
    #[error("invalid magic bytes: {found:?}")]
    BadMagic {
        /// The four bytes found at offset 0.
        found: [u8; 4],
    },
    /// Declared total size disagrees with the actual input length.
    #[error("size mismatch: {actual} != {expected}")]
    SizeMismatch {
        /// Actual input length.
        actual: usize,
        /// Header-declared total length.
        expected: usize,
    },
    /// Trailing CRC32 does not match the recomputed checksum.
    #[error("crc32 mismatch: stored {stored:08x} != computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the footer.
        stored: u32,
        /// Checksum recomputed over header and body.
        computed: u32,
    },
}

/// Errors emitted by the memory substrate.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Filesystem I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed or corrupt binary container.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// Metadata or knowlet document (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A policy-protected operation was attempted without authority:
    /// Immortal delete/clear, or privileged promotion without a reviewer.
    #[error("permission violation: {0}")]
    PermissionViolation(String),
    /// A construction-time invariant was violated; the invalid value never
    /// comes into existence.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
}
