//! Error types for tar stream decoding.

use thiserror::Error;

/// Errors that can occur while decoding a tar stream.
///
/// Every variant is fatal to the decode: the entry sequence ends at the
/// offending block, and entries delivered before it stay valid.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// I/O error from the underlying reader.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The size field uses the GNU base-256 encoding for files over 8 GiB.
    #[error("file size uses the unsupported GNU base-256 encoding")]
    UnsupportedSize,

    /// A PAX record length prefix is not a decimal number.
    #[error("could not parse PAX extended header length from {0:?}")]
    InvalidPaxLength(String),

    /// A PAX record length does not match the record's contents.
    #[error("malformed PAX extended header record")]
    MalformedPaxRecord,

    /// Resolved path or link target exceeds the configured maximum length.
    #[error("path exceeds limit: {len} bytes > {limit} bytes")]
    PathTooLong {
        /// Actual path length.
        len: usize,
        /// Configured limit.
        limit: usize,
    },

    /// PAX extended header exceeds the configured maximum size.
    #[error("PAX header exceeds limit: {size} bytes > {limit} bytes")]
    PaxTooLarge {
        /// Actual PAX header size.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// GNU long name/link exceeds the configured maximum size.
    #[error("GNU long name/link exceeds limit: {size} bytes > {limit} bytes")]
    GnuLongTooLarge {
        /// Actual GNU long name/link size.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// Too many consecutive metadata entries without an actual entry.
    #[error("too many pending metadata entries: {count} > {limit}")]
    TooManyPendingEntries {
        /// Number of pending metadata entries.
        count: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The decoder task panicked or was cancelled.
    #[error("decoder task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for tar stream decoding.
pub type Result<T> = std::result::Result<T, ExtractError>;
