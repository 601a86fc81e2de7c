//! Resource bounds for decoding untrusted archives.

/// Size of the nul that GNU tar appends to, and counts in, a long name body.
const GNU_LONG_NUL: u64 = 1;

/// Resource bounds applied while decoding.
///
/// Extension metadata (PAX headers, GNU long names) is the only archive
/// content held in memory whole, so its size is capped here. Entry bodies
/// are streamed; `body_channel_capacity` caps how many of their chunks may
/// wait for a slow consumer.
///
/// ```
/// use streaming_tar::Limits;
///
/// // Hand body chunks over one at a time, keep the other defaults.
/// let limits = Limits {
///     body_channel_capacity: 1,
///     ..Limits::default()
/// };
/// assert_eq!(limits.max_path_len, 4096);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Longest resolved entry name or link target, in bytes.
    ///
    /// Checked after PAX, GNU and prefix handling. Default: 4096.
    pub max_path_len: usize,

    /// Largest PAX extended header body, global or per-entry. Default: 1 MiB.
    pub max_pax_size: u64,

    /// Largest GNU long name or long link body.
    ///
    /// The body carries a trailing nul, so the default of 4097 admits a
    /// path of `max_path_len` bytes.
    pub max_gnu_long_size: u64,

    /// Most per-entry metadata entries ('x', 'L', 'K') allowed in a row
    /// before a real entry. Default: 16.
    pub max_pending_entries: usize,

    /// Body chunks (one block each at most) queued ahead of the consumer.
    ///
    /// Zero behaves as one. Default: 4.
    pub body_channel_capacity: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self::bounded(4096, 1024 * 1024, 16, 4)
    }
}

impl Limits {
    /// Default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// No bounds on metadata, and a deep body queue.
    ///
    /// Metadata is buffered whole, so only use this on trusted input.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            max_path_len: usize::MAX,
            max_pax_size: u64::MAX,
            max_gnu_long_size: u64::MAX,
            max_pending_entries: usize::MAX,
            body_channel_capacity: 64,
        }
    }

    /// Tight bounds for hostile input, with one body chunk in flight.
    #[must_use]
    pub fn strict() -> Self {
        Self::bounded(1024, 64 * 1024, 8, 1)
    }

    fn bounded(
        max_path_len: usize,
        max_pax_size: u64,
        max_pending_entries: usize,
        body_channel_capacity: usize,
    ) -> Self {
        Self {
            max_path_len,
            max_pax_size,
            max_gnu_long_size: max_path_len as u64 + GNU_LONG_NUL,
            max_pending_entries,
            body_channel_capacity,
        }
    }

    pub(crate) fn channel_capacity(&self) -> usize {
        self.body_channel_capacity.max(1)
    }
}
