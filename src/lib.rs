//! Incremental tar decoding with transparent ustar, PAX and GNU extension handling.
//!
//! This crate turns a tar byte stream into a sequence of [`Entry`] values,
//! one per archived object, without buffering the archive or any single file
//! body in memory. Each entry carries its fully resolved [`Header`] and, when
//! the header declares a non-zero size, a [`Body`] stream of exactly that many
//! bytes.
//!
//! # Pipeline
//!
//! Decoding happens in four stages:
//!
//! 1. [`chunker`] regroups arbitrarily fragmented input into 512-byte blocks.
//! 2. [`parser`] interprets blocks as headers or body data, frames each body
//!    and detects the end-of-archive marker.
//! 3. [`pax`] decodes the `"<len> <key>=<value>\n"` records inside PAX
//!    extended headers.
//! 4. [`resolver`] folds PAX and GNU metadata entries into override state and
//!    rewrites the header of each following real entry.
//!
//! [`extract`] wires these together. Stages 1 and 2 run on a spawned tokio
//! task; stage 4 runs inside [`Extract::next_entry`].
//!
//! # Header Field Layout
//!
//! | Offset | Size | Field     | Encoding                        |
//! |--------|------|-----------|---------------------------------|
//! | 0      | 100  | name      | text, nul-terminated if shorter |
//! | 100    | 8    | mode      | octal ASCII                     |
//! | 108    | 8    | uid       | octal ASCII                     |
//! | 116    | 8    | gid       | octal ASCII                     |
//! | 124    | 12   | size      | octal ASCII                     |
//! | 136    | 12   | mtime     | octal ASCII                     |
//! | 148    | 8    | checksum  | not verified                    |
//! | 156    | 1    | typeflag  | see [`EntryType`]               |
//! | 157    | 100  | linkname  | text                            |
//! | 257    | 6    | magic     | `"ustar\0"` or GNU `"ustar "`   |
//! | 263    | 2    | version   | raw                             |
//! | 265    | 32   | uname     | text                            |
//! | 297    | 32   | gname     | text                            |
//! | 329    | 8    | devmajor  | octal ASCII                     |
//! | 337    | 8    | devminor  | octal ASCII                     |
//! | 345    | 155  | prefix    | text (POSIX ustar only)         |
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> streaming_tar::Result<()> {
//! let file = tokio::fs::File::open("archive.tar").await?;
//! let mut entries = streaming_tar::extract(file);
//!
//! while let Some(mut entry) = entries.next_entry().await? {
//!     println!("{} ({} bytes)", entry.path(), entry.size());
//!     // The body must be read or discarded before asking for the next entry.
//!     entry.discard().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunker;
pub mod entry;
pub mod error;
pub mod extract;
pub mod limits;
pub mod pax;
pub mod parser;
pub mod resolver;

use std::collections::BTreeMap;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub use chunker::{Block, BlockChunker, BlockReader};
pub use entry::{Body, Entry};
pub use error::{ExtractError, Result};
pub use extract::{extract, Extract};
pub use limits::Limits;
pub use pax::{PaxParser, PaxRecord};
pub use parser::{EntryParser, Step};
pub use resolver::ExtensionResolver;

/// Size of a tar block in bytes. Headers and body padding are aligned to it.
pub const BLOCK_SIZE: usize = 512;

/// Magic string of POSIX ustar headers ("ustar\0").
pub const USTAR_MAGIC: &[u8; 6] = b"ustar\0";

/// Magic value shared by the ustar family once decoded as text.
const USTAR_FAMILY_MAGIC: &str = "ustar";

// ============================================================================
// Raw Header
// ============================================================================

/// The 512-byte header block, split into its ustar fields.
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct RawHeader {
    name: [u8; 100],
    mode: [u8; 8],
    uid: [u8; 8],
    gid: [u8; 8],
    size: [u8; 12],
    mtime: [u8; 12],
    checksum: [u8; 8],
    typeflag: [u8; 1],
    linkname: [u8; 100],
    magic: [u8; 6],
    version: [u8; 2],
    uname: [u8; 32],
    gname: [u8; 32],
    dev_major: [u8; 8],
    dev_minor: [u8; 8],
    prefix: [u8; 155],
    _pad: [u8; 12],
}

// ============================================================================
// Entry Type
// ============================================================================

/// Tar entry type indicating the kind of object, or the kind of metadata
/// carried by an extension entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Regular file (type '0', or nul for old tar compatibility).
    #[default]
    Regular,
    /// Hard link to another entry in the archive (type '1').
    Link,
    /// Symbolic link (type '2').
    Symlink,
    /// Character device (type '3').
    Char,
    /// Block device (type '4').
    Block,
    /// Directory (type '5').
    Directory,
    /// FIFO/named pipe (type '6').
    Fifo,
    /// Contiguous file (type '7').
    Continuous,
    /// PAX global extended header (type 'g').
    XGlobalHeader,
    /// PAX extended header for the next entry (type 'x').
    XHeader,
    /// GNU long link name for the next entry (type 'K').
    GnuLongLink,
    /// GNU long name for the next entry (type 'L').
    GnuLongName,
    /// Any other type byte.
    Other(u8),
}

impl EntryType {
    /// Parse an entry type from the raw typeflag byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'0' | b'\0' => EntryType::Regular,
            b'1' => EntryType::Link,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::Char,
            b'4' => EntryType::Block,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            b'7' => EntryType::Continuous,
            b'g' => EntryType::XGlobalHeader,
            b'x' => EntryType::XHeader,
            b'K' => EntryType::GnuLongLink,
            b'L' => EntryType::GnuLongName,
            other => EntryType::Other(other),
        }
    }

    /// Convert an entry type to its typeflag byte.
    ///
    /// `Regular` is encoded as '0', not nul.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            EntryType::Regular => b'0',
            EntryType::Link => b'1',
            EntryType::Symlink => b'2',
            EntryType::Char => b'3',
            EntryType::Block => b'4',
            EntryType::Directory => b'5',
            EntryType::Fifo => b'6',
            EntryType::Continuous => b'7',
            EntryType::XGlobalHeader => b'g',
            EntryType::XHeader => b'x',
            EntryType::GnuLongLink => b'K',
            EntryType::GnuLongName => b'L',
            EntryType::Other(b) => b,
        }
    }

    /// Returns true for entries that only carry metadata for other entries.
    #[must_use]
    pub fn is_metadata(self) -> bool {
        matches!(
            self,
            EntryType::XGlobalHeader
                | EntryType::XHeader
                | EntryType::GnuLongLink
                | EntryType::GnuLongName
        )
    }

    /// Returns true if this is a regular file entry.
    #[must_use]
    pub fn is_file(self) -> bool {
        matches!(self, EntryType::Regular | EntryType::Continuous)
    }

    /// Returns true if this is a directory entry.
    #[must_use]
    pub fn is_dir(self) -> bool {
        self == EntryType::Directory
    }

    /// Returns true if this is a symbolic link entry.
    #[must_use]
    pub fn is_symlink(self) -> bool {
        self == EntryType::Symlink
    }

    /// Returns true if this is a hard link entry.
    #[must_use]
    pub fn is_hard_link(self) -> bool {
        self == EntryType::Link
    }
}

impl From<u8> for EntryType {
    fn from(byte: u8) -> Self {
        Self::from_byte(byte)
    }
}

impl From<EntryType> for u8 {
    fn from(entry_type: EntryType) -> Self {
        entry_type.to_byte()
    }
}

// ============================================================================
// Header
// ============================================================================

/// Decoded tar header.
///
/// Produced by the [`EntryParser`] from a raw header block and rewritten by
/// the [`ExtensionResolver`] before the entry reaches the caller. By then
/// `prefix` has always been spliced into `name` and is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// Entry path.
    pub name: String,
    /// Permission bits.
    pub mode: u32,
    /// Owner user ID.
    pub user_id: u64,
    /// Owner group ID.
    pub group_id: u64,
    /// Body length in bytes.
    pub size: u64,
    /// Modification time in seconds since the Unix epoch.
    pub modified_time: u64,
    /// Raw checksum field. Never verified.
    pub checksum: [u8; 8],
    /// Kind of entry.
    pub entry_type: EntryType,
    /// Link target for hard and symbolic links.
    pub link_name: String,
    /// Format marker: `"ustar"` for POSIX, `"ustar "` for GNU, empty for v7.
    pub magic_bytes: String,
    /// Raw version field.
    pub version: [u8; 2],
    /// Owner user name.
    pub user_name: String,
    /// Owner group name.
    pub group_name: String,
    /// Device major number.
    pub device_major: u32,
    /// Device minor number.
    pub device_minor: u32,
    /// ustar path prefix, empty once resolved.
    pub prefix: String,
    /// PAX records with no dedicated header field.
    pub attrs: BTreeMap<String, String>,
}

impl Header {
    /// Decode a header from a raw 512-byte block.
    ///
    /// Numeric fields that fail to parse as octal decode to 0. The checksum
    /// is kept but not verified.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::UnsupportedSize`] if the size field uses the
    /// GNU base-256 encoding.
    pub fn decode(bytes: &[u8; BLOCK_SIZE]) -> Result<Header> {
        let raw: &RawHeader = zerocopy::transmute_ref!(bytes);

        // GNU reuses the prefix bytes for atime/ctime, v7 leaves them undefined
        let prefix = if raw.magic == *USTAR_MAGIC {
            parse_string(&raw.prefix)
        } else {
            String::new()
        };

        Ok(Header {
            name: parse_string(&raw.name),
            mode: parse_octal(&raw.mode) as u32,
            user_id: parse_octal(&raw.uid),
            group_id: parse_octal(&raw.gid),
            size: parse_size(&raw.size)?,
            modified_time: parse_octal(&raw.mtime),
            checksum: raw.checksum,
            entry_type: EntryType::from_byte(raw.typeflag[0]),
            link_name: parse_string(&raw.linkname),
            magic_bytes: parse_string(&raw.magic),
            version: raw.version,
            user_name: parse_string(&raw.uname),
            group_name: parse_string(&raw.gname),
            device_major: parse_octal(&raw.dev_major) as u32,
            device_minor: parse_octal(&raw.dev_minor) as u32,
            prefix,
            attrs: BTreeMap::new(),
        })
    }

    /// Check whether the header belongs to the ustar family (POSIX or GNU).
    ///
    /// Only these headers take part in PAX and GNU extension handling.
    #[must_use]
    pub fn is_ustar_family(&self) -> bool {
        self.magic_bytes.trim_end_matches(' ') == USTAR_FAMILY_MAGIC
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse an octal ASCII field into a u64.
///
/// Leading whitespace is skipped and parsing stops at the first byte that is
/// not an octal digit, so `"0000644\0"` is 420 and `"  17 "` is 15. Fields
/// without leading digits, or whose value overflows, decode to 0.
#[must_use]
pub fn parse_octal(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| (b'0'..=b'7').contains(*b))
        .try_fold(0u64, |acc, &b| {
            acc.checked_mul(8)?.checked_add(u64::from(b - b'0'))
        })
        .unwrap_or(0)
}

/// Parse the size field, rejecting the GNU base-256 encoding.
///
/// GNU tar marks sizes over 8 GiB by setting the high bit of the first byte
/// and storing the rest as a big-endian integer. That form is not supported.
///
/// # Errors
///
/// Returns [`ExtractError::UnsupportedSize`] when the high bit is set.
pub fn parse_size(bytes: &[u8]) -> Result<u64> {
    match bytes.first() {
        Some(first) if first & 0x80 != 0 => Err(ExtractError::UnsupportedSize),
        _ => Ok(parse_octal(bytes)),
    }
}

/// Truncate a byte slice at the first null byte.
///
/// If no null byte is found, returns the entire slice.
///
/// # Example
///
/// ```
/// use streaming_tar::truncate_null;
///
/// assert_eq!(truncate_null(b"hello\0world"), b"hello");
/// assert_eq!(truncate_null(b"no null here"), b"no null here");
/// assert_eq!(truncate_null(b"\0empty"), b"");
/// ```
#[must_use]
pub fn truncate_null(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(pos) => &bytes[..pos],
        None => bytes,
    }
}

/// Decode a nul-terminated or nul-padded text field.
fn parse_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(truncate_null(bytes)).into_owned()
}

// ============================================================================
// PAX Keys
// ============================================================================

/// PAX extended header key for the file path.
pub const PAX_PATH: &str = "path";
/// PAX extended header key for the link target path.
pub const PAX_LINKPATH: &str = "linkpath";
/// PAX extended header key for file size.
pub const PAX_SIZE: &str = "size";
/// PAX extended header key for owner user ID.
pub const PAX_UID: &str = "uid";
/// PAX extended header key for owner group ID.
pub const PAX_GID: &str = "gid";
/// PAX extended header key for owner user name.
pub const PAX_UNAME: &str = "uname";
/// PAX extended header key for owner group name.
pub const PAX_GNAME: &str = "gname";
/// PAX extended header key for modification time.
pub const PAX_MTIME: &str = "mtime";
