//! Block-level tar entry parser.
//!
//! [`EntryParser`] turns the block sequence into [`Step`]s: header entries,
//! body chunks framed to each entry's declared size, and the end-of-archive
//! marker. It performs no I/O itself; the pipeline in [`crate::extract`]
//! carries out each step.

use bytes::Bytes;
use log::{debug, trace};

use crate::chunker::Block;
use crate::error::Result;
use crate::{Header, BLOCK_SIZE};

/// Outcome of feeding one block to the [`EntryParser`].
#[derive(Debug)]
pub enum Step {
    /// The block carried nothing to deliver: a lone zero block in header
    /// position, or a body block with no bytes left to write.
    Skip,
    /// An entry without a body.
    Entry(Header),
    /// An entry whose body follows in subsequent [`Step::Body`] steps.
    EntryWithBody(Header),
    /// The next piece of the current body, trimmed of padding.
    Body {
        /// Body bytes.
        chunk: Bytes,
        /// Whether this chunk completes the body.
        end: bool,
    },
    /// Two consecutive zero blocks in header position: the archive is over.
    End,
}

/// Size bookkeeping for the body being streamed.
#[derive(Debug, Clone, Copy)]
struct BodyProgress {
    size: u64,
    written: u64,
}

/// Two-mode state machine over tar blocks.
///
/// While no body is in progress every block is a header slot. Once a header
/// with a non-zero size is decoded, blocks are body data until `size` bytes
/// have been produced.
#[derive(Debug, Default)]
pub struct EntryParser {
    body: Option<BodyProgress>,
    last_header_was_empty: bool,
    terminated: bool,
    blocks: u64,
}

impl EntryParser {
    /// Create a parser awaiting the first header.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the end-of-archive marker has been seen.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Whether a body is currently being streamed.
    #[must_use]
    pub fn in_body(&self) -> bool {
        self.body.is_some()
    }

    /// Feed the next block.
    ///
    /// Once [`Step::End`] has been returned, every further block yields
    /// [`Step::End`] as well.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::UnsupportedSize`](crate::ExtractError::UnsupportedSize)
    /// for a header whose size uses the GNU base-256 encoding.
    pub fn push(&mut self, block: &Block) -> Result<Step> {
        if self.terminated {
            return Ok(Step::End);
        }
        self.blocks += 1;

        match self.body {
            Some(progress) => Ok(self.push_body(progress, block)),
            None => self.push_header(block),
        }
    }

    fn push_header(&mut self, block: &Block) -> Result<Step> {
        if block.is_empty() {
            if self.last_header_was_empty {
                debug!("end of archive after {} blocks", self.blocks);
                self.terminated = true;
                return Ok(Step::End);
            }
            self.last_header_was_empty = true;
            return Ok(Step::Skip);
        }
        self.last_header_was_empty = false;

        let header = Header::decode(block.data())?;
        trace!(
            "header {:?} type {:?} size {}",
            header.name,
            header.entry_type,
            header.size
        );

        if header.size == 0 {
            return Ok(Step::Entry(header));
        }

        self.body = Some(BodyProgress {
            size: header.size,
            written: 0,
        });
        Ok(Step::EntryWithBody(header))
    }

    fn push_body(&mut self, mut progress: BodyProgress, block: &Block) -> Step {
        let bytes_left = progress.size.saturating_sub(progress.written);
        let len = bytes_left.min(BLOCK_SIZE as u64) as usize;
        progress.written += len as u64;

        let end = progress.written >= progress.size;
        if end {
            self.body = None;
            self.last_header_was_empty = false;
        } else {
            self.body = Some(progress);
        }

        if len == 0 {
            return Step::Skip;
        }
        Step::Body {
            chunk: Bytes::copy_from_slice(&block.data()[..len]),
            end,
        }
    }
}
