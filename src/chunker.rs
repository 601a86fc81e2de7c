//! Regrouping of a fragmented byte stream into 512-byte tar blocks.

use std::collections::VecDeque;
use std::io::ErrorKind;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::BLOCK_SIZE;

/// Size of each read issued against the source.
const READ_SIZE: usize = 8192;

/// One 512-byte tar block.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    data: [u8; BLOCK_SIZE],
    is_empty: bool,
}

impl Block {
    /// Build a block from raw bytes, computing the all-zero flag.
    #[must_use]
    pub fn new(data: [u8; BLOCK_SIZE]) -> Self {
        let is_empty = data.iter().all(|&b| b == 0);
        Self { data, is_empty }
    }

    /// Raw block bytes.
    #[must_use]
    pub fn data(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    /// Whether every byte of the block is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("is_empty", &self.is_empty)
            .finish_non_exhaustive()
    }
}

/// Accumulates bytes of arbitrary fragmentation into whole blocks.
///
/// A partially filled block is held until enough bytes arrive to complete it
/// and is never emitted on its own.
#[derive(Debug)]
pub struct BlockChunker {
    buffer: [u8; BLOCK_SIZE],
    filled: usize,
    is_empty: bool,
}

impl Default for BlockChunker {
    fn default() -> Self {
        Self {
            buffer: [0u8; BLOCK_SIZE],
            filled: 0,
            is_empty: true,
        }
    }
}

impl BlockChunker {
    /// Create an empty chunker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes held for the next, not yet complete, block.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.filled
    }

    /// Feed `input` and iterate over the blocks it completes.
    ///
    /// Blocks are produced lazily. Input the iterator has not reached when
    /// it is dropped is not consumed.
    #[must_use = "blocks are only produced while the iterator is driven"]
    pub fn chunk<'a>(&'a mut self, input: &'a [u8]) -> Blocks<'a> {
        Blocks {
            chunker: self,
            input,
        }
    }

    /// Copy as much of `input` as fits into the current block.
    ///
    /// Returns the number of bytes taken and the block if it was completed.
    fn fill(&mut self, input: &[u8]) -> (usize, Option<Block>) {
        let take = input.len().min(BLOCK_SIZE - self.filled);
        let bytes = &input[..take];
        self.is_empty = self.is_empty && bytes.iter().all(|&b| b == 0);
        self.buffer[self.filled..self.filled + take].copy_from_slice(bytes);
        self.filled += take;

        if self.filled < BLOCK_SIZE {
            return (take, None);
        }

        let block = Block {
            data: self.buffer,
            is_empty: self.is_empty,
        };
        self.buffer = [0u8; BLOCK_SIZE];
        self.filled = 0;
        self.is_empty = true;
        (take, Some(block))
    }
}

/// Iterator over the blocks completed by one input slice.
///
/// Returned by [`BlockChunker::chunk`].
#[derive(Debug)]
pub struct Blocks<'a> {
    chunker: &'a mut BlockChunker,
    input: &'a [u8],
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        while !self.input.is_empty() {
            let (taken, block) = self.chunker.fill(self.input);
            self.input = &self.input[taken..];
            if block.is_some() {
                return block;
            }
        }
        None
    }
}

/// Pulls blocks from an async reader on demand.
///
/// The source is only read when every block chunked so far has been handed
/// out, so at most one read's worth of input is held at a time.
#[derive(Debug)]
pub struct BlockReader<R> {
    reader: R,
    chunker: BlockChunker,
    ready: VecDeque<Block>,
    buf: Box<[u8]>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> BlockReader<R> {
    /// Wrap an async reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            chunker: BlockChunker::new(),
            ready: VecDeque::new(),
            buf: vec![0u8; READ_SIZE].into_boxed_slice(),
            eof: false,
        }
    }

    /// Get the next complete block.
    ///
    /// Returns `Ok(None)` once the source is exhausted. A trailing partial
    /// block is dropped.
    pub async fn next_block(&mut self) -> std::io::Result<Option<Block>> {
        loop {
            if let Some(block) = self.ready.pop_front() {
                return Ok(Some(block));
            }
            if self.eof {
                return Ok(None);
            }

            let n = match self.reader.read(&mut self.buf).await {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if n == 0 {
                self.eof = true;
                if self.chunker.buffered() > 0 {
                    debug!(
                        "input ended inside a block, dropping {} trailing bytes",
                        self.chunker.buffered()
                    );
                }
                continue;
            }

            self.ready.extend(self.chunker.chunk(&self.buf[..n]));
        }
    }

    /// Consume the block reader and return the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use similar_asserts::assert_eq;

    use super::*;

    fn collect(chunker: &mut BlockChunker, pieces: &[&[u8]]) -> Vec<Block> {
        let mut blocks = Vec::new();
        for piece in pieces {
            blocks.extend(chunker.chunk(piece));
        }
        blocks
    }

    #[test]
    fn test_exact_blocks() {
        let mut data = vec![0u8; 1024];
        data[600] = 1;

        let mut chunker = BlockChunker::new();
        let blocks = collect(&mut chunker, &[&data]);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].is_empty());
        assert!(!blocks[1].is_empty());
        assert_eq!(blocks[1].data()[600 - 512], 1);
        assert_eq!(chunker.buffered(), 0);
    }

    #[test]
    fn test_fragmented_input() {
        let data: Vec<u8> = (0..1536).map(|i| (i % 251) as u8).collect();
        let pieces: Vec<&[u8]> = vec![&data[..1], &data[1..511], &data[511..513], &data[513..]];

        let mut chunker = BlockChunker::new();
        let blocks = collect(&mut chunker, &pieces);
        assert_eq!(blocks.len(), 3);
        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(&block.data()[..], &data[i * 512..(i + 1) * 512]);
        }
    }

    #[test]
    fn test_partial_tail_is_held() {
        let mut chunker = BlockChunker::new();
        let blocks = collect(&mut chunker, &[&[7u8; 700]]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(chunker.buffered(), 188);
    }

    #[test]
    fn test_empty_flag_resets_between_blocks() {
        let mut data = vec![0u8; 1536];
        data[0] = 1;

        let mut chunker = BlockChunker::new();
        let blocks = collect(&mut chunker, &[&data[..100], &data[100..]]);
        let flags: Vec<bool> = blocks.iter().map(Block::is_empty).collect();
        assert_eq!(flags, vec![false, true, true]);
    }

    #[tokio::test]
    async fn test_block_reader_fragmented() {
        let data: Vec<u8> = (0..1100).map(|i| (i % 13) as u8).collect();
        let reader = tokio_test::io::Builder::new()
            .read(&data[..3])
            .read(&data[3..600])
            .read(&data[600..])
            .build();

        let mut blocks = BlockReader::new(reader);
        let first = blocks.next_block().await.unwrap().unwrap();
        assert_eq!(&first.data()[..], &data[..512]);
        let second = blocks.next_block().await.unwrap().unwrap();
        assert_eq!(&second.data()[..], &data[512..1024]);
        // the 76 trailing bytes never form a block
        assert!(blocks.next_block().await.unwrap().is_none());
        assert!(blocks.next_block().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_block_reader_error() {
        let reader = tokio_test::io::Builder::new()
            .read(&[0u8; 512])
            .read_error(std::io::Error::from(ErrorKind::NetworkDown))
            .build();

        let mut blocks = BlockReader::new(reader);
        assert!(blocks.next_block().await.unwrap().unwrap().is_empty());
        assert_eq!(
            blocks.next_block().await.unwrap_err().kind(),
            ErrorKind::NetworkDown
        );
    }

    proptest! {
        #[test]
        fn test_fragmentation_preserves_blocks(
            data in proptest::collection::vec(prop_oneof![Just(0u8), any::<u8>()], 0..4096),
            cuts in proptest::collection::vec(0usize..4096, 0..16),
        ) {
            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c.min(data.len())).collect();
            cuts.push(0);
            cuts.push(data.len());
            cuts.sort_unstable();

            let mut chunker = BlockChunker::new();
            let mut blocks = Vec::new();
            for pair in cuts.windows(2) {
                blocks.extend(chunker.chunk(&data[pair[0]..pair[1]]));
            }

            let whole = data.len() / BLOCK_SIZE;
            prop_assert_eq!(blocks.len(), whole);
            prop_assert_eq!(chunker.buffered(), data.len() % BLOCK_SIZE);
            for (i, block) in blocks.iter().enumerate() {
                let expected = &data[i * BLOCK_SIZE..(i + 1) * BLOCK_SIZE];
                prop_assert_eq!(&block.data()[..], expected);
                prop_assert_eq!(block.is_empty(), expected.iter().all(|&b| b == 0));
            }
        }
    }
}
