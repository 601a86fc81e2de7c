//! Pipeline assembly: from an async reader to a sequence of resolved entries.
//!
//! The block reader and entry parser run on a spawned tokio task. Raw entries
//! are handed over through a single-slot channel; each body gets its own
//! bounded channel of chunks, so the task never reads further ahead than the
//! consumer allows. Extension metadata is resolved on the caller's side in
//! [`Extract::next_entry`].

use bytes::Bytes;
use log::{debug, trace};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chunker::BlockReader;
use crate::entry::{Body, Entry};
use crate::error::Result;
use crate::limits::Limits;
use crate::parser::{EntryParser, Step};
use crate::resolver::ExtensionResolver;

/// Decode a tar stream with default [`Limits`].
///
/// Must be called within a tokio runtime.
pub fn extract<R>(reader: R) -> Extract
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Extract::with_defaults(reader)
}

/// Handle to a running decode.
///
/// Dropping it stops the decoder task.
#[derive(Debug)]
pub struct Extract {
    entries: mpsc::Receiver<Result<Entry>>,
    resolver: ExtensionResolver,
    task: Option<JoinHandle<()>>,
    done: bool,
}

impl Extract {
    /// Start decoding `reader` on the current tokio runtime.
    pub fn new<R>(reader: R, limits: Limits) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let capacity = limits.channel_capacity();
        let task = tokio::spawn(decode(reader, capacity, tx));

        Self {
            entries: rx,
            resolver: ExtensionResolver::new(limits),
            task: Some(task),
            done: false,
        }
    }

    /// Start decoding `reader` with default [`Limits`].
    pub fn with_defaults<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::new(reader, Limits::default())
    }

    /// Get the next entry of the archive.
    ///
    /// Returns `Ok(None)` at the end of the archive. After an error has been
    /// returned, every later call returns `Ok(None)` as well.
    ///
    /// The body of the previous entry must have been read, discarded or
    /// dropped first: the decoder does not look past a body until it has
    /// been consumed, so holding one unread here waits forever.
    ///
    /// # Errors
    ///
    /// Fails on read errors, undecodable headers, malformed PAX data, limit
    /// violations, and if the decoder task panicked.
    pub async fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.done {
            return Ok(None);
        }

        while let Some(entry) = self.entries.recv().await {
            let resolved = match entry {
                Ok(entry) => self.resolver.resolve(entry).await,
                Err(e) => Err(e),
            };
            match resolved {
                Ok(Some(entry)) => {
                    trace!("entry {:?} ({:?})", entry.path(), entry.entry_type());
                    return Ok(Some(entry));
                }
                Ok(None) => {}
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            }
        }

        self.done = true;
        self.resolver.finish();
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(None)
    }

    fn stop(&mut self) {
        self.done = true;
        self.entries.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Extract {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Decoder task body: report the first error to the consumer.
async fn decode<R>(reader: R, capacity: usize, entries: mpsc::Sender<Result<Entry>>)
where
    R: AsyncRead + Unpin,
{
    if let Err(e) = drive(reader, capacity, &entries).await {
        debug!("decoding stopped: {e}");
        let _ = entries.send(Err(e)).await;
    }
}

async fn drive<R>(
    reader: R,
    capacity: usize,
    entries: &mpsc::Sender<Result<Entry>>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut blocks = BlockReader::new(reader);
    let mut parser = EntryParser::new();
    let mut body: Option<mpsc::Sender<Bytes>> = None;

    while let Some(block) = blocks.next_block().await? {
        match parser.push(&block)? {
            Step::Skip => {}
            Step::Entry(header) => {
                if entries.send(Ok(Entry::new(header, None))).await.is_err() {
                    return Ok(());
                }
            }
            Step::EntryWithBody(header) => {
                let (tx, rx) = mpsc::channel(capacity);
                let entry = Entry::new(header, Some(Body::new(rx)));
                if entries.send(Ok(entry)).await.is_err() {
                    return Ok(());
                }
                body = Some(tx);
            }
            Step::Body { chunk, end } => {
                if let Some(tx) = &body {
                    if tx.send(chunk).await.is_err() {
                        debug!("body dropped by the consumer, discarding the rest");
                        body = None;
                    }
                }
                if end {
                    body = None;
                }
            }
            Step::End => return Ok(()),
        }
    }

    if parser.in_body() {
        debug!("input ended inside an entry body");
    } else if !parser.is_terminated() {
        debug!("input ended without an end-of-archive marker");
    }
    Ok(())
}
