//! Decoded tar entries and their body streams.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::{EntryType, Header};

/// Byte stream of one entry's body.
///
/// Chunks arrive from the decoder through a bounded channel, so the decoder
/// only advances as the body is consumed. Dropping the body discards the
/// bytes not read yet.
#[derive(Debug)]
pub struct Body {
    rx: mpsc::Receiver<Bytes>,
    /// Part of a chunk not yet handed out by `poll_read`.
    pending: Bytes,
}

impl Body {
    pub(crate) fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            pending: Bytes::new(),
        }
    }

    /// Receive the next chunk of the body.
    ///
    /// Returns `None` once the body is exhausted.
    pub async fn chunk(&mut self) -> Option<Bytes> {
        if !self.pending.is_empty() {
            return Some(std::mem::take(&mut self.pending));
        }
        self.rx.recv().await
    }

    /// Read the rest of the body into memory.
    pub async fn to_vec(&mut self) -> Vec<u8> {
        let mut data = Vec::new();
        while let Some(chunk) = self.chunk().await {
            data.extend_from_slice(&chunk);
        }
        data
    }

    /// Read the rest of the body as UTF-8 text, replacing invalid sequences.
    pub async fn text(&mut self) -> String {
        let data = self.to_vec().await;
        String::from_utf8_lossy(&data).into_owned()
    }

    /// Drain the rest of the body without keeping it.
    pub async fn discard(&mut self) {
        self.pending.clear();
        while self.rx.recv().await.is_some() {}
    }
}

impl AsyncRead for Body {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        while self.pending.is_empty() {
            match ready!(self.rx.poll_recv(cx)) {
                Some(chunk) => self.pending = chunk,
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = self.pending.len().min(buf.remaining());
        buf.put_slice(&self.pending[..n]);
        self.pending.advance(n);
        Poll::Ready(Ok(()))
    }
}

/// One archived object: its resolved header and, if it has content, a body.
///
/// The body must be read to the end, discarded, or dropped before the next
/// entry can be decoded.
#[derive(Debug)]
pub struct Entry {
    header: Header,
    body: Option<Body>,
}

impl Entry {
    pub(crate) fn new(header: Header, body: Option<Body>) -> Self {
        Self { header, body }
    }

    /// The entry's header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Whether the entry carries a body stream.
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// The body stream, for incremental reads.
    pub fn body_mut(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    /// Split the entry into its header and body.
    #[must_use]
    pub fn into_parts(self) -> (Header, Option<Body>) {
        (self.header, self.body)
    }

    /// The resolved entry path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.header.name
    }

    /// The link target, if any.
    #[must_use]
    pub fn link_name(&self) -> Option<&str> {
        Some(self.header.link_name.as_str()).filter(|l| !l.is_empty())
    }

    /// Declared body size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.header.size
    }

    /// The entry type.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        self.header.entry_type
    }

    /// Check if this is a regular file entry.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.header.entry_type.is_file()
    }

    /// Check if this is a directory entry.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.header.entry_type.is_dir()
    }

    /// Check if this is a symbolic link entry.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.header.entry_type.is_symlink()
    }

    /// Check if this is a hard link entry.
    #[must_use]
    pub fn is_hard_link(&self) -> bool {
        self.header.entry_type.is_hard_link()
    }

    /// Read the whole body as UTF-8 text.
    ///
    /// Returns `None` if the entry has no body. Once the body has been
    /// consumed, later calls return an empty string.
    pub async fn text(&mut self) -> Option<String> {
        match self.body.as_mut() {
            Some(body) => Some(body.text().await),
            None => None,
        }
    }

    /// Read the whole body into memory.
    ///
    /// Returns `None` if the entry has no body.
    pub async fn bytes(&mut self) -> Option<Vec<u8>> {
        match self.body.as_mut() {
            Some(body) => Some(body.to_vec().await),
            None => None,
        }
    }

    /// Drain the body without keeping it. Does nothing without a body.
    pub async fn discard(&mut self) {
        if let Some(body) = self.body.as_mut() {
            body.discard().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn entry_with_chunks(chunks: &[&[u8]]) -> Entry {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.try_send(Bytes::copy_from_slice(chunk)).unwrap();
        }
        let size = chunks.iter().map(|c| c.len() as u64).sum();
        let header = Header {
            name: "file.txt".to_string(),
            size,
            ..Default::default()
        };
        Entry::new(header, Some(Body::new(rx)))
    }

    #[tokio::test]
    async fn test_text() {
        let mut entry = entry_with_chunks(&[b"hello ", b"world"]);
        assert!(entry.has_body());
        assert_eq!(entry.text().await.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn test_text_joins_split_characters() {
        let snowman = "\u{2603}".as_bytes();
        let mut entry = entry_with_chunks(&[&snowman[..1], &snowman[1..]]);
        assert_eq!(entry.text().await.as_deref(), Some("\u{2603}"));
    }

    #[tokio::test]
    async fn test_no_body() {
        let mut entry = Entry::new(Header::default(), None);
        assert!(!entry.has_body());
        assert_eq!(entry.text().await, None);
        assert_eq!(entry.bytes().await, None);
        entry.discard().await;
        entry.discard().await;
    }

    #[tokio::test]
    async fn test_discard_after_read_is_noop() {
        let mut entry = entry_with_chunks(&[b"abc"]);
        assert_eq!(entry.bytes().await, Some(b"abc".to_vec()));
        entry.discard().await;
        entry.discard().await;
        assert_eq!(entry.text().await.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_async_read() {
        let mut entry = entry_with_chunks(&[b"0123456789", b"abcdef"]);
        let body = entry.body_mut().unwrap();

        let mut small = [0u8; 4];
        body.read_exact(&mut small).await.unwrap();
        assert_eq!(&small, b"0123");

        // the remainder of the first chunk is served before the next one
        let mut rest = Vec::new();
        body.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"456789abcdef".to_vec());
    }

    #[tokio::test]
    async fn test_chunk_returns_pending_first() {
        let mut entry = entry_with_chunks(&[b"0123456789", b"xyz"]);
        let body = entry.body_mut().unwrap();

        let mut two = [0u8; 2];
        body.read_exact(&mut two).await.unwrap();
        assert_eq!(body.chunk().await.as_deref(), Some(&b"23456789"[..]));
        assert_eq!(body.chunk().await.as_deref(), Some(&b"xyz"[..]));
        assert_eq!(body.chunk().await, None);
    }

    #[test]
    fn test_accessors() {
        let header = Header {
            name: "link".to_string(),
            link_name: "target".to_string(),
            entry_type: EntryType::Symlink,
            ..Default::default()
        };
        let entry = Entry::new(header, None);
        assert_eq!(entry.path(), "link");
        assert_eq!(entry.link_name(), Some("target"));
        assert!(entry.is_symlink());
        assert!(!entry.is_file());
        assert_eq!(entry.size(), 0);

        let (header, body) = entry.into_parts();
        assert_eq!(header.entry_type, EntryType::Symlink);
        assert!(body.is_none());
    }
}
