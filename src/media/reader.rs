//! Framing reader
//!
//! A `FramingReader` owns one input byte source and turns it into framing
//! units: self-contained pieces of the container format that can be written
//! to any client without breaking the stream. The format-specific work is
//! delegated to a closed set of framers selected by `MediaType`.
//!
//! ```text
//!  socket ──► Source (BufReader + stop token + rate) ──► Framer ──► Bytes unit
//!                                                          │
//!                                                          └──► ReaderShared.header
//! ```
//!
//! State that other tasks read concurrently (header, broken count, rate,
//! peer address) lives in `ReaderShared`.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::stats::RateSample;
use crate::sync::lock;

use super::flv::FlvFramer;
use super::mpegts::MpegtsFramer;
use super::ogg::OggFramer;
use super::MediaType;

/// Largest unit produced by the pass-through framer
pub const TEXT_CHUNK_SIZE: usize = 16384;

/// Result of `FramingReader::poll`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Data (or end-of-stream) can be read without waiting
    Ready,
    /// Nothing arrived within the timeout
    Idle,
}

/// Reader state shared with statistics and the connection registry
#[derive(Debug)]
pub struct ReaderShared {
    media_type: MediaType,
    header: Mutex<Bytes>,
    broken: AtomicU64,
    rate: RateSample,
    peer: Mutex<Option<SocketAddr>>,
}

impl ReaderShared {
    /// Create shared state holding the media type's initial header
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            header: Mutex::new(media_type.initial_header()),
            broken: AtomicU64::new(0),
            rate: RateSample::new(),
            peer: Mutex::new(None),
        }
    }

    /// Media type being framed
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Current header prefix for a joining client
    pub fn header(&self) -> Bytes {
        lock(&self.header).clone()
    }

    pub(crate) fn set_header(&self, header: Bytes) {
        *lock(&self.header) = header;
    }

    pub(crate) fn append_header(&self, data: &[u8]) {
        let mut header = lock(&self.header);
        let mut joined = BytesMut::with_capacity(header.len() + data.len());
        joined.extend_from_slice(&header);
        joined.extend_from_slice(data);
        *header = joined.freeze();
    }

    /// Number of units that did not match the expected format
    pub fn broken_count(&self) -> u64 {
        self.broken.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_broken(&self, count: u64) {
        self.broken.fetch_add(count, Ordering::Relaxed);
    }

    /// Input bytes/second since the previous call
    pub fn rate(&self) -> f64 {
        self.rate.take_rate()
    }

    pub(crate) fn account(&self, bytes: usize) {
        self.rate.add(bytes);
    }

    /// Address of the source, when known
    pub fn peer(&self) -> Option<SocketAddr> {
        *lock(&self.peer)
    }

    pub(crate) fn set_peer(&self, peer: Option<SocketAddr>) {
        *lock(&self.peer) = peer;
    }
}

/// Byte source with stop support and rate accounting
pub(crate) struct Source {
    inner: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    cancel: CancellationToken,
    shared: Arc<ReaderShared>,
}

impl Source {
    fn new(
        inner: Box<dyn AsyncRead + Send + Unpin>,
        cancel: CancellationToken,
        shared: Arc<ReaderShared>,
    ) -> Self {
        Self {
            inner: BufReader::new(inner),
            cancel,
            shared,
        }
    }

    /// Read whatever is available into `buf`. Returns 0 at end-of-stream.
    pub(crate) async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Self { inner, cancel, shared } = self;

        let n = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Stopped),
            res = inner.read(buf) => res?,
        };

        shared.account(n);
        Ok(n)
    }

    /// Fill `buf` unless the stream ends first. Returns the number of bytes read.
    pub(crate) async fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_some(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Fill `buf` exactly.
    ///
    /// Returns `false` when the stream ended before the first byte, and an
    /// `UnexpectedEof` error when it ended part way through.
    pub(crate) async fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        let n = self.read_full(buf).await?;
        if n == 0 {
            Ok(false)
        } else if n < buf.len() {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended after {} of {} bytes", n, buf.len()),
            )
            .into())
        } else {
            Ok(true)
        }
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Readiness> {
        let Self { inner, cancel, .. } = self;

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Stopped),
            res = tokio::time::timeout(timeout, inner.fill_buf()) => match res {
                Err(_) => Ok(Readiness::Idle),
                Ok(Err(e)) => Err(e.into()),
                Ok(Ok(_)) => Ok(Readiness::Ready),
            },
        }
    }

    pub(crate) fn shared(&self) -> &ReaderShared {
        &self.shared
    }
}

enum Framer {
    Flv(FlvFramer),
    Mpegts(MpegtsFramer),
    Theora(OggFramer),
    Text,
}

impl Framer {
    fn for_media(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Flv => Framer::Flv(FlvFramer::new()),
            MediaType::Mpegts => Framer::Mpegts(MpegtsFramer::new()),
            MediaType::Theora => Framer::Theora(OggFramer::new()),
            MediaType::Text => Framer::Text,
        }
    }
}

/// Reads framing units from one input session
pub struct FramingReader {
    source: Source,
    framer: Framer,
    shared: Arc<ReaderShared>,
    cancel: CancellationToken,
}

impl FramingReader {
    /// Create a reader over `source` with fresh shared state
    pub fn new<S>(media_type: MediaType, source: S) -> Self
    where
        S: AsyncRead + Send + Unpin + 'static,
    {
        Self::with_shared(
            source,
            Arc::new(ReaderShared::new(media_type)),
            CancellationToken::new(),
        )
    }

    /// Create a reader that publishes into existing shared state.
    ///
    /// Cancelling `cancel` has the same effect as `stop()`.
    pub fn with_shared<S>(source: S, shared: Arc<ReaderShared>, cancel: CancellationToken) -> Self
    where
        S: AsyncRead + Send + Unpin + 'static,
    {
        let framer = Framer::for_media(shared.media_type());
        Self {
            source: Source::new(Box::new(source), cancel.clone(), Arc::clone(&shared)),
            framer,
            shared,
            cancel,
        }
    }

    /// Media type being framed
    pub fn media_type(&self) -> MediaType {
        self.shared.media_type()
    }

    /// Value for the HTTP `Content-Type` header
    pub fn content_type(&self) -> &'static str {
        self.media_type().content_type()
    }

    /// Prefix to send once to a joining client
    pub fn header(&self) -> Bytes {
        self.shared.header()
    }

    /// Read the next framing unit.
    ///
    /// An empty unit means end-of-stream.
    pub async fn next_unit(&mut self) -> Result<Bytes> {
        let Self { source, framer, .. } = self;

        match framer {
            Framer::Flv(flv) => flv.next_unit(source).await,
            Framer::Mpegts(ts) => ts.next_unit(source).await,
            Framer::Theora(ogg) => ogg.next_unit(source).await,
            Framer::Text => {
                let mut buf = vec![0u8; TEXT_CHUNK_SIZE];
                let n = source.read_some(&mut buf).await?;
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Wait up to `timeout` for input to become readable
    pub async fn poll(&mut self, timeout: Duration) -> Result<Readiness> {
        self.source.poll(timeout).await
    }

    /// Number of units that did not match the expected format
    pub fn broken_count(&self) -> u64 {
        self.shared.broken_count()
    }

    /// Input bytes/second since the previous call
    pub fn rate(&self) -> f64 {
        self.shared.rate()
    }

    /// Address of the source, when known
    pub fn peer(&self) -> Option<SocketAddr> {
        self.shared.peer()
    }

    /// Shared state handle
    pub fn shared(&self) -> &Arc<ReaderShared> {
        &self.shared
    }

    /// Unblock any pending read; it fails with `Error::Stopped`
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token that stops this reader when cancelled
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_passthrough() {
        let mock = tokio_test::io::Builder::new()
            .read(b"hello ")
            .read(b"world")
            .build();
        let mut reader = FramingReader::new(MediaType::Text, mock);

        assert_eq!(reader.content_type(), "text/plain");
        assert!(reader.header().is_empty());

        let mut collected = Vec::new();
        loop {
            let unit = reader.next_unit().await.unwrap();
            if unit.is_empty() {
                break;
            }
            assert!(unit.len() <= TEXT_CHUNK_SIZE);
            collected.extend_from_slice(&unit);
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn test_poll_ready_and_idle() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FramingReader::new(MediaType::Text, server);

        let readiness = reader.poll(Duration::from_millis(20)).await.unwrap();
        assert_eq!(readiness, Readiness::Idle);

        tokio::io::AsyncWriteExt::write_all(&mut client, b"x").await.unwrap();
        let readiness = reader.poll(Duration::from_secs(1)).await.unwrap();
        assert_eq!(readiness, Readiness::Ready);

        // Poll does not consume
        let unit = reader.next_unit().await.unwrap();
        assert_eq!(&unit[..], b"x");
    }

    #[tokio::test]
    async fn test_stop_unblocks_pending_read() {
        let (_client, server) = tokio::io::duplex(64);
        let mut reader = FramingReader::new(MediaType::Mpegts, server);
        let token = reader.stop_token();

        let pending = tokio::spawn(async move { reader.next_unit().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::Stopped)));
    }

    #[test]
    fn test_shared_header_append() {
        let shared = ReaderShared::new(MediaType::Theora);
        assert!(shared.header().is_empty());

        shared.append_header(b"abc");
        shared.append_header(b"def");
        assert_eq!(&shared.header()[..], b"abcdef");

        shared.set_header(Bytes::from_static(b"xyz"));
        assert_eq!(&shared.header()[..], b"xyz");
    }

    #[tokio::test]
    async fn test_rate_counts_input_bytes() {
        let mock = tokio_test::io::Builder::new().read(&[0u8; 1000]).build();
        let mut reader = FramingReader::new(MediaType::Text, mock);

        reader.next_unit().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(reader.rate() > 0.0);
        assert_eq!(reader.rate(), 0.0);
    }
}
