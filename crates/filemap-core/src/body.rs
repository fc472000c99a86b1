//! Record bodies and live byte streams.
//!
//! Provides [`Body`], its three representations, the [`classify`] function
//! and [`LiveBody`], the single-consumption stream type. Also holds the
//! [`ChunkedBytesStream`] adapter used to re-publish a buffer as a live
//! body without copying it.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use serde::Serialize;

use crate::BodyError;

/// Default chunk size for re-streaming materialized buffers (64 KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// A type-erased, fallible async stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BodyError>> + Send>>;

/// Which representation a [`Body`] currently uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyMode {
    Absent,
    Materialized,
    Live,
}

impl BodyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyMode::Absent => "absent",
            BodyMode::Materialized => "materialized",
            BodyMode::Live => "live",
        }
    }
}

impl fmt::Display for BodyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a body. Never polls a live stream.
pub fn classify(body: &Body) -> BodyMode {
    match body {
        Body::Absent => BodyMode::Absent,
        Body::Materialized(_) => BodyMode::Materialized,
        Body::Live(_) => BodyMode::Live,
    }
}

/// The contents of a record.
#[derive(Debug, Default)]
pub enum Body {
    /// No contents.
    #[default]
    Absent,
    /// The complete contents, already in memory.
    Materialized(Bytes),
    /// Contents that are still being produced.
    Live(LiveBody),
}

impl Body {
    pub fn mode(&self) -> BodyMode {
        classify(self)
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Body::Absent)
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Body::Live(_))
    }

    /// The in-memory contents, if the body is materialized.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Body::Materialized(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Consume the body and return the live stream, if it is one.
    pub fn into_live(self) -> Option<LiveBody> {
        match self {
            Body::Live(live) => Some(live),
            _ => None,
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Materialized(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Materialized(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Materialized(Bytes::from(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Materialized(Bytes::from_static(s.as_bytes()))
    }
}

impl From<LiveBody> for Body {
    fn from(live: LiveBody) -> Self {
        Body::Live(live)
    }
}

/// A body that produces bytes over time.
///
/// Wraps a [`ByteStream`]. The stream ends with `None` on completion or
/// yields an `Err` on failure. A `LiveBody` is not `Clone`; draining it with
/// [`materialize()`](LiveBody::materialize) or
/// [`into_stream()`](LiveBody::into_stream) consumes it.
pub struct LiveBody {
    stream: ByteStream,
}

impl LiveBody {
    pub fn new(stream: impl Stream<Item = Result<Bytes, BodyError>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
        }
    }

    /// A live body that ends immediately.
    pub fn empty() -> Self {
        Self {
            stream: Box::pin(EmptyByteStream),
        }
    }

    /// Re-publish a buffer as a live body, yielding zero-copy chunks of
    /// at most `chunk_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn from_bytes(bytes: Bytes, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "live body chunk size must be non-zero");
        if bytes.is_empty() {
            return Self::empty();
        }
        Self {
            stream: Box::pin(ChunkedBytesStream::new(bytes, chunk_size)),
        }
    }

    /// Drain the stream and concatenate every chunk.
    ///
    /// Stops at the first error and returns it unchanged.
    pub async fn materialize(mut self) -> Result<Bytes, BodyError> {
        let first = match std::future::poll_fn(|cx| self.stream.as_mut().poll_next(cx)).await {
            Some(chunk) => chunk?,
            None => return Ok(Bytes::new()),
        };
        let mut collected: Option<Vec<u8>> = None;
        while let Some(chunk) = std::future::poll_fn(|cx| self.stream.as_mut().poll_next(cx)).await
        {
            let chunk = chunk?;
            collected
                .get_or_insert_with(|| first.to_vec())
                .extend_from_slice(&chunk);
        }
        // A single-chunk body is handed back without copying.
        Ok(collected.map(Bytes::from).unwrap_or(first))
    }

    pub fn into_stream(self) -> ByteStream {
        self.stream
    }
}

impl Stream for LiveBody {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().stream.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for LiveBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveBody").finish_non_exhaustive()
    }
}

/// Splits the unsent front off a buffer, `chunk_size` bytes at a time.
///
/// Every chunk shares the original allocation.
pub(crate) struct ChunkedBytesStream {
    remaining: Bytes,
    chunk_size: usize,
}

impl ChunkedBytesStream {
    fn new(remaining: Bytes, chunk_size: usize) -> Self {
        Self {
            remaining,
            chunk_size,
        }
    }
}

impl Stream for ChunkedBytesStream {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.remaining.is_empty() {
            return Poll::Ready(None);
        }
        let at = this.chunk_size.min(this.remaining.len());
        Poll::Ready(Some(Ok(this.remaining.split_to(at))))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let chunks = self.remaining.len().div_ceil(self.chunk_size);
        (chunks, Some(chunks))
    }
}

/// A fallible stream that immediately returns `None`.
pub(crate) struct EmptyByteStream;

impl Stream for EmptyByteStream {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(None)
    }
}
