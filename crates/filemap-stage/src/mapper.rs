//! Mapper calling conventions.
//!
//! A [`Mapper`] is built once, either as a synchronous function that
//! returns its output, or as an asynchronous function that reports its
//! output through a [`Done`] callback. The stage reads the convention from
//! the mapper and never inspects it again.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use filemap_core::{Convention, Metadata};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// Boxed error returned by mappers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type SyncFn = dyn Fn(Bytes, &Metadata) -> Result<MapOutput, BoxError> + Send + Sync;
type AsyncFn = dyn Fn(Bytes, Metadata, Done) + Send + Sync;

/// Failures around a mapper call, as opposed to failures reported by the mapper.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("mapper panicked: {0}")]
    Panicked(String),
    #[error("completion callback dropped without being called")]
    Abandoned,
    #[error("stage halted after an earlier error")]
    Halted,
}

/// What a mapper produced for one body.
///
/// `None` inside means "leave the body unchanged", which is what a mapper
/// returning `()` gets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapOutput(Option<Bytes>);

impl MapOutput {
    pub fn unchanged() -> Self {
        Self(None)
    }

    pub fn replace(bytes: impl Into<Bytes>) -> Self {
        Self(Some(bytes.into()))
    }

    pub fn is_unchanged(&self) -> bool {
        self.0.is_none()
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        self.0
    }
}

impl From<()> for MapOutput {
    fn from(_: ()) -> Self {
        Self(None)
    }
}

impl From<Bytes> for MapOutput {
    fn from(bytes: Bytes) -> Self {
        Self(Some(bytes))
    }
}

impl From<Vec<u8>> for MapOutput {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Some(Bytes::from(bytes)))
    }
}

impl From<String> for MapOutput {
    fn from(s: String) -> Self {
        Self(Some(Bytes::from(s)))
    }
}

impl From<&'static str> for MapOutput {
    fn from(s: &'static str) -> Self {
        Self(Some(Bytes::from_static(s.as_bytes())))
    }
}

impl<T: Into<Bytes>> From<Option<T>> for MapOutput {
    fn from(value: Option<T>) -> Self {
        Self(value.map(Into::into))
    }
}

#[derive(Clone)]
enum MapperKind {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

/// A caller-supplied body transform.
#[derive(Clone)]
pub struct Mapper {
    kind: MapperKind,
}

impl Mapper {
    /// A mapper that returns its output directly.
    ///
    /// An `Err` fails the record. `Ok(())` or `Ok(None)` leaves the body
    /// unchanged.
    pub fn sync<F, O, E>(f: F) -> Self
    where
        F: Fn(Bytes, &Metadata) -> Result<O, E> + Send + Sync + 'static,
        O: Into<MapOutput>,
        E: Into<BoxError>,
    {
        let f = move |input: Bytes, metadata: &Metadata| -> Result<MapOutput, BoxError> {
            f(input, metadata).map(Into::into).map_err(Into::into)
        };
        Self {
            kind: MapperKind::Sync(Arc::new(f)),
        }
    }

    /// A synchronous mapper that cannot fail.
    pub fn infallible<F, O>(f: F) -> Self
    where
        F: Fn(Bytes, &Metadata) -> O + Send + Sync + 'static,
        O: Into<MapOutput>,
    {
        Self::sync(move |input, metadata| Ok::<O, BoxError>(f(input, metadata)))
    }

    /// A mapper that reports its output through a [`Done`] callback.
    ///
    /// The callback may be moved to another task and called later. The
    /// stage waits for it before taking the next record.
    pub fn asynchronous<F>(f: F) -> Self
    where
        F: Fn(Bytes, Metadata, Done) + Send + Sync + 'static,
    {
        Self {
            kind: MapperKind::Async(Arc::new(f)),
        }
    }

    pub fn convention(&self) -> Convention {
        match self.kind {
            MapperKind::Sync(_) => Convention::Sync,
            MapperKind::Async(_) => Convention::Async,
        }
    }

    /// Run the mapper on one body and wait for its outcome.
    ///
    /// Panics raised while the mapper is being called are caught and
    /// reported as [`CallError::Panicked`]. For an asynchronous mapper that
    /// already called its [`Done`], the earlier outcome stands.
    pub(crate) async fn call(&self, input: Bytes, metadata: &Metadata) -> Result<MapOutput, BoxError> {
        match &self.kind {
            MapperKind::Sync(f) => {
                panic::catch_unwind(AssertUnwindSafe(|| f(input, metadata)))
                    .map_err(panic_error)?
            }
            MapperKind::Async(f) => {
                let (done, outcome) = Done::channel();
                let guard = done.clone();
                // Only counts if `done` was not called first.
                if let Err(payload) =
                    panic::catch_unwind(AssertUnwindSafe(|| f(input, metadata.clone(), done)))
                {
                    guard.complete(Err(panic_error(payload)));
                }
                drop(guard);
                match outcome.await {
                    Ok(result) => result,
                    Err(_) => Err(CallError::Abandoned.into()),
                }
            }
        }
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("convention", &self.convention())
            .finish_non_exhaustive()
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> BoxError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    Box::new(CallError::Panicked(message))
}

type Outcome = Result<MapOutput, BoxError>;

/// Completion callback handed to asynchronous mappers.
///
/// Clones share one slot: the first call to [`ok`](Done::ok),
/// [`err`](Done::err) or [`complete`](Done::complete) decides the record's
/// outcome and later calls are discarded. Dropping every clone without
/// calling it fails the record with [`CallError::Abandoned`].
#[derive(Clone)]
pub struct Done {
    slot: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

impl Done {
    fn channel() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let done = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (done, rx)
    }

    /// Report a successful output. Returns `false` if the outcome was
    /// already decided.
    pub fn ok(&self, output: impl Into<MapOutput>) -> bool {
        self.complete(Ok(output.into()))
    }

    /// Report a failure. Returns `false` if the outcome was already decided.
    pub fn err(&self, error: impl Into<BoxError>) -> bool {
        self.complete(Err(error.into()))
    }

    pub fn complete(&self, outcome: Result<MapOutput, BoxError>) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            // The stage may have stopped waiting; the outcome is still decided.
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => {
                debug!(ok = outcome.is_ok(), "completion callback already called, discarding");
                false
            }
        }
    }

    /// Whether the outcome has been reported.
    pub fn is_done(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done")
            .field("done", &self.is_done())
            .finish()
    }
}
