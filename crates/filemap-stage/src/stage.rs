//! The mapping stage.

use bytes::Bytes;
use filemap_core::{Body, BodyMode, Convention, ErrorMode, LiveBody, Metadata, Record, DEFAULT_CHUNK_SIZE};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, debug_span, info, warn, Instrument};

use crate::error::{StageError, StageResult};
use crate::mapper::{BoxError, CallError, Mapper};

/// Construction-time settings for a [`MapStage`].
#[derive(Debug, Clone)]
pub struct StageOptions {
    name: Option<String>,
    chunk_size: usize,
    on_error: ErrorMode,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            name: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            on_error: ErrorMode::Continue,
        }
    }
}

impl StageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Chunk size used when re-publishing a live body.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be > 0");
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_error_mode(mut self, on_error: ErrorMode) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn error_mode(&self) -> ErrorMode {
        self.on_error
    }
}

/// Where a stage is in its record cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Waiting for the next record.
    Ready,
    /// A record is in flight.
    Processing,
    /// A record failed under [`ErrorMode::Halt`]; no further records are taken.
    Halted,
}

/// Per-stage record counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub stage: String,
    pub absent: u64,
    pub materialized: u64,
    pub live: u64,
    pub forwarded: u64,
    pub errors: u64,
}

impl StageStats {
    fn count(&mut self, mode: BodyMode) {
        match mode {
            BodyMode::Absent => self.absent += 1,
            BodyMode::Materialized => self.materialized += 1,
            BodyMode::Live => self.live += 1,
        }
    }
}

/// Wraps one [`Mapper`] into a one-record-at-a-time transform.
#[derive(Debug)]
pub struct MapStage {
    mapper: Mapper,
    options: StageOptions,
    state: StageState,
    stats: StageStats,
}

impl MapStage {
    pub fn new(mapper: Mapper) -> Self {
        Self::with_options(mapper, StageOptions::default())
    }

    pub fn with_options(mapper: Mapper, options: StageOptions) -> Self {
        let stats = StageStats {
            stage: options.name.clone().unwrap_or_else(|| "map".to_string()),
            ..StageStats::default()
        };
        Self {
            mapper,
            options,
            state: StageState::Ready,
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.stats.stage
    }

    pub fn convention(&self) -> Convention {
        self.mapper.convention()
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn stats(&self) -> &StageStats {
        &self.stats
    }

    pub fn options(&self) -> &StageOptions {
        &self.options
    }

    /// Give the stage a positional name unless one was configured.
    pub(crate) fn name_if_unset(&mut self, name: String) {
        if self.options.name.is_none() {
            self.options.name = Some(name.clone());
            self.stats.stage = name;
        }
    }

    /// Process one record.
    ///
    /// Returns the record to forward, or the error that ended it. Taking
    /// `&mut self` means a stage has at most one record in flight.
    pub async fn process(&mut self, record: Record) -> StageResult<Record> {
        match self.state {
            StageState::Halted => {
                return Err(StageError::new(
                    self.name(),
                    record.path(),
                    CallError::Halted.into(),
                ));
            }
            StageState::Processing => {
                // Only reachable when a previous `process` future was dropped.
                warn!(stage = %self.name(), "previous record was abandoned mid-flight");
            }
            StageState::Ready => {}
        }

        let mode = record.mode();
        self.stats.count(mode);

        if mode == BodyMode::Absent {
            debug!(stage = %self.name(), path = %record.path().display(), "absent body, forwarding");
            self.state = StageState::Ready;
            self.stats.forwarded += 1;
            return Ok(record);
        }

        self.state = StageState::Processing;
        let span = debug_span!(
            "filemap.stage",
            stage = %self.name(),
            path = %record.path().display(),
            %mode,
        );
        let (metadata, body) = record.into_parts();
        let outcome = self.map_body(&metadata, body).instrument(span.clone()).await;
        let _enter = span.enter();

        match outcome {
            Ok(body) => {
                self.state = StageState::Ready;
                self.stats.forwarded += 1;
                debug!(output = %body.mode(), "record forwarded");
                Ok(Record::from_parts(metadata, body))
            }
            Err(source) => {
                self.state = match self.options.on_error {
                    ErrorMode::Continue => StageState::Ready,
                    ErrorMode::Halt => StageState::Halted,
                };
                self.stats.errors += 1;
                warn!(error = %source, "record failed");
                Err(StageError::new(self.name(), metadata.path(), source))
            }
        }
    }

    async fn map_body(&self, metadata: &Metadata, body: Body) -> Result<Body, BoxError> {
        match body {
            Body::Absent => Ok(Body::Absent),
            Body::Materialized(bytes) => {
                let bytes = self.apply(bytes, metadata).await?;
                Ok(Body::Materialized(bytes))
            }
            Body::Live(live) => {
                let bytes = live.materialize().await?;
                debug!(len = bytes.len(), "live body materialized");
                let bytes = self.apply(bytes, metadata).await?;
                Ok(Body::Live(LiveBody::from_bytes(bytes, self.options.chunk_size)))
            }
        }
    }

    /// Call the mapper; an unchanged output keeps the input bytes.
    async fn apply(&self, input: Bytes, metadata: &Metadata) -> Result<Bytes, BoxError> {
        let output = self.mapper.call(input.clone(), metadata).await?;
        Ok(output.into_bytes().unwrap_or(input))
    }

    /// Process one upstream item. Upstream errors pass through untouched.
    pub(crate) async fn step(&mut self, item: StageResult<Record>) -> StageResult<Record> {
        match item {
            Ok(record) => self.process(record).await,
            Err(upstream) => Err(upstream),
        }
    }

    /// Log the final counters and hand them back.
    pub(crate) fn finish(&self) -> StageStats {
        let stats = &self.stats;
        info!(
            stage = %stats.stage,
            absent = stats.absent,
            materialized = stats.materialized,
            live = stats.live,
            forwarded = stats.forwarded,
            errors = stats.errors,
            "stage finished"
        );
        stats.clone()
    }

    /// Run this stage over a stream of records.
    ///
    /// Yields one item per input record, in input order, and ends once the
    /// input ends. Under [`ErrorMode::Halt`] the output ends right after the
    /// first error.
    pub fn into_stream<S>(self, records: S) -> impl Stream<Item = StageResult<Record>> + Send + 'static
    where
        S: Stream<Item = Record> + Send + 'static,
    {
        self.transform(records.map(Ok))
    }

    /// Like [`into_stream()`](MapStage::into_stream), for the output of
    /// another stage. Upstream errors are passed on in order.
    pub fn transform<S>(self, input: S) -> impl Stream<Item = StageResult<Record>> + Send + 'static
    where
        S: Stream<Item = StageResult<Record>> + Send + 'static,
    {
        let input = Box::pin(input);
        futures_util::stream::unfold((self, input), |(mut stage, mut input)| async move {
            if stage.state() == StageState::Halted {
                stage.finish();
                return None;
            }
            match input.next().await {
                Some(item) => {
                    let result = stage.step(item).await;
                    Some((result, (stage, input)))
                }
                None => {
                    stage.finish();
                    None
                }
            }
        })
    }
}
