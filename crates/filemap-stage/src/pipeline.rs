//! Chained stages.
//!
//! [`Pipeline::spawn`] runs every stage on its own tokio task. Stages are
//! connected by bounded `mpsc` channels whose capacity is the pipeline's
//! high-water mark: a stage that cannot hand its output on stops taking
//! input. Each channel carries `Result<Record, StageError>` so an error
//! raised by one stage reaches the end of the pipeline in input order.
//!
//! The end of input travels the same way: once the feeder drops its
//! sender, each stage finishes its in-flight record, drops its own sender,
//! and the output stream ends exactly once.

use std::pin::Pin;
use std::task::{Context, Poll};

use filemap_core::config::DEFAULT_CHANNEL_CAPACITY;
use filemap_core::Record;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::{StageError, StageResult};
use crate::mapper::Mapper;
use crate::stage::{MapStage, StageState, StageStats};

/// An ordered chain of [`MapStage`]s.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<MapStage>,
    capacity: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be > 0");
        Self {
            stages: Vec::new(),
            capacity,
        }
    }

    /// Append a stage.
    pub fn stage(mut self, stage: MapStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append a stage with default options around `mapper`.
    pub fn pipe(self, mapper: Mapper) -> Self {
        self.stage(MapStage::new(mapper))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Start the pipeline over `input`.
    ///
    /// Must be called from within a tokio runtime. Stages without a
    /// configured name are called `stage-<index>`.
    pub fn spawn<S>(self, input: S) -> PipelineRun
    where
        S: Stream<Item = Record> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(self.capacity);
        let feeder = tokio::spawn(feed(input, tx));

        let mut tasks = Vec::with_capacity(self.stages.len());
        for (index, mut stage) in self.stages.into_iter().enumerate() {
            stage.name_if_unset(format!("stage-{index}"));
            let (next_tx, next_rx) = mpsc::channel(self.capacity);
            tasks.push(tokio::spawn(run_stage(stage, rx, next_tx)));
            rx = next_rx;
        }

        PipelineRun {
            output: ReceiverStream::new(rx),
            feeder,
            tasks,
        }
    }

    /// Run the pipeline over `records` and collect everything it produces.
    pub async fn run<I>(self, records: I) -> Result<PipelineReport, JoinError>
    where
        I: IntoIterator<Item = Record>,
        I::IntoIter: Send + 'static,
    {
        self.spawn(futures_util::stream::iter(records)).collect().await
    }
}

async fn feed<S>(input: S, tx: mpsc::Sender<StageResult<Record>>)
where
    S: Stream<Item = Record> + Send,
{
    let mut input = std::pin::pin!(input);
    while let Some(record) = input.next().await {
        if tx.send(Ok(record)).await.is_err() {
            debug!("pipeline input closed early");
            break;
        }
    }
}

async fn run_stage(
    mut stage: MapStage,
    mut input: mpsc::Receiver<StageResult<Record>>,
    output: mpsc::Sender<StageResult<Record>>,
) -> StageStats {
    while let Some(item) = input.recv().await {
        let item = stage.step(item).await;
        if output.send(item).await.is_err() {
            debug!(stage = %stage.name(), "downstream closed, stopping");
            break;
        }
        if stage.state() == StageState::Halted {
            break;
        }
    }
    stage.finish()
}

/// A running pipeline.
///
/// Implements `Stream<Item = Result<Record, StageError>>`; the stream ends
/// when the input has ended and every stage has finished its last record.
pub struct PipelineRun {
    output: ReceiverStream<StageResult<Record>>,
    feeder: JoinHandle<()>,
    tasks: Vec<JoinHandle<StageStats>>,
}

impl PipelineRun {
    /// Stop reading output and wait for every task.
    ///
    /// Unread output is dropped, which stops the stages at their next send.
    pub async fn finish(self) -> Result<Vec<StageStats>, JoinError> {
        drop(self.output);
        self.feeder.await?;
        let mut stats = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            stats.push(task.await?);
        }
        Ok(stats)
    }

    /// Drain the output, then wait for every task.
    pub async fn collect(mut self) -> Result<PipelineReport, JoinError> {
        let mut records = Vec::new();
        let mut errors = Vec::new();
        while let Some(item) = self.output.next().await {
            match item {
                Ok(record) => records.push(record),
                Err(err) => errors.push(err),
            }
        }
        let stats = self.finish().await?;
        Ok(PipelineReport {
            records,
            errors,
            stats,
        })
    }
}

impl Stream for PipelineRun {
    type Item = StageResult<Record>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.output).poll_next(cx)
    }
}

/// Everything a finished pipeline produced.
#[derive(Debug)]
pub struct PipelineReport {
    /// Forwarded records, in input order.
    pub records: Vec<Record>,
    /// Errors from every stage, in input order.
    pub errors: Vec<StageError>,
    /// One entry per stage, in pipeline order.
    pub stats: Vec<StageStats>,
}
