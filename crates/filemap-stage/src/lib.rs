//! filemap mapping stage.
//!
//! A [`MapStage`] wraps one caller-supplied [`Mapper`] into a transform that
//! processes one [`Record`] at a time:
//!
//! - **Absent** bodies are forwarded untouched. The mapper is not called.
//! - **Materialized** bodies are handed to the mapper and replaced by its
//!   output. A mapper that returns nothing leaves the body unchanged.
//! - **Live** bodies are drained first, then mapped, and the output is
//!   re-published as a new live body, so live in means live out.
//!
//! Mapper failures, completion-callback errors and live-body read errors
//! all surface as a [`StageError`] for that record. The record is not
//! forwarded and the stage moves on to the next one.
//!
//! # Ordering
//!
//! A stage never starts a record before the previous one has been
//! forwarded or failed, so output order equals input order regardless of
//! how long each mapper call takes. A [`Pipeline`] runs each stage on its
//! own task, connected by bounded channels: stages work on different
//! records at the same time while every stage stays sequential.
//!
//! [`Record`]: filemap_core::Record

mod error;
mod mapper;
mod pipeline;
mod stage;

pub use error::{StageError, StageResult};
pub use filemap_core::{Convention, ErrorMode};
pub use mapper::{BoxError, CallError, Done, MapOutput, Mapper};
pub use pipeline::{Pipeline, PipelineReport, PipelineRun};
pub use stage::{MapStage, StageOptions, StageState, StageStats};
