//! filemap core types.
//!
//! A [`Record`] is one file flowing through a filemap pipeline: a path and
//! some attributes ([`Metadata`]) plus a [`Body`]. The body takes one of
//! three representations:
//!
//! - [`Body::Absent`]: the record has no contents (a directory, or a file
//!   that was never read).
//! - [`Body::Materialized`]: the complete contents, already in memory.
//! - [`Body::Live`]: a [`LiveBody`], a fallible stream of byte chunks that
//!   has not been read yet and can be consumed exactly once.
//!
//! [`classify`] maps a body to its [`BodyMode`] without touching the live
//! stream. Mapping stages use it to pick their processing path.
//!
//! # Memory Model
//!
//! Live bodies are pull-based (`futures_core::Stream`). Re-streamed bodies
//! built with [`LiveBody::from_bytes`] yield zero-copy `Bytes::slice()`
//! chunks of the original buffer, so handing a buffer downstream as a
//! stream costs one reference count and no copies.

mod attributes;
pub(crate) mod body;
pub mod config;
mod error;
mod record;

pub use attributes::AttributeMap;
pub use body::{classify, Body, BodyMode, ByteStream, LiveBody, DEFAULT_CHUNK_SIZE};
pub use config::{
    ConfigError, Convention, ErrorMode, FilemapConfig, PipelineConfig, StageConfig,
    TransformConfig,
};
pub use error::BodyError;
pub use record::{Metadata, Record};
