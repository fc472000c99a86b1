use std::path::{Path, PathBuf};

use crate::attributes::AttributeMap;
use crate::body::{Body, BodyMode};

/// Read-only context that travels with a record.
///
/// Mappers receive it alongside the body. Stages never modify it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    path: PathBuf,
    base: Option<PathBuf>,
    attributes: AttributeMap,
}

impl Metadata {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            base: None,
            attributes: AttributeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the record was discovered under, if any.
    pub fn base(&self) -> Option<&Path> {
        self.base.as_deref()
    }

    /// The path relative to [`base()`](Metadata::base).
    ///
    /// Falls back to the file name when the record has no base or its
    /// path is not under it, and to the full path when there is no file name.
    pub fn relative_path(&self) -> &Path {
        if let Some(rel) = self
            .base
            .as_deref()
            .and_then(|base| self.path.strip_prefix(base).ok())
        {
            return rel;
        }
        self.path
            .file_name()
            .map(Path::new)
            .unwrap_or(&self.path)
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }
}

/// One file flowing through a pipeline.
#[derive(Debug, Default)]
pub struct Record {
    metadata: Metadata,
    body: Body,
}

impl Record {
    pub fn new(path: impl Into<PathBuf>, body: impl Into<Body>) -> Self {
        Self {
            metadata: Metadata::new(path),
            body: body.into(),
        }
    }

    /// A record with an absent body.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            metadata: Metadata::new(path),
            body: Body::Absent,
        }
    }

    pub fn from_parts(metadata: Metadata, body: Body) -> Self {
        Self { metadata, body }
    }

    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.metadata.base = Some(base.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.attributes.insert(name, value);
        self
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn path(&self) -> &Path {
        self.metadata.path()
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn mode(&self) -> BodyMode {
        self.body.mode()
    }

    pub fn into_parts(self) -> (Metadata, Body) {
        (self.metadata, self.body)
    }

    pub fn into_body(self) -> Body {
        self.body
    }
}
