use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Error raised while reading a live body.
///
/// Carries a human-readable message and, when the failure came from an
/// underlying reader, the original error as its `source()`. Used as the
/// error variant in live body items (`Stream<Item = Result<Bytes, BodyError>>`).
#[derive(Debug, Clone)]
pub struct BodyError {
    message: String,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl BodyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying reader error, keeping it reachable via `source()`.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for BodyError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<String> for BodyError {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for BodyError {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<std::io::Error> for BodyError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(format!("read failed: {err}"), err)
    }
}
