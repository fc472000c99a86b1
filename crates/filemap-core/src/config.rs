//! filemap.toml configuration parser.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::body::DEFAULT_CHUNK_SIZE;

/// Default capacity of the channels between pipeline stages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilemapConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: Option<String>,
    pub channel_capacity: Option<usize>,
    pub chunk_size: Option<usize>,
    pub on_error: Option<ErrorMode>,
    /// Load input bodies as live streams instead of reading them up front.
    pub stream_input: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub transform: TransformConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convention: Option<Convention>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorMode>,
}

/// Built-in content transforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum TransformConfig {
    Uppercase,
    Lowercase,
    Trim,
    /// Regex replacement over the raw bytes. No match leaves the body unchanged.
    Replace { pattern: String, replacement: String },
    Prefix { text: String },
    Suffix { text: String },
    /// Replace the body with its hex-encoded SHA-256 digest.
    Sha256,
}

impl TransformConfig {
    pub fn label(&self) -> &'static str {
        match self {
            TransformConfig::Uppercase => "uppercase",
            TransformConfig::Lowercase => "lowercase",
            TransformConfig::Trim => "trim",
            TransformConfig::Replace { .. } => "replace",
            TransformConfig::Prefix { .. } => "prefix",
            TransformConfig::Suffix { .. } => "suffix",
            TransformConfig::Sha256 => "sha256",
        }
    }
}

/// What a stage does after a record fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Surface the error and keep accepting records.
    #[default]
    Continue,
    /// Surface the first error, then end the stage's output.
    Halt,
}

/// How a stage calls its mapper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Convention {
    /// The mapper returns its result directly.
    #[default]
    Sync,
    /// The mapper reports its result through a completion callback.
    Async,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pipeline has no stages")]
    NoStages,
    #[error("channel_capacity must be > 0")]
    ZeroCapacity,
    #[error("chunk_size must be > 0")]
    ZeroChunkSize,
    #[error("stage {index} has an empty replace pattern")]
    EmptyPattern { index: usize },
    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),
}

impl PipelineConfig {
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    pub fn on_error(&self) -> ErrorMode {
        self.on_error.unwrap_or_default()
    }

    pub fn stream_input(&self) -> bool {
        self.stream_input.unwrap_or(false)
    }
}

impl FilemapConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: FilemapConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the settings serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }
        if self.pipeline.channel_capacity == Some(0) {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.pipeline.chunk_size == Some(0) {
            return Err(ConfigError::ZeroChunkSize);
        }
        let mut seen = std::collections::HashSet::new();
        for (index, stage) in self.stages.iter().enumerate() {
            if let TransformConfig::Replace { pattern, .. } = &stage.transform {
                if pattern.is_empty() {
                    return Err(ConfigError::EmptyPattern { index });
                }
            }
            if !seen.insert(self.stage_name(index)) {
                return Err(ConfigError::DuplicateStage(self.stage_name(index)));
            }
        }
        Ok(())
    }

    /// Configured name of stage `index`, or `stage-<index>`.
    pub fn stage_name(&self, index: usize) -> String {
        self.stages
            .get(index)
            .and_then(|s| s.name.clone())
            .unwrap_or_else(|| format!("stage-{index}"))
    }

    /// Error mode for stage `index`: its own override, else the pipeline's.
    pub fn stage_error_mode(&self, index: usize) -> ErrorMode {
        self.stages
            .get(index)
            .and_then(|s| s.on_error)
            .unwrap_or_else(|| self.pipeline.on_error())
    }

    /// Scaffold a minimal filemap.toml.
    pub fn scaffold(name: &str) -> Self {
        FilemapConfig {
            pipeline: PipelineConfig {
                name: Some(name.to_string()),
                channel_capacity: Some(DEFAULT_CHANNEL_CAPACITY),
                chunk_size: Some(DEFAULT_CHUNK_SIZE),
                on_error: Some(ErrorMode::Continue),
                stream_input: Some(false),
            },
            stages: vec![
                StageConfig {
                    name: Some("trim".to_string()),
                    transform: TransformConfig::Trim,
                    convention: None,
                    on_error: None,
                },
                StageConfig {
                    name: Some("shout".to_string()),
                    transform: TransformConfig::Uppercase,
                    convention: Some(Convention::Async),
                    on_error: None,
                },
            ],
        }
    }
}
