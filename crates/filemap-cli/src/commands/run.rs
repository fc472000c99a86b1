//! `filemap run`: walk inputs, push them through the configured pipeline,
//! write the results under an output directory.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use filemap_core::{AttributeMap, Body, BodyError, BodyMode, FilemapConfig, LiveBody, Record};
use filemap_stage::{MapStage, Pipeline, StageOptions, StageStats};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::transforms::build_mapper;

const KIND: &str = "kind";
const SIZE: &str = "size";
const DIRECTORY: &str = "directory";
const FILE: &str = "file";

/// One input path, with the directory its output path is relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEntry {
    pub path: PathBuf,
    pub base: PathBuf,
    pub is_dir: bool,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub pipeline: String,
    pub written: Vec<WrittenFile>,
    pub failures: Vec<Failure>,
    pub stages: Vec<StageStats>,
}

#[derive(Debug, Serialize)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub mode: BodyMode,
    pub bytes: u64,
    /// Attributes set when the input was loaded (`kind`, `size`).
    #[serde(skip_serializing_if = "AttributeMap::is_empty")]
    pub attributes: AttributeMap,
}

#[derive(Debug, Serialize)]
pub struct Failure {
    pub path: PathBuf,
    pub stage: String,
    pub error: String,
}

pub async fn run(
    config_path: &str,
    inputs: &[String],
    out_dir: &str,
    stream: bool,
    format: &str,
) -> Result<()> {
    let config = FilemapConfig::from_file(Path::new(config_path))?;
    let inputs: Vec<PathBuf> = inputs.iter().map(PathBuf::from).collect();
    let stream_input = stream || config.pipeline.stream_input();

    let report = execute(&config, &inputs, Path::new(out_dir), stream_input).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("{}", format_report(&report));
        }
    }

    if !report.failures.is_empty() {
        bail!("{} record(s) failed", report.failures.len());
    }
    Ok(())
}

/// Build the stage chain described by `config`.
pub fn build_pipeline(config: &FilemapConfig) -> Result<Pipeline> {
    let mut pipeline = Pipeline::with_capacity(config.pipeline.channel_capacity());
    for (index, stage) in config.stages.iter().enumerate() {
        let name = config.stage_name(index);
        let mapper = build_mapper(&stage.transform, stage.convention.unwrap_or_default())
            .with_context(|| format!("stage `{name}`"))?;
        let options = StageOptions::named(name)
            .with_chunk_size(config.pipeline.chunk_size())
            .with_error_mode(config.stage_error_mode(index));
        pipeline = pipeline.stage(MapStage::with_options(mapper, options));
    }
    Ok(pipeline)
}

/// Run the pipeline over `inputs` and write every forwarded record.
pub async fn execute(
    config: &FilemapConfig,
    inputs: &[PathBuf],
    out_dir: &Path,
    stream_input: bool,
) -> Result<RunReport> {
    let pipeline = build_pipeline(config)?;
    let entries = collect_inputs(inputs)?;
    let chunk_size = config.pipeline.chunk_size();
    let name = config
        .pipeline
        .name
        .clone()
        .unwrap_or_else(|| "filemap".to_string());

    info!(
        pipeline = %name,
        inputs = entries.len(),
        stages = pipeline.len(),
        live = stream_input,
        "starting run"
    );

    let records = futures_util::stream::iter(entries).filter_map(move |entry| async move {
        match load_record(&entry, stream_input, chunk_size).await {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %entry.path.display(), error = %err, "skipping unreadable input");
                None
            }
        }
    });

    let mut run = pipeline.spawn(records);
    let mut written = Vec::new();
    let mut failures = Vec::new();

    while let Some(item) = run.next().await {
        match item {
            Ok(record) => written.push(write_output(out_dir, record).await?),
            Err(err) => {
                warn!(stage = %err.stage(), path = %err.path().display(), error = %err.source_error(), "record failed");
                failures.push(Failure {
                    path: err.path().to_path_buf(),
                    stage: err.stage().to_string(),
                    error: err.source_error().to_string(),
                });
            }
        }
    }

    let stages = run.finish().await.context("pipeline task failed")?;

    Ok(RunReport {
        pipeline: name,
        written,
        failures,
        stages,
    })
}

/// Expand `inputs` into files and directories.
///
/// A directory input is walked recursively and becomes the base of every
/// entry under it; a file input is relative to its parent.
pub fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<InputEntry>> {
    let mut entries = Vec::new();
    for input in inputs {
        let meta = std::fs::metadata(input)
            .with_context(|| format!("cannot read input {}", input.display()))?;

        if !meta.is_dir() {
            let base = input.parent().map(Path::to_path_buf).unwrap_or_default();
            entries.push(InputEntry {
                path: input.clone(),
                base,
                is_dir: false,
            });
            continue;
        }

        for entry in WalkDir::new(input).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            let file_type = entry.file_type();
            if !file_type.is_dir() && !file_type.is_file() {
                debug!(path = %entry.path().display(), "skipping non-regular entry");
                continue;
            }
            entries.push(InputEntry {
                path: entry.path().to_path_buf(),
                base: input.clone(),
                is_dir: file_type.is_dir(),
            });
        }
    }
    Ok(entries)
}

async fn load_record(entry: &InputEntry, live: bool, chunk_size: usize) -> Result<Record> {
    if entry.is_dir {
        return Ok(Record::empty(entry.path.clone())
            .with_base(entry.base.clone())
            .with_attribute(KIND, DIRECTORY));
    }

    let (body, size): (Body, u64) = if live {
        let file = tokio::fs::File::open(&entry.path)
            .await
            .with_context(|| format!("failed to open {}", entry.path.display()))?;
        let size = file.metadata().await?.len();
        let chunks = ReaderStream::with_capacity(file, chunk_size).map(|chunk| chunk.map_err(BodyError::from));
        (LiveBody::new(chunks).into(), size)
    } else {
        let content = tokio::fs::read(&entry.path)
            .await
            .with_context(|| format!("failed to read {}", entry.path.display()))?;
        let size = content.len() as u64;
        (Bytes::from(content).into(), size)
    };

    Ok(Record::new(entry.path.clone(), body)
        .with_base(entry.base.clone())
        .with_attribute(KIND, FILE)
        .with_attribute(SIZE, size.to_string()))
}

async fn write_output(out_dir: &Path, record: Record) -> Result<WrittenFile> {
    let (metadata, body) = record.into_parts();
    let relative = metadata.relative_path().to_path_buf();
    let target = out_dir.join(&relative);
    let mode = body.mode();

    let bytes = match body {
        Body::Absent if metadata.attributes().get(KIND) == Some(DIRECTORY) => {
            tokio::fs::create_dir_all(&target).await?;
            0
        }
        Body::Absent => {
            debug!(path = %relative.display(), "no contents, nothing to write");
            0
        }
        Body::Materialized(content) => {
            create_parent(&target).await?;
            tokio::fs::write(&target, &content).await?;
            content.len() as u64
        }
        Body::Live(mut live) => {
            create_parent(&target).await?;
            let mut file = tokio::fs::File::create(&target).await?;
            let mut total = 0u64;
            while let Some(chunk) = live.next().await {
                let chunk = chunk.with_context(|| format!("failed to stream {}", relative.display()))?;
                file.write_all(&chunk).await?;
                total += chunk.len() as u64;
            }
            file.flush().await?;
            total
        }
    };

    debug!(path = %target.display(), %mode, bytes, "wrote output");
    Ok(WrittenFile {
        path: relative,
        mode,
        bytes,
        attributes: metadata.attributes().clone(),
    })
}

async fn create_parent(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

pub fn format_report(report: &RunReport) -> String {
    let mut out = format!(
        "✓ {}: {} written, {} failed\n",
        report.pipeline,
        report.written.len(),
        report.failures.len()
    );
    for stage in &report.stages {
        out.push_str(&format!(
            "  {:<16} materialized={} live={} absent={} forwarded={} errors={}\n",
            stage.stage, stage.materialized, stage.live, stage.absent, stage.forwarded, stage.errors
        ));
    }
    for failure in &report.failures {
        out.push_str(&format!(
            "  ✗ {} [{}]: {}\n",
            failure.path.display(),
            failure.stage,
            failure.error
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(toml: &str) -> FilemapConfig {
        FilemapConfig::from_toml_str(toml).unwrap()
    }

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/a.txt"), "  hello  ").unwrap();
        fs::write(dir.path().join("src/nested/b.txt"), "world").unwrap();
        dir
    }

    #[test]
    fn test_collect_inputs_walks_directories_in_order() {
        let dir = sample_tree();
        let root = dir.path().join("src");
        let entries = collect_inputs(&[root.clone()]).unwrap();

        let paths: Vec<PathBuf> = entries
            .iter()
            .map(|e| e.path.strip_prefix(&root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("nested"),
                PathBuf::from("nested/b.txt"),
            ]
        );
        assert!(entries.iter().all(|e| e.base == root));
        assert!(entries[1].is_dir);
    }

    #[test]
    fn test_collect_inputs_file_is_relative_to_parent() {
        let dir = sample_tree();
        let file = dir.path().join("src/a.txt");
        let entries = collect_inputs(&[file.clone()]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].base, dir.path().join("src"));
        assert!(!entries[0].is_dir);
    }

    #[test]
    fn test_collect_inputs_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_inputs(&[dir.path().join("nope")]).unwrap_err();
        assert!(err.to_string().contains("cannot read input"));
    }

    #[test]
    fn test_build_pipeline_names_stages() {
        let config = config(
            "[[stages]]\ntransform = \"trim\"\n\n[[stages]]\nname = \"shout\"\ntransform = \"uppercase\"\nconvention = \"async\"\n",
        );
        let pipeline = build_pipeline(&config).unwrap();
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn test_build_pipeline_rejects_bad_regex() {
        let config = config("[[stages]]\ntransform = \"replace\"\npattern = \"([\"\nreplacement = \"\"\n");
        let err = build_pipeline(&config).unwrap_err();
        assert!(format!("{err:#}").contains("stage `stage-0`"));
    }

    #[tokio::test]
    async fn test_execute_materialized_and_live_produce_same_output() {
        let dir = sample_tree();
        let config = config(
            "[[stages]]\ntransform = \"trim\"\n\n[[stages]]\ntransform = \"uppercase\"\nconvention = \"async\"\n",
        );

        for live in [false, true] {
            let out = dir.path().join(if live { "out-live" } else { "out-buf" });
            let report = execute(&config, &[dir.path().join("src")], &out, live)
                .await
                .unwrap();

            assert!(report.failures.is_empty());
            assert_eq!(report.written.len(), 3);
            assert_eq!(fs::read_to_string(out.join("a.txt")).unwrap(), "HELLO");
            assert_eq!(fs::read_to_string(out.join("nested/b.txt")).unwrap(), "WORLD");
            assert!(out.join("nested").is_dir());

            let expected = if live { BodyMode::Live } else { BodyMode::Materialized };
            assert_eq!(report.written[0].mode, expected);
            assert_eq!(report.written[1].mode, BodyMode::Absent);
            assert_eq!(report.stages[0].absent, 1);

            let a = &report.written[0].attributes;
            assert_eq!(a.get(KIND), Some(FILE));
            assert_eq!(a.get(SIZE), Some("9"));
            assert_eq!(report.written[1].attributes.get(KIND), Some(DIRECTORY));
        }
    }

    #[tokio::test]
    async fn test_absent_file_record_is_not_written_as_directory() {
        let dir = tempfile::tempdir().unwrap();
        let record = Record::empty(dir.path().join("in/unread.txt")).with_base(dir.path().join("in"));

        let written = write_output(&dir.path().join("out"), record).await.unwrap();
        assert_eq!(written.mode, BodyMode::Absent);
        assert_eq!(written.bytes, 0);
        assert!(!dir.path().join("out/unread.txt").exists());
    }

    #[tokio::test]
    async fn test_report_json_carries_attributes() {
        let dir = sample_tree();
        let config = config("[[stages]]\ntransform = \"uppercase\"\n");
        let report = execute(&config, &[dir.path().join("src/nested/b.txt")], &dir.path().join("out"), false)
            .await
            .unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["written"][0]["attributes"]["kind"], "file");
        assert_eq!(json["written"][0]["attributes"]["size"], "5");
        assert_eq!(json["written"][0]["mode"], "materialized");
    }

    #[tokio::test]
    async fn test_execute_single_file_sha256() {
        let dir = sample_tree();
        let config = config("[[stages]]\ntransform = \"sha256\"\n");
        let report = execute(&config, &[dir.path().join("src/a.txt")], &dir.path().join("out"), false)
            .await
            .unwrap();
        assert_eq!(report.written.len(), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("out/a.txt")).unwrap().len(),
            64
        );
    }

    #[test]
    fn test_format_report() {
        let report = RunReport {
            pipeline: "site".to_string(),
            written: vec![],
            failures: vec![Failure {
                path: PathBuf::from("x.txt"),
                stage: "stage-0".to_string(),
                error: "boom".to_string(),
            }],
            stages: vec![StageStats {
                stage: "stage-0".to_string(),
                errors: 1,
                ..StageStats::default()
            }],
        };
        let text = format_report(&report);
        assert!(text.starts_with("✓ site: 0 written, 1 failed"));
        assert!(text.contains("errors=1"));
        assert!(text.contains("✗ x.txt [stage-0]: boom"));
    }
}
