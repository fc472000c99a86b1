//! Built-in transforms wired as [`Mapper`]s.

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use filemap_core::{Convention, Metadata, TransformConfig};
use filemap_stage::Mapper;
use sha2::{Digest, Sha256};

/// `None` leaves the body unchanged.
type Transform = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Build a mapper for `config` using the given calling convention.
///
/// The async form runs the transform on a blocking task and completes the
/// callback from there.
pub fn build_mapper(config: &TransformConfig, convention: Convention) -> anyhow::Result<Mapper> {
    let transform = compile(config)?;
    let mapper = match convention {
        Convention::Sync => {
            Mapper::infallible(move |input: Bytes, _: &Metadata| transform(&input[..]))
        }
        Convention::Async => Mapper::asynchronous(move |input, _, done| {
            let transform = transform.clone();
            tokio::task::spawn_blocking(move || {
                done.ok(transform(&input[..]));
            });
        }),
    };
    Ok(mapper)
}

fn compile(config: &TransformConfig) -> anyhow::Result<Transform> {
    let transform: Transform = match config {
        TransformConfig::Uppercase => Arc::new(|input: &[u8]| Some(input.to_ascii_uppercase())),
        TransformConfig::Lowercase => Arc::new(|input: &[u8]| Some(input.to_ascii_lowercase())),
        TransformConfig::Trim => Arc::new(|input: &[u8]| Some(input.trim_ascii().to_vec())),
        TransformConfig::Replace { pattern, replacement } => {
            let re = regex::bytes::Regex::new(pattern)
                .with_context(|| format!("invalid replace pattern `{pattern}`"))?;
            let replacement = replacement.clone().into_bytes();
            Arc::new(move |input: &[u8]| {
                if !re.is_match(input) {
                    return None;
                }
                Some(re.replace_all(input, replacement.as_slice()).into_owned())
            })
        }
        TransformConfig::Prefix { text } => {
            let text = text.clone().into_bytes();
            Arc::new(move |input: &[u8]| Some([text.as_slice(), input].concat()))
        }
        TransformConfig::Suffix { text } => {
            let text = text.clone().into_bytes();
            Arc::new(move |input: &[u8]| Some([input, text.as_slice()].concat()))
        }
        TransformConfig::Sha256 => {
            Arc::new(|input: &[u8]| Some(hex::encode(Sha256::digest(input)).into_bytes()))
        }
    };
    Ok(transform)
}
