//! Top-level configuration structure and layered loading.
//!
//! For locating config files on disk, see the `discovery` module.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format as _, Serialized, Toml};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConfigError, Result};
use crate::pipeline::CompressorPipelines;
use crate::validation::{ConfigValidator, SchemaValidator};

/// Prefix for environment overrides, e.g. `KILN_WRITER__TEE_CAPACITY=32`.
pub const ENV_PREFIX: &str = "KILN_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Ordered compressor rules. The first matching rule wins, `"..."`
    /// splices in the pipeline of the next matching rule.
    #[serde(default)]
    pub compressors: Vec<CompressorRule>,

    #[serde(default)]
    pub writer: WriterSettings,
}

/// Maps an output glob to an ordered list of compressor names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressorRule {
    pub pattern: String,
    pub pipeline: Vec<String>,
}

impl CompressorRule {
    pub fn new(
        pattern: impl Into<String>,
        pipeline: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            pipeline: pipeline.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterSettings {
    /// Chunks buffered per consumer when a streamed payload is duplicated
    /// for several compressors.
    #[serde(default = "default_tee_capacity")]
    pub tee_capacity: usize,

    /// Chunk size used when a blob store serves content as a stream.
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: usize,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            tee_capacity: default_tee_capacity(),
            stream_chunk_size: default_stream_chunk_size(),
        }
    }
}

fn default_tee_capacity() -> usize {
    16
}

fn default_stream_chunk_size() -> usize {
    64 * 1024
}

impl KilnConfig {
    /// Create from a `serde_json::Value` (programmatic config).
    pub fn from_value(value: Value) -> Result<Self> {
        let config: KilnConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue {
                field: "config".to_string(),
                hint: Some(e.to_string()),
            })?;
        SchemaValidator.validate(&config)?;
        Ok(config)
    }

    /// Load a TOML file layered over defaults and `KILN_*` environment
    /// variables.
    pub fn load_toml(path: &Path) -> Result<Self> {
        Self::extract(Figment::new().merge(Toml::file(path)))
    }

    /// Load from an already-parsed value (e.g. the `kiln` field of
    /// `package.json`) layered the same way as [`KilnConfig::load_toml`].
    pub fn load_value(value: Value) -> Result<Self> {
        Self::extract(Figment::new().merge(Serialized::defaults(value)))
    }

    fn extract(source: Figment) -> Result<Self> {
        let config: KilnConfig = Figment::new()
            .merge(Serialized::defaults(KilnConfig::default()))
            .merge(source)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        SchemaValidator.validate(&config)?;
        tracing::debug!(
            rules = config.compressors.len(),
            tee_capacity = config.writer.tee_capacity,
            "loaded kiln config"
        );
        Ok(config)
    }

    /// Compile the compressor rules into glob matchers.
    pub fn pipelines(&self) -> Result<CompressorPipelines> {
        CompressorPipelines::compile(&self.compressors)
    }
}
