//! Config validation strategies.

use crate::config::KilnConfig;
use crate::error::{ConfigError, Result};
use crate::pipeline::{CompressorPipelines, SPREAD};

/// Trait for pluggable config validation strategies
pub trait ConfigValidator {
    fn validate(&self, config: &KilnConfig) -> Result<()>;
}

/// Structural validation (no filesystem or plugin registry checks).
///
/// # Example
///
/// ```
/// use kiln_config::{CompressorRule, ConfigValidator, KilnConfig, SchemaValidator};
///
/// let mut config = KilnConfig::default();
/// config.compressors.push(CompressorRule::new("*.js", ["...", "gzip"]));
///
/// SchemaValidator.validate(&config).unwrap();
/// ```
pub struct SchemaValidator;

impl ConfigValidator for SchemaValidator {
    fn validate(&self, config: &KilnConfig) -> Result<()> {
        for rule in &config.compressors {
            if rule.pattern.trim().is_empty() {
                return Err(ConfigError::SchemaValidation {
                    message: "compressor pattern cannot be empty".to_string(),
                    hint: Some("Use \"*\" to match every output file".to_string()),
                });
            }

            if rule.pipeline.iter().any(|name| name.trim().is_empty()) {
                return Err(ConfigError::SchemaValidation {
                    message: format!("pipeline for '{}' contains an empty name", rule.pattern),
                    hint: Some("Remove empty strings from the pipeline".to_string()),
                });
            }

            let spreads = rule.pipeline.iter().filter(|n| n.as_str() == SPREAD).count();
            if spreads > 1 {
                return Err(ConfigError::SchemaValidation {
                    message: format!(
                        "pipeline for '{}' uses \"...\" {} times",
                        rule.pattern, spreads
                    ),
                    hint: Some("A pipeline may extend the next match at most once".to_string()),
                });
            }
        }

        // Surfaces glob syntax errors at load time rather than first write.
        CompressorPipelines::compile(&config.compressors)?;

        if config.writer.tee_capacity == 0 {
            return Err(ConfigError::SchemaValidation {
                message: "writer.tee_capacity must be at least 1".to_string(),
                hint: None,
            });
        }

        if config.writer.stream_chunk_size == 0 {
            return Err(ConfigError::SchemaValidation {
                message: "writer.stream_chunk_size must be at least 1".to_string(),
                hint: None,
            });
        }

        Ok(())
    }
}
