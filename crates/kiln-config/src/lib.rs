//! # kiln-config
//!
//! Project configuration for the kiln bundle writer.
//!
//! A project declares which compressors run for which output files, plus a
//! handful of writer settings. Configuration is layered with figment:
//! built-in defaults, then `kiln.toml` (or the `kiln` field of
//! `package.json`), then `KILN_*` environment variables.
//!
//! ```
//! use kiln_config::KilnConfig;
//! use serde_json::json;
//!
//! let config = KilnConfig::from_value(json!({
//!     "compressors": [
//!         { "pattern": "*.js", "pipeline": ["...", "gzip"] },
//!         { "pattern": "*", "pipeline": ["raw"] }
//!     ]
//! }))
//! .unwrap();
//!
//! let pipelines = config.pipelines().unwrap();
//! assert_eq!(pipelines.pipeline_for("dist/app.js"), vec!["raw", "gzip"]);
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod pipeline;
pub mod validation;

pub use config::{CompressorRule, KilnConfig, WriterSettings};
pub use discovery::{ConfigDiscovery, discover};
pub use error::{ConfigError, Result};
pub use pipeline::{CompressorPipelines, DEFAULT_COMPRESSOR, SPREAD};
pub use validation::{ConfigValidator, SchemaValidator};
