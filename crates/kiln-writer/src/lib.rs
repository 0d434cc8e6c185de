#![cfg_attr(docsrs, feature(doc_cfg))]

//! # kiln-writer
//!
//! Emits packaged bundles to disk.
//!
//! Packaging leaves placeholder hash-reference tokens in bundle names and
//! contents, because the final content hashes are only known once every
//! bundle is packaged. The writer resolves each bundle's final path,
//! replaces the tokens in its content (streaming when the content is large),
//! runs the configured compressors over the result and records what was
//! written so that unchanged bundles are skipped on the next run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! use kiln_writer::{
//!     Bundle, BundleWriter, CacheKeys, CompressorRegistry, DevDepGraph, Environment,
//!     MemoryCache, NativeFileSystem, PackagedBundleInfo, RequestTracker, Target, TokenMap,
//!     WriteRequest, WriterContext,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> kiln_writer::Result<()> {
//! let cache = Arc::new(MemoryCache::new());
//! cache.set_blob("content:app", "console.log('hi')");
//!
//! let writer = BundleWriter::new(WriterContext::new(
//!     ".",
//!     cache,
//!     Arc::new(NativeFileSystem),
//!     Arc::new(DevDepGraph::new()),
//! ));
//! let tracker = Arc::new(RequestTracker::discover(".", CompressorRegistry::with_builtins()));
//!
//! let request = WriteRequest {
//!     bundle: Bundle {
//!         id: "app".into(),
//!         name: "app.HASH_REF_0123456789abcdef.js".into(),
//!         hash_reference: "HASH_REF_0123456789abcdef".into(),
//!         bundle_type: "js".into(),
//!         target: Target { dist_dir: PathBuf::from("dist") },
//!         env: Environment::default(),
//!         main_entry: None,
//!     },
//!     info: PackagedBundleInfo {
//!         bundle_type: "js".into(),
//!         cache_keys: CacheKeys { content: "content:app".into(), map: None },
//!         hash_references: vec![],
//!         is_large_blob: false,
//!         hash: "c0ffee".into(),
//!         time: Some(12),
//!     },
//! };
//!
//! let tokens = Arc::new(TokenMap::from_iter([(
//!     "HASH_REF_0123456789abcdef",
//!     "5f2a9c1e0b7d4e3a8c6f1d2e9a0b3c4d",
//! )]));
//! for result in writer.write_bundles(&[request], &tokens, &tracker).await {
//!     println!("wrote {}", result?.file_path.display());
//! }
//! # Ok(()) }
//! ```

pub mod bundle;
pub mod cache;
pub mod compress;
pub mod config;
pub mod content;
pub mod dev_deps;
pub mod diagnostics;
pub mod fanout;
pub mod fs;
pub mod hash_ref;
pub mod replace;
pub mod request;
pub mod writer;

// Logging utilities (optional, enabled with "logging" feature)
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub use logging::{LogLevel, init_logging, init_logging_from_env};

pub use bundle::{
    Bundle, BundleContext, CacheKeys, Environment, PackagedBundleInfo, SourceMapOptions, Target,
};
pub use cache::{Cache, CacheError, CacheStore, MemoryCache};
pub use compress::{
    CompressInput, Compressed, Compressor, CompressorRegistry, LoadedCompressor, RawCompressor,
};
pub use config::{CompressorConfig, ProjectConfig};
pub use content::{ByteStream, Contents};
pub use dev_deps::{DevDepGraph, DevDepRequest, DevDepSnapshot, DevDepSpecifier, DevDeps};
pub use diagnostics::PluginDiagnostic;
pub use fs::{FileMetadata, FileSystem, NativeFileSystem, WriteOptions};
pub use hash_ref::{HASH_REF_LEN, HASH_REF_PREFIX, TokenMap, resolve_bundle_path};
pub use replace::{HashRefReplacer, replace_hash_refs, replace_stream};
pub use request::{BundleStats, RequestApi, RequestId, RequestScope, RequestTracker, WriteResult};
pub use writer::{BundleWriter, WriteRequest, WriterContext};

/// Error types for kiln-writer operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bundle's name embeds its own token but the token map has no
    /// entry for it.
    #[error("No hash for reference {hash_reference} of bundle {bundle_id}")]
    MissingHashReference {
        bundle_id: String,
        hash_reference: String,
    },

    /// One or more compressors failed.
    #[error("{}", format_plugin_error(.0))]
    Plugin(Vec<PluginDiagnostic>),

    /// A configured compressor name has no registered plugin.
    #[error("Unknown compressor: {name}")]
    UnknownCompressor {
        name: String,
        available: Vec<String>,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] kiln_config::ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for kiln-writer operations.
pub type Result<T> = std::result::Result<T, Error>;

fn format_plugin_error(diagnostics: &[PluginDiagnostic]) -> String {
    match diagnostics {
        [] => "Unknown compressor error".to_string(),
        [diag] => format!("Compressor error: {diag}"),
        many => format!(
            "{} compressor errors: {}",
            many.len(),
            many.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        ),
    }
}

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::MissingHashReference { .. } => "MISSING_HASH_REFERENCE",
            Error::Plugin(_) => "PLUGIN_ERROR",
            Error::UnknownCompressor { .. } => "UNKNOWN_COMPRESSOR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Cache(_) => "CACHE_ERROR",
            Error::Io(_) => "IO_ERROR",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::MissingHashReference { .. } => Some(Box::new(
                "Every bundle whose name contains its hash reference must have an entry in the token map. This is a bug in the packaging step.",
            )),
            Error::Plugin(diagnostics) => {
                if diagnostics.len() == 1 {
                    diagnostics[0]
                        .help
                        .as_ref()
                        .map(|h| Box::new(h.clone()) as Box<dyn std::fmt::Display>)
                } else {
                    Some(Box::new(diagnostics::format_plugin_diagnostics(
                        diagnostics,
                    )))
                }
            }
            Error::UnknownCompressor { available, .. } => Some(Box::new(format!(
                "Register the compressor before writing, or use one of: {}",
                available.join(", ")
            ))),
            Error::Config(err) => err
                .hint()
                .map(|h| Box::new(h.to_string()) as Box<dyn std::fmt::Display>),
            Error::Cache(CacheError::CacheMiss(key)) => Some(Box::new(format!(
                "Packaged content for '{key}' is missing from the cache. Clear the cache directory and rebuild."
            ))),
            _ => None,
        }
    }
}
