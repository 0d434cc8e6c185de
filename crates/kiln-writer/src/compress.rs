//! Compressor plugin interface and registry.
//!
//! A compressor turns the final bundle content into an output artifact.
//! Several compressors may run for the same file (for example the raw
//! content plus a gzip copy); each receives its own view of the content.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;

use crate::content::{ByteStream, Contents};
use crate::dev_deps::DevDepSpecifier;
use crate::{Error, Result};

/// Content handed to a single compressor invocation.
///
/// Offers a whole-value view and a sequential view. Only one can be taken,
/// and the sequential view is not built until asked for.
#[derive(Debug)]
pub struct CompressInput {
    contents: Contents,
}

impl CompressInput {
    pub fn new(contents: Contents) -> Self {
        Self { contents }
    }

    /// The content arrived as a stream and was not buffered.
    pub fn is_streamed(&self) -> bool {
        self.contents.is_stream()
    }

    /// Collect into a single value.
    pub async fn bytes(self) -> io::Result<Bytes> {
        self.contents.into_bytes().await
    }

    pub fn into_stream(self) -> ByteStream {
        self.contents.into_stream()
    }

    pub fn into_contents(self) -> Contents {
        self.contents
    }
}

/// What a compressor produced.
#[derive(Debug)]
pub struct Compressed {
    pub contents: Contents,

    /// Appended to the output path as `.<ext>`. `None` replaces the
    /// original artifact.
    pub extension: Option<String>,
}

impl Compressed {
    /// Output written at the original path.
    pub fn replace(contents: impl Into<Contents>) -> Self {
        Self {
            contents: contents.into(),
            extension: None,
        }
    }

    /// Output written next to the original with an extra extension.
    pub fn with_extension(contents: impl Into<Contents>, extension: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            extension: Some(extension.into()),
        }
    }
}

/// A compressor plugin.
///
/// Returning `Ok(None)` declines: nothing is written for this plugin.
/// Errors are reported as diagnostics tagged with the plugin's name and do
/// not affect other compressors running for the same file.
#[async_trait]
pub trait Compressor: Send + Sync + fmt::Debug {
    async fn compress(&self, input: CompressInput) -> anyhow::Result<Option<Compressed>>;
}

/// Writes the content as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCompressor;

#[async_trait]
impl Compressor for RawCompressor {
    async fn compress(&self, input: CompressInput) -> anyhow::Result<Option<Compressed>> {
        Ok(Some(Compressed::replace(input.into_contents())))
    }
}

/// A compressor resolved by name for a particular output.
#[derive(Debug, Clone)]
pub struct LoadedCompressor {
    pub name: String,
    pub resolve_from: PathBuf,
    pub plugin: Arc<dyn Compressor>,
}

impl LoadedCompressor {
    pub fn dev_dep_specifier(&self) -> DevDepSpecifier {
        DevDepSpecifier::new(self.name.clone(), self.resolve_from.clone())
    }
}

#[derive(Debug, Clone)]
struct Registration {
    resolve_from: PathBuf,
    plugin: Arc<dyn Compressor>,
}

/// Name → compressor lookup.
///
/// # Example
///
/// ```
/// use kiln_writer::compress::{CompressorRegistry, RawCompressor};
///
/// let mut registry = CompressorRegistry::with_builtins();
/// registry.register("identity", "plugins/identity", RawCompressor);
///
/// assert!(registry.load("raw").is_ok());
/// assert!(registry.load("identity").is_ok());
/// assert!(registry.load("brotli").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompressorRegistry {
    plugins: FxHashMap<String, Registration>,
}

impl CompressorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `raw` registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            kiln_config::DEFAULT_COMPRESSOR,
            env!("CARGO_MANIFEST_DIR"),
            RawCompressor,
        );
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        resolve_from: impl AsRef<Path>,
        plugin: impl Compressor + 'static,
    ) -> &mut Self {
        self.register_shared(name, resolve_from, Arc::new(plugin))
    }

    pub fn register_shared(
        &mut self,
        name: impl Into<String>,
        resolve_from: impl AsRef<Path>,
        plugin: Arc<dyn Compressor>,
    ) -> &mut Self {
        self.plugins.insert(
            name.into(),
            Registration {
                resolve_from: resolve_from.as_ref().to_path_buf(),
                plugin,
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn load(&self, name: &str) -> Result<LoadedCompressor> {
        let registration = self
            .plugins
            .get(name)
            .ok_or_else(|| Error::UnknownCompressor {
                name: name.to_string(),
                available: self.names().into_iter().map(String::from).collect(),
            })?;

        Ok(LoadedCompressor {
            name: name.to_string(),
            resolve_from: registration.resolve_from.clone(),
            plugin: registration.plugin.clone(),
        })
    }
}
