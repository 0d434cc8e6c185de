//! Project configuration as seen by the writer.

use std::path::Path;

use kiln_config::{CompressorPipelines, ConfigDiscovery, KilnConfig, WriterSettings};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::compress::{CompressorRegistry, LoadedCompressor};
use crate::dev_deps::DevDepSpecifier;
use crate::Result;

/// Resolved project configuration.
pub trait ProjectConfig: Send + Sync {
    /// Compressors to run, in order, for a project-relative output path.
    fn compressors(&self, relative_path: &str) -> Result<Vec<LoadedCompressor>>;

    /// Drop anything loaded from a plugin whose dev dependency changed.
    fn invalidate_plugin(&self, specifier: &DevDepSpecifier);

    fn writer_settings(&self) -> &WriterSettings;
}

/// [`ProjectConfig`] backed by `kiln.toml` rules and a compressor registry.
///
/// Resolved pipelines are memoized per output path until a plugin they use
/// is invalidated.
#[derive(Debug)]
pub struct CompressorConfig {
    pipelines: CompressorPipelines,
    settings: WriterSettings,
    registry: CompressorRegistry,
    resolved: RwLock<FxHashMap<String, Vec<LoadedCompressor>>>,
}

impl CompressorConfig {
    pub fn new(config: &KilnConfig, registry: CompressorRegistry) -> Result<Self> {
        Ok(Self {
            pipelines: config.pipelines()?,
            settings: config.writer.clone(),
            registry,
            resolved: RwLock::new(FxHashMap::default()),
        })
    }

    /// Discover configuration under `project_root`, falling back to defaults.
    pub fn load(project_root: &Path, registry: CompressorRegistry) -> Result<Self> {
        let config = ConfigDiscovery::new(project_root).load_or_default()?;
        Self::new(&config, registry)
    }

    /// Output paths with a memoized pipeline.
    pub fn resolved_paths(&self) -> usize {
        self.resolved.read().len()
    }
}

impl ProjectConfig for CompressorConfig {
    fn compressors(&self, relative_path: &str) -> Result<Vec<LoadedCompressor>> {
        if let Some(loaded) = self.resolved.read().get(relative_path) {
            return Ok(loaded.clone());
        }

        let loaded = self
            .pipelines
            .pipeline_for(relative_path)
            .iter()
            .map(|name| self.registry.load(name))
            .collect::<Result<Vec<_>>>()?;

        self.resolved
            .write()
            .insert(relative_path.to_string(), loaded.clone());
        Ok(loaded)
    }

    fn invalidate_plugin(&self, specifier: &DevDepSpecifier) {
        let mut resolved = self.resolved.write();
        let before = resolved.len();
        resolved.retain(|_, loaded| {
            !loaded
                .iter()
                .any(|c| c.name == specifier.specifier && c.resolve_from == specifier.resolve_from)
        });
        tracing::debug!(
            plugin = %specifier.specifier,
            dropped = before - resolved.len(),
            "invalidated compressor plugin"
        );
    }

    fn writer_settings(&self) -> &WriterSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::RawCompressor;
    use crate::Error;
    use kiln_config::CompressorRule;

    fn config(rules: Vec<CompressorRule>) -> KilnConfig {
        KilnConfig {
            compressors: rules,
            ..Default::default()
        }
    }

    fn registry() -> CompressorRegistry {
        let mut registry = CompressorRegistry::with_builtins();
        registry.register("gzip", "/plugins/gzip", RawCompressor);
        registry
    }

    fn names(loaded: &[LoadedCompressor]) -> Vec<&str> {
        loaded.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn resolves_pipeline_in_order() {
        let cfg = CompressorConfig::new(
            &config(vec![
                CompressorRule::new("*.js", ["...", "gzip"]),
                CompressorRule::new("*", ["raw"]),
            ]),
            registry(),
        )
        .unwrap();

        assert_eq!(names(&cfg.compressors("dist/app.js").unwrap()), ["raw", "gzip"]);
        assert_eq!(names(&cfg.compressors("dist/app.css").unwrap()), ["raw"]);
        assert_eq!(cfg.resolved_paths(), 2);
    }

    #[test]
    fn unknown_compressor_is_an_error() {
        let cfg =
            CompressorConfig::new(&config(vec![CompressorRule::new("*", ["zstd"])]), registry())
                .unwrap();
        assert!(matches!(
            cfg.compressors("a.js"),
            Err(Error::UnknownCompressor { .. })
        ));
    }

    #[test]
    fn invalidation_drops_only_affected_paths() {
        let cfg = CompressorConfig::new(
            &config(vec![
                CompressorRule::new("*.js", ["raw", "gzip"]),
                CompressorRule::new("*", ["raw"]),
            ]),
            registry(),
        )
        .unwrap();
        cfg.compressors("a.js").unwrap();
        cfg.compressors("a.css").unwrap();

        cfg.invalidate_plugin(&DevDepSpecifier::new("gzip", "/plugins/gzip"));
        assert_eq!(cfg.resolved_paths(), 1);
    }
}
