//! Bundle write coordination.
//!
//! One write request per (bundle, packaging result): resolve the final
//! path, fetch the packaged content, replace hash references, fan out to the
//! compressors and record the result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future;
use tracing::instrument;

use crate::bundle::{Bundle, PackagedBundleInfo};
use crate::cache::Cache;
use crate::config::ProjectConfig;
use crate::content::{ByteCounter, Contents};
use crate::dev_deps::{DevDepSnapshot, DevDeps};
use crate::fanout::FanOut;
use crate::fs::{FileSystem, WriteOptions, append_extension};
use crate::hash_ref::{TokenMap, resolve_bundle_path};
use crate::replace::replace_contents;
use crate::request::{BundleStats, RequestApi, RequestId, RequestTracker, WriteResult};
use crate::Result;

/// Services the writer depends on.
#[derive(Clone)]
pub struct WriterContext {
    /// Root that project-relative paths are resolved against.
    pub project_root: PathBuf,
    pub cache: Arc<dyn Cache>,
    /// Used to read main entry metadata.
    pub input_fs: Arc<dyn FileSystem>,
    /// Receives every output file.
    pub output_fs: Arc<dyn FileSystem>,
    pub dev_deps: Arc<dyn DevDeps>,
}

impl WriterContext {
    /// Context reading and writing through the same filesystem.
    pub fn new(
        project_root: impl Into<PathBuf>,
        cache: Arc<dyn Cache>,
        fs: Arc<dyn FileSystem>,
        dev_deps: Arc<dyn DevDeps>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            cache,
            input_fs: fs.clone(),
            output_fs: fs,
            dev_deps,
        }
    }

    pub fn with_input_fs(mut self, input_fs: Arc<dyn FileSystem>) -> Self {
        self.input_fs = input_fs;
        self
    }
}

/// A bundle and its packaging result.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub bundle: Bundle,
    pub info: PackagedBundleInfo,
}

pub struct BundleWriter {
    ctx: WriterContext,
}

impl BundleWriter {
    pub fn new(ctx: WriterContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &WriterContext {
        &self.ctx
    }

    /// Write many bundles concurrently.
    ///
    /// A request whose identity already has a valid result is not run again;
    /// its stored result is returned instead. Results are in request order.
    pub async fn write_bundles(
        &self,
        requests: &[WriteRequest],
        tokens: &Arc<TokenMap>,
        tracker: &Arc<RequestTracker>,
    ) -> Vec<Result<WriteResult>> {
        future::join_all(
            requests
                .iter()
                .map(|request| self.write_tracked(request, tokens, tracker)),
        )
        .await
    }

    async fn write_tracked(
        &self,
        request: &WriteRequest,
        tokens: &Arc<TokenMap>,
        tracker: &Arc<RequestTracker>,
    ) -> Result<WriteResult> {
        let WriteRequest { bundle, info } = request;
        let resolved = resolve_bundle_path(bundle, &info.bundle_type, tokens)?;
        let id = RequestId::for_bundle(
            &bundle.id,
            &info.hash,
            resolved.name.name_hash.as_deref(),
            &resolved.name.name,
        );

        if let Some(result) = tracker.cached_result(&id)? {
            tracing::debug!(bundle = %bundle.id, path = %result.file_path.display(), "bundle unchanged");
            return Ok(result);
        }

        let scope = tracker.scope(&bundle.id, id)?;
        self.write_bundle(bundle, info, tokens, &scope).await
    }

    /// Write one bundle and its external source map.
    #[instrument(skip_all, fields(bundle = %bundle.id))]
    pub async fn write_bundle(
        &self,
        bundle: &Bundle,
        info: &PackagedBundleInfo,
        tokens: &Arc<TokenMap>,
        api: &dyn RequestApi,
    ) -> Result<WriteResult> {
        let file_path = resolve_bundle_path(bundle, &info.bundle_type, tokens)?.file_path;
        let map_path = append_extension(&file_path, "map");
        let map_key = info
            .cache_keys
            .map
            .as_deref()
            .filter(|_| bundle.env.has_external_source_map());

        api.invalidate_on_file_delete(&bundle.target.dist_dir);
        api.invalidate_on_file_delete(&file_path);
        if map_key.is_some() {
            api.invalidate_on_file_delete(&map_path);
        }

        let full_path = self.ctx.project_root.join(&file_path);
        if let Some(dir) = full_path.parent() {
            self.ctx.output_fs.mkdirp(dir).await?;
        }

        let options = self.write_options(bundle).await?;

        let counter = ByteCounter::default();
        let contents = if info.is_large_blob {
            Contents::Stream(self.ctx.cache.get_stream(&info.cache_keys.content).await?)
        } else {
            Contents::Blob(self.ctx.cache.get_blob(&info.cache_keys.content).await?)
        }
        .measured(&counter);

        let config = api.project_config().await?;
        let snapshot = self.dev_dep_snapshot(config.as_ref()).await?;

        self.write_files(contents, info, tokens, config.as_ref(), &file_path, options, &snapshot)
            .await?;

        if let Some(key) = map_key {
            if self.ctx.cache.has(key).await? {
                let map = Contents::Blob(self.ctx.cache.get_blob(key).await?);
                self.write_files(map, info, tokens, config.as_ref(), &map_path, options, &snapshot)
                    .await?;
            }
        }

        let result = WriteResult {
            file_path,
            bundle_type: info.bundle_type.clone(),
            stats: BundleStats {
                size: counter.get(),
                time: info.time.unwrap_or(0),
            },
        };
        api.store_result(&result).await?;

        tracing::info!(
            path = %result.file_path.display(),
            size = result.stats.size,
            "wrote bundle"
        );
        Ok(result)
    }

    /// Permission bits copied from the main entry for non-browser targets.
    async fn write_options(&self, bundle: &Bundle) -> Result<WriteOptions> {
        match &bundle.main_entry {
            Some(entry) if !bundle.env.is_browser() => {
                let metadata = self
                    .ctx
                    .input_fs
                    .stat(&self.ctx.project_root.join(entry))
                    .await?;
                Ok(WriteOptions {
                    mode: metadata.mode,
                })
            }
            _ => Ok(WriteOptions::default()),
        }
    }

    async fn dev_dep_snapshot(&self, config: &dyn ProjectConfig) -> Result<DevDepSnapshot> {
        let snapshot = self.ctx.dev_deps.snapshot().await?;
        for specifier in &snapshot.invalid {
            tracing::warn!(
                plugin = %specifier.specifier,
                resolve_from = %specifier.resolve_from.display(),
                "compressor changed, reloading"
            );
            config.invalidate_plugin(specifier);
        }
        Ok(snapshot)
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_files(
        &self,
        contents: Contents,
        info: &PackagedBundleInfo,
        tokens: &Arc<TokenMap>,
        config: &dyn ProjectConfig,
        file_path: &Path,
        options: WriteOptions,
        snapshot: &DevDepSnapshot,
    ) -> Result<()> {
        let compressors = config.compressors(&file_path.to_string_lossy())?;
        let contents = if info.has_hash_references() {
            replace_contents(contents, tokens)
        } else {
            contents
        };

        FanOut {
            fs: self.ctx.output_fs.as_ref(),
            dev_deps: self.ctx.dev_deps.as_ref(),
            snapshot,
            tee_capacity: config.writer_settings().tee_capacity,
        }
        .run(
            contents,
            &compressors,
            &self.ctx.project_root.join(file_path),
            options,
        )
        .await
    }
}
