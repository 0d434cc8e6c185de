//! Runs every configured compressor over one payload.
//!
//! All compressors for an output run concurrently inside the calling task.
//! A streamed payload is duplicated with [`tee`]; a whole value is shared by
//! reference count. A failing compressor is reported as a diagnostic and
//! never cuts its siblings short.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use futures::StreamExt;
use futures::future::{self, BoxFuture, FutureExt};
use tokio::io::AsyncWriteExt;

use crate::compress::{CompressInput, LoadedCompressor};
use crate::content::{Contents, SourceGuard, tee};
use crate::dev_deps::{DevDepSnapshot, DevDeps};
use crate::diagnostics::PluginDiagnostic;
use crate::fs::{FileSystem, WriteOptions, append_extension};
use crate::{Error, Result};

/// Services shared by every compressor branch of one write.
pub struct FanOut<'a> {
    pub fs: &'a dyn FileSystem,
    pub dev_deps: &'a dyn DevDeps,
    pub snapshot: &'a DevDepSnapshot,
    pub tee_capacity: usize,
}

impl FanOut<'_> {
    /// Run `compressors` over `contents` for the output at `path`.
    ///
    /// With no compressors the content is still read to the end and nothing
    /// is written. A read failure of the content itself is returned as
    /// [`Error::Io`]; compressor failures are collected into
    /// [`Error::Plugin`] once every branch has finished.
    pub async fn run(
        &self,
        contents: Contents,
        compressors: &[LoadedCompressor],
        path: &Path,
        options: WriteOptions,
    ) -> Result<()> {
        if compressors.is_empty() {
            tracing::debug!(path = %path.display(), "no compressors configured, skipping output");
            contents.drain().await?;
            return Ok(());
        }

        let guard = SourceGuard::default();
        let (pump, inputs) = split(guard.watch(contents), compressors.len(), self.tee_capacity);

        let branches = compressors
            .iter()
            .zip(inputs)
            .map(|(compressor, input)| self.run_compressor(compressor, input, path, options));
        let ((), outcomes) = future::join(pump, future::join_all(branches)).await;

        if let Some(err) = guard.take() {
            return Err(Error::Io(err));
        }

        let mut diagnostics = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(()) => {}
                Err(Error::Plugin(diags)) => diagnostics.extend(diags),
                Err(other) => return Err(other),
            }
        }

        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(Error::Plugin(diagnostics))
        }
    }

    async fn run_compressor(
        &self,
        compressor: &LoadedCompressor,
        input: Contents,
        path: &Path,
        options: WriteOptions,
    ) -> Result<()> {
        let started = Instant::now();
        let outcome = compress_and_write(compressor, input, path, options, self.fs).await;
        tracing::debug!(
            compressor = %compressor.name,
            path = %path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "compressor finished"
        );

        // Plugins may load their own dependencies while compressing.
        let request = self
            .dev_deps
            .create(&compressor.dev_dep_specifier(), self.snapshot)
            .await?;
        self.dev_deps.register(request).await?;

        outcome.map_err(|err| {
            Error::Plugin(vec![
                PluginDiagnostic::from_error(&err, &compressor.name).with_file(path),
            ])
        })
    }
}

/// Hand out one independent copy of the content per consumer.
fn split(
    contents: Contents,
    consumers: usize,
    capacity: usize,
) -> (BoxFuture<'static, ()>, Vec<Contents>) {
    match contents {
        Contents::Blob(bytes) => (
            future::ready(()).boxed(),
            std::iter::repeat_n(bytes, consumers)
                .map(Contents::Blob)
                .collect(),
        ),
        Contents::Stream(stream) if consumers > 1 => {
            let (pump, copies) = tee(stream, consumers, capacity);
            (pump.boxed(), copies.into_iter().map(Contents::Stream).collect())
        }
        stream => (future::ready(()).boxed(), vec![stream]),
    }
}

async fn compress_and_write(
    compressor: &LoadedCompressor,
    input: Contents,
    path: &Path,
    options: WriteOptions,
    fs: &dyn FileSystem,
) -> anyhow::Result<()> {
    let Some(compressed) = compressor.plugin.compress(CompressInput::new(input)).await? else {
        tracing::trace!(compressor = %compressor.name, "compressor declined");
        return Ok(());
    };

    let target = match &compressed.extension {
        Some(ext) => append_extension(path, ext),
        None => path.to_path_buf(),
    };

    match compressed.contents {
        Contents::Blob(bytes) => fs
            .write_file(&target, &bytes, options)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?,
        Contents::Stream(mut stream) => {
            let mut writer = fs
                .create_write_stream(&target, options)
                .await
                .with_context(|| format!("failed to create {}", target.display()))?;
            while let Some(chunk) = stream.next().await {
                writer
                    .write_all(&chunk?)
                    .await
                    .with_context(|| format!("failed to write {}", target.display()))?;
            }
            writer
                .shutdown()
                .await
                .with_context(|| format!("failed to finish {}", target.display()))?;
        }
    }

    Ok(())
}
