//! Shared test utilities for kiln-writer tests

#![allow(dead_code)]

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use kiln_config::{CompressorRule, KilnConfig};
use kiln_writer::{
    Bundle, BundleWriter, CacheKeys, CompressInput, Compressed, Compressor, CompressorConfig,
    CompressorRegistry, DevDepGraph, Environment, MemoryCache, NativeFileSystem,
    PackagedBundleInfo, RawCompressor, RequestTracker, Target, TokenMap, WriteRequest,
    WriterContext,
};
use tempfile::TempDir;

pub const APP_TOKEN: &str = "HASH_REF_0123456789abcdef";
pub const APP_HASH: &str = "5f2a9c1e0b7d4e3a8c6f1d2e9a0b3c4d";
pub const DEP_TOKEN: &str = "HASH_REF_fedcba9876543210";
pub const DEP_HASH: &str = "77d0b3aa41c8e29f605d7b3e1a9c8f24";

/// gzip at default level, written next to the original as `.gz`.
#[derive(Debug)]
pub struct GzipCompressor;

#[async_trait]
impl Compressor for GzipCompressor {
    async fn compress(&self, input: CompressInput) -> anyhow::Result<Option<Compressed>> {
        let bytes = input.bytes().await?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes)?;
        Ok(Some(Compressed::with_extension(encoder.finish()?, "gz")))
    }
}

#[derive(Debug)]
pub struct FailingCompressor;

#[async_trait]
impl Compressor for FailingCompressor {
    async fn compress(&self, _input: CompressInput) -> anyhow::Result<Option<Compressed>> {
        anyhow::bail!("compression level out of range")
    }
}

/// Raw output that counts its invocations.
#[derive(Debug, Clone, Default)]
pub struct CountingCompressor {
    pub calls: Arc<AtomicUsize>,
}

impl CountingCompressor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Compressor for CountingCompressor {
    async fn compress(&self, input: CompressInput) -> anyhow::Result<Option<Compressed>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        RawCompressor.compress(input).await
    }
}

pub fn gunzip(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
    out
}

pub fn test_registry() -> CompressorRegistry {
    let mut registry = CompressorRegistry::with_builtins();
    registry
        .register("gzip", "/plugins/gzip", GzipCompressor)
        .register("failing", "/plugins/failing", FailingCompressor);
    registry
}

/// A temporary project with an in-memory cache and real output directory.
pub struct TestProject {
    pub dir: TempDir,
    pub cache: Arc<MemoryCache>,
    pub dev_deps: Arc<DevDepGraph>,
    pub config: Arc<CompressorConfig>,
    pub writer: BundleWriter,
}

impl TestProject {
    pub fn new(rules: Vec<CompressorRule>) -> Self {
        Self::with_registry(rules, test_registry())
    }

    pub fn with_registry(rules: Vec<CompressorRule>, registry: CompressorRegistry) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let cache = Arc::new(MemoryCache::with_chunk_size(7));
        let dev_deps = Arc::new(DevDepGraph::new());
        let config = KilnConfig {
            compressors: rules,
            ..Default::default()
        };
        let config = Arc::new(CompressorConfig::new(&config, registry).expect("config"));
        let writer = BundleWriter::new(WriterContext::new(
            dir.path(),
            cache.clone(),
            Arc::new(NativeFileSystem),
            dev_deps.clone(),
        ));
        Self {
            dir,
            cache,
            dev_deps,
            config,
            writer,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn tracker(&self) -> Arc<RequestTracker> {
        Arc::new(RequestTracker::new(self.root(), self.config.clone()))
    }

    pub fn read(&self, relative: &str) -> Vec<u8> {
        std::fs::read(self.root().join(relative))
            .unwrap_or_else(|e| panic!("read {relative}: {e}"))
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.root().join(relative).exists()
    }
}

pub fn tokens() -> Arc<TokenMap> {
    Arc::new(TokenMap::from_iter([(APP_TOKEN, APP_HASH), (DEP_TOKEN, DEP_HASH)]))
}

/// `app.<token>.js` in `dist`, content stored under `app:content`.
pub fn app_request() -> WriteRequest {
    WriteRequest {
        bundle: Bundle {
            id: "app".into(),
            name: format!("app.{APP_TOKEN}.js"),
            hash_reference: APP_TOKEN.into(),
            bundle_type: "js".into(),
            target: Target {
                dist_dir: PathBuf::from("dist"),
            },
            env: Environment::default(),
            main_entry: None,
        },
        info: PackagedBundleInfo {
            bundle_type: "js".into(),
            cache_keys: CacheKeys {
                content: "app:content".into(),
                map: None,
            },
            hash_references: vec![DEP_TOKEN.into()],
            is_large_blob: false,
            hash: "content-v1".into(),
            time: Some(12),
        },
    }
}

pub fn app_source() -> String {
    format!("import {{ dep }} from './dep.{DEP_TOKEN}.js';\nconsole.log(dep);\n")
}

pub fn app_output() -> String {
    format!("import {{ dep }} from './dep.{DEP_HASH}.js';\nconsole.log(dep);\n")
}

pub fn app_path() -> String {
    format!("dist/app.{APP_HASH}.js")
}
