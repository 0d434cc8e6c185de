//! Development dependency tracking for compressor plugins.
//!
//! Every compressor that runs is recorded as a dev dependency of the write
//! request, so that a change to the plugin invalidates the outputs it
//! produced. Registration happens only after the plugin call has returned.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Identity of a plugin: what was asked for, and where it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevDepSpecifier {
    pub specifier: String,
    pub resolve_from: PathBuf,
}

impl DevDepSpecifier {
    pub fn new(specifier: impl Into<String>, resolve_from: impl Into<PathBuf>) -> Self {
        Self {
            specifier: specifier.into(),
            resolve_from: resolve_from.into(),
        }
    }
}

/// A dev dependency ready to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevDepRequest {
    pub specifier: DevDepSpecifier,
    pub hash: String,
}

/// Dev dependency state at the start of a write request.
#[derive(Debug, Clone, Default)]
pub struct DevDepSnapshot {
    /// Hashes of dev dependencies seen in earlier runs.
    pub known: FxHashMap<DevDepSpecifier, String>,

    /// Dev dependencies that changed since they were recorded.
    pub invalid: Vec<DevDepSpecifier>,
}

#[async_trait]
pub trait DevDeps: Send + Sync {
    async fn snapshot(&self) -> Result<DevDepSnapshot>;

    async fn create(
        &self,
        specifier: &DevDepSpecifier,
        snapshot: &DevDepSnapshot,
    ) -> Result<DevDepRequest>;

    async fn register(&self, request: DevDepRequest) -> Result<()>;
}

/// In-process dev dependency graph.
///
/// A plugin is hashed from its specifier and the contents of its
/// resolution path (when that path is a readable file).
#[derive(Debug, Default)]
pub struct DevDepGraph {
    known: RwLock<FxHashMap<DevDepSpecifier, String>>,
    invalid: RwLock<FxHashSet<DevDepSpecifier>>,
}

impl DevDepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag a dev dependency as changed. The next snapshot reports it.
    pub fn mark_invalid(&self, specifier: DevDepSpecifier) {
        self.invalid.write().insert(specifier);
    }

    /// Every registered dev dependency, sorted by specifier.
    ///
    /// Registering the same plugin again replaces its hash; there is one
    /// entry per plugin however many times it ran.
    pub fn registrations(&self) -> Vec<DevDepSpecifier> {
        let mut registered: Vec<_> = self.known.read().keys().cloned().collect();
        registered.sort_by(|a, b| {
            a.specifier
                .cmp(&b.specifier)
                .then_with(|| a.resolve_from.cmp(&b.resolve_from))
        });
        registered
    }

    pub fn is_registered(&self, specifier: &str) -> bool {
        self.known.read().keys().any(|s| s.specifier == specifier)
    }

    pub fn hash_of(&self, specifier: &DevDepSpecifier) -> Option<String> {
        self.known.read().get(specifier).cloned()
    }
}

async fn hash_dev_dep(specifier: &DevDepSpecifier) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(specifier.specifier.as_bytes());
    hasher.update(&[0]);
    hasher.update(specifier.resolve_from.to_string_lossy().as_bytes());
    if let Ok(source) = tokio::fs::read(&specifier.resolve_from).await {
        hasher.update(&[0]);
        hasher.update(&source);
    }
    hasher.finalize().to_hex().to_string()
}

#[async_trait]
impl DevDeps for DevDepGraph {
    async fn snapshot(&self) -> Result<DevDepSnapshot> {
        let mut invalid: Vec<_> = self.invalid.read().iter().cloned().collect();
        invalid.sort_by(|a, b| a.specifier.cmp(&b.specifier));
        Ok(DevDepSnapshot {
            known: self.known.read().clone(),
            invalid,
        })
    }

    async fn create(
        &self,
        specifier: &DevDepSpecifier,
        snapshot: &DevDepSnapshot,
    ) -> Result<DevDepRequest> {
        let stale = snapshot.invalid.contains(specifier);
        let hash = match snapshot.known.get(specifier) {
            Some(hash) if !stale => hash.clone(),
            _ => hash_dev_dep(specifier).await,
        };
        Ok(DevDepRequest {
            specifier: specifier.clone(),
            hash,
        })
    }

    async fn register(&self, request: DevDepRequest) -> Result<()> {
        tracing::trace!(specifier = %request.specifier.specifier, "registering dev dependency");
        self.invalid.write().remove(&request.specifier);
        self.known.write().insert(request.specifier, request.hash);
        Ok(())
    }
}
