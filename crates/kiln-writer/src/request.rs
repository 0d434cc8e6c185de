//! Write requests: identity, results and invalidation.
//!
//! Every (bundle, packaging result) pair is one request. A request records
//! the paths whose deletion must force it to run again, reads the project
//! configuration through a memoized subrequest, and stores its result so an
//! unchanged bundle is not written twice.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::cache::CacheStore;
use crate::compress::CompressorRegistry;
use crate::config::{CompressorConfig, ProjectConfig};
use crate::Result;

/// Outcome of writing one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    /// Project-relative path of the main artifact.
    pub file_path: PathBuf,

    #[serde(rename = "type")]
    pub bundle_type: String,

    pub stats: BundleStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleStats {
    /// Bytes of packaged content read, before substitution.
    pub size: u64,

    /// Packaging time in milliseconds, 0 if unknown.
    pub time: u64,
}

/// Content-addressed identity of a write request (BLAKE3 hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(String);

impl RequestId {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Identity of writing `bundle_id` with the given content and final name.
    pub fn for_bundle(
        bundle_id: &str,
        content_hash: &str,
        name_hash: Option<&str>,
        final_name: &str,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in [bundle_id, content_hash, name_hash.unwrap_or(""), final_name] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Services available to a running write request.
#[async_trait]
pub trait RequestApi: Send + Sync {
    /// Re-run this request if `path` is deleted.
    fn invalidate_on_file_delete(&self, path: &Path);

    /// Project configuration, computed once and shared by all requests.
    async fn project_config(&self) -> Result<Arc<dyn ProjectConfig>>;

    async fn store_result(&self, result: &WriteResult) -> Result<()>;
}

enum ConfigSource {
    Fixed(Arc<dyn ProjectConfig>),
    Discover(CompressorRegistry),
}

#[derive(Debug, Default)]
struct RequestNode {
    watches: FxHashSet<PathBuf>,
    result: Option<WriteResult>,
}

/// Tracks write requests of a build session.
///
/// Holds per-request deletion watches and results, memoizes the project
/// configuration subrequest, and optionally persists results in a
/// [`CacheStore`] so they survive the process.
pub struct RequestTracker {
    project_root: PathBuf,
    config_source: ConfigSource,
    config: OnceCell<Arc<dyn ProjectConfig>>,
    config_runs: AtomicUsize,
    nodes: RwLock<FxHashMap<RequestId, RequestNode>>,
    /// Bundle id → the request that last wrote it.
    current: RwLock<FxHashMap<String, RequestId>>,
    store: Option<CacheStore>,
}

impl fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTracker")
            .field("project_root", &self.project_root)
            .field("requests", &self.nodes.read().len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl RequestTracker {
    /// Track requests against an already built configuration.
    pub fn new(project_root: impl Into<PathBuf>, config: Arc<dyn ProjectConfig>) -> Self {
        Self::with_source(project_root.into(), ConfigSource::Fixed(config))
    }

    /// Discover `kiln.toml` under the project root on first use.
    pub fn discover(project_root: impl Into<PathBuf>, registry: CompressorRegistry) -> Self {
        Self::with_source(project_root.into(), ConfigSource::Discover(registry))
    }

    fn with_source(project_root: PathBuf, config_source: ConfigSource) -> Self {
        Self {
            project_root,
            config_source,
            config: OnceCell::new(),
            config_runs: AtomicUsize::new(0),
            nodes: RwLock::new(FxHashMap::default()),
            current: RwLock::new(FxHashMap::default()),
            store: None,
        }
    }

    /// Persist results in `store`.
    pub fn with_store(mut self, store: CacheStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Start (or restart) the request writing `bundle_id`.
    ///
    /// Previous watches and result of `id` are cleared. A request that
    /// earlier wrote the same bundle under another identity is superseded:
    /// its node and persisted result are dropped.
    pub fn scope(self: &Arc<Self>, bundle_id: &str, id: RequestId) -> Result<RequestScope> {
        let superseded = self
            .current
            .write()
            .insert(bundle_id.to_string(), id.clone())
            .filter(|previous| *previous != id);

        {
            let mut nodes = self.nodes.write();
            if let Some(previous) = &superseded {
                nodes.remove(previous);
            }
            nodes.insert(id.clone(), RequestNode::default());
        }

        if let Some(previous) = &superseded {
            tracing::trace!(bundle = bundle_id, request = %previous, "request superseded");
            if let Some(store) = &self.store {
                store.remove_result(previous)?;
            }
        }

        Ok(RequestScope {
            tracker: self.clone(),
            id,
        })
    }

    /// Number of requests currently tracked in memory.
    pub fn request_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// A stored result that is still valid, if any.
    ///
    /// Results persisted by an earlier process are trusted only while the
    /// main artifact they describe is still on disk.
    pub fn cached_result(&self, id: &RequestId) -> Result<Option<WriteResult>> {
        if let Some(node) = self.nodes.read().get(id) {
            return Ok(node.result.clone());
        }

        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(result) = store.get_result(id)? else {
            return Ok(None);
        };

        if !self.project_root.join(&result.file_path).is_file() {
            tracing::debug!(request = %id, path = %result.file_path.display(), "persisted output missing");
            store.remove_result(id)?;
            return Ok(None);
        }

        Ok(Some(result))
    }

    /// Invalidate every request watching one of the deleted paths.
    ///
    /// Paths may be project-relative or absolute under the project root.
    /// Only exact matches count: deleting a directory does not invalidate
    /// watches on files inside it. Returns the invalidated requests.
    pub fn respond_to_deletions<I, P>(&self, deleted: I) -> Result<Vec<RequestId>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let deleted: FxHashSet<PathBuf> = deleted
            .into_iter()
            .map(|p| self.relative(p.as_ref()))
            .collect();

        let mut invalidated: Vec<RequestId> = {
            let mut nodes = self.nodes.write();
            let hit: Vec<RequestId> = nodes
                .iter()
                .filter(|(_, node)| node.watches.iter().any(|w| deleted.contains(w)))
                .map(|(id, _)| id.clone())
                .collect();
            for id in &hit {
                nodes.remove(id);
            }
            hit
        };
        if !invalidated.is_empty() {
            self.current
                .write()
                .retain(|_, id| !invalidated.contains(id));
        }
        invalidated.sort();

        if let Some(store) = &self.store {
            for id in &invalidated {
                store.remove_result(id)?;
            }
        }

        if !invalidated.is_empty() {
            tracing::debug!(count = invalidated.len(), "requests invalidated by deletion");
        }
        Ok(invalidated)
    }

    /// Deletion watches of a request, sorted.
    pub fn watches(&self, id: &RequestId) -> Vec<PathBuf> {
        let mut watches: Vec<PathBuf> = self
            .nodes
            .read()
            .get(id)
            .map(|node| node.watches.iter().cloned().collect())
            .unwrap_or_default();
        watches.sort();
        watches
    }

    /// How many times the configuration subrequest actually ran.
    pub fn config_runs(&self) -> usize {
        self.config_runs.load(Ordering::Relaxed)
    }

    async fn load_config(&self) -> Result<Arc<dyn ProjectConfig>> {
        let config = self
            .config
            .get_or_try_init(|| async {
                self.config_runs.fetch_add(1, Ordering::Relaxed);
                match &self.config_source {
                    ConfigSource::Fixed(config) => Ok(config.clone()),
                    ConfigSource::Discover(registry) => {
                        let config = CompressorConfig::load(&self.project_root, registry.clone())?;
                        Ok::<_, crate::Error>(Arc::new(config) as Arc<dyn ProjectConfig>)
                    }
                }
            })
            .await?;
        Ok(config.clone())
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.project_root)
            .unwrap_or(path)
            .to_path_buf()
    }
}

/// The [`RequestApi`] handed to one running request.
#[derive(Debug, Clone)]
pub struct RequestScope {
    tracker: Arc<RequestTracker>,
    id: RequestId,
}

impl RequestScope {
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

#[async_trait]
impl RequestApi for RequestScope {
    fn invalidate_on_file_delete(&self, path: &Path) {
        let path = self.tracker.relative(path);
        if let Some(node) = self.tracker.nodes.write().get_mut(&self.id) {
            node.watches.insert(path);
        }
    }

    async fn project_config(&self) -> Result<Arc<dyn ProjectConfig>> {
        self.tracker.load_config().await
    }

    async fn store_result(&self, result: &WriteResult) -> Result<()> {
        if let Some(node) = self.tracker.nodes.write().get_mut(&self.id) {
            node.result = Some(result.clone());
        }
        if let Some(store) = &self.tracker.store {
            store.put_result(&self.id, result)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn result(path: &str) -> WriteResult {
        WriteResult {
            file_path: PathBuf::from(path),
            bundle_type: "js".into(),
            stats: BundleStats { size: 3, time: 0 },
        }
    }

    fn tracker(root: &Path) -> Arc<RequestTracker> {
        Arc::new(RequestTracker::discover(
            root,
            CompressorRegistry::with_builtins(),
        ))
    }

    #[test]
    fn request_id_depends_on_every_part() {
        let base = RequestId::for_bundle("b1", "c1", Some("h1"), "app.h1.js");
        assert_eq!(base, RequestId::for_bundle("b1", "c1", Some("h1"), "app.h1.js"));
        assert_ne!(base, RequestId::for_bundle("b2", "c1", Some("h1"), "app.h1.js"));
        assert_ne!(base, RequestId::for_bundle("b1", "c2", Some("h1"), "app.h1.js"));
        assert_ne!(base, RequestId::for_bundle("b1", "c1", None, "app.h1.js"));
        assert_ne!(base, RequestId::for_bundle("b1", "c1", Some("h1"), "app.js"));
        assert_eq!(base.as_str().len(), 64);
    }

    #[test]
    fn write_result_serializes_type_field() {
        let json = serde_json::to_value(result("dist/app.js")).unwrap();
        assert_eq!(json["type"], "js");
        assert_eq!(json["stats"]["size"], 3);
    }

    #[tokio::test]
    async fn stored_result_until_deletion() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(dir.path());
        let id = RequestId::from_hex("r1");

        let scope = tracker.scope("app", id.clone()).unwrap();
        scope.invalidate_on_file_delete(Path::new("dist"));
        scope.invalidate_on_file_delete(&dir.path().join("dist/app.js"));
        scope.store_result(&result("dist/app.js")).await.unwrap();

        assert_eq!(
            tracker.watches(&id),
            vec![PathBuf::from("dist"), PathBuf::from("dist/app.js")]
        );
        assert!(tracker.cached_result(&id).unwrap().is_some());

        assert!(tracker.respond_to_deletions(["dist/other.js"]).unwrap().is_empty());
        assert_eq!(
            tracker.respond_to_deletions([dir.path().join("dist/app.js")]).unwrap(),
            vec![id.clone()]
        );
        assert!(tracker.cached_result(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn config_subrequest_runs_once() {
        let dir = TempDir::new().unwrap();
        let tracker = tracker(dir.path());
        let a = tracker.scope("a", RequestId::from_hex("a")).unwrap();
        let b = tracker.scope("b", RequestId::from_hex("b")).unwrap();

        let (first, second) = futures::join!(a.project_config(), b.project_config());
        first.unwrap();
        second.unwrap();
        assert_eq!(tracker.config_runs(), 1);
    }

    #[tokio::test]
    async fn persisted_results_need_their_output() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&dir.path().join(".kiln-cache")).unwrap();
        let id = RequestId::from_hex("r1");

        {
            let tracker = Arc::new(tracker_with_store(dir.path(), store.clone()));
            let scope = tracker.scope("app", id.clone()).unwrap();
            scope.store_result(&result("dist/app.js")).await.unwrap();
        }

        // Fresh session, output never written.
        let tracker = tracker_with_store(dir.path(), store.clone());
        assert!(tracker.cached_result(&id).unwrap().is_none());

        let tracker = Arc::new(tracker_with_store(dir.path(), store.clone()));
        tracker
            .scope("app", id.clone())
            .unwrap()
            .store_result(&result("dist/app.js"))
            .await
            .unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/app.js"), "x").unwrap();

        let tracker = tracker_with_store(dir.path(), store);
        assert_eq!(tracker.cached_result(&id).unwrap(), Some(result("dist/app.js")));
    }

    #[tokio::test]
    async fn new_identity_supersedes_previous_request() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(&dir.path().join(".kiln-cache")).unwrap();
        let tracker = Arc::new(tracker_with_store(dir.path(), store.clone()));

        let mut previous = None;
        for version in 0..50 {
            let id = RequestId::for_bundle("app", &format!("content-v{version}"), None, "app.js");
            tracker
                .scope("app", id.clone())
                .unwrap()
                .store_result(&result("dist/app.js"))
                .await
                .unwrap();
            previous = Some(id);
        }
        tracker
            .scope("vendor", RequestId::from_hex("vendor"))
            .unwrap()
            .store_result(&result("dist/vendor.js"))
            .await
            .unwrap();

        assert_eq!(tracker.request_count(), 2);
        assert_eq!(store.result_count().unwrap(), 2);
        let latest = previous.unwrap();
        assert!(tracker.cached_result(&latest).unwrap().is_some());
        let first = RequestId::for_bundle("app", "content-v0", None, "app.js");
        assert!(tracker.watches(&first).is_empty());
        assert_eq!(store.get_result(&first).unwrap(), None);
    }

    fn tracker_with_store(root: &Path, store: CacheStore) -> RequestTracker {
        RequestTracker::discover(root, CompressorRegistry::with_builtins()).with_store(store)
    }
}
