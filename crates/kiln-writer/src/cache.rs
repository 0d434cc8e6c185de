//! Packaged content cache.
//!
//! Packaging stores bundle contents and source maps under cache keys; the
//! writer only reads them back. [`MemoryCache`] serves in-process builds and
//! tests. [`CacheStore`] is a persistent redb database that also keeps write
//! results between runs.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_config::WriterSettings;
use parking_lot::RwLock;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use rustc_hash::FxHashMap;

use crate::content::{ByteStream, chunked};
use crate::request::{RequestId, WriteResult};

/// Bumped whenever the stored layout changes. Older stores are cleared.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Chunk size used when a blob store is asked for a stream.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const BLOB_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

/// Request id → bincode-encoded [`WriteResult`].
const RESULT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("results");

const METADATA_TABLE: TableDefinition<&str, &str> = TableDefinition::new("metadata");

const FORMAT_VERSION_KEY: &str = "format_version";

/// Error types for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No entry under this key.
    #[error("cache miss: {0}")]
    CacheMiss(String),

    #[error("cache database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// A blocking cache task panicked or was cancelled.
    #[error("cache task failed: {0}")]
    TaskFailed(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

impl From<redb::Error> for CacheError {
    fn from(err: redb::Error) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

impl From<redb::DatabaseError> for CacheError {
    fn from(err: redb::DatabaseError) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

impl From<redb::TableError> for CacheError {
    fn from(err: redb::TableError) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

impl From<redb::TransactionError> for CacheError {
    fn from(err: redb::TransactionError) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

impl From<redb::StorageError> for CacheError {
    fn from(err: redb::StorageError) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

impl From<redb::CommitError> for CacheError {
    fn from(err: redb::CommitError) -> Self {
        CacheError::DatabaseError(err.to_string())
    }
}

/// Read access to packaged content.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn has(&self, key: &str) -> CacheResult<bool>;

    /// Whole value. [`CacheError::CacheMiss`] if absent.
    async fn get_blob(&self, key: &str) -> CacheResult<Bytes>;

    /// Sequential value. [`CacheError::CacheMiss`] if absent.
    async fn get_stream(&self, key: &str) -> CacheResult<ByteStream>;
}

/// In-memory cache.
///
/// Streams are served as zero-copy slices of the stored value.
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<FxHashMap<String, Bytes>>,
    chunk_size: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Streams chunked by `settings.stream_chunk_size`.
    pub fn from_settings(settings: &WriterSettings) -> Self {
        Self::with_chunk_size(settings.stream_chunk_size)
    }

    pub fn set_blob(&self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.entries.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    fn lookup(&self, key: &str) -> CacheResult<Bytes> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::CacheMiss(key.to_string()))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn has(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    async fn get_blob(&self, key: &str) -> CacheResult<Bytes> {
        self.lookup(key)
    }

    async fn get_stream(&self, key: &str) -> CacheResult<ByteStream> {
        Ok(chunked(self.lookup(key)?, self.chunk_size))
    }
}

/// Persistent cache store using redb.
///
/// Cloning is cheap and shares the database handle. The async [`Cache`]
/// methods run their transactions on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct CacheStore {
    db: Arc<Database>,
    chunk_size: usize,
}

impl CacheStore {
    /// Open or create a cache store at `<cache_dir>/cache.redb`.
    ///
    /// A store written with a different [`CACHE_FORMAT_VERSION`] is emptied.
    pub fn open(cache_dir: &Path) -> CacheResult<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let db = Database::create(cache_dir.join("cache.redb"))?;

        let write_txn = db.begin_write()?;
        {
            let mut metadata = write_txn.open_table(METADATA_TABLE)?;
            let expected = CACHE_FORMAT_VERSION.to_string();
            let found = metadata
                .get(FORMAT_VERSION_KEY)?
                .map(|v| v.value().to_string());

            if found.as_deref() != Some(expected.as_str()) {
                if found.is_some() {
                    tracing::debug!(?found, expected = %expected, "cache format changed, clearing store");
                    write_txn.delete_table(BLOB_TABLE)?;
                    write_txn.delete_table(RESULT_TABLE)?;
                }
                metadata.insert(FORMAT_VERSION_KEY, expected.as_str())?;
            }

            let _ = write_txn.open_table(BLOB_TABLE)?;
            let _ = write_txn.open_table(RESULT_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Open a store whose streams follow `settings.stream_chunk_size`.
    pub fn open_with_settings(cache_dir: &Path, settings: &WriterSettings) -> CacheResult<Self> {
        Ok(Self::open(cache_dir)?.with_chunk_size(settings.stream_chunk_size))
    }

    pub fn set_blob(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(BLOB_TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn blob(&self, key: &str) -> CacheResult<Bytes> {
        read_blob(&self.db, key)
    }

    pub fn contains(&self, key: &str) -> CacheResult<bool> {
        contains_blob(&self.db, key)
    }

    /// Persist the result of a completed write request.
    pub fn put_result(&self, id: &RequestId, result: &WriteResult) -> CacheResult<()> {
        let bytes = bincode::serialize(result)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RESULT_TABLE)?;
            table.insert(id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_result(&self, id: &RequestId) -> CacheResult<Option<WriteResult>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RESULT_TABLE)?;

        let Some(value) = table.get(id.as_str())? else {
            return Ok(None);
        };
        let result = bincode::deserialize(value.value())
            .map_err(|e| CacheError::DeserializationError(e.to_string()))?;
        Ok(Some(result))
    }

    pub fn remove_result(&self, id: &RequestId) -> CacheResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RESULT_TABLE)?;
            table.remove(id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Number of persisted write results.
    pub fn result_count(&self) -> CacheResult<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RESULT_TABLE)?;
        Ok(table.iter()?.count())
    }

    pub fn get_metadata(&self, key: &str) -> CacheResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(METADATA_TABLE)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    async fn blocking<T, F>(&self, f: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> CacheResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| CacheError::TaskFailed(e.to_string()))?
    }
}

fn read_blob(db: &Database, key: &str) -> CacheResult<Bytes> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(BLOB_TABLE)?;
    let value = table
        .get(key)?
        .ok_or_else(|| CacheError::CacheMiss(key.to_string()))?;
    Ok(Bytes::copy_from_slice(value.value()))
}

fn contains_blob(db: &Database, key: &str) -> CacheResult<bool> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(BLOB_TABLE)?;
    Ok(table.get(key)?.is_some())
}

#[async_trait]
impl Cache for CacheStore {
    async fn has(&self, key: &str) -> CacheResult<bool> {
        let key = key.to_string();
        self.blocking(move |db| contains_blob(db, &key)).await
    }

    async fn get_blob(&self, key: &str) -> CacheResult<Bytes> {
        let key = key.to_string();
        self.blocking(move |db| read_blob(db, &key)).await
    }

    // redb values are read whole; the stream is chunked from that copy.
    async fn get_stream(&self, key: &str) -> CacheResult<ByteStream> {
        let bytes = self.get_blob(key).await?;
        Ok(chunked(bytes, self.chunk_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::BundleStats;
    use futures::StreamExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_store() -> (CacheStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn result() -> WriteResult {
        WriteResult {
            file_path: PathBuf::from("dist/app.js"),
            bundle_type: "js".into(),
            stats: BundleStats { size: 42, time: 7 },
        }
    }

    #[tokio::test]
    async fn memory_cache_serves_blobs_and_streams() {
        let cache = MemoryCache::with_chunk_size(2);
        cache.set_blob("k", "hello");

        assert!(cache.has("k").await.unwrap());
        assert!(!cache.has("missing").await.unwrap());
        assert_eq!(cache.get_blob("k").await.unwrap(), "hello");

        let chunks: Vec<Bytes> = cache
            .get_stream("k")
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["he", "ll", "o"]);
    }

    #[tokio::test]
    async fn chunk_size_follows_writer_settings() {
        let settings = WriterSettings {
            stream_chunk_size: 3,
            ..Default::default()
        };
        let cache = MemoryCache::from_settings(&settings);
        cache.set_blob("k", "abcdefg");
        let chunks: Vec<Bytes> = cache
            .get_stream("k")
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["abc", "def", "g"]);

        let dir = TempDir::new().unwrap();
        let store = CacheStore::open_with_settings(dir.path(), &settings).unwrap();
        store.set_blob("k", b"abcdefg").unwrap();
        assert_eq!(store.get_stream("k").await.unwrap().count().await, 3);
    }

    #[tokio::test]
    async fn memory_cache_miss() {
        let cache = MemoryCache::new();
        assert!(matches!(
            cache.get_blob("nope").await,
            Err(CacheError::CacheMiss(key)) if key == "nope"
        ));
    }

    #[test]
    fn store_open_creates_database() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("new_cache");
        let store = CacheStore::open(&cache_dir).unwrap();

        assert!(cache_dir.join("cache.redb").exists());
        assert_eq!(
            store.get_metadata(FORMAT_VERSION_KEY).unwrap(),
            Some(CACHE_FORMAT_VERSION.to_string())
        );
    }

    #[tokio::test]
    async fn store_blobs_through_cache_trait() {
        let (store, _dir) = create_test_store();
        store.set_blob("content", b"0123456789").unwrap();

        let cache: &dyn Cache = &store;
        assert!(cache.has("content").await.unwrap());
        assert_eq!(cache.get_blob("content").await.unwrap(), "0123456789");
        assert!(matches!(
            cache.get_blob("other").await,
            Err(CacheError::CacheMiss(_))
        ));

        let store = store.with_chunk_size(4);
        let chunks: Vec<Bytes> = store
            .get_stream("content")
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn results_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = RequestId::from_hex("abc");
        {
            let store = CacheStore::open(dir.path()).unwrap();
            assert_eq!(store.get_result(&id).unwrap(), None);
            store.put_result(&id, &result()).unwrap();
        }

        let store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(store.get_result(&id).unwrap(), Some(result()));
        assert_eq!(store.result_count().unwrap(), 1);

        store.remove_result(&id).unwrap();
        assert_eq!(store.result_count().unwrap(), 0);
    }
}
