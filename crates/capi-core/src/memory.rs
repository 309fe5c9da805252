//! In-memory collaborators
//!
//! Reference implementations of [`DocumentStore`] and [`ClusterTopology`]
//! that keep everything in process memory. The server binary uses them when
//! no external store is wired in, and the test suites use them as doubles.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::behavior::{ClusterTopology, DocumentStore, Overloaded};
use crate::guard::DEFAULT_POOL;
use crate::types::{BulkDocResult, Document, NodeInfo, RevsDiffEntry, RevsDiffRequest, RevsDiffResponse};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Mints a 32-hex-character opaque uuid.
pub fn mint_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Generation number of a `N-hash` revision, 0 if unparsable.
fn revision_generation(rev: &str) -> u64 {
    rev.split_once('-')
        .and_then(|(generation, _)| generation.parse().ok())
        .unwrap_or(0)
}

fn stored_revision(doc: &Document) -> Option<&str> {
    doc.get("_rev").and_then(Value::as_str)
}

#[derive(Debug, Default)]
struct DatabaseState {
    docs: HashMap<String, Document>,
    local_docs: HashMap<String, Document>,
    commits: u64,
}

impl DatabaseState {
    fn store(&mut self, doc_id: &str, mut doc: Document, local: bool) -> String {
        let docs = if local {
            &mut self.local_docs
        } else {
            &mut self.docs
        };
        let generation = docs
            .get(doc_id)
            .and_then(stored_revision)
            .map(revision_generation)
            .unwrap_or(0);
        let rev = format!("{}-{}", generation + 1, mint_uuid());
        doc.insert("_id".to_string(), Value::String(doc_id.to_string()));
        doc.insert("_rev".to_string(), Value::String(rev.clone()));
        docs.insert(doc_id.to_string(), doc);
        rev
    }
}

#[derive(Debug, Default)]
struct StoreCounters {
    revs_diff: AtomicU64,
    bulk_docs: AtomicU64,
    docs_written: AtomicU64,
    rejected: AtomicU64,
}

/// Thread-safe in-memory document store.
pub struct MemoryDocumentStore {
    databases: Arc<RwLock<HashMap<String, DatabaseState>>>,
    vbucket_uuids: Arc<RwLock<HashMap<String, String>>>,
    permits: Option<Arc<Semaphore>>,
    counters: StoreCounters,
}

impl MemoryDocumentStore {
    /// Creates a store with no databases and no concurrency cap.
    pub fn new() -> Self {
        Self {
            databases: Arc::new(RwLock::new(HashMap::new())),
            vbucket_uuids: Arc::new(RwLock::new(HashMap::new())),
            permits: None,
            counters: StoreCounters::default(),
        }
    }

    /// Caps concurrent `_revs_diff`/`_bulk_docs` calls; excess calls are
    /// rejected as overloaded.
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.permits = Some(Arc::new(Semaphore::new(max)));
        self
    }

    /// Creates a database (and the bucket uuid of the same name) if absent.
    pub fn create_database(&self, database: &str) {
        write(&self.databases)
            .entry(database.to_string())
            .or_default();
        write(&self.vbucket_uuids)
            .entry(database.to_string())
            .or_insert_with(mint_uuid);
    }

    /// Overrides the vBucket uuid reported for every vBucket of a bucket.
    pub fn set_vbucket_uuid(&self, bucket: &str, uuid: &str) {
        write(&self.vbucket_uuids).insert(bucket.to_string(), uuid.to_string());
    }

    /// Number of databases.
    pub fn database_count(&self) -> usize {
        read(&self.databases).len()
    }

    fn acquire(&self) -> Result<Option<SemaphorePermit<'_>>, Overloaded> {
        match &self.permits {
            None => Ok(None),
            Some(permits) => permits.try_acquire().map(Some).map_err(|_| {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Overloaded
            }),
        }
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn welcome(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("couchdb".to_string(), json!("Welcome"));
        doc.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
        doc
    }

    async fn database_exists(&self, database: &str) -> bool {
        read(&self.databases).contains_key(database)
    }

    async fn database_details(&self, database: &str) -> Option<Document> {
        if !read(&self.databases).contains_key(database) {
            return None;
        }
        let mut doc = Document::new();
        doc.insert("db_name".to_string(), json!(database));
        Some(doc)
    }

    async fn ensure_full_commit(&self, database: &str) -> bool {
        match write(&self.databases).get_mut(database) {
            Some(db) => {
                db.commits += 1;
                true
            }
            None => false,
        }
    }

    async fn revs_diff(
        &self,
        database: &str,
        revs: RevsDiffRequest,
    ) -> Result<Option<RevsDiffResponse>, Overloaded> {
        let _permit = self.acquire()?;
        self.counters.revs_diff.fetch_add(1, Ordering::Relaxed);

        let databases = read(&self.databases);
        let Some(db) = databases.get(database) else {
            return Ok(None);
        };

        let response = revs
            .into_iter()
            .map(|(doc_id, candidates)| {
                let current = db.docs.get(&doc_id).and_then(stored_revision);
                let missing = candidates
                    .into_iter()
                    .filter(|rev| Some(rev.as_str()) != current)
                    .collect();
                (doc_id, RevsDiffEntry { missing })
            })
            .collect();
        Ok(Some(response))
    }

    async fn bulk_docs(
        &self,
        database: &str,
        docs: Vec<Document>,
    ) -> Result<Option<Vec<BulkDocResult>>, Overloaded> {
        let _permit = self.acquire()?;
        self.counters.bulk_docs.fetch_add(1, Ordering::Relaxed);

        let mut databases = write(&self.databases);
        let Some(db) = databases.get_mut(database) else {
            return Ok(None);
        };

        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc
                .get("_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(mint_uuid);
            let rev = match stored_revision(&doc) {
                Some(rev) => {
                    let rev = rev.to_string();
                    db.docs.insert(id.clone(), doc);
                    rev
                }
                None => db.store(&id, doc, false),
            };
            results.push(BulkDocResult { id, rev });
        }
        self.counters
            .docs_written
            .fetch_add(results.len() as u64, Ordering::Relaxed);
        Ok(Some(results))
    }

    async fn get_document(&self, database: &str, doc_id: &str) -> Option<Document> {
        read(&self.databases)
            .get(database)
            .and_then(|db| db.docs.get(doc_id).cloned())
    }

    async fn get_local_document(&self, database: &str, doc_id: &str) -> Option<Document> {
        read(&self.databases)
            .get(database)
            .and_then(|db| db.local_docs.get(doc_id).cloned())
    }

    async fn store_document(
        &self,
        database: &str,
        doc_id: &str,
        doc: Document,
    ) -> Option<String> {
        let rev = write(&self.databases)
            .get_mut(database)
            .map(|db| db.store(doc_id, doc, false))?;
        self.counters.docs_written.fetch_add(1, Ordering::Relaxed);
        Some(rev)
    }

    async fn store_local_document(
        &self,
        database: &str,
        doc_id: &str,
        doc: Document,
    ) -> Option<String> {
        write(&self.databases)
            .get_mut(database)
            .map(|db| db.store(doc_id, doc, true))
    }

    async fn vbucket_uuid(&self, _pool: &str, bucket: &str, _vbucket: u16) -> Option<String> {
        read(&self.vbucket_uuids).get(bucket).cloned()
    }

    async fn stats(&self) -> Value {
        let databases = read(&self.databases);
        let doc_count: usize = databases.values().map(|db| db.docs.len()).sum();
        json!({
            "databases": databases.len(),
            "doc_count": doc_count,
            "revs_diff_requests": self.counters.revs_diff.load(Ordering::Relaxed),
            "bulk_docs_requests": self.counters.bulk_docs.load(Ordering::Relaxed),
            "docs_written": self.counters.docs_written.load(Ordering::Relaxed),
            "rejected_requests": self.counters.rejected.load(Ordering::Relaxed),
        })
    }
}

#[derive(Debug, Clone)]
struct PoolState {
    uuid: String,
    buckets: BTreeMap<String, String>,
    nodes: Vec<NodeInfo>,
}

impl PoolState {
    fn new(uuid: String) -> Self {
        Self {
            uuid,
            buckets: BTreeMap::new(),
            nodes: Vec::new(),
        }
    }
}

/// Thread-safe in-memory cluster topology.
pub struct MemoryTopology {
    pools: RwLock<BTreeMap<String, PoolState>>,
}

impl MemoryTopology {
    /// Creates a topology holding an empty `default` pool.
    pub fn new() -> Self {
        let mut pools = BTreeMap::new();
        pools.insert(DEFAULT_POOL.to_string(), PoolState::new(mint_uuid()));
        Self {
            pools: RwLock::new(pools),
        }
    }

    /// Sets (or creates) a pool with the given uuid.
    pub fn set_pool_uuid(&self, pool: &str, uuid: &str) {
        write(&self.pools)
            .entry(pool.to_string())
            .and_modify(|p| p.uuid = uuid.to_string())
            .or_insert_with(|| PoolState::new(uuid.to_string()));
    }

    /// Adds a bucket to a pool, minting a uuid when none is given.
    /// Returns the bucket uuid.
    pub fn add_bucket(&self, pool: &str, bucket: &str, uuid: Option<&str>) -> String {
        let uuid = uuid.map(str::to_string).unwrap_or_else(mint_uuid);
        write(&self.pools)
            .entry(pool.to_string())
            .or_insert_with(|| PoolState::new(mint_uuid()))
            .buckets
            .insert(bucket.to_string(), uuid.clone());
        uuid
    }

    /// Adds a node serving every bucket of the pool.
    pub fn add_node(&self, pool: &str, node: NodeInfo) {
        write(&self.pools)
            .entry(pool.to_string())
            .or_insert_with(|| PoolState::new(mint_uuid()))
            .nodes
            .push(node);
    }

    /// Removes every node of a pool.
    pub fn clear_nodes(&self, pool: &str) {
        if let Some(state) = write(&self.pools).get_mut(pool) {
            state.nodes.clear();
        }
    }
}

impl Default for MemoryTopology {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterTopology for MemoryTopology {
    async fn pools(&self) -> Vec<String> {
        read(&self.pools).keys().cloned().collect()
    }

    async fn pool_uuid(&self, pool: &str) -> Option<String> {
        read(&self.pools).get(pool).map(|p| p.uuid.clone())
    }

    async fn pool_details(&self, pool: &str) -> Option<Document> {
        let pools = read(&self.pools);
        let state = pools.get(pool)?;
        let mut doc = Document::new();
        doc.insert("name".to_string(), json!(pool));
        doc.insert(
            "buckets".to_string(),
            json!({ "uri": format!("/pools/{}/buckets?uuid={}", pool, state.uuid) }),
        );
        Some(doc)
    }

    async fn buckets_in_pool(&self, pool: &str) -> Option<Vec<String>> {
        read(&self.pools)
            .get(pool)
            .map(|p| p.buckets.keys().cloned().collect())
    }

    async fn bucket_uuid(&self, pool: &str, bucket: &str) -> Option<String> {
        read(&self.pools)
            .get(pool)
            .and_then(|p| p.buckets.get(bucket).cloned())
    }

    async fn nodes_serving_pool(&self, pool: &str) -> Option<Vec<NodeInfo>> {
        read(&self.pools).get(pool).map(|p| p.nodes.clone())
    }

    async fn stats(&self) -> Value {
        let pools = read(&self.pools);
        json!({
            "pools": pools.len(),
            "buckets": pools.values().map(|p| p.buckets.len()).sum::<usize>(),
            "nodes": pools.values().map(|p| p.nodes.len()).sum::<usize>(),
        })
    }
}
