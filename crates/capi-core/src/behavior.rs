//! Collaborator capabilities
//!
//! The core never owns documents, databases or cluster membership. It
//! calls into a [`DocumentStore`] and a [`ClusterTopology`] supplied by the
//! embedding application and only shapes their answers into protocol
//! responses. Every call may suspend on I/O; callers drop the future when
//! the client goes away, so implementations must be abandon-safe.

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{BulkDocResult, Document, NodeInfo, RevsDiffRequest, RevsDiffResponse};

/// The store refused the call because it is at capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overloaded;

impl std::fmt::Display for Overloaded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("too many concurrent requests")
    }
}

impl From<Overloaded> for crate::error::CapiError {
    fn from(e: Overloaded) -> Self {
        crate::error::CapiError::Overloaded {
            reason: e.to_string(),
        }
    }
}

/// Document-store behavior behind the CAPI endpoints.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Body returned for `GET /`.
    async fn welcome(&self) -> Document;

    /// Whether the database exists.
    async fn database_exists(&self, database: &str) -> bool;

    /// Body returned for `GET /{db}`, or `None` if the database is gone.
    async fn database_details(&self, database: &str) -> Option<Document>;

    /// Flushes the database; `false` if the database is unknown.
    async fn ensure_full_commit(&self, database: &str) -> bool;

    /// Decides which of the offered revisions are missing.
    ///
    /// `Ok(None)` means the database is unknown.
    async fn revs_diff(
        &self,
        database: &str,
        revs: RevsDiffRequest,
    ) -> Result<Option<RevsDiffResponse>, Overloaded>;

    /// Inserts documents; one result per input, in input order.
    ///
    /// `Ok(None)` means the database is unknown.
    async fn bulk_docs(
        &self,
        database: &str,
        docs: Vec<Document>,
    ) -> Result<Option<Vec<BulkDocResult>>, Overloaded>;

    /// Looks up a regular document.
    async fn get_document(&self, database: &str, doc_id: &str) -> Option<Document>;

    /// Looks up a `_local/` document; `doc_id` carries the prefix.
    async fn get_local_document(&self, database: &str, doc_id: &str) -> Option<Document>;

    /// Stores a regular document and returns its new revision.
    async fn store_document(&self, database: &str, doc_id: &str, doc: Document)
        -> Option<String>;

    /// Stores a `_local/` document and returns its new revision.
    async fn store_local_document(
        &self,
        database: &str,
        doc_id: &str,
        doc: Document,
    ) -> Option<String>;

    /// Authoritative uuid of one vBucket, `None` for an unknown bucket.
    async fn vbucket_uuid(&self, pool: &str, bucket: &str, vbucket: u16) -> Option<String>;

    /// Free-form statistics for `/_stats`.
    async fn stats(&self) -> Value;
}

/// Cluster-membership behavior behind the `/pools` endpoints.
#[async_trait]
pub trait ClusterTopology: Send + Sync {
    /// Names of all pools.
    async fn pools(&self) -> Vec<String>;

    /// Current uuid of a pool.
    async fn pool_uuid(&self, pool: &str) -> Option<String>;

    /// Detail record of a pool, `None` if unknown.
    async fn pool_details(&self, pool: &str) -> Option<Document>;

    /// Buckets in a pool, `None` if the pool is unknown.
    async fn buckets_in_pool(&self, pool: &str) -> Option<Vec<String>>;

    /// Current uuid of a bucket, `None` if unknown.
    async fn bucket_uuid(&self, pool: &str, bucket: &str) -> Option<String>;

    /// Nodes serving every bucket of the pool.
    async fn nodes_serving_pool(&self, pool: &str) -> Option<Vec<NodeInfo>>;

    /// Free-form statistics for `/_stats`.
    async fn stats(&self) -> Value;
}
