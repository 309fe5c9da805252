//! Wire types shared by the CAPI and cluster-map endpoints

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON document body as exchanged with the document store.
pub type Document = Map<String, Value>;

/// `_revs_diff` request: document id to candidate revisions.
pub type RevsDiffRequest = BTreeMap<String, Vec<String>>;

/// `_revs_diff` response: document id to the revisions the store lacks.
pub type RevsDiffResponse = BTreeMap<String, RevsDiffEntry>;

/// One entry of a `_revs_diff` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevsDiffEntry {
    /// Revisions the target does not have
    pub missing: Vec<String>,
}

/// `_bulk_docs` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkDocsRequest {
    /// Documents to insert, in order
    pub docs: Vec<Document>,
}

/// Per-document result of a `_bulk_docs` insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDocResult {
    /// Document id
    pub id: String,
    /// Stored revision
    pub rev: String,
}

/// A cluster node as reported by the topology collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Host name (usually `host:port`)
    pub hostname: String,
    /// Named ports, e.g. `direct`
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
    /// CAPI base URL; the bucket name is appended per response
    #[serde(rename = "couchApiBase")]
    pub couch_api_base: String,
    /// Any other fields the collaborator wants passed through
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeInfo {
    /// Creates a node with a single `direct` port.
    pub fn new(hostname: &str, couch_api_base: &str, direct_port: u16) -> Self {
        let mut ports = BTreeMap::new();
        ports.insert("direct".to_string(), direct_port);
        Self {
            hostname: hostname.to_string(),
            ports,
            couch_api_base: couch_api_base.to_string(),
            extra: Map::new(),
        }
    }
}

/// `_pre_replicate` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct PreReplicateRequest {
    /// vBucket id
    pub vb: Option<u16>,
    /// Bucket name
    pub bucket: Option<String>,
    /// Bucket uuid the client last saw
    #[serde(rename = "bucketUUID")]
    pub bucket_uuid: Option<String>,
    /// vBucket opaque from the client's checkpoint
    pub vbopaque: Option<String>,
    /// Commit opaque from the client's checkpoint
    pub commitopaque: Option<String>,
}

/// `_pre_replicate` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreReplicateResponse {
    /// Authoritative vBucket uuid
    pub vbopaque: String,
}

/// One entry of the `/pools` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    /// Pool name
    pub name: String,
    /// `/pools/<name>?uuid=<uuid>`
    pub uri: String,
}

/// `/pools` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolList {
    /// Known pools
    pub pools: Vec<PoolEntry>,
    /// Uuid of the default pool
    pub uuid: Option<String>,
}

/// Server list and vBucket map of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VBucketServerMap {
    /// Hostnames, sorted ascending
    #[serde(rename = "serverList")]
    pub server_list: Vec<String>,
    /// `[serverIndex, -1]` per vBucket
    #[serde(rename = "vBucketMap")]
    pub vbucket_map: Vec<[i64; 2]>,
}

/// Bucket detail record served by `/pools/default/buckets[/<name>]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketDetails {
    /// Bucket name
    pub name: String,
    /// Self link carrying the bucket uuid
    pub uri: String,
    /// Bucket uuid
    pub uuid: String,
    /// Always `membase`
    #[serde(rename = "bucketType")]
    pub bucket_type: String,
    /// Always empty
    #[serde(rename = "saslPassword")]
    pub sasl_password: String,
    /// Always `["couchapi"]`
    #[serde(rename = "bucketCapabilities")]
    pub bucket_capabilities: Vec<String>,
    /// Nodes, sorted by hostname, with bucket-relative API bases
    pub nodes: Vec<NodeInfo>,
    /// Server list and vBucket map
    #[serde(rename = "vBucketServerMap")]
    pub vbucket_server_map: VBucketServerMap,
}
