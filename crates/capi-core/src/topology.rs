//! Cluster-map synthesis for `/pools` and `/pools/default/buckets`
//!
//! Replication clients cache the vBucket map, so its shape must be stable
//! for a fixed node set: nodes are sorted by hostname, the server list is
//! sorted again as plain strings, and vBucket `i` is owned by server
//! `i % servers` with no replica.

use tracing::{debug, trace, warn};

use crate::behavior::ClusterTopology;
use crate::error::{CapiError, Result, HTTP_NOT_FOUND};
use crate::guard::{check_token, BUCKET_UUID_MISMATCH, CLUSTER_UUID_MISMATCH, DEFAULT_POOL};
use crate::response::CapiResponse;
use crate::types::{BucketDetails, Document, NodeInfo, PoolEntry, PoolList, VBucketServerMap};

/// Default number of vBuckets per bucket.
pub const DEFAULT_NUM_VBUCKETS: usize = 1024;

/// Replica slot value meaning "no replica".
pub const NO_REPLICA: i64 = -1;

/// Builds `[i % server_count, -1]` for every vBucket.
///
/// Returns `None` when there are no servers to own the vBuckets.
pub fn vbucket_map(server_count: usize, num_vbuckets: usize) -> Option<Vec<[i64; 2]>> {
    if server_count == 0 {
        return None;
    }
    Some(
        (0..num_vbuckets)
            .map(|i| [(i % server_count) as i64, NO_REPLICA])
            .collect(),
    )
}

/// Builds the bucket record from a snapshot of the pool's nodes.
///
/// The input is never modified; nodes are copied before their
/// `couchApiBase` gets the bucket name appended.
pub fn build_bucket_details(
    bucket: &str,
    nodes: &[NodeInfo],
    uuid: &str,
    num_vbuckets: usize,
) -> Result<BucketDetails> {
    let mut nodes = nodes.to_vec();
    nodes.sort_by(|a, b| a.hostname.cmp(&b.hostname));

    let mut server_list: Vec<String> = nodes.iter().map(|n| n.hostname.clone()).collect();
    for node in &mut nodes {
        node.couch_api_base = format!("{}{}", node.couch_api_base, bucket);
    }
    server_list.sort();

    let vbucket_map = vbucket_map(server_list.len(), num_vbuckets).ok_or_else(|| {
        debug!("bucket {} has no serving nodes", bucket);
        CapiError::NotFound
    })?;

    Ok(BucketDetails {
        name: bucket.to_string(),
        uri: format!("/pools/{}/buckets/{}?bucket_uuid={}", DEFAULT_POOL, bucket, uuid),
        uuid: uuid.to_string(),
        bucket_type: "membase".to_string(),
        sasl_password: String::new(),
        bucket_capabilities: vec!["couchapi".to_string()],
        nodes,
        vbucket_server_map: VBucketServerMap {
            server_list,
            vbucket_map,
        },
    })
}

/// Renders a cluster-map error. Unlike the CAPI endpoints these never use
/// the JSON error object: stale tokens carry a terse text body and absent
/// pools or buckets an empty one.
pub fn render_topology_error(err: &CapiError) -> CapiResponse {
    match err {
        CapiError::NotFound => CapiResponse::new(HTTP_NOT_FOUND),
        _ => CapiResponse::from_error(err),
    }
}

/// Read-only views over a [`ClusterTopology`].
#[derive(Debug, Clone, Copy)]
pub struct TopologySynthesizer {
    num_vbuckets: usize,
}

impl TopologySynthesizer {
    /// Creates a synthesizer; `num_vbuckets` must be positive.
    pub fn new(num_vbuckets: usize) -> Self {
        Self { num_vbuckets }
    }

    /// Configured vBucket count.
    pub fn num_vbuckets(&self) -> usize {
        self.num_vbuckets
    }

    /// `GET /pools`. Pool uuids are fetched fresh for every entry.
    pub async fn pool_list(&self, topology: &dyn ClusterTopology) -> PoolList {
        trace!("asked for pools");
        let mut pools = Vec::new();
        for name in topology.pools().await {
            let uuid = topology.pool_uuid(&name).await.unwrap_or_default();
            pools.push(PoolEntry {
                uri: format!("/pools/{}?uuid={}", name, uuid),
                name,
            });
        }
        PoolList {
            pools,
            uuid: topology.pool_uuid(DEFAULT_POOL).await,
        }
    }

    /// `GET /pools/{pool}`, gated by the optional `uuid` parameter.
    pub async fn pool_detail(
        &self,
        topology: &dyn ClusterTopology,
        pool: &str,
        uuid: Option<&str>,
    ) -> Result<Document> {
        trace!("asked for pool {}", pool);
        let details = topology.pool_details(pool).await.ok_or(CapiError::NotFound)?;
        if uuid.is_some() {
            let pool_uuid = topology.pool_uuid(pool).await;
            check_token(uuid, pool_uuid.as_deref(), CLUSTER_UUID_MISMATCH)?;
        }
        Ok(details)
    }

    /// `GET /pools/{pool}/buckets`, gated by the optional pool `uuid`.
    ///
    /// Buckets that vanish between listing and lookup, or that currently
    /// have no serving nodes, are left out of the list.
    pub async fn bucket_list(
        &self,
        topology: &dyn ClusterTopology,
        pool: &str,
        uuid: Option<&str>,
    ) -> Result<Vec<BucketDetails>> {
        trace!("asked for bucket list");
        let names = topology.buckets_in_pool(pool).await;
        if uuid.is_some() {
            let pool_uuid = topology.pool_uuid(pool).await;
            check_token(uuid, pool_uuid.as_deref(), CLUSTER_UUID_MISMATCH)?;
        }
        let names = names.ok_or(CapiError::NotFound)?;

        let mut buckets = Vec::with_capacity(names.len());
        for name in names {
            let Some(bucket_uuid) = topology.bucket_uuid(pool, &name).await else {
                debug!("bucket {} disappeared while listing", name);
                continue;
            };
            let nodes = topology.nodes_serving_pool(pool).await.unwrap_or_default();
            match build_bucket_details(&name, &nodes, &bucket_uuid, self.num_vbuckets) {
                Ok(details) => buckets.push(details),
                Err(_) => warn!("bucket {} has no serving nodes, leaving it out", name),
            }
        }
        Ok(buckets)
    }

    /// `GET /pools/{pool}/buckets/{bucket}`, gated by `bucket_uuid`.
    pub async fn bucket_detail(
        &self,
        topology: &dyn ClusterTopology,
        pool: &str,
        bucket: &str,
        bucket_uuid: Option<&str>,
    ) -> Result<BucketDetails> {
        let actual = topology
            .bucket_uuid(pool, bucket)
            .await
            .ok_or(CapiError::NotFound)?;
        let nodes = topology.nodes_serving_pool(pool).await;
        check_token(bucket_uuid, Some(&actual), BUCKET_UUID_MISMATCH)?;
        let nodes = nodes.ok_or(CapiError::NotFound)?;
        build_bucket_details(bucket, &nodes, &actual, self.num_vbuckets)
    }
}

impl Default for TopologySynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_NUM_VBUCKETS)
    }
}

/// Serializes any cluster-map view, mapping errors the cluster-map way.
pub fn render<T: serde::Serialize>(result: Result<T>) -> CapiResponse {
    match result {
        Ok(value) => CapiResponse::ok(&value),
        Err(err) => render_topology_error(&err),
    }
}
