use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use capi_core::guard::DEFAULT_POOL;
use capi_core::types::NodeInfo;
use capi_core::{MemoryDocumentStore, MemoryTopology, DEFAULT_NUM_VBUCKETS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration rejected by [`ServerConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("num_vbuckets must be positive")]
    NoVbuckets,
    #[error("username and password must be configured together")]
    PartialCredentials,
    #[error("max_concurrent_requests must be positive when set")]
    NoConcurrency,
}

/// A cluster node served by the in-memory topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub hostname: String,
    pub couch_api_base: String,
    #[serde(default)]
    pub ports: BTreeMap<String, u16>,
}

impl From<&NodeConfig> for NodeInfo {
    fn from(node: &NodeConfig) -> Self {
        NodeInfo {
            hostname: node.hostname.clone(),
            ports: node.ports.clone(),
            couch_api_base: node.couch_api_base.clone(),
            extra: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub num_vbuckets: usize,
    pub username: Option<String>,
    pub password: Option<String>,
    pub databases: Vec<String>,
    pub buckets: Vec<String>,
    pub pool_uuid: Option<String>,
    pub bucket_uuids: BTreeMap<String, String>,
    pub vbucket_uuids: BTreeMap<String, String>,
    pub nodes: Vec<NodeConfig>,
    pub max_concurrent_requests: Option<usize>,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8091)),
            num_vbuckets: DEFAULT_NUM_VBUCKETS,
            username: None,
            password: None,
            databases: vec![String::from("default")],
            buckets: vec![String::from("default")],
            pool_uuid: None,
            bucket_uuids: BTreeMap::new(),
            vbucket_uuids: BTreeMap::new(),
            nodes: Vec::new(),
            max_concurrent_requests: None,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: ServerConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!("Config file not found, using defaults: {}", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_vbuckets == 0 {
            return Err(ConfigError::NoVbuckets);
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::PartialCredentials);
        }
        if self.max_concurrent_requests == Some(0) {
            return Err(ConfigError::NoConcurrency);
        }
        Ok(())
    }

    /// Configured nodes, or a single node for this server's own address.
    pub fn effective_nodes(&self) -> Vec<NodeInfo> {
        if !self.nodes.is_empty() {
            return self.nodes.iter().map(NodeInfo::from).collect();
        }
        let port = self.bind_addr.port();
        let host = if self.bind_addr.ip().is_unspecified() {
            format!("127.0.0.1:{}", port)
        } else {
            self.bind_addr.to_string()
        };
        vec![NodeInfo::new(&host, &format!("http://{}/", host), port)]
    }

    /// Builds the in-memory document store described by this config.
    pub fn document_store(&self) -> MemoryDocumentStore {
        let mut store = MemoryDocumentStore::new();
        if let Some(max) = self.max_concurrent_requests {
            store = store.with_max_concurrent_requests(max);
        }
        for database in &self.databases {
            store.create_database(database);
        }
        for (bucket, uuid) in &self.vbucket_uuids {
            store.set_vbucket_uuid(bucket, uuid);
        }
        store
    }

    /// Builds the in-memory topology described by this config.
    pub fn topology(&self) -> MemoryTopology {
        let topology = MemoryTopology::new();
        if let Some(uuid) = &self.pool_uuid {
            topology.set_pool_uuid(DEFAULT_POOL, uuid);
        }
        for bucket in &self.buckets {
            let uuid = self.bucket_uuids.get(bucket).map(String::as_str);
            topology.add_bucket(DEFAULT_POOL, bucket, uuid);
        }
        for node in self.effective_nodes() {
            topology.add_node(DEFAULT_POOL, node);
        }
        topology
    }
}
