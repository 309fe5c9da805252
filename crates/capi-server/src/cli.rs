use std::path::{Path, PathBuf};

use anyhow::Result;
use capi_core::types::{BucketDetails, PoolList};
use clap::{Parser, Subcommand};
use reqwest::{Client, Url};

use crate::api::CapiApi;
use crate::config::ServerConfig;

#[derive(Parser)]
#[command(name = "capi-server")]
#[command(about = "Couch API replication endpoint with Couchbase cluster-map emulation", long_about = None)]
pub struct Cli {
    /// Server queried by the client subcommands
    #[arg(short, long, default_value = "http://localhost:8091")]
    pub server: String,

    #[arg(short, long, env = "CAPI_USERNAME")]
    pub username: Option<String>,

    #[arg(short, long, env = "CAPI_PASSWORD")]
    pub password: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the server
    Serve {
        #[arg(short, long, default_value = "/etc/capi/capi.toml")]
        config: PathBuf,
    },
    /// List the pools of a running server
    Pools,
    /// Show the server list and vBucket map of a bucket
    Bucket { name: String },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve { ref config } => serve(config).await,
            Command::Pools => self.pools().await,
            Command::Bucket { ref name } => self.bucket(name).await,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.server)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("server URL cannot be a base: {}", self.server))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let mut request = Client::new().get(url);
        if let Some(ref username) = self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Request failed: {}", response.status());
        }
        Ok(response.json().await?)
    }

    async fn pools(&self) -> Result<()> {
        let pools: PoolList = self.get(self.url(&["pools"])?).await?;
        print!("{}", format_pools(&pools));
        Ok(())
    }

    async fn bucket(&self, name: &str) -> Result<()> {
        let url = self.url(&["pools", "default", "buckets", name])?;
        let bucket: BucketDetails = self.get(url).await?;
        print!("{}", format_bucket(&bucket));
        Ok(())
    }
}

async fn serve(config_path: &Path) -> Result<()> {
    let config = ServerConfig::load_or_default(config_path)?;
    config.validate()?;
    CapiApi::from_config(config).serve().await
}

pub fn format_pools(pools: &PoolList) -> String {
    let mut out = format!(
        "Cluster uuid: {}\n",
        pools.uuid.as_deref().unwrap_or("-")
    );
    for pool in &pools.pools {
        out.push_str(&format!("{:<16} {}\n", pool.name, pool.uri));
    }
    out
}

pub fn format_bucket(bucket: &BucketDetails) -> String {
    let mut out = format!("Bucket: {}\nUuid: {}\n", bucket.name, bucket.uuid);
    out.push_str(&format!(
        "vBuckets: {}\n",
        bucket.vbucket_server_map.vbucket_map.len()
    ));
    out.push_str("Servers:\n");
    for (i, server) in bucket.vbucket_server_map.server_list.iter().enumerate() {
        let owned = bucket
            .vbucket_server_map
            .vbucket_map
            .iter()
            .filter(|entry| entry[0] == i as i64)
            .count();
        out.push_str(&format!("  {:<24} {} vBuckets\n", server, owned));
    }
    out
}
