//! Opaque-token consistency checks
//!
//! Replication clients cache pool, bucket and vBucket uuids inside their
//! checkpoints. Every check here is plain string equality against the
//! value the collaborator reports right now; tokens are never parsed or
//! rewritten.

use tracing::debug;

use crate::behavior::DocumentStore;
use crate::error::{CapiError, Result, HTTP_BAD_REQUEST, HTTP_OK};
use crate::response::CapiResponse;
use crate::types::{PreReplicateRequest, PreReplicateResponse};

/// The only pool this server exposes.
pub const DEFAULT_POOL: &str = "default";

/// Terse body for a pool uuid mismatch.
pub const CLUSTER_UUID_MISMATCH: &str = "Cluster uuid does not match the requested.";
/// Terse body for a bucket uuid mismatch.
pub const BUCKET_UUID_MISMATCH: &str = "Bucket uuid does not match the requested.";

/// True when no token was supplied or it equals the authoritative one.
pub fn token_matches(supplied: Option<&str>, authoritative: Option<&str>) -> bool {
    match supplied {
        None => true,
        Some(token) => authoritative == Some(token),
    }
}

/// Fails with a plain-text `StaleToken` when a supplied token is stale.
pub fn check_token(
    supplied: Option<&str>,
    authoritative: Option<&str>,
    message: &str,
) -> Result<()> {
    if token_matches(supplied, authoritative) {
        Ok(())
    } else {
        Err(CapiError::StaleToken {
            message: message.to_string(),
        })
    }
}

/// A decoded `_pre_replicate` body with its required fields present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreReplicate {
    /// vBucket id
    pub vbucket: u16,
    /// Bucket name
    pub bucket: String,
    /// Bucket uuid the client last saw
    pub bucket_uuid: Option<String>,
    /// vBucket opaque from the client's checkpoint
    pub vbopaque: Option<String>,
    /// Commit opaque from the client's checkpoint
    pub commitopaque: Option<String>,
}

impl PreReplicate {
    /// Decodes the request body; `vb` and `bucket` are mandatory.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let raw: PreReplicateRequest = serde_json::from_slice(body)?;
        let vbucket = raw
            .vb
            .ok_or_else(|| CapiError::malformed("_pre_replicate requires 'vb'"))?;
        let bucket = raw
            .bucket
            .ok_or_else(|| CapiError::malformed("_pre_replicate requires 'bucket'"))?;
        Ok(Self {
            vbucket,
            bucket,
            bucket_uuid: raw.bucket_uuid,
            vbopaque: raw.vbopaque,
            commitopaque: raw.commitopaque,
        })
    }

    /// Checks both opaques; either mismatch is `BadOpaque`.
    pub fn validate(&self, vbucket_uuid: &str) -> Result<()> {
        let vb_ok = token_matches(self.vbopaque.as_deref(), Some(vbucket_uuid));
        let commit_ok = token_matches(self.commitopaque.as_deref(), Some(vbucket_uuid));
        if vb_ok && commit_ok {
            Ok(())
        } else {
            Err(CapiError::BadOpaque)
        }
    }
}

/// Handles `POST /_pre_replicate`.
///
/// The authoritative vBucket uuid is returned in every non-error body, so
/// a client holding a stale checkpoint can relearn it from the 400.
pub async fn handle_pre_replicate(store: &dyn DocumentStore, body: &[u8]) -> Result<CapiResponse> {
    let request = PreReplicate::decode(body)?;
    tracing::trace!("pre replicate parsed value is {:?}", request);

    let vbucket_uuid = store
        .vbucket_uuid(DEFAULT_POOL, &request.bucket, request.vbucket)
        .await
        .ok_or(CapiError::NotFound)?;

    if let Some(bucket_uuid) = &request.bucket_uuid {
        debug!(
            "pre replicate for bucket {} carries bucketUUID {}",
            request.bucket, bucket_uuid
        );
    }

    let status = match request.validate(&vbucket_uuid) {
        Ok(()) => HTTP_OK,
        Err(_) => {
            debug!(
                "pre replicate opaque mismatch for {}/{}, returning 400",
                request.bucket, request.vbucket
            );
            HTTP_BAD_REQUEST
        }
    };

    Ok(CapiResponse::json(
        status,
        &PreReplicateResponse {
            vbopaque: vbucket_uuid,
        },
    ))
}
