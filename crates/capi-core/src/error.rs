//! Error types for the CAPI core

use thiserror::Error;

/// HTTP status: OK
pub const HTTP_OK: u16 = 200;
/// HTTP status: created
pub const HTTP_CREATED: u16 = 201;
/// HTTP status: bad request
pub const HTTP_BAD_REQUEST: u16 = 400;
/// HTTP status: not found
pub const HTTP_NOT_FOUND: u16 = 404;
/// HTTP status: method not allowed
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
/// HTTP status: internal server error
pub const HTTP_INTERNAL_ERROR: u16 = 500;
/// HTTP status: not implemented
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
/// HTTP status: service unavailable
pub const HTTP_SERVICE_UNAVAILABLE: u16 = 503;

/// Failures raised while dispatching a CAPI or cluster-map request.
#[derive(Error, Debug)]
pub enum CapiError {
    /// Database, document, pool or bucket is absent
    #[error("not found")]
    NotFound,
    /// Caller-supplied pool or bucket uuid no longer matches
    #[error("stale token: {message}")]
    StaleToken {
        /// Plain-text explanation sent back to the client
        message: String,
    },
    /// Pre-replicate vbucket or commit opaque mismatch
    #[error("vbucket opaque does not match")]
    BadOpaque,
    /// Document store refused the request for capacity reasons
    #[error("service unavailable: {reason}")]
    Overloaded {
        /// Reason reported to the client
        reason: String,
    },
    /// Resource exists but does not accept this method
    #[error("method {method} not allowed on {resource}")]
    MethodNotAllowed {
        /// The rejected HTTP method
        method: String,
        /// The resource kind that was addressed
        resource: String,
    },
    /// Feature outside the compatibility surface (attachments)
    #[error("not supported: {feature}")]
    Unsupported {
        /// The unsupported feature
        feature: String,
    },
    /// Unknown `_` sub-resource
    #[error("not implemented: {resource}")]
    NotImplemented {
        /// The sub-resource segment
        resource: String,
    },
    /// Request could not be decoded
    #[error("malformed request: {reason}")]
    MalformedRequest {
        /// What was wrong with the request
        reason: String,
    },
    /// Collaborator violated its contract
    #[error("behavior error: {reason}")]
    Behavior {
        /// The contract violation
        reason: String,
    },
    /// JSON body decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CapiError {
    /// Converts the error to the HTTP status code sent to the peer.
    pub fn status(&self) -> u16 {
        match self {
            CapiError::NotFound => HTTP_NOT_FOUND,
            CapiError::StaleToken { .. } => HTTP_NOT_FOUND,
            CapiError::BadOpaque => HTTP_BAD_REQUEST,
            CapiError::Overloaded { .. } => HTTP_SERVICE_UNAVAILABLE,
            CapiError::MethodNotAllowed { .. } => HTTP_METHOD_NOT_ALLOWED,
            CapiError::Unsupported { .. } => HTTP_NOT_IMPLEMENTED,
            CapiError::NotImplemented { .. } => HTTP_NOT_IMPLEMENTED,
            CapiError::MalformedRequest { .. } => HTTP_BAD_REQUEST,
            CapiError::Behavior { .. } => HTTP_INTERNAL_ERROR,
            CapiError::Json(_) => HTTP_BAD_REQUEST,
        }
    }

    /// The `error` field of the JSON error body.
    pub fn error_name(&self) -> &'static str {
        match self {
            CapiError::NotFound | CapiError::StaleToken { .. } => "not_found",
            CapiError::BadOpaque => "bad_request",
            CapiError::Overloaded { .. } => "service_unavailable",
            CapiError::MethodNotAllowed { .. } => "method_not_allowed",
            CapiError::Unsupported { .. } => "not_supported",
            CapiError::NotImplemented { .. } => "not_implemented",
            CapiError::MalformedRequest { .. } | CapiError::Json(_) => "bad_request",
            CapiError::Behavior { .. } => "internal_error",
        }
    }

    /// The `reason` field of the JSON error body.
    pub fn reason(&self) -> String {
        match self {
            CapiError::NotFound => "missing".to_string(),
            CapiError::StaleToken { message } => message.clone(),
            CapiError::BadOpaque => "opaque mismatch".to_string(),
            CapiError::Overloaded { reason } => reason.clone(),
            CapiError::MethodNotAllowed { method, resource } => {
                format!("{} is not supported on {}", method, resource)
            }
            CapiError::Unsupported { feature } => feature.clone(),
            CapiError::NotImplemented { resource } => resource.clone(),
            CapiError::MalformedRequest { reason } => reason.clone(),
            CapiError::Behavior { reason } => reason.clone(),
            CapiError::Json(e) => e.to_string(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CapiError::MalformedRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn method_not_allowed(method: &str, resource: &str) -> Self {
        CapiError::MethodNotAllowed {
            method: method.to_string(),
            resource: resource.to_string(),
        }
    }
}

/// Result type alias using CapiError as the error type.
pub type Result<T> = std::result::Result<T, CapiError>;
