//! Transport-independent responses

use serde::Serialize;
use serde_json::json;

use crate::error::{CapiError, HTTP_CREATED, HTTP_INTERNAL_ERROR, HTTP_OK};

/// Content type of every JSON body.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Content type of the terse cluster-map errors.
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// A rendered response: status, optional content type and body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapiResponse {
    /// HTTP status code
    pub status: u16,
    /// Content type, `None` for an empty body
    pub content_type: Option<&'static str>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl CapiResponse {
    /// Empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Vec::new(),
        }
    }

    /// JSON response; serialization failures become a 500.
    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: Some(CONTENT_TYPE_JSON),
                body,
            },
            Err(e) => {
                tracing::error!("failed to encode response body: {}", e);
                Self::new(HTTP_INTERNAL_ERROR)
            }
        }
    }

    /// `200` with a JSON body.
    pub fn ok<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::json(HTTP_OK, value)
    }

    /// `201` with a JSON body.
    pub fn created<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::json(HTTP_CREATED, value)
    }

    /// Plain-text response.
    pub fn text(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: Some(CONTENT_TYPE_TEXT),
            body: message.as_bytes().to_vec(),
        }
    }

    /// Renders an error. Stale tokens get the terse plain-text body,
    /// everything else the `{error, reason}` object.
    pub fn from_error(err: &CapiError) -> Self {
        match err {
            CapiError::StaleToken { message } => Self::text(err.status(), message),
            _ => Self::json(
                err.status(),
                &json!({ "error": err.error_name(), "reason": err.reason() }),
            ),
        }
    }

    /// `404 {"error":"not_found","reason":"missing"}`
    pub fn not_found() -> Self {
        Self::from_error(&CapiError::NotFound)
    }

    /// Drops the body, keeping status and content type (HEAD).
    pub fn without_body(mut self) -> Self {
        self.body.clear();
        self
    }

    /// Body as JSON, for tests and logging.
    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

impl From<CapiError> for CapiResponse {
    fn from(err: CapiError) -> Self {
        Self::from_error(&err)
    }
}
