//! HTTP Basic authentication
//!
//! Replication clients authenticate with the cluster administrator's
//! credentials on every request. A request that fails to verify gets a
//! `401` challenge.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use subtle::ConstantTimeEq;

/// Realm sent in the `WWW-Authenticate` challenge.
pub const REALM: &str = "Couchbase Server Admin / REST";

/// Constant-time byte comparison; different lengths never match.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Splits an `Authorization: Basic ...` header into user and password.
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// The single administrator account.
#[derive(Debug, Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Checks an `Authorization` header value.
    pub fn verify(&self, header: Option<&str>) -> bool {
        let Some((user, password)) = header.and_then(parse_basic_auth) else {
            return false;
        };
        // both halves are always compared
        let user_ok = constant_time_eq(user.as_bytes(), self.username.as_bytes());
        let password_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());
        user_ok & password_ok
    }
}

/// State of the authentication layer.
pub struct BasicAuth {
    credentials: Credentials,
}

impl BasicAuth {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

fn challenge() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, format!("Basic realm=\"{}\"", REALM))],
        "Unauthorized",
    )
        .into_response()
}

pub async fn basic_auth_middleware(
    State(auth): State<Arc<BasicAuth>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if auth.credentials.verify(header) {
        return next.run(request).await;
    }

    tracing::warn!("rejected unauthenticated {} {}", request.method(), request.uri().path());
    challenge()
}
