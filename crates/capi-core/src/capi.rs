//! CAPI request routing and handling
//!
//! [`route_capi_request`] turns method plus classified path into a
//! [`CapiOperation`]; [`handle_capi_request`] runs it against a
//! [`DocumentStore`] and renders the protocol response. Neither holds state
//! across requests.

use std::collections::HashMap;

use serde_json::json;
use tracing::{debug, error, trace};

use crate::behavior::DocumentStore;
use crate::error::{CapiError, Result};
use crate::guard::handle_pre_replicate;
use crate::path::{classify_path, CapiPath, DatabaseSpecial};
use crate::response::CapiResponse;
use crate::types::{BulkDocsRequest, Document, RevsDiffRequest};

/// Root special that validates checkpoint opaques.
pub const PRE_REPLICATE: &str = "_pre_replicate";
/// Root special that is accepted but never honored.
pub const COMMIT_FOR_CHECKPOINT: &str = "_commit_for_checkpoint";

/// A transport-independent CAPI request.
#[derive(Debug, Clone)]
pub struct CapiRequest {
    /// HTTP method, upper case
    pub method: String,
    /// Raw, still percent-encoded request path
    pub path: String,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    /// Request body
    pub body: Vec<u8>,
}

impl CapiRequest {
    /// Creates a request with no query and an empty body.
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Looks up a query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(|s| s.as_str())
    }

    /// True for `HEAD`, whose response must not carry a body.
    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }
}

/// Operation selected for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapiOperation {
    /// `GET /`
    Welcome,
    /// `POST /_pre_replicate`
    PreReplicate,
    /// `/_commit_for_checkpoint` or an unknown root special
    InertRootSpecial {
        /// The special segment
        special: String,
    },
    /// `GET|HEAD /{db}`
    GetDatabase {
        /// Database name
        db: String,
    },
    /// `POST /{db}/_ensure_full_commit`
    EnsureFullCommit {
        /// Database name
        db: String,
    },
    /// `POST /{db}/_revs_diff`
    RevsDiff {
        /// Database name
        db: String,
    },
    /// `POST /{db}/_bulk_docs`
    BulkDocs {
        /// Database name
        db: String,
    },
    /// `GET|HEAD /{db}/{docid}` or `/{db}/_local/{docid}`
    GetDocument {
        /// Database name
        db: String,
        /// Document id, `_local/` prefixed for local documents
        doc_id: String,
        /// Local (checkpoint) document
        local: bool,
    },
    /// `PUT /{db}/{docid}` or `/{db}/_local/{docid}`
    PutDocument {
        /// Database name
        db: String,
        /// Document id, `_local/` prefixed for local documents
        doc_id: String,
        /// Local (checkpoint) document
        local: bool,
    },
    /// Path shape no handler claims
    Unrecognized,
}

fn require_post(method: &str, resource: &str) -> Result<()> {
    if method == "POST" {
        Ok(())
    } else {
        Err(CapiError::method_not_allowed(method, resource))
    }
}

fn document_operation(method: &str, db: String, doc_id: String, local: bool) -> Result<CapiOperation> {
    match method {
        "GET" | "HEAD" => Ok(CapiOperation::GetDocument { db, doc_id, local }),
        "PUT" => Ok(CapiOperation::PutDocument { db, doc_id, local }),
        _ => Err(CapiError::method_not_allowed(
            method,
            if local { "local document" } else { "document" },
        )),
    }
}

/// Routes a request to the operation that serves it.
pub fn route_capi_request(req: &CapiRequest) -> Result<CapiOperation> {
    let method = req.method.as_str();

    match classify_path(&req.path)? {
        CapiPath::Root => match method {
            "GET" => Ok(CapiOperation::Welcome),
            _ => Err(CapiError::method_not_allowed(method, "/")),
        },
        CapiPath::RootSpecial { special } if special == PRE_REPLICATE => {
            require_post(method, PRE_REPLICATE)?;
            Ok(CapiOperation::PreReplicate)
        }
        CapiPath::RootSpecial { special } => Ok(CapiOperation::InertRootSpecial { special }),
        CapiPath::Database { db } => match method {
            "GET" | "HEAD" => Ok(CapiOperation::GetDatabase { db }),
            _ => Err(CapiError::method_not_allowed(method, "database")),
        },
        CapiPath::DatabaseSpecial { db, special } => match special {
            DatabaseSpecial::EnsureFullCommit => {
                require_post(method, "_ensure_full_commit")?;
                Ok(CapiOperation::EnsureFullCommit { db })
            }
            DatabaseSpecial::RevsDiff => {
                require_post(method, "_revs_diff")?;
                Ok(CapiOperation::RevsDiff { db })
            }
            DatabaseSpecial::BulkDocs => {
                require_post(method, "_bulk_docs")?;
                Ok(CapiOperation::BulkDocs { db })
            }
            DatabaseSpecial::Other(resource) => {
                debug!("unsupported special operation {} on {}", resource, db);
                Err(CapiError::NotImplemented { resource })
            }
        },
        CapiPath::Document { db, doc_id } => document_operation(method, db, doc_id, false),
        CapiPath::LocalDocument { db, doc_id } => document_operation(method, db, doc_id, true),
        CapiPath::Attachment { .. } | CapiPath::LocalAttachment { .. } => {
            Err(CapiError::Unsupported {
                feature: "attachments are not supported".to_string(),
            })
        }
        CapiPath::Unrecognized => Ok(CapiOperation::Unrecognized),
    }
}

fn decode_document(body: &[u8]) -> Result<Document> {
    match serde_json::from_slice(body)? {
        serde_json::Value::Object(doc) => Ok(doc),
        _ => Err(CapiError::malformed("document body must be a JSON object")),
    }
}

async fn execute(op: CapiOperation, req: &CapiRequest, store: &dyn DocumentStore) -> Result<CapiResponse> {
    match op {
        CapiOperation::Welcome => Ok(CapiResponse::ok(&store.welcome().await)),
        CapiOperation::PreReplicate => handle_pre_replicate(store, &req.body).await,
        CapiOperation::InertRootSpecial { special } => {
            debug!("got root special {}: {}", special, req.path);
            trace!(
                "root special request body was: '{}'",
                String::from_utf8_lossy(&req.body)
            );
            Err(CapiError::NotFound)
        }
        CapiOperation::GetDatabase { db } => {
            trace!("got {} request for database {}", req.method, db);
            if !store.database_exists(&db).await {
                return Err(CapiError::NotFound);
            }
            let details = store.database_details(&db).await.ok_or(CapiError::NotFound)?;
            Ok(CapiResponse::ok(&details))
        }
        CapiOperation::EnsureFullCommit { db } => {
            if store.ensure_full_commit(&db).await {
                Ok(CapiResponse::created(&json!({ "ok": true })))
            } else {
                Err(CapiError::NotFound)
            }
        }
        CapiOperation::RevsDiff { db } => {
            let revs: RevsDiffRequest = serde_json::from_slice(&req.body)?;
            trace!("revs diff for {} covers {} documents", db, revs.len());
            let diff = store.revs_diff(&db, revs).await?.ok_or(CapiError::NotFound)?;
            Ok(CapiResponse::ok(&diff))
        }
        CapiOperation::BulkDocs { db } => {
            let request: BulkDocsRequest = serde_json::from_slice(&req.body)?;
            trace!("bulk docs for {} carries {} documents", db, request.docs.len());
            let results = store
                .bulk_docs(&db, request.docs)
                .await?
                .ok_or(CapiError::NotFound)?;
            Ok(CapiResponse::created(&results))
        }
        CapiOperation::GetDocument { db, doc_id, local } => {
            trace!("got document request in database {} document {}", db, doc_id);
            let doc = if local {
                store.get_local_document(&db, &doc_id).await
            } else {
                store.get_document(&db, &doc_id).await
            };
            doc.map(|d| CapiResponse::ok(&d)).ok_or(CapiError::NotFound)
        }
        CapiOperation::PutDocument { db, doc_id, local } => {
            let doc = decode_document(&req.body)?;
            let rev = if local {
                store.store_local_document(&db, &doc_id, doc).await
            } else {
                store.store_document(&db, &doc_id, doc).await
            };
            let rev = rev.ok_or_else(|| CapiError::Behavior {
                reason: format!("storing {}/{} did not produce a revision", db, doc_id),
            })?;
            Ok(CapiResponse::created(
                &json!({ "ok": true, "id": doc_id, "rev": rev }),
            ))
        }
        CapiOperation::Unrecognized => {
            debug!("no handler for {}", req.path);
            Err(CapiError::NotFound)
        }
    }
}

/// Handles one CAPI request end to end. Never fails: every error is
/// rendered as its protocol response.
pub async fn handle_capi_request(req: &CapiRequest, store: &dyn DocumentStore) -> CapiResponse {
    let result = match route_capi_request(req) {
        Ok(op) => execute(op, req, store).await,
        Err(e) => Err(e),
    };

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            match &e {
                CapiError::Behavior { reason } => error!("{} {}: {}", req.method, req.path, reason),
                _ => debug!("{} {} failed: {}", req.method, req.path, e),
            }
            CapiResponse::from_error(&e)
        }
    };

    if req.is_head() {
        resp.without_body()
    } else {
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDocumentStore;
    use async_trait::async_trait;
    use serde_json::Value;

    const UUID: &str = "00000000000000000000000000000000";

    fn store() -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        store.create_database("default");
        store.set_vbucket_uuid("default", UUID);
        store
    }

    async fn run(store: &dyn DocumentStore, req: CapiRequest) -> (u16, Option<Value>) {
        let resp = handle_capi_request(&req, store).await;
        (resp.status, resp.body_json())
    }

    #[test]
    fn test_route_welcome() {
        let op = route_capi_request(&CapiRequest::new("GET", "/")).unwrap();
        assert_eq!(op, CapiOperation::Welcome);
        assert!(matches!(
            route_capi_request(&CapiRequest::new("POST", "/")),
            Err(CapiError::MethodNotAllowed { .. })
        ));
    }

    #[test]
    fn test_route_database_specials() {
        let op = route_capi_request(&CapiRequest::new("POST", "/default/_revs_diff")).unwrap();
        assert_eq!(op, CapiOperation::RevsDiff { db: "default".to_string() });
        let op = route_capi_request(&CapiRequest::new("POST", "/default/_bulk_docs")).unwrap();
        assert_eq!(op, CapiOperation::BulkDocs { db: "default".to_string() });
        assert!(matches!(
            route_capi_request(&CapiRequest::new("GET", "/default/_bulk_docs")),
            Err(CapiError::MethodNotAllowed { .. })
        ));
        assert!(matches!(
            route_capi_request(&CapiRequest::new("GET", "/default/_changes")),
            Err(CapiError::NotImplemented { .. })
        ));
    }

    #[test]
    fn test_route_documents() {
        let op = route_capi_request(&CapiRequest::new("PUT", "/default/_local/docid")).unwrap();
        assert_eq!(
            op,
            CapiOperation::PutDocument {
                db: "default".to_string(),
                doc_id: "_local/docid".to_string(),
                local: true
            }
        );
        let op = route_capi_request(&CapiRequest::new("HEAD", "/default/a%2Fb")).unwrap();
        assert_eq!(
            op,
            CapiOperation::GetDocument {
                db: "default".to_string(),
                doc_id: "a/b".to_string(),
                local: false
            }
        );
        assert!(matches!(
            route_capi_request(&CapiRequest::new("DELETE", "/default/doc")),
            Err(CapiError::MethodNotAllowed { .. })
        ));
    }

    #[test]
    fn test_route_attachments_unsupported() {
        for path in ["/default/doc/att", "/default/_local/doc/att"] {
            assert!(matches!(
                route_capi_request(&CapiRequest::new("GET", path)),
                Err(CapiError::Unsupported { .. })
            ));
        }
    }

    #[test]
    fn test_route_malformed_escape() {
        assert!(matches!(
            route_capi_request(&CapiRequest::new("GET", "/de%zzfault")),
            Err(CapiError::MalformedRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_welcome() {
        let (status, body) = run(&store(), CapiRequest::new("GET", "/")).await;
        assert_eq!(status, 200);
        assert_eq!(body.unwrap()["couchdb"], "Welcome");
    }

    #[tokio::test]
    async fn test_database_exists() {
        let store = store();
        let (status, body) = run(&store, CapiRequest::new("GET", "/default")).await;
        assert_eq!(status, 200);
        assert_eq!(body.unwrap(), json!({"db_name": "default"}));

        let (status, body) = run(&store, CapiRequest::new("GET", "/doesnotexist")).await;
        assert_eq!(status, 404);
        assert_eq!(body.unwrap(), json!({"error": "not_found", "reason": "missing"}));
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let store = store();
        let resp = handle_capi_request(&CapiRequest::new("HEAD", "/default"), &store).await;
        assert_eq!(resp.status, 200);
        assert!(resp.body.is_empty());
        let resp = handle_capi_request(&CapiRequest::new("HEAD", "/nope"), &store).await;
        assert_eq!(resp.status, 404);
        assert!(resp.body.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_full_commit() {
        let store = store();
        let (status, body) = run(&store, CapiRequest::new("POST", "/default/_ensure_full_commit")).await;
        assert_eq!(status, 201);
        assert_eq!(body.unwrap(), json!({"ok": true}));
        let (status, _) = run(&store, CapiRequest::new("POST", "/nope/_ensure_full_commit")).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_revs_diff() {
        let store = store();
        let req = CapiRequest::new("POST", "/default/_revs_diff")
            .with_body(r#"{"12345": ["1-abc", "2-def"]}"#);
        let (status, body) = run(&store, req).await;
        assert_eq!(status, 200);
        assert_eq!(body.unwrap(), json!({"12345": {"missing": ["1-abc", "2-def"]}}));

        let req = CapiRequest::new("POST", "/nope/_revs_diff").with_body("{}");
        assert_eq!(run(&store, req).await.0, 404);
    }

    #[tokio::test]
    async fn test_bulk_docs_preserves_order() {
        let store = store();
        let req = CapiRequest::new("POST", "/default/_bulk_docs").with_body(
            r#"{"docs": [{"_id": "abcdef", "_rev": "1-xyz"}, {"_id": "ghijkl", "_rev": "1-pdr"}]}"#,
        );
        let (status, body) = run(&store, req).await;
        assert_eq!(status, 201);
        assert_eq!(
            body.unwrap(),
            json!([{"id": "abcdef", "rev": "1-xyz"}, {"id": "ghijkl", "rev": "1-pdr"}])
        );
    }

    #[tokio::test]
    async fn test_bulk_docs_malformed_body() {
        let store = store();
        let req = CapiRequest::new("POST", "/default/_bulk_docs").with_body("{}");
        let (status, body) = run(&store, req).await;
        assert_eq!(status, 400);
        assert_eq!(body.unwrap()["error"], "bad_request");
    }

    #[tokio::test]
    async fn test_overloaded_is_503() {
        let store = store().with_max_concurrent_requests(0);
        let req = CapiRequest::new("POST", "/default/_revs_diff").with_body("{}");
        let (status, body) = run(&store, req).await;
        assert_eq!(status, 503);
        assert_eq!(body.unwrap()["error"], "service_unavailable");
    }

    #[tokio::test]
    async fn test_local_document_round_trip() {
        let store = store();
        let (status, body) = run(&store, CapiRequest::new("GET", "/default/_local/docid")).await;
        assert_eq!(status, 404);
        assert_eq!(body.unwrap(), json!({"error": "not_found", "reason": "missing"}));

        let put = CapiRequest::new("PUT", "/default/_local/docid").with_body(r#"{"seq": 7}"#);
        let (status, body) = run(&store, put).await;
        assert_eq!(status, 201);
        let body = body.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["id"], "_local/docid");
        let rev = body["rev"].as_str().unwrap().to_string();

        let (status, body) = run(&store, CapiRequest::new("GET", "/default/_local/docid")).await;
        assert_eq!(status, 200);
        let body = body.unwrap();
        assert_eq!(body["_id"], "_local/docid");
        assert_eq!(body["_rev"], rev.as_str());
        assert_eq!(body["seq"], 7);

        // local writes never leak into the regular namespace
        let (status, _) = run(&store, CapiRequest::new("GET", "/default/docid")).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn test_put_document_rejects_non_object() {
        let store = store();
        let req = CapiRequest::new("PUT", "/default/doc").with_body("[1, 2]");
        assert_eq!(run(&store, req).await.0, 400);
    }

    #[tokio::test]
    async fn test_pre_replicate_dispatch() {
        let store = store();
        let req = CapiRequest::new("POST", "/_pre_replicate")
            .with_body(format!(r#"{{"vb": 1, "bucket": "default", "vbopaque": "{}"}}"#, UUID));
        let (status, body) = run(&store, req).await;
        assert_eq!(status, 200);
        assert_eq!(body.unwrap(), json!({"vbopaque": UUID}));

        let req = CapiRequest::new("POST", "/_pre_replicate").with_body(r#"{"bucket": "default"}"#);
        assert_eq!(run(&store, req).await.0, 400);
    }

    #[tokio::test]
    async fn test_inert_specials_are_404() {
        let store = store();
        for path in ["/_commit_for_checkpoint", "/_something_else"] {
            let req = CapiRequest::new("POST", path).with_body(r#"{"vb": 1}"#);
            let (status, body) = run(&store, req).await;
            assert_eq!(status, 404);
            assert_eq!(body.unwrap()["reason"], "missing");
        }
    }

    #[tokio::test]
    async fn test_unknown_database_special_is_not_implemented() {
        let (status, body) = run(&store(), CapiRequest::new("GET", "/default/_changes")).await;
        assert_eq!(status, 501);
        let body = body.unwrap();
        assert_eq!(body["error"], "not_implemented");
        assert_ne!(body["reason"], "missing");
    }

    #[tokio::test]
    async fn test_unrecognized_path_is_404() {
        let (status, _) = run(&store(), CapiRequest::new("GET", "/a/b/c/d")).await;
        assert_eq!(status, 404);
    }

    struct NoRevisionStore;

    #[async_trait]
    impl DocumentStore for NoRevisionStore {
        async fn welcome(&self) -> Document {
            Document::new()
        }
        async fn database_exists(&self, _: &str) -> bool {
            true
        }
        async fn database_details(&self, _: &str) -> Option<Document> {
            None
        }
        async fn ensure_full_commit(&self, _: &str) -> bool {
            true
        }
        async fn revs_diff(
            &self,
            _: &str,
            _: RevsDiffRequest,
        ) -> std::result::Result<Option<crate::types::RevsDiffResponse>, crate::behavior::Overloaded>
        {
            Ok(None)
        }
        async fn bulk_docs(
            &self,
            _: &str,
            _: Vec<Document>,
        ) -> std::result::Result<Option<Vec<crate::types::BulkDocResult>>, crate::behavior::Overloaded>
        {
            Ok(None)
        }
        async fn get_document(&self, _: &str, _: &str) -> Option<Document> {
            None
        }
        async fn get_local_document(&self, _: &str, _: &str) -> Option<Document> {
            None
        }
        async fn store_document(&self, _: &str, _: &str, _: Document) -> Option<String> {
            None
        }
        async fn store_local_document(&self, _: &str, _: &str, _: Document) -> Option<String> {
            None
        }
        async fn vbucket_uuid(&self, _: &str, _: &str, _: u16) -> Option<String> {
            None
        }
        async fn stats(&self) -> Value {
            Value::Null
        }
    }

    #[tokio::test]
    async fn test_missing_revision_is_internal_error() {
        let req = CapiRequest::new("PUT", "/default/doc").with_body("{}");
        let (status, body) = run(&NoRevisionStore, req).await;
        assert_eq!(status, 500);
        assert_eq!(body.unwrap()["error"], "internal_error");
    }

    #[tokio::test]
    async fn test_database_vanishing_between_calls() {
        let (status, _) = run(&NoRevisionStore, CapiRequest::new("GET", "/default")).await;
        assert_eq!(status, 404);
    }
}
