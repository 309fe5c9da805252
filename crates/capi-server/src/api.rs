use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use capi_core::guard::DEFAULT_POOL;
use capi_core::topology::render;
use capi_core::{
    handle_capi_request, CapiRequest, CapiResponse, ClusterTopology, DocumentStore,
    TopologySynthesizer,
};
use tower_http::trace::TraceLayer;

use crate::auth::{basic_auth_middleware, BasicAuth, Credentials};
use crate::config::ServerConfig;
use crate::stats::{stats_middleware, ServerStats};

/// Query parameters in request order, repeated names included.
type QueryPairs = Vec<(String, String)>;

/// First value of `name`; later repeats are ignored.
fn first_param<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// The HTTP surface: cluster-map routes plus the CAPI fallback.
#[derive(Clone)]
pub struct CapiApi {
    store: Arc<dyn DocumentStore>,
    topology: Arc<dyn ClusterTopology>,
    synthesizer: TopologySynthesizer,
    config: Arc<ServerConfig>,
    stats: Arc<ServerStats>,
    auth: Option<Arc<BasicAuth>>,
}

impl CapiApi {
    pub fn new(
        config: Arc<ServerConfig>,
        store: Arc<dyn DocumentStore>,
        topology: Arc<dyn ClusterTopology>,
    ) -> Self {
        let auth = match (&config.username, &config.password) {
            (Some(user), Some(password)) => {
                Some(Arc::new(BasicAuth::new(Credentials::new(user, password))))
            }
            _ => None,
        };
        Self {
            store,
            topology,
            synthesizer: TopologySynthesizer::new(config.num_vbuckets),
            config,
            stats: Arc::new(ServerStats::new()),
            auth,
        }
    }

    /// Serves the in-memory collaborators described by `config`.
    pub fn from_config(config: ServerConfig) -> Self {
        let store = Arc::new(config.document_store());
        let topology = Arc::new(config.topology());
        Self::new(Arc::new(config), store, topology)
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    pub fn router(self: Arc<Self>) -> Router {
        let mut router = Router::new()
            .route("/pools", get(pools_handler))
            .route("/pools/", get(pools_handler))
            .route("/pools/default/buckets", get(bucket_list_handler))
            .route("/pools/default/buckets/", get(bucket_list_handler))
            .route("/pools/default/buckets/:bucket", get(bucket_detail_handler))
            .route("/pools/:pool", get(pool_detail_handler))
            .route("/_stats", get(stats_handler))
            .fallback(capi_handler)
            .with_state(self.clone());

        if let Some(auth) = &self.auth {
            router = router.layer(axum::middleware::from_fn_with_state(
                auth.clone(),
                basic_auth_middleware,
            ));
        }

        router
            .layer(axum::middleware::from_fn_with_state(
                self.stats.clone(),
                stats_middleware,
            ))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(TraceLayer::new_for_http())
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.config.bind_addr;
        if self.auth.is_none() {
            tracing::warn!("CAPI server is running without authentication, set username and password in config");
        }
        let router = Arc::new(self).router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("CAPI server listening on {}", addr);

        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// Converts a core response into an HTTP response.
pub fn into_http(resp: CapiResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Body::from(resp.body)).into_response();
    if let Some(content_type) = resp.content_type {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    response
}

async fn pools_handler(State(api): State<Arc<CapiApi>>) -> Response {
    let pools = api.synthesizer.pool_list(api.topology.as_ref()).await;
    into_http(CapiResponse::ok(&pools))
}

async fn pool_detail_handler(
    State(api): State<Arc<CapiApi>>,
    Path(pool): Path<String>,
    Query(query): Query<QueryPairs>,
) -> Response {
    let result = api
        .synthesizer
        .pool_detail(api.topology.as_ref(), &pool, first_param(&query, "uuid"))
        .await;
    into_http(render(result))
}

async fn bucket_list_handler(
    State(api): State<Arc<CapiApi>>,
    Query(query): Query<QueryPairs>,
) -> Response {
    let result = api
        .synthesizer
        .bucket_list(api.topology.as_ref(), DEFAULT_POOL, first_param(&query, "uuid"))
        .await;
    into_http(render(result))
}

async fn bucket_detail_handler(
    State(api): State<Arc<CapiApi>>,
    Path(bucket): Path<String>,
    Query(query): Query<QueryPairs>,
) -> Response {
    tracing::trace!("asked for bucket {}", bucket);
    let result = api
        .synthesizer
        .bucket_detail(
            api.topology.as_ref(),
            DEFAULT_POOL,
            &bucket,
            first_param(&query, "bucket_uuid"),
        )
        .await;
    into_http(render(result))
}

async fn stats_handler(State(api): State<Arc<CapiApi>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "couchbase": api.topology.stats().await,
        "capi": api.store.stats().await,
        "server": api.stats.snapshot(),
    }))
}

async fn capi_handler(
    State(api): State<Arc<CapiApi>>,
    method: Method,
    uri: Uri,
    Query(query): Query<QueryPairs>,
    body: Bytes,
) -> Response {
    // everything under /pools/ belongs to the cluster map
    if uri.path().starts_with("/pools/") {
        tracing::debug!("no cluster-map resource at {}", uri.path());
        return into_http(CapiResponse::new(404));
    }

    let mut request = CapiRequest::new(method.as_str(), uri.path()).with_body(body.to_vec());
    for (key, value) in query {
        request.query.entry(key).or_insert(value);
    }
    into_http(handle_capi_request(&request, api.store.as_ref()).await)
}
