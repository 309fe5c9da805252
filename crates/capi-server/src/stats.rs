//! Request statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use serde_json::{json, Value};

/// Server-wide request counters.
#[derive(Debug)]
pub struct ServerStats {
    pub requests: AtomicU64,
    pub client_errors: AtomicU64,
    pub server_errors: AtomicU64,
    pub service_unavailable: AtomicU64,
    pub latency_us_total: AtomicU64,
    pub uptime_start: Instant,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            client_errors: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            service_unavailable: AtomicU64::new(0),
            latency_us_total: AtomicU64::new(0),
            uptime_start: Instant::now(),
        }
    }

    pub fn record(&self, status: u16, latency_us: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.latency_us_total.fetch_add(latency_us, Ordering::Relaxed);
        match status {
            503 => {
                self.service_unavailable.fetch_add(1, Ordering::Relaxed);
                self.server_errors.fetch_add(1, Ordering::Relaxed);
            }
            500..=599 => {
                self.server_errors.fetch_add(1, Ordering::Relaxed);
            }
            400..=499 => {
                self.client_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.client_errors.load(Ordering::Relaxed) + self.server_errors.load(Ordering::Relaxed)
    }

    pub fn avg_latency_us(&self) -> u64 {
        let reqs = self.requests();
        if reqs == 0 {
            return 0;
        }
        self.latency_us_total.load(Ordering::Relaxed) / reqs
    }

    pub fn uptime_secs(&self) -> u64 {
        self.uptime_start.elapsed().as_secs()
    }

    /// The `server` section of `/_stats`.
    pub fn snapshot(&self) -> Value {
        json!({
            "requests": self.requests(),
            "errors": self.errors(),
            "client_errors": self.client_errors.load(Ordering::Relaxed),
            "server_errors": self.server_errors.load(Ordering::Relaxed),
            "service_unavailable": self.service_unavailable.load(Ordering::Relaxed),
            "avg_latency_us": self.avg_latency_us(),
            "uptime_secs": self.uptime_secs(),
        })
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn stats_middleware(
    State(stats): State<Arc<ServerStats>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    stats.record(
        response.status().as_u16(),
        start.elapsed().as_micros() as u64,
    );
    response
}
