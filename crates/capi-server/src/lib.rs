//! CAPI server: the axum HTTP surface around `capi-core`, with Basic
//! authentication, request statistics, configuration and the CLI.

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod stats;

pub use api::CapiApi;
pub use config::{ConfigError, ServerConfig};
pub use stats::ServerStats;
