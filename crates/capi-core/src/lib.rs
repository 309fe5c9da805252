#![warn(missing_docs)]

//! CAPI core: Couch API replication endpoint and Couchbase cluster-map
//! emulation, independent of any HTTP framework.
//!
//! The embedding application supplies a [`DocumentStore`] and a
//! [`ClusterTopology`]; this crate classifies request paths, enforces the
//! checkpoint/uuid consistency guards and shapes collaborator answers into
//! the exact bodies and statuses replication clients expect.

/// Collaborator capability traits
pub mod behavior;
/// CAPI request routing and handling
pub mod capi;
/// Error types
pub mod error;
/// Opaque-token consistency checks
pub mod guard;
/// In-memory collaborators
pub mod memory;
/// Request path grammar
pub mod path;
/// Transport-independent responses
pub mod response;
/// Cluster-map synthesis
pub mod topology;
/// Wire types
pub mod types;

pub use behavior::{ClusterTopology, DocumentStore, Overloaded};
pub use capi::{handle_capi_request, route_capi_request, CapiOperation, CapiRequest};
pub use error::{CapiError, Result};
pub use memory::{MemoryDocumentStore, MemoryTopology};
pub use response::CapiResponse;
pub use topology::{TopologySynthesizer, DEFAULT_NUM_VBUCKETS};
