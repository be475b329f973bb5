//! Proxy validation pipeline
//!
//! This module provides functionality for:
//! - Parsing and normalizing proxy endpoint lines
//! - Probing endpoints for liveness over two SOCKS dialects
//! - Enriching live endpoints with geolocation and a connection-type label
//! - Running probe batches under a concurrency bound
//! - Reconciling results into a deduplicated, priority-ordered roster

pub mod geo;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod probe;
pub mod roster;

pub use geo::{classify_connection, GeoClassifier};
pub use models::{
    ConnectionType, Endpoint, EndpointAuth, Enrichment, ProbeOutcome, ProbeStatus, RosterEntry,
};
pub use orchestrator::{default_concurrency, ProbeOrchestrator};
pub use parser::{EndpointParser, ParseError};
pub use probe::{ConnectivityProbe, ProbeConfig, SocksDialect};
pub use roster::{MergePolicy, Roster, RosterReconciler};
