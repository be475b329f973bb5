//! Proxy Roster - Proxy Validator and Roster Maintainer
//!
//! Validates proxy endpoints for liveness, enriches live ones with
//! geolocation and connection-type metadata, and maintains a deduplicated,
//! priority-ordered roster of currently-working proxies.

pub mod proxy;
pub mod store;
pub mod upload;

pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
