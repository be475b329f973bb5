//! Best-effort geolocation enrichment, routed through the proxy under test
//!
//! The lookup doubles as an outbound-HTTP check, but its failure never
//! demotes a live endpoint; all fields degrade to sentinel values instead.

use crate::proxy::models::{ConnectionType, Endpoint, Enrichment, MISSING};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Public IP-geolocation service queried through the candidate proxy
pub const DEFAULT_LOOKUP_URL: &str = "http://ip-api.com/json";

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Ordered keyword sets for the connection-type heuristic; first match wins
const RESIDENTIAL_KEYWORDS: &[&str] = &[
    "comcast", "spectrum", "verizon", "cable", "dsl", "fiber", "fios",
];
const CELLULAR_KEYWORDS: &[&str] = &["mobile", "cellular", "wireless", "lte", "4g", "5g"];
const BUSINESS_KEYWORDS: &[&str] = &["hosting", "datacenter", "server", "cloud", "colo"];

/// Fields consumed from the lookup service response
#[derive(Debug, Deserialize)]
struct GeoResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(rename = "regionName", default)]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    zip: Option<String>,
    #[serde(default)]
    isp: Option<String>,
}

/// Enriches live endpoints with geolocation and a connection-type label
#[derive(Debug, Clone)]
pub struct GeoClassifier {
    lookup_url: String,
    timeout: Duration,
}

impl Default for GeoClassifier {
    fn default() -> Self {
        Self {
            lookup_url: DEFAULT_LOOKUP_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl GeoClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lookup_url(mut self, url: String) -> Self {
        self.lookup_url = url;
        self
    }

    /// Classify a live endpoint. Never fails the endpoint: any transport
    /// error, timeout, or non-success status yields sentinel enrichment.
    pub async fn classify(&self, endpoint: &Endpoint) -> Enrichment {
        match self.lookup(endpoint).await {
            Ok(enrichment) => enrichment,
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "geo lookup failed, using sentinels");
                Enrichment::unknown()
            }
        }
    }

    async fn lookup(&self, endpoint: &Endpoint) -> crate::Result<Enrichment> {
        let proxy = reqwest::Proxy::all(endpoint.socks_url())?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()?;

        let geo: GeoResponse = client
            .get(&self.lookup_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if geo.status != "success" {
            anyhow::bail!("lookup status: {}", geo.status);
        }

        let field = |v: Option<String>| v.unwrap_or_else(|| MISSING.to_string());
        let isp = field(geo.isp);
        Ok(Enrichment {
            public_ip: field(geo.query),
            country: field(geo.country),
            region: field(geo.region_name),
            city: field(geo.city),
            zip: field(geo.zip),
            connection_type: classify_connection(&isp),
            isp,
            blacklisted: false,
        })
    }
}

/// Heuristic connection-type label from ISP name keywords. Not
/// authoritative; unmatched ISPs default to residential.
pub fn classify_connection(isp: &str) -> ConnectionType {
    let isp = isp.to_lowercase();
    if RESIDENTIAL_KEYWORDS.iter().any(|k| isp.contains(k)) {
        return ConnectionType::Residential;
    }
    if CELLULAR_KEYWORDS.iter().any(|k| isp.contains(k)) {
        return ConnectionType::Cellular;
    }
    if BUSINESS_KEYWORDS.iter().any(|k| isp.contains(k)) {
        return ConnectionType::Business;
    }
    ConnectionType::Residential
}
