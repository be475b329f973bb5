//! Bounded-concurrency probe orchestration
//!
//! Each endpoint is an independent unit of work: probe, then geo-classify if
//! live. Outcomes are collected in completion order, exactly one per
//! accepted input; a failing or panicking unit becomes a `Dead` outcome for
//! that endpoint alone.

use crate::proxy::geo::GeoClassifier;
use crate::proxy::models::{Endpoint, ProbeOutcome};
use crate::proxy::parser::EndpointParser;
use crate::proxy::probe::ConnectivityProbe;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

const MIN_WORKERS: usize = 5;
const MAX_WORKERS: usize = 50;

/// Worker budget scaled loosely with hardware parallelism, clamped to 5..=50
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(MIN_WORKERS)
        .clamp(MIN_WORKERS, MAX_WORKERS)
}

/// Runs the parse → probe → classify pipeline over a batch of endpoints
pub struct ProbeOrchestrator {
    probe: Arc<ConnectivityProbe>,
    geo: Arc<GeoClassifier>,
    concurrency: usize,
}

impl Default for ProbeOrchestrator {
    fn default() -> Self {
        Self::new(
            ConnectivityProbe::new(),
            GeoClassifier::new(),
            default_concurrency(),
        )
    }
}

impl ProbeOrchestrator {
    pub fn new(probe: ConnectivityProbe, geo: GeoClassifier, concurrency: usize) -> Self {
        Self {
            probe: Arc::new(probe),
            geo: Arc::new(geo),
            concurrency: concurrency.max(1),
        }
    }

    /// Parse raw lines and probe the parseable ones. Unparseable lines are
    /// dropped, not surfaced as outcomes.
    pub async fn run_lines(&self, content: &str) -> Vec<ProbeOutcome> {
        let endpoints = EndpointParser::parse_lines(content);
        self.run(endpoints).await
    }

    /// Probe a batch of endpoints under the concurrency bound. Outcomes
    /// arrive in completion order, not input order.
    pub async fn run(&self, endpoints: Vec<Endpoint>) -> Vec<ProbeOutcome> {
        let total = endpoints.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let outcomes: Vec<ProbeOutcome> = stream::iter(endpoints)
            .map(|endpoint| {
                let sem = Arc::clone(&semaphore);
                let probe = Arc::clone(&self.probe);
                let geo = Arc::clone(&self.geo);
                async move {
                    // Acquire only fails if the semaphore is closed, which
                    // cannot happen while we hold the Arc.
                    let _permit = sem.acquire().await.expect("semaphore closed unexpectedly");
                    let fallback = endpoint.clone();
                    // Spawned so a panicking unit cannot take down siblings
                    match tokio::spawn(Self::evaluate(probe, geo, endpoint)).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(endpoint = %fallback, error = %e, "probe unit failed");
                            ProbeOutcome::dead(fallback)
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let live = outcomes.iter().filter(|o| o.is_live()).count();
        info!(total, live, "probe batch finished");
        outcomes
    }

    async fn evaluate(
        probe: Arc<ConnectivityProbe>,
        geo: Arc<GeoClassifier>,
        endpoint: Endpoint,
    ) -> ProbeOutcome {
        match probe.probe(&endpoint).await {
            Some(_evidence) => {
                let enrichment = geo.classify(&endpoint).await;
                ProbeOutcome::live(endpoint, enrichment)
            }
            None => ProbeOutcome::dead(endpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::Enrichment;
    use crate::proxy::probe::ProbeConfig;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_default_concurrency_bounds() {
        let n = default_concurrency();
        assert!((MIN_WORKERS..=MAX_WORKERS).contains(&n));
    }

    fn quick_orchestrator() -> ProbeOrchestrator {
        ProbeOrchestrator::new(
            ConnectivityProbe::with_config(
                ProbeConfig::new().with_timeout(Duration::from_secs(2)),
            ),
            GeoClassifier::new(),
            8,
        )
    }

    /// Port with nothing listening, for endpoints that must probe dead
    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    /// One-shot SOCKS5 server tunneling to a canned HTTP response
    async fn live_socks5_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(&[0x05, 0x00]).await.unwrap();
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_one_outcome_per_endpoint() {
        let port = dead_port().await;
        let endpoints: Vec<Endpoint> = (0..6)
            .map(|i| Endpoint::new(format!("127.0.0.{}", i + 1), port))
            .collect();

        let outcomes = quick_orchestrator().run(endpoints.clone()).await;
        assert_eq!(outcomes.len(), endpoints.len());
        assert!(outcomes.iter().all(|o| !o.is_live()));

        // every input endpoint accounted for, regardless of completion order
        for ep in &endpoints {
            assert!(outcomes.iter().any(|o| o.endpoint == *ep));
        }
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let dead = dead_port().await;
        let live = live_socks5_port().await;

        let endpoints = vec![
            Endpoint::new("127.0.0.1".to_string(), dead),
            Endpoint::new("127.0.0.1".to_string(), live),
            Endpoint::new("127.0.0.2".to_string(), dead),
        ];

        let outcomes = quick_orchestrator().run(endpoints).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.iter().filter(|o| o.is_live()).count(), 1);

        // The live endpoint's geo lookup has no real service behind it, so
        // its enrichment degrades to sentinels without demoting liveness.
        let live_outcome = outcomes.iter().find(|o| o.is_live()).unwrap();
        assert_eq!(live_outcome.endpoint.port, live);
        if let crate::proxy::models::ProbeStatus::Live(e) = &live_outcome.status {
            assert_eq!(*e, Enrichment::unknown());
        }
    }

    #[tokio::test]
    async fn test_run_lines_drops_unparseable() {
        let port = dead_port().await;
        let content = format!("127.0.0.1:{port}\nnot-an-endpoint\n127.0.0.2:{port}\n");
        let outcomes = quick_orchestrator().run_lines(&content).await;
        assert_eq!(outcomes.len(), 2);
    }
}
