//! Optional webhook upload of the reconciled roster
//!
//! Upload failures are logged and non-fatal; persisted roster correctness
//! never depends on the webhook.

use crate::proxy::models::RosterEntry;
use crate::proxy::roster::Roster;
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

const UPLOAD_TIMEOUT_SECS: u64 = 30;

/// One spreadsheet row as the webhook expects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRow {
    pub proxy: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub isp: String,
    pub proxy_type: String,
    pub last_updated: String,
}

impl UploadRow {
    pub fn from_entry(entry: &RosterEntry, last_updated: &str) -> Self {
        Self {
            proxy: entry.proxy.clone(),
            country: entry.enrichment.country.clone(),
            region: entry.enrichment.region.clone(),
            city: entry.enrichment.city.clone(),
            isp: entry.enrichment.isp.clone(),
            proxy_type: entry.enrichment.connection_type.to_string(),
            last_updated: last_updated.to_string(),
        }
    }
}

/// POSTs the roster as a JSON array of rows to a configured webhook URL
pub struct RosterUploader {
    webhook_url: String,
    client: reqwest::Client,
}

impl RosterUploader {
    pub fn new(webhook_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            webhook_url,
            client,
        })
    }

    /// Render the roster as upload rows, all stamped with the same time
    pub fn rows(roster: &Roster) -> Vec<UploadRow> {
        let last_updated = Utc::now().to_rfc3339();
        roster
            .entries()
            .iter()
            .map(|entry| UploadRow::from_entry(entry, &last_updated))
            .collect()
    }

    /// Upload the roster. Any failure is logged and swallowed.
    pub async fn upload(&self, roster: &Roster) {
        let rows = Self::rows(roster);
        match self.client.post(&self.webhook_url).json(&rows).send().await {
            Ok(response) if response.status().is_success() => {
                info!(rows = rows.len(), "uploaded roster to webhook");
            }
            Ok(response) => {
                warn!(status = %response.status(), "webhook rejected upload");
            }
            Err(e) => {
                warn!(error = %e, "webhook upload failed");
            }
        }
    }
}
