//! Flat-file persistence for candidate lists and the active roster
//!
//! The roster is stored either as a JSON array of records or as
//! line-oriented pipe-delimited text; the `.json` extension picks the
//! format, and one representation is authoritative per deployment. All
//! writes happen after the concurrent probing phase, so plain single-writer
//! file I/O suffices.

use crate::proxy::models::{ConnectionType, Enrichment, RosterEntry, MISSING};
use crate::proxy::parser::EndpointParser;
use crate::proxy::roster::Roster;
use crate::Result;
use anyhow::Context;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Persisted roster representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterFormat {
    Text,
    Json,
}

impl RosterFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => RosterFormat::Json,
            _ => RosterFormat::Text,
        }
    }
}

/// Read the new-candidates file. A missing file is a run-level error: the
/// caller must not silently proceed with an empty batch.
pub fn read_candidates(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("cannot read candidate list {}", path.display()))
}

/// Load the prior roster. A missing file means a first run (empty roster);
/// an unreadable or corrupt roster also degrades to empty, with a warning.
pub fn load_roster(path: &Path) -> Roster {
    if !path.exists() {
        return Roster::new();
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read roster, starting empty");
            return Roster::new();
        }
    };

    match RosterFormat::for_path(path) {
        RosterFormat::Json => match serde_json::from_str::<Vec<RosterEntry>>(&content) {
            Ok(entries) => Roster::from_entries(entries),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt roster, starting empty");
                Roster::new()
            }
        },
        RosterFormat::Text => {
            Roster::from_entries(content.lines().filter_map(parse_record))
        }
    }
}

/// Persist the roster in the format implied by the path
pub fn save_roster(path: &Path, roster: &Roster) -> Result<()> {
    let content = match RosterFormat::for_path(path) {
        RosterFormat::Json => serde_json::to_string_pretty(roster.entries())?,
        RosterFormat::Text => {
            let mut lines: String = roster
                .entries()
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n");
            if !lines.is_empty() {
                lines.push('\n');
            }
            lines
        }
    };
    fs::write(path, content).with_context(|| format!("cannot write roster {}", path.display()))
}

/// Parse one pipe-delimited roster record. Lines whose endpoint segment
/// does not parse are dropped.
fn parse_record(line: &str) -> Option<RosterEntry> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let parts: Vec<&str> = line.split('|').collect();
    let endpoint = EndpointParser::parse_line(parts[0]).ok()?;

    let field = |i: usize| {
        parts
            .get(i)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(MISSING)
            .to_string()
    };
    let blacklisted = parts
        .get(7)
        .and_then(|s| s.trim().strip_prefix("Black List:"))
        .map(|s| s.trim().eq_ignore_ascii_case("yes"))
        .unwrap_or(false);
    let connection_type = parts
        .get(8)
        .and_then(|s| s.trim().strip_prefix("Use Type:"))
        .map(|s| match s.trim() {
            "Cellular" => ConnectionType::Cellular,
            "Business" => ConnectionType::Business,
            _ => ConnectionType::Residential,
        })
        .unwrap_or_default();

    Some(RosterEntry::new(
        endpoint.key(),
        Enrichment {
            public_ip: field(1),
            country: field(2),
            region: field(3),
            city: field(4),
            zip: field(5),
            isp: field(6),
            blacklisted,
            connection_type,
        },
    ))
}
