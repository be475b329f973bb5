//! Endpoint parser for normalizing raw proxy list lines

use crate::proxy::models::Endpoint;
use thiserror::Error;
use tracing::debug;

/// Punctuation that shows up when lines are copy-pasted from structured
/// exports (JSON arrays, spreadsheets)
const STRAY_PUNCTUATION: &[char] = &['"', '\'', '[', ']', '{', '}', ','];

/// Why a raw line was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("malformed endpoint: {0}")]
    Malformed(String),
}

/// Parser for `host:port[:user:pass]` proxy lines
pub struct EndpointParser;

impl EndpointParser {
    /// Strip whitespace, any pipe-delimited enrichment suffix, and stray
    /// structured-export punctuation.
    pub fn clean_line(raw: &str) -> String {
        let line = raw.trim();
        let line = line.split('|').next().unwrap_or_default();
        line.chars()
            .filter(|c| !STRAY_PUNCTUATION.contains(c))
            .collect::<String>()
            .trim()
            .to_string()
    }

    /// Parse a single line into an endpoint.
    ///
    /// Exactly 2 colon-separated segments mean `host:port`, exactly 4 mean
    /// `host:port:user:pass`. More than 4 segments keep the first 4
    /// (defensive truncation); any other count is malformed.
    pub fn parse_line(raw: &str) -> Result<Endpoint, ParseError> {
        let line = Self::clean_line(raw);
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut parts: Vec<&str> = line.split(':').collect();
        if parts.len() > 4 {
            parts.truncate(4);
        }

        match parts.as_slice() {
            [host, port] => {
                let port = Self::parse_port(port, &line)?;
                Ok(Endpoint::new(host.to_string(), port))
            }
            [host, port, user, pass] => {
                let port = Self::parse_port(port, &line)?;
                Ok(Endpoint::with_auth(
                    host.to_string(),
                    port,
                    user.to_string(),
                    pass.to_string(),
                ))
            }
            _ => Err(ParseError::Malformed(line.clone())),
        }
    }

    fn parse_port(segment: &str, line: &str) -> Result<u16, ParseError> {
        match segment.parse::<u16>() {
            Ok(0) | Err(_) => Err(ParseError::Malformed(line.to_string())),
            Ok(port) => Ok(port),
        }
    }

    /// Parse a whole candidate list; unparseable lines are logged and
    /// dropped, never surfaced as outcomes.
    pub fn parse_lines(content: &str) -> Vec<Endpoint> {
        content
            .lines()
            .filter_map(|line| match Self::parse_line(line) {
                Ok(endpoint) => Some(endpoint),
                Err(ParseError::Empty) => None,
                Err(e) => {
                    debug!(line, error = %e, "dropping unparseable proxy line");
                    None
                }
            })
            .collect()
    }
}
