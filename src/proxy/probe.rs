//! Two-dialect SOCKS connectivity probe
//!
//! Advertised proxies are not labeled with their handshake dialect, so each
//! endpoint is tried as SOCKS5 first and SOCKS4a on failure. A successful
//! handshake is followed by a minimal upstream request; the endpoint is live
//! iff the bounded response buffer contains a recognizable protocol marker.

use crate::proxy::models::Endpoint;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Default liveness oracle
pub const DEFAULT_TARGET_HOST: &str = "www.google.com";
pub const DEFAULT_TARGET_PORT: u16 = 80;

/// Default per-attempt timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Only this much of the upstream response is read
const RESPONSE_BUFFER_SIZE: usize = 1024;

/// Cheap liveness heuristic, not full response validation
const LIVE_MARKER: &[u8] = b"HTTP";

/// SOCKS handshake dialects, in the order they are attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksDialect {
    V5,
    V4,
}

impl SocksDialect {
    pub const ORDER: [SocksDialect; 2] = [SocksDialect::V5, SocksDialect::V4];
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("handshake rejected: {0}")]
    Handshake(String),
    #[error("no protocol marker in response")]
    NoMarker,
}

/// Configuration for the connectivity probe
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Probe target used purely as a liveness oracle
    pub target_host: String,
    pub target_port: u16,
    /// Per-dialect-attempt timeout; there is no outer deadline
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target_host: DEFAULT_TARGET_HOST.to_string(),
            target_port: DEFAULT_TARGET_PORT,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, host: String, port: u16) -> Self {
        self.target_host = host;
        self.target_port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Probes endpoints for liveness via a proxied upstream request
#[derive(Debug, Clone, Default)]
pub struct ConnectivityProbe {
    config: ProbeConfig,
}

impl ConnectivityProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Probe one endpoint. Returns the raw response evidence when live,
    /// `None` when every dialect attempt failed.
    pub async fn probe(&self, endpoint: &Endpoint) -> Option<Vec<u8>> {
        for dialect in SocksDialect::ORDER {
            match tokio::time::timeout(self.config.timeout, self.attempt(endpoint, dialect)).await
            {
                Ok(Ok(evidence)) => {
                    debug!(endpoint = %endpoint, ?dialect, "endpoint is live");
                    return Some(evidence);
                }
                Ok(Err(e)) => {
                    debug!(endpoint = %endpoint, ?dialect, error = %e, "dialect attempt failed")
                }
                Err(_) => {
                    debug!(endpoint = %endpoint, ?dialect, "dialect attempt timed out")
                }
            }
        }
        None
    }

    /// One dialect attempt: connect, handshake, upstream request, bounded read
    async fn attempt(
        &self,
        endpoint: &Endpoint,
        dialect: SocksDialect,
    ) -> Result<Vec<u8>, ProbeError> {
        let mut stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;

        match dialect {
            SocksDialect::V5 => self.handshake_v5(&mut stream, endpoint).await?,
            SocksDialect::V4 => self.handshake_v4(&mut stream, endpoint).await?,
        }

        let request = format!(
            "GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.config.target_host
        );
        stream.write_all(request.as_bytes()).await?;

        let mut buf = vec![0u8; RESPONSE_BUFFER_SIZE];
        let n = stream.read(&mut buf).await?;
        buf.truncate(n);

        if contains_marker(&buf) {
            Ok(buf)
        } else {
            Err(ProbeError::NoMarker)
        }
    }

    /// RFC 1928 handshake with RFC 1929 username/password subnegotiation
    /// when the endpoint carries credentials
    async fn handshake_v5(
        &self,
        stream: &mut TcpStream,
        endpoint: &Endpoint,
    ) -> Result<(), ProbeError> {
        stream
            .write_all(&socks5_greeting(endpoint.auth.is_some()))
            .await?;

        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        if reply[0] != 0x05 {
            return Err(ProbeError::Handshake(format!(
                "unexpected version {:#04x}",
                reply[0]
            )));
        }

        match reply[1] {
            0x00 => {}
            0x02 => {
                let auth = endpoint.auth.as_ref().ok_or_else(|| {
                    ProbeError::Handshake("server requires credentials".to_string())
                })?;
                stream
                    .write_all(&socks5_auth_request(&auth.username, &auth.password))
                    .await?;
                let mut status = [0u8; 2];
                stream.read_exact(&mut status).await?;
                if status[1] != 0x00 {
                    return Err(ProbeError::Handshake("credentials rejected".to_string()));
                }
            }
            method => {
                return Err(ProbeError::Handshake(format!(
                    "unsupported auth method {:#04x}",
                    method
                )));
            }
        }

        stream
            .write_all(&socks5_connect_request(
                &self.config.target_host,
                self.config.target_port,
            ))
            .await?;

        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await?;
        if head[1] != 0x00 {
            return Err(ProbeError::Handshake(format!(
                "connect rejected: {:#04x}",
                head[1]
            )));
        }

        // Consume the bound address so the stream is positioned at tunnel data
        let addr_len = match head[3] {
            0x01 => 4,
            0x04 => 16,
            0x03 => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                len[0] as usize
            }
            atyp => {
                return Err(ProbeError::Handshake(format!(
                    "unknown address type {:#04x}",
                    atyp
                )));
            }
        };
        let mut bound = vec![0u8; addr_len + 2];
        stream.read_exact(&mut bound).await?;

        Ok(())
    }

    /// SOCKS4a connect; the hostname is resolved proxy-side
    async fn handshake_v4(
        &self,
        stream: &mut TcpStream,
        endpoint: &Endpoint,
    ) -> Result<(), ProbeError> {
        let userid = endpoint
            .auth
            .as_ref()
            .map(|a| a.username.as_str())
            .unwrap_or_default();
        stream
            .write_all(&socks4a_connect_request(
                &self.config.target_host,
                self.config.target_port,
                userid,
            ))
            .await?;

        let mut reply = [0u8; 8];
        stream.read_exact(&mut reply).await?;
        if reply[1] != 0x5a {
            return Err(ProbeError::Handshake(format!(
                "connect rejected: {:#04x}",
                reply[1]
            )));
        }

        Ok(())
    }
}

/// Liveness iff the literal `HTTP` token appears anywhere in the buffer
fn contains_marker(buf: &[u8]) -> bool {
    buf.windows(LIVE_MARKER.len()).any(|w| w == LIVE_MARKER)
}

fn socks5_greeting(with_auth: bool) -> Vec<u8> {
    if with_auth {
        // offer both no-auth and username/password
        vec![0x05, 0x02, 0x00, 0x02]
    } else {
        vec![0x05, 0x01, 0x00]
    }
}

fn socks5_auth_request(username: &str, password: &str) -> Vec<u8> {
    let user = &username.as_bytes()[..username.len().min(255)];
    let pass = &password.as_bytes()[..password.len().min(255)];
    let mut req = Vec::with_capacity(3 + user.len() + pass.len());
    req.push(0x01);
    req.push(user.len() as u8);
    req.extend_from_slice(user);
    req.push(pass.len() as u8);
    req.extend_from_slice(pass);
    req
}

fn socks5_connect_request(host: &str, port: u16) -> Vec<u8> {
    let host = &host.as_bytes()[..host.len().min(255)];
    let mut req = Vec::with_capacity(7 + host.len());
    req.extend_from_slice(&[0x05, 0x01, 0x00, 0x03]);
    req.push(host.len() as u8);
    req.extend_from_slice(host);
    req.extend_from_slice(&port.to_be_bytes());
    req
}

fn socks4a_connect_request(host: &str, port: u16, userid: &str) -> Vec<u8> {
    let mut req = Vec::with_capacity(10 + userid.len() + host.len());
    req.extend_from_slice(&[0x04, 0x01]);
    req.extend_from_slice(&port.to_be_bytes());
    // 0.0.0.x marks a SOCKS4a hostname request
    req.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
    req.extend_from_slice(userid.as_bytes());
    req.push(0x00);
    req.extend_from_slice(host.as_bytes());
    req.push(0x00);
    req
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    #[test]
    fn test_contains_marker() {
        assert!(contains_marker(b"HTTP/1.1 200 OK\r\n"));
        assert!(contains_marker(b"leading bytes then HTTP later"));
        assert!(!contains_marker(b"SSH-2.0-OpenSSH_8.9"));
        assert!(!contains_marker(b""));
        assert!(!contains_marker(b"HTT"));
    }

    #[test]
    fn test_socks5_greeting() {
        assert_eq!(socks5_greeting(false), vec![0x05, 0x01, 0x00]);
        assert_eq!(socks5_greeting(true), vec![0x05, 0x02, 0x00, 0x02]);
    }

    #[test]
    fn test_socks5_auth_request() {
        let req = socks5_auth_request("user", "pass");
        assert_eq!(req[0], 0x01);
        assert_eq!(req[1], 4);
        assert_eq!(&req[2..6], b"user");
        assert_eq!(req[6], 4);
        assert_eq!(&req[7..11], b"pass");
    }

    #[test]
    fn test_socks5_connect_request() {
        let req = socks5_connect_request("example.com", 80);
        assert_eq!(&req[..4], &[0x05, 0x01, 0x00, 0x03]);
        assert_eq!(req[4] as usize, "example.com".len());
        assert_eq!(&req[5..16], b"example.com");
        assert_eq!(&req[16..], &80u16.to_be_bytes());
    }

    #[test]
    fn test_socks4a_connect_request() {
        let req = socks4a_connect_request("example.com", 80, "");
        assert_eq!(&req[..2], &[0x04, 0x01]);
        assert_eq!(&req[2..4], &80u16.to_be_bytes());
        assert_eq!(&req[4..8], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(req[8], 0x00);
        assert_eq!(&req[9..20], b"example.com");
        assert_eq!(req[20], 0x00);
    }

    /// Minimal in-process SOCKS5 server that tunnels to a canned response
    async fn spawn_socks5_server(response: &'static [u8], require_auth: bool) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];

            let n = stream.read(&mut buf).await.unwrap();
            assert!(n >= 3);
            if require_auth {
                stream.write_all(&[0x05, 0x02]).await.unwrap();
                let n = stream.read(&mut buf).await.unwrap();
                assert_eq!(buf[0], 0x01);
                assert!(n > 2);
                stream.write_all(&[0x01, 0x00]).await.unwrap();
            } else {
                stream.write_all(&[0x05, 0x00]).await.unwrap();
            }

            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();

            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(response).await.unwrap();
        });
        addr
    }

    fn test_probe() -> ConnectivityProbe {
        ConnectivityProbe::with_config(
            ProbeConfig::new().with_timeout(Duration::from_secs(2)),
        )
    }

    #[tokio::test]
    async fn test_probe_live_through_socks5() {
        let addr = spawn_socks5_server(b"HTTP/1.1 200 OK\r\n\r\n", false).await;
        let endpoint = Endpoint::new(addr.ip().to_string(), addr.port());

        let evidence = test_probe().probe(&endpoint).await;
        assert!(evidence.is_some());
        assert!(contains_marker(&evidence.unwrap()));
    }

    #[tokio::test]
    async fn test_probe_live_with_credentials() {
        let addr = spawn_socks5_server(b"HTTP/1.1 301 Moved\r\n", true).await;
        let endpoint = Endpoint::with_auth(
            addr.ip().to_string(),
            addr.port(),
            "user".to_string(),
            "pass".to_string(),
        );

        assert!(test_probe().probe(&endpoint).await.is_some());
    }

    #[tokio::test]
    async fn test_probe_dead_without_marker() {
        let addr = spawn_socks5_server(b"SSH-2.0-OpenSSH_8.9", false).await;
        let endpoint = Endpoint::new(addr.ip().to_string(), addr.port());

        assert!(test_probe().probe(&endpoint).await.is_none());
    }

    #[tokio::test]
    async fn test_probe_dead_on_refused_connection() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = Endpoint::new(addr.ip().to_string(), addr.port());
        assert!(test_probe().probe(&endpoint).await.is_none());
    }
}
