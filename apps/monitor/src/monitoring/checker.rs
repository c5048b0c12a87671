use async_trait::async_trait;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;
use surge_ping::{Client, Config as PingConfig, ICMP, PingIdentifier, PingSequence};
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

use super::types::{ProbeDetail, ProbeOutcome, Protocol};
use crate::database::models::Target;
use crate::error::ProbeError;

/// Echo payload size used by the common `ping` tool
const PING_PAYLOAD: [u8; 56] = [0; 56];

/// Anything that can produce a probe outcome for a target
///
/// The scheduler only sees this seam, so it can be driven by a stub in tests.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &Target) -> ProbeOutcome;
}

/// Checker trait for the protocol-specific probes
#[async_trait]
pub trait Checker: Send + Sync {
    /// Perform one check; errors become a failed outcome in the engine
    async fn check(&self, target: &Target, timeout: Duration) -> Result<ProbeOutcome, ProbeError>;
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout).no_proxy().build()?;

        Ok(Self { client })
    }

    fn url_for(target: &Target, scheme: &str) -> Result<Url, ProbeError> {
        let host = if target.host.contains(':') && !target.host.starts_with('[') {
            format!("[{}]", target.host)
        } else {
            target.host.clone()
        };

        Ok(Url::parse(&format!("{}://{}:{}/", scheme, host, target.port))?)
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, target: &Target, timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
        let protocol = target.protocol();
        let scheme = protocol
            .scheme()
            .ok_or_else(|| ProbeError::UnsupportedProtocol(protocol.to_string()))?;
        let url = Self::url_for(target, scheme)?;

        let response = self.client.get(url).timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() { ProbeError::Timeout(timeout) } else { ProbeError::Http(e) }
        })?;

        let status_code = response.status().as_u16();
        Ok(ProbeOutcome::new(
            status_code == target.expected_status,
            ProbeDetail::StatusCode(status_code),
        ))
    }
}

/// ICMP echo checker
///
/// One ICMP socket per address family is opened on first use and shared by
/// every concurrent pinger. Host resolution runs on the blocking pool so a
/// slow resolver never holds up other probes.
pub struct IcmpChecker {
    v4: OnceCell<Client>,
    v6: OnceCell<Client>,
}

impl IcmpChecker {
    pub fn new() -> Self {
        Self { v4: OnceCell::new(), v6: OnceCell::new() }
    }

    async fn client_for(&self, addr: IpAddr) -> Result<&Client, ProbeError> {
        let (cell, kind) = match addr {
            IpAddr::V4(_) => (&self.v4, ICMP::V4),
            IpAddr::V6(_) => (&self.v6, ICMP::V6),
        };

        cell.get_or_try_init(|| async move {
            Client::new(&PingConfig::builder().kind(kind).build()).map_err(ProbeError::IcmpSocket)
        })
        .await
    }

    async fn resolve(host: &str) -> Result<IpAddr, ProbeError> {
        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(addr);
        }

        let lookup_host = host.to_string();
        let mut addrs = tokio::task::spawn_blocking(move || (lookup_host.as_str(), 0).to_socket_addrs())
            .await?
            .map_err(|source| ProbeError::Resolve { host: host.to_string(), source })?;

        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| ProbeError::NoAddress(host.to_string()))
    }
}

impl Default for IcmpChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Checker for IcmpChecker {
    async fn check(&self, target: &Target, timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
        let addr = Self::resolve(&target.host).await?;
        let client = self.client_for(addr).await?;

        let mut pinger = client.pinger(addr, PingIdentifier(rand::random())).await;
        pinger.timeout(timeout);

        // A single echo request, so the average is the one round trip
        let (_reply, rtt) = pinger.ping(PingSequence(0), &PING_PAYLOAD).await?;

        Ok(ProbeOutcome::new(true, ProbeDetail::RoundTripMs(rtt.as_secs_f64() * 1000.0)))
    }
}

/// Probe engine - dispatches a target to the checker for its protocol
pub struct ProbeEngine {
    http_checker: HttpChecker,
    icmp_checker: IcmpChecker,
    default_timeout: Duration,
}

impl ProbeEngine {
    /// Create a new probe engine
    pub fn new(default_timeout: Duration) -> Result<Self, ProbeError> {
        Ok(Self {
            http_checker: HttpChecker::new(default_timeout)?,
            icmp_checker: IcmpChecker::new(),
            default_timeout,
        })
    }

    fn timeout_for(&self, target: &Target) -> Duration {
        target
            .timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }
}

#[async_trait]
impl Prober for ProbeEngine {
    async fn probe(&self, target: &Target) -> ProbeOutcome {
        let checker: &dyn Checker = match target.protocol() {
            Protocol::Http | Protocol::Https => &self.http_checker,
            Protocol::Icmp => &self.icmp_checker,
            Protocol::Unsupported(raw) => {
                return ProbeOutcome::failure(ProbeError::UnsupportedProtocol(raw).to_string());
            }
        };

        match checker.check(target, self.timeout_for(target)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Probe of {} ({}) failed: {}", target.name, target.host, e);
                ProbeOutcome::failure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve every connection with the given status line
    async fn spawn_responder(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status_line
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        port
    }

    fn http_target(port: u16, expected_status: u16) -> Target {
        let mut target = Target::new("local", "127.0.0.1", port, "http");
        target.expected_status = expected_status;
        target
    }

    #[tokio::test]
    async fn test_http_expected_status_succeeds() {
        let port = spawn_responder("200 OK").await;
        let engine = ProbeEngine::new(Duration::from_secs(5)).unwrap();

        let outcome = engine.probe(&http_target(port, 200)).await;

        assert!(outcome.success);
        assert_eq!(outcome.detail, ProbeDetail::StatusCode(200));
    }

    #[tokio::test]
    async fn test_http_other_status_fails_with_code() {
        let port = spawn_responder("503 Service Unavailable").await;
        let engine = ProbeEngine::new(Duration::from_secs(5)).unwrap();

        let outcome = engine.probe(&http_target(port, 200)).await;

        assert!(!outcome.success);
        assert_eq!(outcome.detail, ProbeDetail::StatusCode(503));
    }

    #[tokio::test]
    async fn test_http_non_2xx_expected_status() {
        let port = spawn_responder("404 Not Found").await;
        let engine = ProbeEngine::new(Duration::from_secs(5)).unwrap();

        let outcome = engine.probe(&http_target(port, 404)).await;

        assert!(outcome.success);
        assert_eq!(outcome.detail, ProbeDetail::StatusCode(404));
    }

    #[tokio::test]
    async fn test_http_connection_refused_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let engine = ProbeEngine::new(Duration::from_secs(5)).unwrap();
        let outcome = engine.probe(&http_target(port, 200)).await;

        assert!(!outcome.success);
        match outcome.detail {
            ProbeDetail::Error(message) => {
                assert!(message.contains("error sending request"), "{}", message);
                assert!(message.to_lowercase().contains("connection refused"), "{}", message);
            }
            other => panic!("expected an error detail, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_timeout_reports_error() {
        // Accepts but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let engine = ProbeEngine::new(Duration::from_secs(5)).unwrap();
        let mut target = http_target(port, 200);
        target.timeout_seconds = Some(1);

        let outcome = engine.probe(&target).await;

        assert!(!outcome.success);
        assert!(matches!(outcome.detail, ProbeDetail::Error(ref message) if message.contains("timed out")));
    }

    #[tokio::test]
    async fn test_unsupported_protocol_is_a_failure() {
        let engine = ProbeEngine::new(Duration::from_secs(5)).unwrap();
        let target = Target::new("ftp", "127.0.0.1", 21, "ftp");

        let outcome = engine.probe(&target).await;

        assert!(!outcome.success);
        assert_eq!(outcome.detail, ProbeDetail::Error("unsupported protocol 'ftp'".to_string()));
    }

    #[tokio::test]
    async fn test_icmp_unresolvable_host_fails() {
        let engine = ProbeEngine::new(Duration::from_secs(1)).unwrap();
        let target = Target::new("nowhere", "nowhere.invalid", 0, "icmp");

        let outcome = engine.probe(&target).await;

        assert!(!outcome.success);
    }

    #[test]
    fn test_url_for_wraps_ipv6_hosts() {
        let target = Target::new("v6", "::1", 8080, "http");
        let url = HttpChecker::url_for(&target, "http").unwrap();
        assert_eq!(url.as_str(), "http://[::1]:8080/");

        let target = Target::new("v4", "example.com", 443, "https");
        let url = HttpChecker::url_for(&target, "https").unwrap();
        // Default port for the scheme is elided by the url crate
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn test_per_target_timeout_overrides_default() {
        let engine = ProbeEngine::new(Duration::from_secs(5)).unwrap();
        let mut target = Target::new("t", "example.com", 80, "http");
        assert_eq!(engine.timeout_for(&target), Duration::from_secs(5));

        target.timeout_seconds = Some(2);
        assert_eq!(engine.timeout_for(&target), Duration::from_secs(2));

        target.timeout_seconds = Some(0);
        assert_eq!(engine.timeout_for(&target), Duration::from_secs(5));
    }
}
