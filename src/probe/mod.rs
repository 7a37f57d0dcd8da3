//! Probe module for endpoint monitoring.
//!
//! A probe is one layered diagnostic pass over a URL: resolve the host, open a
//! TCP connection, then issue an HTTP GET. A failing layer short-circuits the
//! ones after it. Probes never return an error; every failure is recorded in
//! the [`ProbeResult`].

mod dns;
mod http;
mod tcp;

pub use dns::*;
pub use http::*;
pub use tcp::*;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::clock::Clock;
use crate::db::Status;

const USER_AGENT: &str = "VigilMonitor/1.0";

/// Errors raised inside a single probe layer.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("probe cancelled")]
    Cancelled,
}

/// Category of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    DnsFailure,
    TcpFailure,
    HttpFailure,
    NotifyFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DnsFailure => "DNS_FAILURE",
            ErrorKind::TcpFailure => "TCP_FAILURE",
            ErrorKind::HttpFailure => "HTTP_FAILURE",
            ErrorKind::NotifyFailure => "NOTIFY_FAILURE",
        }
    }
}

/// A failure captured as data: the kind callers branch on plus a free-text cause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub kind: ErrorKind,
    pub cause: Option<String>,
}

impl ProbeFailure {
    pub fn new(kind: ErrorKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: Some(cause.into()),
        }
    }
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.kind.as_str(), cause),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub target_id: i64,
    pub dns_ok: bool,
    pub resolved_ip: Option<String>,
    pub tcp_ok: bool,
    pub tcp_latency_ms: i64,
    pub http_ok: bool,
    pub http_status_code: u16,
    pub http_latency_ms: i64,
    pub overall_status: Status,
    pub timestamp: DateTime<Utc>,
    pub error: Option<ProbeFailure>,
}

impl ProbeResult {
    /// A result with every layer unattempted, which reads as DOWN.
    pub fn new(target_id: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            target_id,
            dns_ok: false,
            resolved_ip: None,
            tcp_ok: false,
            tcp_latency_ms: 0,
            http_ok: false,
            http_status_code: 0,
            http_latency_ms: 0,
            overall_status: Status::Down,
            timestamp,
            error: None,
        }
    }

    pub fn error_detail(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// A single-target diagnostic check.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target_id: i64, url: &str) -> ProbeResult;
}

/// Production probe running the DNS, TCP and HTTP layers in order.
///
/// Each layer is bounded by the same `timeout`.
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl HttpProber {
    /// Build a prober. In-flight HTTP requests are aborted when `cancel` fires.
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>, cancel: CancellationToken) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .no_proxy()
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            clock,
            cancel,
        })
    }

    async fn diagnose(&self, result: &mut ProbeResult, url: &str) {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => {
                result.error = Some(ProbeFailure::new(ErrorKind::DnsFailure, format!("invalid URL: {}", e)));
                return;
            }
        };

        let (host, port) = match (parsed.host(), parsed.port_or_known_default()) {
            (Some(h), Some(p)) => (h, p),
            _ => {
                result.error = Some(ProbeFailure::new(ErrorKind::DnsFailure, "URL has no host or port"));
                return;
            }
        };

        let addr = match resolve(&host, port, self.timeout).await {
            Ok(addr) => addr,
            Err(e) => {
                tracing::debug!("DNS layer failed for {}: {}", url, e);
                result.error = Some(ProbeFailure::new(ErrorKind::DnsFailure, e.to_string()));
                return;
            }
        };
        result.dns_ok = true;
        result.resolved_ip = Some(addr.ip().to_string());

        let (elapsed, tcp) = run_tcp_probe(addr, self.timeout).await;
        result.tcp_latency_ms = elapsed.as_millis() as i64;
        if let Err(e) = tcp {
            tracing::debug!("TCP layer failed for {} ({}): {}", url, addr, e);
            result.error = Some(ProbeFailure::new(ErrorKind::TcpFailure, e.to_string()));
            return;
        }
        result.tcp_ok = true;

        let (elapsed, http) = run_http_probe(&self.client, url, self.timeout, self.cancel.child_token()).await;
        result.http_latency_ms = elapsed.as_millis() as i64;
        match http {
            Ok(code) => {
                result.http_status_code = code;
                result.http_ok = code < 400;
                if !result.http_ok {
                    result.error = Some(ProbeFailure::new(ErrorKind::HttpFailure, format!("status {}", code)));
                }
            }
            Err(e) => {
                result.error = Some(ProbeFailure::new(ErrorKind::HttpFailure, e.to_string()));
            }
        }
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, target_id: i64, url: &str) -> ProbeResult {
        let mut result = ProbeResult::new(target_id, self.clock.now());
        self.diagnose(&mut result, url).await;
        if let Some(detail) = result.error_detail() {
            tracing::debug!(target_id, "Probe of {} failed: {}", url, detail);
        }

        result.overall_status = if result.http_ok { Status::Up } else { Status::Down };
        result.timestamp = self.clock.now();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned HTTP responses chosen by the request line.
    async fn serve(respond: fn(&str) -> Option<String>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = sock.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_string();
                    match respond(&request) {
                        Some(resp) => {
                            let _ = sock.write_all(resp.as_bytes()).await;
                        }
                        None => tokio::time::sleep(Duration::from_secs(30)).await,
                    }
                });
            }
        });
        addr
    }

    fn prober(timeout: Duration) -> HttpProber {
        HttpProber::new(timeout, Arc::new(SystemClock), CancellationToken::new()).unwrap()
    }

    fn response(status: &str) -> String {
        format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status)
    }

    #[tokio::test]
    async fn test_probe_up() {
        let addr = serve(|_| Some(response("200 OK"))).await;
        let result = prober(Duration::from_secs(2))
            .probe(1, &format!("http://{}/", addr))
            .await;

        assert_eq!(result.overall_status, Status::Up);
        assert!(result.dns_ok && result.tcp_ok && result.http_ok);
        assert_eq!(result.http_status_code, 200);
        assert_eq!(result.resolved_ip.as_deref(), Some("127.0.0.1"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_probe_follows_redirect() {
        let addr = serve(|req| {
            if req.starts_with("GET /final") {
                Some(response("204 No Content"))
            } else {
                Some("HTTP/1.1 302 Found\r\nlocation: /final\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string())
            }
        })
        .await;
        let result = prober(Duration::from_secs(2))
            .probe(1, &format!("http://{}/start", addr))
            .await;

        assert_eq!(result.http_status_code, 204);
        assert_eq!(result.overall_status, Status::Up);
    }

    #[tokio::test]
    async fn test_probe_server_error_is_down() {
        let addr = serve(|_| Some(response("503 Service Unavailable"))).await;
        let result = prober(Duration::from_secs(2))
            .probe(7, &format!("http://{}/", addr))
            .await;

        assert_eq!(result.target_id, 7);
        assert_eq!(result.overall_status, Status::Down);
        assert!(result.tcp_ok);
        assert!(!result.http_ok);
        assert_eq!(result.http_status_code, 503);
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(ErrorKind::HttpFailure));
        assert_eq!(result.error_detail().as_deref(), Some("HTTP_FAILURE: status 503"));
    }

    #[tokio::test]
    async fn test_probe_tcp_refused_skips_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = prober(Duration::from_secs(2))
            .probe(1, &format!("http://{}/", addr))
            .await;

        assert!(result.dns_ok);
        assert!(!result.tcp_ok);
        assert!(!result.http_ok);
        assert_eq!(result.http_status_code, 0);
        assert_eq!(result.http_latency_ms, 0);
        assert_eq!(result.overall_status, Status::Down);
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(ErrorKind::TcpFailure));
    }

    #[tokio::test]
    async fn test_probe_dns_failure_short_circuits() {
        let result = prober(Duration::from_secs(2))
            .probe(1, "http://vigil-probe-test.invalid/")
            .await;

        assert!(!result.dns_ok);
        assert!(!result.tcp_ok);
        assert!(!result.http_ok);
        assert_eq!(result.tcp_latency_ms, 0);
        assert_eq!(result.http_status_code, 0);
        assert_eq!(result.overall_status, Status::Down);
        assert!(result.error_detail().unwrap().starts_with("DNS_FAILURE"));
    }

    #[tokio::test]
    async fn test_probe_invalid_url_reports_dns_failure() {
        let result = prober(Duration::from_secs(1)).probe(1, "not a url").await;
        assert_eq!(result.overall_status, Status::Down);
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(ErrorKind::DnsFailure));
    }

    #[tokio::test]
    async fn test_probe_http_timeout_is_bounded() {
        let addr = serve(|_| None).await;
        let timeout = Duration::from_millis(300);

        // DNS is skipped for IP literals, so at most the TCP and HTTP layers run.
        let result = tokio::time::timeout(
            timeout * 2 + Duration::from_secs(1),
            prober(timeout).probe(1, &format!("http://{}/", addr)),
        )
        .await
        .expect("probe exceeded the sum of its layer timeouts");

        assert!(result.tcp_ok);
        assert!(!result.http_ok);
        assert_eq!(result.http_status_code, 0);
        assert!(result.http_latency_ms >= 250);
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(ErrorKind::HttpFailure));
    }

    #[tokio::test]
    async fn test_tcp_stall_skips_http_within_timeout() {
        let timeout = Duration::from_millis(300);

        let result = tokio::time::timeout(
            timeout * 2 + Duration::from_secs(1),
            prober(timeout).probe(1, "http://10.255.255.1:81/"),
        )
        .await
        .expect("probe exceeded the sum of its layer timeouts");

        assert!(result.dns_ok);
        assert!(!result.tcp_ok);
        assert!(!result.http_ok);
        assert_eq!(result.http_latency_ms, 0);
        assert!(result.tcp_latency_ms <= 800);
        assert_eq!(result.overall_status, Status::Down);
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(ErrorKind::TcpFailure));
    }

    #[tokio::test]
    async fn test_log_entry_keeps_failure_detail() {
        let result = prober(Duration::from_secs(1)).probe(3, "http://").await;
        let entry = crate::db::LogEntry::from(&result);

        assert_eq!(entry.application_id, 3);
        assert_eq!(entry.status, Status::Down);
        assert!(entry.error_detail().is_some());
        assert_eq!(entry.error_detail(), result.error_detail());
    }

    #[test]
    fn test_failure_display() {
        let f = ProbeFailure::new(ErrorKind::DnsFailure, "no such host");
        assert_eq!(f.to_string(), "DNS_FAILURE: no such host");
        let bare = ProbeFailure {
            kind: ErrorKind::TcpFailure,
            cause: None,
        };
        assert_eq!(bare.to_string(), "TCP_FAILURE");
    }
}
