//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::{ProbeFailure, ProbeResult};

/// Availability state of a target, and the outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Up,
    Down,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "UP",
            Status::Down => "DOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UP" => Some(Status::Up),
            "DOWN" => Some(Status::Down),
            _ => None,
        }
    }

    pub fn is_down(&self) -> bool {
        matches!(self, Status::Down)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub current_state: Status,
    pub last_transition_at: Option<DateTime<Utc>>,
    /// Comma-separated alert recipients; the configured fallback list is used when empty.
    pub alert_emails: Option<String>,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            created_at: DateTime::<Utc>::default(),
            current_state: Status::Up,
            last_transition_at: None,
            alert_emails: None,
        }
    }
}

impl Target {
    /// Alert recipients parsed from `alert_emails`, empty when none are set.
    pub fn recipients(&self) -> Vec<String> {
        self.alert_emails
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Layer-by-layer diagnostic of one probe, stored alongside each log row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeMeta {
    pub dns_ok: bool,
    pub resolved_ip: Option<String>,
    pub tcp_ok: bool,
    pub tcp_ms: i64,
    pub http_ok: bool,
    pub http_ms: i64,
    pub status_code: u16,
    pub error: Option<ProbeFailure>,
}

/// An immutable record of one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    pub application_id: i64,
    pub status: Status,
    pub status_code: u16,
    /// HTTP latency in milliseconds.
    pub response_time: i64,
    pub timestamp: DateTime<Utc>,
    pub meta: Option<ProbeMeta>,
}

impl From<&ProbeResult> for LogEntry {
    fn from(r: &ProbeResult) -> Self {
        Self {
            id: 0,
            application_id: r.target_id,
            status: r.overall_status,
            status_code: r.http_status_code,
            response_time: r.http_latency_ms,
            timestamp: r.timestamp,
            meta: Some(ProbeMeta {
                dns_ok: r.dns_ok,
                resolved_ip: r.resolved_ip.clone(),
                tcp_ok: r.tcp_ok,
                tcp_ms: r.tcp_latency_ms,
                http_ok: r.http_ok,
                http_ms: r.http_latency_ms,
                status_code: r.http_status_code,
                error: r.error.clone(),
            }),
        }
    }
}

impl LogEntry {
    /// Human-readable failure string, e.g. `DNS_FAILURE: no such host`.
    pub fn error_detail(&self) -> Option<String> {
        self.meta
            .as_ref()
            .and_then(|m| m.error.as_ref())
            .map(|e| e.to_string())
    }
}
