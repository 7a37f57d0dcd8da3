//! Configuration module for Vigil.
//!
//! Loads configuration from environment variables (and a `.env` file, if
//! present) with sensible defaults.

use std::env;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::notify::EmailConfig;
use crate::scheduler::DEFAULT_CONCURRENCY;

const DEFAULT_SENDER: &str = "vigil@localhost";

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 3337)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "vigil.db")
    pub db_path: String,
    /// Minutes between scheduled sweeps (default: 60, minimum 1)
    pub interval_minutes: u32,
    /// Per-layer probe timeout (default: 10s, minimum 1s)
    pub request_timeout: Duration,
    /// Maximum probes in flight during a sweep (default: 5, minimum 1)
    pub concurrency: usize,
    /// Offset the sweep cadence is evaluated in (default: +05:30)
    pub timezone: FixedOffset,
    /// Fallback alert recipients for targets without their own list
    pub alert_recipients: Vec<String>,
    /// SMTP delivery; alerts are only logged when absent
    pub email: Option<EmailConfig>,
    /// Directory of a built frontend to serve for non-API paths
    pub frontend_dist: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 3337,
            db_path: "vigil.db".to_string(),
            interval_minutes: 60,
            request_timeout: Duration::from_millis(10_000),
            concurrency: DEFAULT_CONCURRENCY,
            timezone: default_timezone(),
            alert_recipients: vec![DEFAULT_SENDER.to_string()],
            email: None,
            frontend_dist: None,
        }
    }
}

fn default_timezone() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap_or_else(|| Utc.fix())
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `VIGIL_HTTP_PORT` or `PORT`: HTTP port (default: 3337)
    /// - `VIGIL_DB_PATH`: Database file path (default: "vigil.db")
    /// - `MONITOR_INTERVAL_MINUTES`: sweep cadence (default: 60)
    /// - `REQUEST_TIMEOUT_MS`: per-layer probe timeout (default: 10000)
    /// - `CONCURRENCY`: sweep worker count (default: 5)
    /// - `MONITOR_TZ_OFFSET`: cadence offset such as `+05:30` (default: +05:30)
    /// - `SENDER_EMAIL`: alert sender address
    /// - `ALERT_RECIPIENTS`: comma-separated fallback recipients (default: sender)
    /// - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USER`, `SMTP_PASSWORD`: mail relay
    /// - `FRONTEND_DIST`: static files directory
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var("VIGIL_HTTP_PORT").or_else(|| parse_var("PORT")) {
            cfg.http_port = port;
        }

        if let Ok(db_path) = env::var("VIGIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(minutes) = parse_var::<u32>("MONITOR_INTERVAL_MINUTES") {
            cfg.interval_minutes = minutes.max(1);
        }

        if let Some(ms) = parse_var::<u64>("REQUEST_TIMEOUT_MS") {
            cfg.request_timeout = Duration::from_millis(ms.max(1000));
        }

        if let Some(n) = parse_var::<usize>("CONCURRENCY") {
            cfg.concurrency = n.max(1);
        }

        if let Ok(tz) = env::var("MONITOR_TZ_OFFSET") {
            match parse_offset(&tz) {
                Some(offset) => cfg.timezone = offset,
                None => tracing::warn!("Ignoring invalid MONITOR_TZ_OFFSET {:?}", tz),
            }
        }

        let sender = env::var("SENDER_EMAIL").unwrap_or_else(|_| DEFAULT_SENDER.to_string());
        cfg.alert_recipients = env::var("ALERT_RECIPIENTS")
            .ok()
            .map(|list| split_list(&list))
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| vec![sender.clone()]);

        cfg.email = EmailConfig::from_env(&sender);
        cfg.frontend_dist = env::var("FRONTEND_DIST").ok();

        cfg
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse an offset like `+05:30`, `-0800` or `Z`.
pub fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Some(Utc.fix());
    }

    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
