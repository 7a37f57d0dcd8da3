//! Uptime aggregation over stored check logs.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::db::{DbError, LogEntry, LogStore, Status};

/// Up/total counts over a time range. Computed on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub up_count: u64,
    pub total_count: u64,
}

impl UptimeWindow {
    /// Uptime percentage in `[0, 100]`; a window with no observations reads as 0.
    pub fn pct(&self) -> f64 {
        ratio(self.up_count, self.total_count)
    }
}

/// Uptime for one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyUptime {
    pub date: NaiveDate,
    pub uptime: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    up: u64,
    total: u64,
}

impl Counts {
    fn record(&mut self, status: Status) {
        self.total += 1;
        if status == Status::Up {
            self.up += 1;
        }
    }
}

fn ratio(up: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * up as f64 / total as f64
}

/// Dashboard view of one target over a recent window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSummary {
    pub window: UptimeWindow,
    pub avg_response_time: f64,
    pub latest_status: Option<Status>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Answers uptime queries from log windows.
pub struct Aggregator {
    logs: Arc<dyn LogStore>,
    clock: Arc<dyn Clock>,
}

impl Aggregator {
    pub fn new(logs: Arc<dyn LogStore>, clock: Arc<dyn Clock>) -> Self {
        Self { logs, clock }
    }

    fn recent(&self, target_id: i64, hours: u32) -> Result<(UptimeWindow, Vec<LogEntry>), DbError> {
        let to = self.clock.now();
        let from = to
            .checked_sub_signed(ChronoDuration::hours(hours as i64))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let entries = self.logs.query_logs(target_id, from, to)?;

        let mut counts = Counts::default();
        for e in &entries {
            counts.record(e.status);
        }

        let window = UptimeWindow {
            from,
            to,
            up_count: counts.up,
            total_count: counts.total,
        };
        Ok((window, entries))
    }

    /// Counts over the last `hours` hours.
    pub fn window(&self, target_id: i64, hours: u32) -> Result<UptimeWindow, DbError> {
        Ok(self.recent(target_id, hours)?.0)
    }

    /// Uptime, mean response time and latest result over the last `hours` hours.
    pub fn summary(&self, target_id: i64, hours: u32) -> Result<WindowSummary, DbError> {
        let (window, entries) = self.recent(target_id, hours)?;
        let avg_response_time = if entries.is_empty() {
            0.0
        } else {
            entries.iter().map(|e| e.response_time as f64).sum::<f64>() / entries.len() as f64
        };
        let latest = entries.last();

        Ok(WindowSummary {
            window,
            avg_response_time,
            latest_status: latest.map(|e| e.status),
            last_checked_at: latest.map(|e| e.timestamp),
        })
    }

    /// Uptime percentage over the last `hours` hours.
    pub fn uptime_pct(&self, target_id: i64, hours: u32) -> Result<f64, DbError> {
        Ok(self.window(target_id, hours)?.pct())
    }

    /// One uptime point per calendar day for the last `days` days, oldest first.
    pub fn daily_series(&self, target_id: i64, days: u32) -> Result<Vec<DailyUptime>, DbError> {
        let to = self.clock.now();
        let from = to
            .checked_sub_signed(ChronoDuration::days(days as i64))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let entries = self.logs.query_logs(target_id, from, to)?;
        Ok(bucket_daily(&entries, to, days))
    }
}

/// Project entries onto `days` consecutive UTC dates ending at `now`'s date.
///
/// Slot `i` holds the date `days - 1 - i` days before today, so the output
/// always has exactly `days` points, unless that would reach before the earliest
/// representable date, where the series starts instead. Entries dated outside
/// the slots are ignored.
pub fn bucket_daily(entries: &[LogEntry], now: DateTime<Utc>, days: u32) -> Vec<DailyUptime> {
    if days == 0 {
        return Vec::new();
    }

    let today = now.date_naive();
    let first = today
        .checked_sub_signed(ChronoDuration::days(days as i64 - 1))
        .unwrap_or(NaiveDate::MIN);
    let len = (today - first).num_days() + 1;
    let mut slots = vec![Counts::default(); len as usize];

    for e in entries {
        let offset = (e.timestamp.date_naive() - first).num_days();
        if let Some(slot) = usize::try_from(offset).ok().and_then(|i| slots.get_mut(i)) {
            slot.record(e.status);
        }
    }

    slots
        .iter()
        .enumerate()
        .map(|(i, c)| DailyUptime {
            date: first + ChronoDuration::days(i as i64),
            uptime: ratio(c.up, c.total),
        })
        .collect()
}
