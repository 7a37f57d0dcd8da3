//! Wall-clock periodic trigger for sweeps.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Timelike, Utc};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

/// Fires every `cadence_minutes` on the local wall clock of a fixed UTC offset.
///
/// Fire times are the local minutes `0, N, 2N, ...` below 60 of every hour, at
/// second zero. A cadence of 60 or more therefore fires once an hour, on the hour.
pub struct PeriodicTrigger {
    cadence_minutes: u32,
    offset: FixedOffset,
    clock: Arc<dyn Clock>,
}

impl PeriodicTrigger {
    pub fn new(cadence_minutes: u32, offset: FixedOffset, clock: Arc<dyn Clock>) -> Self {
        Self {
            cadence_minutes: cadence_minutes.max(1),
            offset,
            clock,
        }
    }

    /// The first fire time strictly after `now`.
    pub fn next_fire(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.offset);
        let truncated = local - ChronoDuration::nanoseconds(local.nanosecond() as i64)
            - ChronoDuration::seconds(local.second() as i64);
        let candidate = truncated + ChronoDuration::minutes(1);

        let n = self.cadence_minutes;
        let minute = candidate.minute();
        let next_minute = minute.div_ceil(n) * n;

        let fire = if next_minute < 60 {
            candidate + ChronoDuration::minutes((next_minute - minute) as i64)
        } else {
            candidate + ChronoDuration::minutes((60 - minute) as i64)
        };
        fire.with_timezone(&Utc)
    }

    /// Call `on_fire` at every fire time until `cancel` is triggered.
    ///
    /// Each call is awaited before the next fire time is computed, so a slow
    /// sweep skips the slots it overran instead of stacking up.
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut on_fire: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        tracing::info!(
            "Trigger: firing every {} minute(s) at UTC{}",
            self.cadence_minutes,
            self.offset
        );

        let mut last_fired: Option<DateTime<Utc>> = None;

        loop {
            // A clock that wakes a little early must not reselect the slot just fired.
            let now = self.clock.now();
            let from = last_fired.map_or(now, |last| now.max(last));
            let next = self.next_fire(from);
            tracing::debug!("Trigger: next fire at {}", next);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Trigger: stopping");
                    break;
                }
                _ = self.clock.sleep_until(next) => {
                    last_fired = Some(next);
                    on_fire().await;
                }
            }
        }
    }
}
