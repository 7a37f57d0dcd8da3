//! Time source used by probes, the aggregator, and the periodic trigger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Wall-clock abstraction so elapsed time can be simulated in tests.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Suspend until `deadline` has passed.
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = deadline - Utc::now();
        if let Ok(d) = remaining.to_std() {
            tokio::time::sleep(d).await;
        }
    }
}

#[cfg(test)]
pub use manual::ManualClock;
