//! Up/down transition detection with at-most-once alerting per edge.

use std::sync::Arc;

use serde::Serialize;

use crate::db::{DbError, LogEntry, Registry, Status, Target};
use crate::notify::Notifier;

/// Upper bound on compare-and-set retries before giving up on a contended update.
const MAX_CAS_ATTEMPTS: usize = 3;

/// Direction of a state flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Edge {
    OutageStarted,
    Recovered,
}

/// Emitted once for each detected flip.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionEvent {
    pub edge: Edge,
    pub entry: LogEntry,
}

#[derive(Debug, Clone, Default)]
pub struct Transition {
    pub transitioned: bool,
    pub event: Option<TransitionEvent>,
}

/// Decide whether observing `observed` while `stored` is persisted is a state flip.
pub fn decide(stored: Status, observed: Status) -> Option<Edge> {
    match (stored, observed) {
        (Status::Up, Status::Down) => Some(Edge::OutageStarted),
        (Status::Down, Status::Up) => Some(Edge::Recovered),
        _ => None,
    }
}

/// Compares check results against persisted target state and alerts on change.
pub struct StateTracker {
    registry: Arc<dyn Registry>,
    notifier: Arc<dyn Notifier>,
    fallback_recipients: Vec<String>,
}

impl StateTracker {
    pub fn new(registry: Arc<dyn Registry>, notifier: Arc<dyn Notifier>, fallback_recipients: Vec<String>) -> Self {
        Self {
            registry,
            notifier,
            fallback_recipients,
        }
    }

    /// Apply one check result to `target`'s persisted state.
    ///
    /// The read-decide-write step is a compare-and-set on the stored state, so
    /// of several racing callers observing the same edge only one transitions.
    /// The alert is sent after the write; its failure is logged and leaves the
    /// new state in place.
    pub async fn apply(&self, target: &Target, entry: &LogEntry) -> Result<Transition, DbError> {
        let mut attempts = 0;
        let (fresh, edge) = loop {
            let fresh = self.registry.get_target(target.id)?;
            let edge = match decide(fresh.current_state, entry.status) {
                Some(edge) => edge,
                None => return Ok(Transition::default()),
            };

            if self
                .registry
                .compare_and_set_state(fresh.id, fresh.current_state, entry.status, entry.timestamp)?
            {
                break (fresh, edge);
            }

            attempts += 1;
            if attempts >= MAX_CAS_ATTEMPTS {
                tracing::warn!("StateTracker: gave up updating state for {} after {} conflicts", fresh.name, attempts);
                return Ok(Transition::default());
            }
        };

        tracing::info!(
            target_id = fresh.id,
            "StateTracker: {} ({}) is now {} ({:?})",
            fresh.name,
            fresh.url,
            entry.status,
            edge
        );

        let event = TransitionEvent {
            edge,
            entry: entry.clone(),
        };
        self.dispatch(&fresh, &event).await;

        Ok(Transition {
            transitioned: true,
            event: Some(event),
        })
    }

    async fn dispatch(&self, target: &Target, event: &TransitionEvent) {
        let mut recipients = target.recipients();
        if recipients.is_empty() {
            recipients = self.fallback_recipients.clone();
        }

        let (subject, body) = compose_alert(target, event);
        if let Err(e) = self.notifier.send(&recipients, &subject, &body).await {
            tracing::error!(
                target_id = target.id,
                kind = e.kind().as_str(),
                "StateTracker: alert for {} failed: {}",
                target.name,
                e
            );
        }
    }
}

/// Subject and HTML body for a transition alert.
pub fn compose_alert(target: &Target, event: &TransitionEvent) -> (String, String) {
    let at = event.entry.timestamp.to_rfc3339();
    let code = event.entry.status_code;
    let ms = event.entry.response_time;

    match event.edge {
        Edge::OutageStarted => (
            format!("[Vigil] Outage detected: {} ({})", target.name, target.url),
            format!(
                "<p>Vigil has detected the application <b>{}</b> is <b>DOWN</b> as of {}.</p>\
                 <p>HTTP code: {} - response time: {} ms</p>\
                 <p>Please investigate.</p>",
                target.name, at, code, ms
            ),
        ),
        Edge::Recovered => (
            format!("[Vigil] Recovery: {} is UP", target.name),
            format!(
                "<p>Vigil recorded a recovery for <b>{}</b> ({}) at {}.</p>\
                 <p>HTTP code: {} - response time: {} ms</p>",
                target.name, target.url, at, code, ms
            ),
        ),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::Store;
    use crate::notify::NotifyError;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    /// Records every alert it is asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub sent: Mutex<Vec<(Vec<String>, String, String)>>,
        pub fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((recipients.to_vec(), subject.to_string(), body.to_string()));
            if self.fail {
                return Err(NotifyError::Build("mail relay unavailable".to_string()));
            }
            Ok(())
        }
    }

    fn setup(alert_emails: Option<&str>) -> (NamedTempFile, Arc<Store>, Target) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let mut target = Target {
            name: "api".to_string(),
            url: "https://api.example.com".to_string(),
            alert_emails: alert_emails.map(str::to_string),
            ..Default::default()
        };
        store.add_target(&mut target).unwrap();
        (tmp, store, target)
    }

    fn entry(target: &Target, status: Status, at: DateTime<Utc>) -> LogEntry {
        LogEntry {
            id: 0,
            application_id: target.id,
            status,
            status_code: if status == Status::Up { 200 } else { 0 },
            response_time: 40,
            timestamp: at,
            meta: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decide() {
        assert_eq!(decide(Status::Up, Status::Down), Some(Edge::OutageStarted));
        assert_eq!(decide(Status::Down, Status::Up), Some(Edge::Recovered));
        assert_eq!(decide(Status::Up, Status::Up), None);
        assert_eq!(decide(Status::Down, Status::Down), None);
    }

    #[tokio::test]
    async fn test_outage_fires_once() {
        let (_tmp, store, target) = setup(None);
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = StateTracker::new(store.clone(), notifier.clone(), vec!["oncall@example.com".to_string()]);

        let first = tracker.apply(&target, &entry(&target, Status::Down, t0())).await.unwrap();
        assert!(first.transitioned);
        assert_eq!(first.event.as_ref().map(|e| e.edge), Some(Edge::OutageStarted));

        let second = tracker
            .apply(&target, &entry(&target, Status::Down, t0() + Duration::minutes(5)))
            .await
            .unwrap();
        assert!(!second.transitioned);
        assert!(second.event.is_none());

        assert_eq!(notifier.count(), 1);
        let stored = store.get_target(target.id).unwrap();
        assert_eq!(stored.current_state, Status::Down);
        assert_eq!(stored.last_transition_at, Some(t0()));

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent[0].0, vec!["oncall@example.com".to_string()]);
        assert_eq!(sent[0].1, "[Vigil] Outage detected: api (https://api.example.com)");
    }

    #[tokio::test]
    async fn test_recovery_fires_once() {
        let (_tmp, store, target) = setup(Some("a@example.com, b@example.com"));
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = StateTracker::new(store.clone(), notifier.clone(), vec![]);
        store.set_state_if(target.id, Status::Up, Status::Down, t0()).unwrap();

        let later = t0() + Duration::hours(1);
        let result = tracker.apply(&target, &entry(&target, Status::Up, later)).await.unwrap();
        assert_eq!(result.event.map(|e| e.edge), Some(Edge::Recovered));

        let again = tracker.apply(&target, &entry(&target, Status::Up, later)).await.unwrap();
        assert!(!again.transitioned);

        let stored = store.get_target(target.id).unwrap();
        assert_eq!(stored.current_state, Status::Up);
        assert_eq!(stored.last_transition_at, Some(later));

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec!["a@example.com".to_string(), "b@example.com".to_string()]);
        assert_eq!(sent[0].1, "[Vigil] Recovery: api is UP");
    }

    #[tokio::test]
    async fn test_steady_up_writes_nothing() {
        let (_tmp, store, target) = setup(None);
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = StateTracker::new(store.clone(), notifier.clone(), vec![]);

        let result = tracker.apply(&target, &entry(&target, Status::Up, t0())).await.unwrap();
        assert!(!result.transitioned);
        assert_eq!(notifier.count(), 0);
        assert!(store.get_target(target.id).unwrap().last_transition_at.is_none());
    }

    #[tokio::test]
    async fn test_notify_failure_keeps_transition() {
        let (_tmp, store, target) = setup(None);
        let notifier = Arc::new(RecordingNotifier::failing());
        let tracker = StateTracker::new(store.clone(), notifier.clone(), vec!["x@example.com".to_string()]);

        let result = tracker.apply(&target, &entry(&target, Status::Down, t0())).await.unwrap();
        assert!(result.transitioned);
        assert_eq!(notifier.count(), 1);
        assert_eq!(store.get_target(target.id).unwrap().current_state, Status::Down);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_applies_fire_once() {
        let (_tmp, store, target) = setup(None);
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = Arc::new(StateTracker::new(store.clone(), notifier.clone(), vec!["x@example.com".to_string()]));

        let mut handles = Vec::new();
        for i in 0..8 {
            let tracker = tracker.clone();
            let target = target.clone();
            let e = entry(&target, Status::Down, t0() + Duration::seconds(i));
            handles.push(tokio::spawn(async move { tracker.apply(&target, &e).await.unwrap() }));
        }

        let mut fired = 0;
        for h in handles {
            if h.await.unwrap().transitioned {
                fired += 1;
            }
        }

        assert_eq!(fired, 1);
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_compose_alert_body() {
        let target = Target {
            name: "shop".to_string(),
            url: "https://shop.example.com".to_string(),
            ..Default::default()
        };
        let event = TransitionEvent {
            edge: Edge::OutageStarted,
            entry: entry(&target, Status::Down, t0()),
        };
        let (_, body) = compose_alert(&target, &event);
        assert!(body.contains("<b>shop</b>"));
        assert!(body.contains("2024-05-01T12:00:00+00:00"));
        assert!(body.contains("HTTP code: 0"));
    }
}
