//! Outbound alert delivery.
//!
//! The monitoring core only needs "send these recipients this message"; the
//! transport is chosen at startup. Delivery failures are returned to the
//! caller as [`NotifyError`] and never unwind past it.

mod email;

pub use email::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::probe::ErrorKind;

/// Notification delivery errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),

    #[error("no recipients")]
    NoRecipients,
}

impl NotifyError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::NotifyFailure
    }
}

/// Sink for alert messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Writes alerts to the log instead of delivering them. Used when SMTP is not configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        tracing::warn!(
            to = %recipients.join(","),
            "Alert (email delivery not configured): {} | {}",
            subject,
            body
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_requires_recipients() {
        let notifier = LogNotifier;
        assert!(matches!(
            notifier.send(&[], "subject", "body").await,
            Err(NotifyError::NoRecipients)
        ));
        assert!(notifier
            .send(&["ops@example.com".to_string()], "subject", "body")
            .await
            .is_ok());
    }

    #[test]
    fn test_notify_error_kind() {
        let err = NotifyError::Build("missing body".to_string());
        assert_eq!(err.kind(), ErrorKind::NotifyFailure);
        assert_eq!(err.to_string(), "Email build error: missing body");
    }
}
