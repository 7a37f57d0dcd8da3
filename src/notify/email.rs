//! Email alert delivery via SMTP.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{Notifier, NotifyError};

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Configuration for the SMTP email delivery service.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port (defaults to 587).
    pub smtp_port: u16,
    /// Address alerts are sent from.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set, signalling that email
    /// delivery is not configured and should be skipped.
    ///
    /// | Variable        | Required | Default                 |
    /// |-----------------|----------|-------------------------|
    /// | `SMTP_HOST`     | yes      |                         |
    /// | `SMTP_PORT`     | no       | `587`                   |
    /// | `SMTP_USER`     | no       |                         |
    /// | `SMTP_PASSWORD` | no       |                         |
    pub fn from_env(from_address: &str) -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: from_address.to_string(),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

/// Sends HTML alert emails through an SMTP relay.
pub struct EmailNotifier {
    from_address: String,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from_address: config.from_address.clone(),
            mailer: builder.build(),
        })
    }

    fn build_message(&self, recipients: &[String], subject: &str, body: &str) -> Result<Message, NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let mut builder = Message::builder()
            .from(self.from_address.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        for to in recipients {
            builder = builder.to(to.parse()?);
        }

        builder
            .body(body.to_string())
            .map_err(|e| NotifyError::Build(e.to_string()))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        let email = self.build_message(recipients, subject, body)?;
        self.mailer.send(email).await?;

        tracing::info!(to = %recipients.join(","), "Alert sent: {}", subject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> EmailNotifier {
        EmailNotifier::new(&EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 2525,
            from_address: "vigil@example.com".to_string(),
            smtp_user: None,
            smtp_password: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_message_rejects_bad_address() {
        let n = notifier();
        let result = n.build_message(&["not-an-email".to_string()], "s", "b");
        assert!(matches!(result, Err(NotifyError::Address(_))));
    }

    #[tokio::test]
    async fn test_build_message_multiple_recipients() {
        let n = notifier();
        let msg = n
            .build_message(
                &["a@example.com".to_string(), "b@example.com".to_string()],
                "[Vigil] Recovery: api is UP",
                "<p>ok</p>",
            )
            .unwrap();
        assert_eq!(msg.envelope().to().len(), 2);
    }

    #[tokio::test]
    async fn test_build_message_requires_recipients() {
        let n = notifier();
        assert!(matches!(n.build_message(&[], "s", "b"), Err(NotifyError::NoRecipients)));
    }
}
