//! Notification senders.
//!
//! A [`Notifier`] makes one delivery attempt and classifies failure as
//! transient (worth retrying) or permanent. Retrying is the caller's job, see
//! [`crate::retry`].

use crate::render::RenderedMessage;
use crate::subscription::Owner;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

pub trait Notifier: Send + Sync {
    fn send(&self, destination: &Owner, message: &RenderedMessage) -> Result<(), DeliveryError>;
}

// ---------------------------------------------------------------------------
// LogNotifier
// ---------------------------------------------------------------------------

/// Writes reminders to the tracing log instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, destination: &Owner, message: &RenderedMessage) -> Result<(), DeliveryError> {
        info!(
            to = %destination.email,
            subject = %message.subject,
            body = %message.body,
            "reminder"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WebhookNotifier
// ---------------------------------------------------------------------------

/// POSTs each reminder as JSON to a mail relay or chat webhook.
///
/// 429 and 5xx responses and transport errors are transient; any other
/// non-success status is permanent.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    timeout: Duration,
    client: OnceLock<reqwest::blocking::Client>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            client: OnceLock::new(),
        }
    }

    /// The shared HTTP client, built on first use. A blocking client must not
    /// be constructed on an async thread, and sends only run on blocking ones.
    fn client(&self) -> Result<&reqwest::blocking::Client, DeliveryError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| DeliveryError::Permanent(format!("http client: {e}")))?;
        Ok(self.client.get_or_init(|| built))
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, destination: &Owner, message: &RenderedMessage) -> Result<(), DeliveryError> {
        let client = self.client()?;

        let payload = serde_json::json!({
            "to": destination.email,
            "name": destination.name,
            "subject": message.subject,
            "body": message.body,
        });

        let response = client.post(&self.url).json(&payload).send().map_err(|e| {
            warn!(url = %self.url, error = %e, "webhook request failed");
            if e.is_builder() {
                DeliveryError::Permanent(e.to_string())
            } else {
                DeliveryError::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = format!("webhook returned {status}");
        if status.as_u16() == 429 || status.is_server_error() {
            Err(DeliveryError::Transient(detail))
        } else {
            Err(DeliveryError::Permanent(detail))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Owner {
        Owner {
            id: "u1".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
        }
    }

    fn message() -> RenderedMessage {
        RenderedMessage {
            subject: "Reminder".into(),
            body: "Your plan renews soon".into(),
        }
    }

    fn notifier(server: &mockito::Server) -> WebhookNotifier {
        WebhookNotifier::new(format!("{}/hook", server.url()), Duration::from_secs(5))
    }

    #[test]
    fn success_posts_json_payload() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "to": "ada@example.com",
                "subject": "Reminder",
            })))
            .with_status(202)
            .create();

        notifier(&server).send(&owner(), &message()).unwrap();
        mock.assert();
    }

    #[test]
    fn server_error_is_transient() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/hook").with_status(503).create();
        let err = notifier(&server).send(&owner(), &message()).unwrap_err();
        assert!(err.is_transient(), "{err}");
    }

    #[test]
    fn rate_limit_is_transient() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/hook").with_status(429).create();
        assert!(notifier(&server)
            .send(&owner(), &message())
            .unwrap_err()
            .is_transient());
    }

    #[test]
    fn client_error_is_permanent() {
        let mut server = mockito::Server::new();
        server.mock("POST", "/hook").with_status(400).create();
        let err = notifier(&server).send(&owner(), &message()).unwrap_err();
        assert_eq!(err, DeliveryError::Permanent("webhook returned 400 Bad Request".into()));
    }

    #[test]
    fn client_is_built_once_and_reused() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/hook")
            .with_status(200)
            .expect(2)
            .create();
        let n = notifier(&server);
        assert!(n.client.get().is_none());

        n.send(&owner(), &message()).unwrap();
        let first: *const reqwest::blocking::Client = n.client.get().unwrap();
        n.send(&owner(), &message()).unwrap();
        assert!(std::ptr::eq(first, n.client.get().unwrap()));
        mock.assert();
    }

    #[test]
    fn log_notifier_always_succeeds() {
        assert!(LogNotifier.send(&owner(), &message()).is_ok());
    }
}
