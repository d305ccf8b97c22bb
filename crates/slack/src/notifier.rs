use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use santa_core::config::NotifierConfig;
use thiserror::Error;
use tracing::{debug, warn};

use crate::messages::SlackMessage;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("could not build notification client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("no response url to notify")]
    MissingUrl,
    #[error("notification transport failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("response url answered with status {status}")]
    Status { status: u16 },
}

/// Delivers a message to a Slack `response_url`. Failures are reported to the
/// caller, which logs them and carries on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, response_url: &str, message: &SlackMessage)
        -> Result<(), NotificationError>;
}

pub struct ResponseUrlNotifier {
    client: reqwest::Client,
}

impl ResponseUrlNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self, NotificationError> {
        if config.accept_invalid_certs {
            warn!(
                event_name = "slack.notifier.tls_relaxed",
                "certificate validation is disabled for response url delivery"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(NotificationError::Client)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for ResponseUrlNotifier {
    async fn notify(
        &self,
        response_url: &str,
        message: &SlackMessage,
    ) -> Result<(), NotificationError> {
        if response_url.trim().is_empty() {
            return Err(NotificationError::MissingUrl);
        }

        let response = self
            .client
            .post(response_url)
            .json(message)
            .send()
            .await
            .map_err(NotificationError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Status { status: status.as_u16() });
        }

        debug!(
            event_name = "slack.notifier.delivered",
            status = status.as_u16(),
            "response url notified"
        );
        Ok(())
    }
}

/// Keeps every notification in memory instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, SlackMessage)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records each attempt but reports it as undeliverable.
    pub fn failing() -> Self {
        Self { sent: Mutex::new(Vec::new()), fail: true }
    }

    pub fn sent(&self) -> Vec<(String, SlackMessage)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        response_url: &str,
        message: &SlackMessage,
    ) -> Result<(), NotificationError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((response_url.to_owned(), message.clone()));
        }
        if self.fail {
            return Err(NotificationError::Status { status: 503 });
        }
        Ok(())
    }
}
