use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{AlertChannel, AlertingConfig};
use crate::database::models::{AlertEvent, Target};

pub mod log;
pub mod telegram;
pub mod webhook;

pub use log::LogSender;
pub use telegram::TelegramSender;
pub use webhook::WebhookSender;

/// Timeout for a single outbound notification request
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[source] reqwest::Error),
}

impl From<reqwest::Error> for SenderError {
    /// Request URLs can carry credentials such as the Telegram bot token
    fn from(error: reqwest::Error) -> Self {
        SenderError::NetworkError(error.without_url())
    }
}

impl SenderError {
    /// Configuration problems do not go away by retrying
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SenderError::InvalidConfiguration(_))
    }
}

/// A channel alert events are delivered through.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn channel(&self) -> AlertChannel;

    /// Deliver one event about `target`.
    async fn send(&self, event: &AlertEvent, target: &Target) -> Result<(), SenderError>;
}

pub(crate) fn http_client() -> Result<reqwest::Client, SenderError> {
    Ok(reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?)
}

/// Build the sender for the configured channel
pub fn build_sender(config: &AlertingConfig) -> Result<Arc<dyn NotificationSender>, SenderError> {
    let sender: Arc<dyn NotificationSender> = match config.channel {
        AlertChannel::Log => Arc::new(LogSender),
        AlertChannel::Telegram => Arc::new(TelegramSender::new(config.telegram.clone(), http_client()?)?),
        AlertChannel::Webhook => Arc::new(WebhookSender::new(config.webhook.clone(), http_client()?)?),
    };
    Ok(sender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channel_is_log() {
        let sender = build_sender(&AlertingConfig::default()).unwrap();
        assert_eq!(sender.channel(), AlertChannel::Log);
    }

    #[test]
    fn telegram_without_token_is_rejected() {
        let config = AlertingConfig { channel: AlertChannel::Telegram, ..AlertingConfig::default() };
        let error = build_sender(&config).err().expect("missing token must be rejected");
        assert!(matches!(error, SenderError::InvalidConfiguration(_)));
        assert!(!error.is_retryable());
    }

    #[test]
    fn webhook_requires_url() {
        let config = AlertingConfig { channel: AlertChannel::Webhook, ..AlertingConfig::default() };
        assert!(matches!(build_sender(&config), Err(SenderError::InvalidConfiguration(_))));
    }
}
