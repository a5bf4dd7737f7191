use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{NotificationSender, SenderError};
use crate::alerting::message::{Markup, render};
use crate::config::{AlertChannel, TelegramConfig};
use crate::database::models::{AlertEvent, Target};

/// A sender for pushing notifications via the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
    config: TelegramConfig,
}

impl TelegramSender {
    pub fn new(config: TelegramConfig, client: Client) -> Result<Self, SenderError> {
        if config.bot_token.trim().is_empty() {
            return Err(SenderError::InvalidConfiguration("telegram bot_token is not set".to_string()));
        }
        Ok(Self { client, config })
    }

    /// Owner of the target first, then the configured default chat
    fn recipient<'a>(&'a self, target: &'a Target) -> Option<&'a str> {
        target
            .owner_chat_id
            .as_deref()
            .or(self.config.default_chat_id.as_deref())
            .filter(|chat_id| !chat_id.trim().is_empty())
    }

    fn api_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.config.api_base.trim_end_matches('/'), self.config.bot_token)
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    fn channel(&self) -> AlertChannel {
        AlertChannel::Telegram
    }

    async fn send(&self, event: &AlertEvent, target: &Target) -> Result<(), SenderError> {
        let chat_id = self.recipient(target).ok_or_else(|| {
            SenderError::InvalidConfiguration(format!(
                "no chat id for target {} and no default_chat_id configured",
                target.uuid
            ))
        })?;

        let text = render(event, target, Markup::Html);
        let payload = TelegramMessage { chat_id, text: &text, parse_mode: "HTML", disable_web_page_preview: true };

        let response = self.client.post(self.api_url()).json(&payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body =
                response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Telegram API returned non-success status: {status}. Body: {error_body}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::TransitionKind;
    use crate::monitoring::FailureReason;
    use std::time::SystemTime;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Accept one request, answer with `status_line`, hand back the raw request
    async fn capture_once(status_line: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some((head, body)) = text.split_once("\r\n\r\n") {
                    let length = head
                        .lines()
                        .find_map(|line| line.to_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if body.len() >= length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("HTTP/1.1 {status_line}\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{{}}");
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&request).to_string());
        });

        (format!("http://{addr}"), rx)
    }

    fn sender(api_base: String, default_chat_id: Option<&str>) -> TelegramSender {
        let config = TelegramConfig {
            bot_token: "123:abc".into(),
            default_chat_id: default_chat_id.map(str::to_string),
            api_base,
        };
        TelegramSender::new(config, Client::builder().no_proxy().build().unwrap()).unwrap()
    }

    fn event() -> AlertEvent {
        let mut event = AlertEvent::new(uuid::Uuid::new_v4(), TransitionKind::WentDown, SystemTime::now());
        event.reason = Some(FailureReason::UnexpectedStatus(500));
        event
    }

    #[tokio::test]
    async fn posts_html_message_to_owner_chat() {
        let (base, request) = capture_once("200 OK").await;
        let mut target = Target::new("https://example.com");
        target.owner_chat_id = Some("42".into());

        sender(base, Some("7")).send(&event(), &target).await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /bot123:abc/sendMessage"));
        assert!(request.contains("\"chat_id\":\"42\""));
        assert!(request.contains("\"parse_mode\":\"HTML\""));
        assert!(request.contains("\"disable_web_page_preview\":true"));
    }

    #[tokio::test]
    async fn api_error_is_send_failure() {
        let (base, _request) = capture_once("400 Bad Request").await;
        let target = Target::new("https://example.com");

        let error = sender(base, Some("7")).send(&event(), &target).await.unwrap_err();
        assert!(matches!(error, SenderError::SendFailed(_)));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn network_error_does_not_reveal_token() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let target = Target::new("https://example.com");

        let error = sender(format!("http://{addr}"), Some("7")).send(&event(), &target).await.unwrap_err();
        assert!(matches!(error, SenderError::NetworkError(_)));
        assert!(error.is_retryable());
        assert!(!error.to_string().contains("123:abc"), "{error}");
        assert!(!format!("{error:?}").contains("123:abc"));
    }

    #[tokio::test]
    async fn missing_recipient_is_configuration_error() {
        let target = Target::new("https://example.com");

        let error = sender("http://127.0.0.1:9".into(), None).send(&event(), &target).await.unwrap_err();
        assert!(matches!(error, SenderError::InvalidConfiguration(_)));
    }
}
