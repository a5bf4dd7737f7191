use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, header};
use serde::Serialize;
use uuid::Uuid;

use super::{NotificationSender, SenderError};
use crate::alerting::message::{Markup, headline, render};
use crate::config::{AlertChannel, WebhookConfig};
use crate::database::models::{AlertEvent, Target, TransitionKind};

/// A sender for pushing alert events as JSON to a custom webhook.
pub struct WebhookSender {
    client: Client,
    url: String,
    headers: header::HeaderMap,
}

impl WebhookSender {
    pub fn new(config: WebhookConfig, client: Client) -> Result<Self, SenderError> {
        if config.url.trim().is_empty() {
            return Err(SenderError::InvalidConfiguration("webhook url is not set".to_string()));
        }
        url::Url::parse(&config.url)
            .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid webhook url: {e}")))?;

        let mut headers = header::HeaderMap::new();
        for (key, value) in &config.headers {
            let header_name = header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid header name: {e}")))?;
            let header_value = header::HeaderValue::from_str(value)
                .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid header value: {e}")))?;
            headers.insert(header_name, header_value);
        }

        Ok(Self { client, url: config.url, headers })
    }
}

#[derive(Debug, Serialize)]
struct TargetSummary<'a> {
    uuid: Uuid,
    name: &'a str,
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event_id: Uuid,
    kind: TransitionKind,
    occurred_at: String,
    title: &'a str,
    message: String,
    reason: Option<&'static str>,
    detail: Option<String>,
    status_code: Option<u16>,
    latency_ms: Option<u64>,
    target: TargetSummary<'a>,
}

impl<'a> WebhookPayload<'a> {
    fn new(event: &'a AlertEvent, target: &'a Target) -> Self {
        let occurred_at: DateTime<Utc> = event.occurred_at.into();
        Self {
            event_id: event.uuid,
            kind: event.kind,
            occurred_at: occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            title: headline(event),
            message: render(event, target, Markup::Plain),
            reason: event.reason.as_ref().map(|reason| reason.kind()),
            detail: event.reason.as_ref().and_then(|reason| reason.detail()),
            status_code: event.status_code,
            latency_ms: event.latency_ms,
            target: TargetSummary { uuid: target.uuid, name: target.display_name(), url: &target.url },
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    fn channel(&self) -> AlertChannel {
        AlertChannel::Webhook
    }

    async fn send(&self, event: &AlertEvent, target: &Target) -> Result<(), SenderError> {
        let payload = WebhookPayload::new(event, target);

        let response =
            self.client.post(&self.url).headers(self.headers.clone()).json(&payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body =
                response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Webhook returned non-success status: {status}. Body: {error_body}"
            )));
        }

        Ok(())
    }
}
