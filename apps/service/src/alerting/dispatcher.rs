use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::senders::{NotificationSender, SenderError};
use crate::config::AlertingConfig;
use crate::database::Database;
use crate::database::models::DeliveryStatus;
use crate::error::DeliveryError;
use crate::retry::{RetryPolicy, retry_with_backoff};

/// Alert dispatcher - delivers stored alert events at least once.
///
/// Events are referenced by id and re-read from storage before sending, so
/// an event that is already settled is never delivered again.
pub struct AlertDispatcher {
    database: Arc<dyn Database>,
    sender: Arc<dyn NotificationSender>,
    policy: RetryPolicy,
}

impl AlertDispatcher {
    pub fn new(database: Arc<dyn Database>, sender: Arc<dyn NotificationSender>, config: &AlertingConfig) -> Self {
        let policy = RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_millis),
            Duration::from_secs(config.max_delay_seconds),
        );
        Self { database, sender, policy }
    }

    /// Deliver one event and record the outcome
    pub async fn dispatch(&self, event_id: Uuid) -> Result<DeliveryStatus, DeliveryError> {
        // removing a target deletes its queued alerts with it
        let Some(event) = self.database.get_alert_event(event_id).await? else {
            debug!(event = %event_id, "Alert event no longer exists, not sending");
            return Err(DeliveryError::EventMissing(event_id));
        };

        if event.delivery_status.is_settled() {
            debug!(event = %event_id, status = %event.delivery_status, "Alert already settled, not sending");
            return Ok(event.delivery_status);
        }

        let Some(target) = self.database.get_target(event.target_uuid).await? else {
            error!(target = %event.target_uuid, event = %event_id, kind = %event.kind, "Alert target was removed, dropping alert");
            self.database
                .update_alert_delivery(event_id, DeliveryStatus::Failed, event.attempts, Some("target removed"))
                .await?;
            return Err(DeliveryError::TargetMissing(event.target_uuid));
        };

        let outcome = retry_with_backoff(
            &self.policy,
            "alert delivery",
            SenderError::is_retryable,
            |_| self.sender.send(&event, &target),
        )
        .await;

        match outcome {
            Ok(((), used)) => {
                let attempts = event.attempts + used;
                self.database.update_alert_delivery(event_id, DeliveryStatus::Delivered, attempts, None).await?;
                info!(
                    target = %target.uuid,
                    event = %event_id,
                    kind = %event.kind,
                    channel = %self.sender.channel(),
                    attempts,
                    "Alert delivered"
                );
                Ok(DeliveryStatus::Delivered)
            }
            Err((e, used)) => {
                let attempts = event.attempts + used;
                let message = e.to_string();
                self.database
                    .update_alert_delivery(event_id, DeliveryStatus::Failed, attempts, Some(&message))
                    .await?;
                let reason = event.reason.as_ref().map(|reason| reason.to_string()).unwrap_or_default();
                error!(
                    target = %target.uuid,
                    url = %target.url,
                    event = %event_id,
                    kind = %event.kind,
                    reason = %reason,
                    attempts,
                    "Alert delivery failed: {}",
                    message
                );
                Err(DeliveryError::Exhausted { event_id, attempts, message })
            }
        }
    }

    /// Push every still-pending event onto `queue`, oldest first
    pub async fn requeue_pending(&self, queue: &mpsc::Sender<Uuid>) -> anyhow::Result<usize> {
        let pending = self.database.get_pending_alert_events().await?;
        let count = pending.len();
        for event in pending {
            queue.send(event.uuid).await?;
        }
        if count > 0 {
            info!("Re-queued {} pending alert(s)", count);
        }
        Ok(count)
    }

    /// Deliver queued events one at a time until the queue closes.
    ///
    /// Sequential delivery keeps a target's went_down and recovered alerts in
    /// the order they happened.
    pub fn spawn(self: Arc<Self>, mut queue: mpsc::Receiver<Uuid>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event_id) = queue.recv().await {
                match self.dispatch(event_id).await {
                    Ok(status) => debug!(event = %event_id, %status, "Alert processed"),
                    // already logged with context
                    Err(
                        DeliveryError::Exhausted { .. }
                        | DeliveryError::EventMissing(_)
                        | DeliveryError::TargetMissing(_),
                    ) => {}
                    Err(e) => error!(event = %event_id, "Alert dispatch failed: {:#}", e),
                }
            }
            debug!("Alert queue closed, dispatcher stopping");
        })
    }
}
