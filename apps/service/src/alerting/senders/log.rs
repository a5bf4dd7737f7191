use async_trait::async_trait;
use tracing::{info, warn};

use super::{NotificationSender, SenderError};
use crate::alerting::message::{Markup, render};
use crate::config::AlertChannel;
use crate::database::models::{AlertEvent, Target, TransitionKind};

/// Writes alerts to the service log; used when no external channel is set up.
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    fn channel(&self) -> AlertChannel {
        AlertChannel::Log
    }

    async fn send(&self, event: &AlertEvent, target: &Target) -> Result<(), SenderError> {
        let body = render(event, target, Markup::Plain).replace('\n', " | ");
        match event.kind {
            TransitionKind::WentDown => warn!(target = %target.uuid, event = %event.uuid, "ALERT {}", body),
            TransitionKind::Recovered => info!(target = %target.uuid, event = %event.uuid, "ALERT {}", body),
        }
        Ok(())
    }
}
