/// Alerting - formats and delivers confirmed state transitions
pub mod dispatcher;
pub mod message;
pub mod senders;

pub use dispatcher::AlertDispatcher;
pub use senders::{NotificationSender, SenderError, build_sender};
