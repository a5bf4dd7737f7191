use std::fmt::Write;

use crate::database::models::{AlertEvent, Target, TransitionKind};
use crate::monitoring::FailureReason;

/// Text flavour of a rendered alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    /// Telegram HTML parse mode
    Html,
    Plain,
}

/// Escape the characters Telegram's HTML parse mode reserves
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Short subject line, e.g. for logs and webhook payloads
pub fn headline(event: &AlertEvent) -> &'static str {
    match (event.kind, &event.reason) {
        (TransitionKind::Recovered, _) => "Back online",
        (TransitionKind::WentDown, Some(FailureReason::UnexpectedStatus(_))) => "HTTP error",
        (TransitionKind::WentDown, Some(FailureReason::Timeout)) => "Timeout",
        (TransitionKind::WentDown, Some(FailureReason::Connection(_) | FailureReason::Dns(_))) => {
            "Connection error"
        }
        (TransitionKind::WentDown, Some(FailureReason::Request(_))) => "Request error",
        (TransitionKind::WentDown, None) => "Target down",
    }
}

/// Render the notification body for `event`
pub fn render(event: &AlertEvent, target: &Target, markup: Markup) -> String {
    let text = |raw: &str| match markup {
        Markup::Html => escape_html(raw),
        Markup::Plain => raw.to_string(),
    };
    let icon = match (event.kind, &event.reason) {
        (TransitionKind::Recovered, _) => "🟢",
        (_, Some(FailureReason::UnexpectedStatus(_))) => "🔴",
        (_, Some(FailureReason::Timeout)) => "⏱️",
        (_, Some(FailureReason::Connection(_) | FailureReason::Dns(_))) => "🔌",
        _ => "❌",
    };

    let mut body = String::new();
    match markup {
        Markup::Html => {
            let _ = write!(body, "{icon} <b>{}</b>\n\n", headline(event));
        }
        Markup::Plain => {
            let _ = write!(body, "{icon} {}\n\n", headline(event));
        }
    }
    let _ = write!(body, "📍 {}\n🔗 {}\n\n", text(target.display_name()), text(&target.url));

    match (event.kind, &event.reason) {
        (TransitionKind::Recovered, _) => {
            body.push_str("The target is responding again.");
            if let Some(code) = event.status_code {
                let _ = write!(body, "\nStatus code: {code}");
            }
        }
        (_, Some(FailureReason::UnexpectedStatus(code))) => {
            let _ = write!(body, "Status code: {code}");
        }
        (_, Some(FailureReason::Timeout)) => {
            let _ = write!(body, "No response within {}s.", target.timeout_seconds);
        }
        (_, Some(FailureReason::Connection(detail) | FailureReason::Dns(detail))) => {
            body.push_str("Could not connect to the server.\n");
            body.push_str("Possible causes: server unreachable, DNS problems, network.");
            if !detail.is_empty() {
                let _ = write!(body, "\n{}", text(detail));
            }
        }
        (_, Some(FailureReason::Request(detail))) => {
            let _ = write!(body, "The request failed:\n{}", text(detail));
        }
        (_, None) => body.push_str("The target stopped answering as expected."),
    }

    if let Some(latency) = event.latency_ms.filter(|ms| *ms > 0) {
        if !matches!(event.reason, Some(FailureReason::Timeout)) {
            let _ = write!(body, "\n⏱ Response time: {latency}ms");
        }
    }

    body
}
