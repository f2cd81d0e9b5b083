//! Run summary notification through a chat-bot webhook (Feishu/Lark text
//! message format).
//!
//! Delivery is best effort: [`notify`] logs failures and never returns them.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{abbreviate, CanonicalItem};
use crate::report::{RunReport, RunSummary};

/// Chat webhooks truncate long messages; stay under their limit.
const MAX_TEXT_CHARS: usize = 3500;
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Request timed out after 20s")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Webhook rejected message (code={code}, msg={message:?})")]
    Rejected { code: String, message: String },
    #[error("Insecure webhook URL: HTTPS required (except localhost for testing)")]
    InsecureUrl,
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    msg_type: &'static str,
    content: TextContent<'a>,
    summary: RunSummary,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook: SecretString,
    max_items: usize,
}

impl WebhookNotifier {
    /// SEC-002: The webhook URL embeds the bot token, so it must be HTTPS.
    /// Plain HTTP is accepted for localhost only.
    pub fn new(
        client: reqwest::Client,
        webhook: SecretString,
        max_items: usize,
    ) -> Result<Self, NotifyError> {
        let url = webhook.expose_secret();
        if !url.starts_with("https://") {
            let is_localhost =
                url.starts_with("http://127.0.0.1") || url.starts_with("http://localhost");
            if !is_localhost {
                return Err(NotifyError::InsecureUrl);
            }
            tracing::warn!("Using non-HTTPS webhook URL (localhost only)");
        }
        Ok(Self {
            client,
            webhook,
            max_items,
        })
    }

    /// Only runs with news or failures are worth a message.
    pub fn should_notify(report: &RunReport) -> bool {
        !report.new_items.is_empty() || !report.failures.is_empty()
    }

    /// Human-readable message body, at most 3500 characters.
    pub fn compose_text(&self, report: &RunReport) -> String {
        let new = &report.new_items;
        let mut lines = vec![format!("Paper-Feed updated: +{} new items", new.len())];
        lines.push(format!(
            "Sources: {} ({} failed), fetched {}, matched {}, pruned {}, total {}",
            report.sources,
            report.sources_failed,
            report.fetched_items,
            report.matched_items,
            report.pruned_items,
            report.output_items
        ));

        let shown = new.len().min(self.max_items);
        for item in &new[..shown] {
            push_item_lines(&mut lines, item);
        }
        if new.len() > shown {
            lines.push(format!("... and {} more", new.len() - shown));
        }

        if !report.failures.is_empty() {
            lines.push(format!("{} failures:", report.failures.len()));
            for failure in &report.failures {
                lines.push(format!("- [{}] {}: {}", failure.stage, failure.target, failure.message));
            }
        }

        let text = lines.join("\n");
        if text.chars().count() > MAX_TEXT_CHARS {
            text.chars().take(MAX_TEXT_CHARS).collect()
        } else {
            text
        }
    }

    /// Posts the run summary. A JSON body with a non-zero `code` (or
    /// `StatusCode`) counts as a rejection even on HTTP 200.
    pub async fn send(&self, report: &RunReport) -> Result<(), NotifyError> {
        let text = self.compose_text(report);
        let payload = Payload {
            msg_type: "text",
            content: TextContent { text: &text },
            summary: report.summary(self.max_items),
        };
        let body = serde_json::to_vec(&payload)?;

        let request = self
            .client
            .post(self.webhook.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(body);

        let response = tokio::time::timeout(NOTIFY_TIMEOUT, request.send())
            .await
            .map_err(|_| NotifyError::Timeout)?
            .map_err(NotifyError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::HttpStatus(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        check_response_code(&bytes)
    }
}

fn push_item_lines(lines: &mut Vec<String>, item: &CanonicalItem) {
    let title = item.title.trim();
    if title.is_empty() {
        return;
    }
    if item.source_title.trim().is_empty() {
        lines.push(format!("- {}", title));
    } else {
        lines.push(format!("- [{}] {}", abbreviate(&item.source_title), title));
    }
    let link = item.link.trim();
    if !link.is_empty() {
        lines.push(format!("  {}", link));
    }
}

fn check_response_code(body: &[u8]) -> Result<(), NotifyError> {
    if body.is_empty() {
        return Ok(());
    }
    let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) else {
        return Ok(());
    };

    let code = json.get("code").or_else(|| json.get("StatusCode"));
    let code = match code {
        None | Some(serde_json::Value::Null) => return Ok(()),
        Some(serde_json::Value::Number(n)) if n.as_i64() == Some(0) => return Ok(()),
        Some(serde_json::Value::String(s)) if s == "0" => return Ok(()),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    let message = json
        .get("msg")
        .or_else(|| json.get("StatusMessage"))
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();
    Err(NotifyError::Rejected { code, message })
}

/// Sends the summary when configured and warranted; failures are logged.
pub async fn notify(notifier: Option<&WebhookNotifier>, report: &RunReport) {
    let Some(notifier) = notifier else {
        return;
    };
    if !WebhookNotifier::should_notify(report) {
        tracing::debug!("Nothing new and no failures, skipping notification");
        return;
    }
    match notifier.send(report).await {
        Ok(()) => tracing::info!("Notification sent"),
        Err(e) => tracing::warn!(error = %e, "Notification failed"),
    }
}
