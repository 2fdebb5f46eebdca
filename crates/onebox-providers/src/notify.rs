//! Notification sinks for `Interested` emails.
//!
//! - `SlackNotifier`: Slack incoming webhook with a Block Kit summary
//! - `WebhookNotifier`: generic JSON POST (`event: "InterestedLead"`)

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use onebox_core::error::NotifyError;
use onebox_core::types::ClassifiedEmail;
use onebox_core::utils::clip_chars;
use onebox_sync::traits::Notifier;

/// Characters of body shown in the Slack preview.
const PREVIEW_CHARS: usize = 200;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(NOTIFY_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// POST `payload` as JSON and map failures to `NotifyError`.
async fn post_json(
    client: &reqwest::Client,
    sink: &str,
    url: &str,
    payload: &Value,
) -> Result<(), NotifyError> {
    let response = client
        .post(url)
        .json(payload)
        .send()
        .await
        .map_err(|e| NotifyError::new(sink, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(NotifyError::new(sink, format!("HTTP {}: {}", status, body)));
    }
    debug!(sink = %sink, "notification delivered");
    Ok(())
}

// ─────────────────────────────────────────────
// Slack
// ─────────────────────────────────────────────

pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            webhook_url: webhook_url.into(),
        }
    }

    fn payload(email: &ClassifiedEmail) -> Value {
        let e = &email.email;
        json!({
            "text": "New Interested Lead",
            "blocks": [
                {
                    "type": "header",
                    "text": { "type": "plain_text", "text": "New Interested Lead", "emoji": true }
                },
                {
                    "type": "section",
                    "fields": [
                        { "type": "mrkdwn", "text": format!("*From:*\n{}", e.from) },
                        { "type": "mrkdwn", "text": format!("*Account:*\n{}", e.account_id) }
                    ]
                },
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": format!("*Subject:*\n{}", e.subject) }
                },
                {
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": format!("*Preview:*\n{}...", clip_chars(&e.body, PREVIEW_CHARS))
                    }
                },
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": format!("*Date:*\n{}", e.date.to_rfc3339()) }
                }
            ]
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    async fn notify(&self, email: &ClassifiedEmail) -> Result<(), NotifyError> {
        post_json(&self.client, self.name(), &self.webhook_url, &Self::payload(email)).await
    }
}

// ─────────────────────────────────────────────
// Generic webhook
// ─────────────────────────────────────────────

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            url: url.into(),
        }
    }

    fn payload(email: &ClassifiedEmail) -> Value {
        let e = &email.email;
        json!({
            "event": "InterestedLead",
            "timestamp": onebox_core::utils::timestamp(),
            "email": {
                "id": e.id,
                "from": e.from,
                "to": e.to,
                "subject": e.subject,
                "body": e.body,
                "date": e.date.to_rfc3339(),
                "accountId": e.account_id,
                "folder": e.folder,
                "category": email.category.as_str(),
            }
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, email: &ClassifiedEmail) -> Result<(), NotifyError> {
        post_json(&self.client, self.name(), &self.url, &Self::payload(email)).await
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
