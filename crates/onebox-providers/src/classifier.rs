//! Email classifier backed by any OpenAI-compatible `/chat/completions` API.
//!
//! The model is asked for a JSON object `{"category": "<label>"}`. The reply
//! is parsed leniently: a JSON object, a JSON object wrapped in a code
//! fence, or a bare label all work. Anything outside the closed label set is
//! an error; the pipeline maps every error to `Uncategorized`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use onebox_core::config::schema::ClassifierConfig;
use onebox_core::error::ClassificationError;
use onebox_core::types::Category;
use onebox_sync::traits::Classifier;

// ─────────────────────────────────────────────
// Prompt
// ─────────────────────────────────────────────

const SYSTEM_PROMPT: &str = "You are an expert email classifier. Your task is to analyze the provided email text and categorize it into one of the following labels:
- Interested: The sender shows genuine interest in the product or offer and wants to proceed or learn more.
- Meeting Booked: The email confirms a scheduled meeting or call.
- Not Interested: The sender explicitly declines or says they are not interested.
- Spam: The email is spam, promotional, or unsolicited.
- Out of Office: The email is an out of office or automatic reply.
Respond ONLY with a valid JSON object containing the category field.";

fn user_prompt(subject: &str, body: &str) -> String {
    format!("Subject: {}\n\nBody: {}", subject, body)
}

// ─────────────────────────────────────────────
// LlmClassifier
// ─────────────────────────────────────────────

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CategoryReply {
    category: Option<String>,
}

/// Labels emails through a chat completions endpoint.
pub struct LlmClassifier {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for LlmClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClassifier")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl LlmClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, subject: &str, body: &str) -> Result<Category, ClassificationError> {
        let request = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(subject, body) },
            ],
        });

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.model, error = %e, "classifier request failed");
                ClassificationError::Request(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            warn!(model = %self.model, status = %status, body = %error_text, "classifier API error");
            return Err(ClassificationError::Request(format!("{}: {}", status, error_text)));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ClassificationError::InvalidResponse(e.to_string()))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClassificationError::InvalidResponse("empty completion".into()))?;

        let category = parse_reply(&content)?;
        debug!(model = %self.model, category = %category, "email classified");
        Ok(category)
    }
}

/// Extract the label from a model reply.
fn parse_reply(content: &str) -> Result<Category, ClassificationError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let label = if trimmed.starts_with('{') {
        let reply: CategoryReply = serde_json::from_str(trimmed)
            .map_err(|e| ClassificationError::InvalidResponse(e.to_string()))?;
        reply
            .category
            .ok_or_else(|| ClassificationError::InvalidResponse("missing category field".into()))?
    } else {
        trimmed.to_string()
    };

    Category::parse_label(&label).ok_or(ClassificationError::UnknownLabel(label))
}

// ─────────────────────────────────────────────
// NoopClassifier
// ─────────────────────────────────────────────

/// Used when no classifier is configured: every email is `Uncategorized`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopClassifier;

#[async_trait]
impl Classifier for NoopClassifier {
    async fn classify(&self, _subject: &str, _body: &str) -> Result<Category, ClassificationError> {
        Ok(Category::Uncategorized)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
