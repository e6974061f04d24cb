//! Single-turn AI completion used for metadata generation.
//!
//! - **[`OpenAICompletion`]** calls an OpenAI-compatible chat completions
//!   endpoint with retry and backoff.
//! - **[`DisabledCompletion`]** answers without assistant content, so
//!   enrichment yields empty metadata.
//!
//! HTTP 429 and 5xx responses and network errors are retried with
//! exponential backoff; other 4xx responses fail immediately.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::CompletionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
}

/// The conversation after the completion: request messages followed by the
/// generated ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    pub messages: Vec<Message>,
}

impl CompletionResponse {
    /// Content of the last assistant message, if any.
    pub fn last_assistant_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn post_completion(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}

/// Completion gateway that never generates anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCompletion;

#[async_trait]
impl CompletionGateway for DisabledCompletion {
    async fn post_completion(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        tracing::debug!(model = %request.model, "completion disabled; returning no content");
        Ok(CompletionResponse {
            messages: request.messages,
        })
    }
}

/// Client for `POST {endpoint}` speaking the OpenAI chat completions format.
pub struct OpenAICompletion {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAICompletion {
    /// # Errors
    ///
    /// Returns an error if the API key variable named by
    /// `completion.api_key_env` is not set.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl CompletionGateway for OpenAICompletion {
    async fn post_completion(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying completion request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let generated = parse_chat_response(&json)?;
                        let mut messages = request.messages;
                        messages.extend(generated);
                        return Ok(CompletionResponse { messages });
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("Completion API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Completion API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Completion failed after retries")))
    }
}

/// Extract `choices[].message` in order. Choices without text content are
/// skipped.
fn parse_chat_response(json: &serde_json::Value) -> Result<Vec<Message>> {
    let choices = json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices array"))?;

    let mut messages = Vec::with_capacity(choices.len());
    for choice in choices {
        let Some(message) = choice.get("message") else {
            continue;
        };
        let Some(content) = message.get("content").and_then(|c| c.as_str()) else {
            continue;
        };
        let role = match message.get("role").and_then(|r| r.as_str()) {
            Some("system") => Role::System,
            Some("user") => Role::User,
            _ => Role::Assistant,
        };
        messages.push(Message {
            role,
            content: content.to_string(),
        });
    }
    Ok(messages)
}

/// Build the gateway selected by `[completion] provider`.
pub fn create_completion(config: &CompletionConfig) -> Result<Arc<dyn CompletionGateway>> {
    if !config.is_enabled() {
        return Ok(Arc::new(DisabledCompletion));
    }
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAICompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_choices_in_order() {
        let json = json!({
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "billing" } },
                { "index": 1, "message": { "role": "assistant", "content": null } },
                { "index": 2, "message": { "role": "assistant", "content": "refunds" } },
            ]
        });
        let messages = parse_chat_response(&json).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "refunds");
        assert!(parse_chat_response(&json!({ "id": "x" })).is_err());
    }

    #[test]
    fn last_assistant_message_wins() {
        let response = CompletionResponse {
            messages: vec![
                Message::system("be brief"),
                Message::assistant("first"),
                Message::user("again"),
                Message::assistant("second"),
            ],
        };
        assert_eq!(response.last_assistant_content(), Some("second"));
        assert_eq!(CompletionResponse::default().last_assistant_content(), None);
    }

    #[tokio::test]
    async fn disabled_completion_has_no_assistant_content() {
        let request = CompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::user("summarize")],
        };
        let response = DisabledCompletion.post_completion(request).await.unwrap();
        assert_eq!(response.last_assistant_content(), None);
    }

    #[tokio::test]
    async fn factory_follows_provider_setting() {
        let gateway = create_completion(&CompletionConfig::default()).unwrap();
        let request = CompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::user("summarize")],
        };
        let response = gateway.post_completion(request).await.unwrap();
        assert_eq!(response.last_assistant_content(), None);

        let unknown = CompletionConfig {
            provider: "mystery".into(),
            ..CompletionConfig::default()
        };
        assert!(create_completion(&unknown).is_err());
    }

    #[test]
    fn request_serializes_lowercase_roles() {
        let request = CompletionRequest {
            model: "m".into(),
            messages: vec![Message::system("s"), Message::user("u")],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
    }
}
