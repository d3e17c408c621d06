//! Anthropic Messages API client. Structured output is obtained through forced tool use.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{config::ModelConfig, LlmClient, ModelError, StructuredResponse, ToolDefinition};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicClient {
    config: ModelConfig,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, prompt: &str, tool: &ToolDefinition) -> Value {
        serde_json::json!({
            "model": &self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [{"role": "user", "content": prompt}],
            "tools": [{
                "name": &tool.name,
                "description": &tool.description,
                "input_schema": &tool.parameters
            }],
            "tool_choice": {"type": "tool", "name": &tool.name}
        })
    }

    async fn call_api_with_tool(
        &self,
        prompt: &str,
        tool: &ToolDefinition,
    ) -> Result<StructuredResponse, ModelError> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            ModelError::Configuration("ANTHROPIC_API_KEY environment variable not set".into())
        })?;

        let response = self
            .client
            .post(format!(
                "{}/v1/messages",
                self.config.base_url.trim_end_matches('/')
            ))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&self.request_body(prompt, tool))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            warn!("Anthropic API error {status}: {body}");
            return Err(classify_status(status, retry_after, body));
        }

        let body = response.text().await?;
        debug!(
            "Anthropic raw response: {}",
            body.chars().take(1000).collect::<String>()
        );
        parse_response(&body, &tool.name)
    }
}

/// Maps an unsuccessful HTTP status onto retryable and fatal errors.
fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> ModelError {
    match status.as_u16() {
        401 | 403 => ModelError::Configuration(format!("invalid API key ({status})")),
        429 => ModelError::RateLimited { retry_after },
        408 | 504 => ModelError::Timeout,
        500 | 502 | 503 | 529 => ModelError::Unavailable(format!("{status}: {body}")),
        _ => ModelError::Request(format!("{status}: {body}")),
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

fn parse_response(body: &str, tool_name: &str) -> Result<StructuredResponse, ModelError> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| ModelError::NoStructuredOutput(format!("unreadable response: {e}")))?;

    if response.stop_reason.as_deref() == Some("max_tokens") {
        warn!("Model stopped because of max_tokens, output might be cut off");
    }

    let mut text = String::new();
    for block in response.content {
        match block {
            ContentBlock::ToolUse { name, input } if name == tool_name => {
                return serde_json::from_value(input).map_err(|e| {
                    ModelError::NoStructuredOutput(format!("tool input doesn't match schema: {e}"))
                });
            }
            ContentBlock::ToolUse { name, .. } => warn!("Ignoring unexpected tool call {name}"),
            ContentBlock::Text { text: v } => text.push_str(&v),
            ContentBlock::Other => {}
        }
    }

    warn!("No tool call in response, falling back to text parsing");
    StructuredResponse::from_text(&text)
}

#[async_trait]
impl LlmClient for AnthropicClient {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn generate(
        &self,
        prompt: &str,
        tool: &ToolDefinition,
    ) -> Result<StructuredResponse, ModelError> {
        self.call_api_with_tool(prompt, tool).await
    }
}
