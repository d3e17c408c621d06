//! Contains everything needed to talk to a language model. [LlmClient] is the seam the
//! pipeline depends on, [anthropic::AnthropicClient] is the realization used by the cli.

pub mod anthropic;
pub mod config;

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Tool definition used to force the model into returning structured JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool input.
    pub parameters: Value,
}

/// One time entry as returned by the model, keyed by column name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct TimeEntry(pub HashMap<String, String>);

impl TimeEntry {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for TimeEntry {
    fn from(value: [(&str, &str); N]) -> Self {
        TimeEntry(
            value
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Models occasionally send numbers or nulls even when asked for strings. Those are turned
/// into text instead of failing the whole batch.
impl<'de> Deserialize<'de> for TimeEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = HashMap::<String, Value>::deserialize(deserializer)?;
        Ok(TimeEntry(
            raw.into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(v) => v,
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect(),
        ))
    }
}

/// Shape the model is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredResponse {
    #[serde(default)]
    pub entries: Vec<TimeEntry>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub uncertain_mappings: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl StructuredResponse {
    /// Fallback for models that answered with text instead of a tool call. Picks the outermost
    /// JSON object out of the text, markdown fences included.
    pub fn from_text(text: &str) -> Result<Self, ModelError> {
        let start = text.find('{');
        let end = text.rfind('}');
        match (start, end) {
            (Some(start), Some(end)) if start < end => serde_json::from_str(&text[start..=end])
                .map_err(|e| ModelError::NoStructuredOutput(format!("invalid JSON in text: {e}"))),
            _ => Err(ModelError::NoStructuredOutput(
                "text response contains no JSON object".into(),
            )),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model configuration error: {0}")]
    Configuration(String),
    #[error("Model rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Model request timed out")]
    Timeout,
    #[error("Model is temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("Model returned no usable structured output: {0}")]
    NoStructuredOutput(String),
    #[error("Model request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            ModelError::Timeout
        } else if value.is_connect() {
            ModelError::Unavailable(value.to_string())
        } else if value.is_decode() {
            ModelError::NoStructuredOutput(value.to_string())
        } else {
            ModelError::Request(value.to_string())
        }
    }
}

/// Intended to serve as a contract every model provider must implement.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends `prompt` and forces the answer through `tool`.
    async fn generate(
        &self,
        prompt: &str,
        tool: &ToolDefinition,
    ) -> Result<StructuredResponse, ModelError>;
}
