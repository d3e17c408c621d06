use std::time::Duration;

pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything needed to reach the model. Filled from the environment and overridden by
/// command line flags.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Missing keys are only reported when a request is actually made.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    /// Kept low so the same input yields similar rows.
    pub temperature: f64,
    pub timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.into(),
            base_url: DEFAULT_BASE_URL.into(),
            max_tokens: 2000,
            temperature: 0.1,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ModelConfig {
    /// Reads `ANTHROPIC_API_KEY`, `TIMESCRIPT_MODEL` and `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            model: std::env::var("TIMESCRIPT_MODEL").unwrap_or(defaults.model),
            base_url: std::env::var("ANTHROPIC_BASE_URL").unwrap_or(defaults.base_url),
            ..defaults
        }
    }

    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        Self {
            timeout: timeout.unwrap_or(self.timeout),
            ..self
        }
    }

    pub fn with_model(self, model: Option<String>) -> Self {
        Self {
            model: model.unwrap_or(self.model),
            ..self
        }
    }
}
