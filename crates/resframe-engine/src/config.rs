use std::env;
use std::fmt;
use std::time::Duration;

use resframe_contracts::models::DEFAULT_CHAT_MODEL;
use serde_json::{json, Value};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 8192,
        }
    }
}

impl GenerationConfig {
    pub fn to_json(&self) -> Value {
        json!({
            "temperature": self.temperature,
            "topP": self.top_p,
            "topK": self.top_k,
            "maxOutputTokens": self.max_output_tokens,
        })
    }
}

#[derive(Clone, PartialEq)]
pub struct EstimatorConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub generation: GenerationConfig,
    /// `None` waits on the model service indefinitely.
    pub request_timeout: Option<Duration>,
}

impl fmt::Debug for EstimatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EstimatorConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("generation", &self.generation)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_CHAT_MODEL.to_string(),
            generation: GenerationConfig::default(),
            request_timeout: None,
        }
    }
}

impl EstimatorConfig {
    /// Reads the process environment. An explicit key (user-entered) wins
    /// over `GEMINI_API_KEY`, which wins over `GOOGLE_API_KEY`.
    pub fn from_env(api_key_override: Option<String>, model_override: Option<String>) -> Self {
        Self::from_lookup(api_key_override, model_override, non_empty_env)
    }

    pub fn from_lookup(
        api_key_override: Option<String>,
        model_override: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let api_key = non_empty(api_key_override)
            .or_else(|| lookup("GEMINI_API_KEY"))
            .or_else(|| lookup("GOOGLE_API_KEY"));
        let api_base = lookup("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let model = non_empty(model_override)
            .or_else(|| lookup("RESFRAME_MODEL"))
            .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());
        let request_timeout = lookup("RESFRAME_REQUEST_TIMEOUT_S")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|seconds| *seconds > 0.0)
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok());

        Self {
            api_key,
            api_base,
            model,
            generation: GenerationConfig::default(),
            request_timeout,
        }
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn non_empty_env(key: &str) -> Option<String> {
    non_empty(env::var(key).ok())
}
