use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::{EstimatorConfig, GenerationConfig};
use crate::error::{truncate_text, EstimatorError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: String },
}

impl Part {
    pub fn text(value: impl Into<String>) -> Self {
        Part::Text(value.into())
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Part::InlineData { .. })
    }

    pub fn to_json(&self) -> Value {
        match self {
            Part::Text(text) => json!({ "text": text }),
            Part::InlineData { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": data,
                }
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Model,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Model => "model",
        }
    }
}

/// One turn of conversation history as the model service sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub speaker: Speaker,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn to_json(&self) -> Value {
        json!({
            "role": self.speaker.as_str(),
            "parts": self.parts.iter().map(Part::to_json).collect::<Vec<Value>>(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub history: &'a [Content],
    pub turn: &'a [Part],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub finish_reason: Option<String>,
}

impl ChatReply {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            input_tokens: None,
            output_tokens: None,
            finish_reason: None,
        }
    }
}

/// The hosted model as an opaque collaborator.
///
/// Implementations are stateless: conversational context travels in
/// `ChatRequest::history` on every call.
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn open_session(&self) -> Result<()>;
    fn generate(&self, request: &ChatRequest<'_>) -> Result<ChatReply>;
}

#[derive(Default)]
pub struct ChatModelRegistry {
    models: BTreeMap<String, Box<dyn ChatModel>>,
}

impl ChatModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: ChatModel + 'static>(&mut self, model: M) {
        self.models.insert(model.name().to_string(), Box::new(model));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ChatModel> {
        self.models.get(name).map(|model| model.as_ref())
    }

    pub fn take(&mut self, name: &str) -> Option<Box<dyn ChatModel>> {
        self.models.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

pub fn default_chat_models(config: &EstimatorConfig) -> Result<ChatModelRegistry> {
    let mut models = ChatModelRegistry::new();
    models.register(DryrunChatModel::new(config.model.clone()));
    models.register(GeminiChatModel::new(config)?);
    Ok(models)
}

const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiChatModel {
    api_base: String,
    api_key: Option<String>,
    model: String,
    generation: GenerationConfig,
    http: HttpClient,
}

impl GeminiChatModel {
    /// The client carries the configured timeout; `None` waits indefinitely
    /// instead of inheriting reqwest's blocking default.
    pub fn new(config: &EstimatorConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            generation: config.generation.clone(),
            http,
        })
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(&self, request: &ChatRequest<'_>) -> Value {
        let mut contents: Vec<Value> = request.history.iter().map(Content::to_json).collect();
        contents.push(json!({
            "role": Speaker::User.as_str(),
            "parts": request.turn.iter().map(Part::to_json).collect::<Vec<Value>>(),
        }));
        json!({
            "contents": contents,
            "generationConfig": self.generation.to_json(),
        })
    }

    fn send(&self, api_key: &str, payload: &Value) -> Result<HttpResponse> {
        let endpoint = self.endpoint();
        // The key never goes into the URL.
        self.http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .json(payload)
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Gemini request failed ({endpoint})"))
    }

    fn reply_from_payload(payload: &Value) -> Result<ChatReply> {
        let candidate = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first());
        let text = candidate
            .and_then(|row| row.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .unwrap_or_default();
        let finish_reason = candidate
            .and_then(|row| row.get("finishReason"))
            .and_then(Value::as_str)
            .map(str::to_string);

        if text.trim().is_empty() {
            let reason = payload
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
                .map(|reason| format!("blocked: {reason}"))
                .or_else(|| finish_reason.clone().map(|reason| format!("finish reason: {reason}")))
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(EstimatorError::EmptyResponse(reason).into());
        }

        let usage = payload.get("usageMetadata");
        let token_count = |key: &str| usage.and_then(|u| u.get(key)).and_then(Value::as_u64);
        Ok(ChatReply {
            text,
            input_tokens: token_count("promptTokenCount"),
            output_tokens: token_count("candidatesTokenCount"),
            finish_reason,
        })
    }
}

impl ChatModel for GeminiChatModel {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn open_session(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            bail!("Gemini model name is empty");
        }
        Ok(())
    }

    fn generate(&self, request: &ChatRequest<'_>) -> Result<ChatReply> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(EstimatorError::MissingCredential.into());
        };
        let payload = self.build_payload(request);
        let response = self.send(api_key, &payload)?;
        let parsed = response_json_or_error(response)?;
        Self::reply_from_payload(&parsed)
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .context("Gemini response body read failed")?;
    if !status.is_success() {
        return Err(EstimatorError::Service {
            status: status.as_u16(),
            body: truncate_text(&body, 512),
        }
        .into());
    }
    let parsed: Value =
        serde_json::from_str(&body).context("Gemini returned invalid JSON payload")?;
    Ok(parsed)
}

/// Offline stand-in that answers deterministically without a network call.
pub struct DryrunChatModel {
    model: String,
}

impl DryrunChatModel {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl ChatModel for DryrunChatModel {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn open_session(&self) -> Result<()> {
        Ok(())
    }

    fn generate(&self, request: &ChatRequest<'_>) -> Result<ChatReply> {
        let turn_index = request
            .history
            .iter()
            .filter(|content| content.speaker == Speaker::User)
            .count()
            + 1;
        let images = request.turn.iter().filter(|part| part.is_image()).count();
        let texts: Vec<&str> = request
            .turn
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::InlineData { .. } => None,
            })
            .collect();

        let mut hasher = Sha256::new();
        for part in request.turn {
            hasher.update(part.to_json().to_string().as_bytes());
        }
        let digest = hex::encode(&hasher.finalize()[..4]);

        let echo = texts
            .last()
            .and_then(|text| text.lines().map(str::trim).find(|line| !line.is_empty()))
            .map(|line| truncate_text(line, 80))
            .unwrap_or_default();

        Ok(ChatReply {
            text: format!(
                "[dryrun {model} #{turn_index} {digest}] received {text_count} text part(s) and {images} image(s): {echo}",
                model = self.model,
                text_count = texts.len(),
            ),
            input_tokens: Some(texts.iter().map(|text| text.len() as u64 / 4).sum()),
            output_tokens: Some(0),
            finish_reason: Some("STOP".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use serde_json::json;

    use super::{
        default_chat_models, ChatModel, ChatRequest, Content, DryrunChatModel, GeminiChatModel,
        Part, Speaker,
    };
    use crate::config::EstimatorConfig;
    use crate::error::EstimatorError;

    /// Accepts one connection, waits `delay`, then reads the request and
    /// answers with `body` (or hangs up when `body` is `None`).
    fn local_service(
        delay: Duration,
        body: Option<&'static str>,
    ) -> anyhow::Result<(String, JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}", listener.local_addr()?);
        let handle = thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return String::new();
            };
            thread::sleep(delay);
            let request = read_request(&mut stream);
            if let Some(body) = body {
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
            request
        });
        Ok((base, handle))
    }

    fn read_request(stream: &mut impl Read) -> String {
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let Ok(read) = stream.read(&mut chunk) else {
                break;
            };
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= split + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    fn history() -> Vec<Content> {
        vec![
            Content {
                speaker: Speaker::User,
                parts: vec![Part::text("persona"), Part::InlineData {
                    mime_type: "image/png".to_string(),
                    data: "AAAA".to_string(),
                }],
            },
            Content {
                speaker: Speaker::Model,
                parts: vec![Part::text("report")],
            },
        ]
    }

    #[test]
    fn gemini_endpoint_prefixes_models_path() -> anyhow::Result<()> {
        let mut config = EstimatorConfig::default();
        config.api_base = "http://localhost:8080/v1beta/".to_string();
        let model = GeminiChatModel::new(&config)?;
        assert_eq!(
            model.endpoint(),
            "http://localhost:8080/v1beta/models/gemini-2.0-flash-exp:generateContent"
        );
        config.model = "models/gemini-1.5-pro".to_string();
        assert_eq!(
            GeminiChatModel::new(&config)?.endpoint(),
            "http://localhost:8080/v1beta/models/gemini-1.5-pro:generateContent"
        );
        Ok(())
    }

    #[test]
    fn gemini_payload_replays_history_then_new_turn() -> anyhow::Result<()> {
        let model = GeminiChatModel::new(&EstimatorConfig::default())?;
        let history = history();
        let turn = vec![Part::text("what crew size?")];
        let payload = model.build_payload(&ChatRequest {
            history: &history,
            turn: &turn,
        });

        let contents = payload["contents"].as_array().cloned().unwrap_or_default();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], json!("user"));
        assert_eq!(contents[0]["parts"][1]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(contents[1]["role"], json!("model"));
        assert_eq!(contents[2]["parts"][0]["text"], json!("what crew size?"));
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], json!(8192));
        Ok(())
    }

    #[test]
    fn gemini_without_key_reports_missing_credential() -> anyhow::Result<()> {
        let model = GeminiChatModel::new(&EstimatorConfig::default())?;
        let turn = vec![Part::text("hello")];
        let err = model
            .generate(&ChatRequest {
                history: &[],
                turn: &turn,
            })
            .expect_err("missing key must fail");
        assert_eq!(
            EstimatorError::from_model_error(err),
            EstimatorError::MissingCredential
        );
        Ok(())
    }

    #[test]
    fn gemini_reply_joins_text_parts_and_reads_usage() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Total: "}, {"text": "322 hours"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 1200, "candidatesTokenCount": 80}
        });
        let reply = GeminiChatModel::reply_from_payload(&payload)?;
        assert_eq!(reply.text, "Total: 322 hours");
        assert_eq!(reply.input_tokens, Some(1200));
        assert_eq!(reply.output_tokens, Some(80));
        assert_eq!(reply.finish_reason.as_deref(), Some("STOP"));
        Ok(())
    }

    #[test]
    fn gemini_blocked_prompt_is_empty_response() {
        let payload = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = GeminiChatModel::reply_from_payload(&payload).expect_err("blocked");
        assert_eq!(
            EstimatorError::from_model_error(err),
            EstimatorError::EmptyResponse("blocked: SAFETY".to_string())
        );
    }

    #[test]
    fn dryrun_reply_is_deterministic_and_counts_parts() -> anyhow::Result<()> {
        let model = DryrunChatModel::new("dryrun-chat-1");
        let history = history();
        let turn = vec![Part::text("first line\nsecond line")];
        let request = ChatRequest {
            history: &history,
            turn: &turn,
        };
        let first = model.generate(&request)?;
        let second = model.generate(&request)?;
        assert_eq!(first, second);
        assert!(first.text.starts_with("[dryrun dryrun-chat-1 #2 "));
        assert!(first.text.ends_with("received 1 text part(s) and 0 image(s): first line"));
        Ok(())
    }

    #[test]
    fn default_registry_has_gemini_and_dryrun() -> anyhow::Result<()> {
        let mut registry = default_chat_models(&EstimatorConfig::default())?;
        assert_eq!(registry.names(), vec!["dryrun".to_string(), "gemini".to_string()]);
        assert!(registry.get("gemini").is_some());
        let taken = registry.take("dryrun").expect("dryrun");
        assert_eq!(taken.name(), "dryrun");
        assert!(registry.get("dryrun").is_none());
        Ok(())
    }

    #[test]
    fn unset_timeout_outlasts_the_http_client_default() -> anyhow::Result<()> {
        let (base, server) = local_service(
            Duration::from_secs(32),
            Some(r#"{"candidates":[{"content":{"parts":[{"text":"late report"}]},"finishReason":"STOP"}]}"#),
        )?;
        let config = EstimatorConfig {
            api_key: Some("k-unset-timeout".to_string()),
            api_base: base,
            request_timeout: None,
            ..EstimatorConfig::default()
        };
        let model = GeminiChatModel::new(&config)?;
        let turn = vec![Part::text("slow plans")];
        let reply = model.generate(&ChatRequest {
            history: &[],
            turn: &turn,
        })?;
        assert_eq!(reply.text, "late report");

        let request = server.join().unwrap_or_default();
        assert!(request.contains("x-goog-api-key: k-unset-timeout"));
        assert!(!request.contains("key=k-unset-timeout"));
        Ok(())
    }

    #[test]
    fn transport_failure_text_never_contains_the_key() -> anyhow::Result<()> {
        let (base, server) = local_service(Duration::from_secs(2), None)?;
        let config = EstimatorConfig {
            api_key: Some("secret-key-7781".to_string()),
            api_base: base,
            request_timeout: Some(Duration::from_millis(300)),
            ..EstimatorConfig::default()
        };
        let model = GeminiChatModel::new(&config)?;
        let turn = vec![Part::text("hello")];
        let err = model
            .generate(&ChatRequest {
                history: &[],
                turn: &turn,
            })
            .expect_err("silent service must time out");
        let typed = EstimatorError::from_model_error(err);
        assert_eq!(typed.code(), "transport");
        assert!(!typed.to_string().contains("secret-key-7781"));
        assert!(!typed
            .diagnostic_text(crate::error::TurnKind::Message)
            .contains("secret-key-7781"));
        let _ = server.join();
        Ok(())
    }
}
