use anyhow::{anyhow, Result};
use image::DynamicImage;
use resframe_contracts::models::ModelSelector;
use uuid::Uuid;

use crate::config::EstimatorConfig;
use crate::error::EstimatorError;
use crate::model::{default_chat_models, ChatModel, ChatReply, ChatRequest, Content, Part, Speaker};
use crate::normalize::{encode_inline_part, normalize_images};

pub const LABOR_ESTIMATOR_PROMPT: &str = include_str!("../resources/labor_estimator_prompt.md");

/// Local handle for one conversation. The history only grows when a send
/// succeeds, so a failed turn leaves the conversation exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    id: String,
    started_at: String,
    history: Vec<Content>,
}

impl ChatSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false),
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    /// Completed request/response exchanges.
    pub fn turns(&self) -> usize {
        self.history
            .iter()
            .filter(|content| content.speaker == Speaker::Model)
            .count()
    }
}

/// Owns the model collaborator and mediates every exchange with it.
pub struct SessionManager {
    model: Box<dyn ChatModel>,
    persona_prompt: String,
    fallback_reason: Option<String>,
}

impl SessionManager {
    /// Resolves `config.model` against the model registry and binds the
    /// matching provider.
    pub fn new(config: &EstimatorConfig) -> Result<Self> {
        let selection = ModelSelector::new(None)
            .select(Some(config.model.as_str()), "vision")
            .map_err(|reason| anyhow!(reason))?;
        let mut resolved = config.clone();
        resolved.model = selection.model.name.clone();
        let mut models = default_chat_models(&resolved)?;
        let model = models
            .take(&selection.model.provider)
            .ok_or_else(|| anyhow!("no chat provider named '{}'", selection.model.provider))?;
        let mut manager = Self::with_model(model);
        manager.fallback_reason = selection.fallback_reason;
        Ok(manager)
    }

    pub fn with_model(model: Box<dyn ChatModel>) -> Self {
        Self {
            model,
            persona_prompt: LABOR_ESTIMATOR_PROMPT.to_string(),
            fallback_reason: None,
        }
    }

    pub fn with_persona_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.persona_prompt = prompt.into();
        self
    }

    pub fn provider(&self) -> &str {
        self.model.name()
    }

    pub fn model_name(&self) -> &str {
        self.model.model()
    }

    /// Set when the configured model was unknown and a default was used.
    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    pub fn persona_prompt(&self) -> &str {
        &self.persona_prompt
    }

    pub fn start_session(&self) -> Result<ChatSession> {
        self.model.open_session()?;
        Ok(ChatSession::new())
    }

    /// Sends the persona prompt followed by the normalized images, in order,
    /// as a single turn.
    pub fn submit_plan_images(
        &self,
        images: &[DynamicImage],
        session: &mut ChatSession,
    ) -> Result<ChatReply, EstimatorError> {
        if images.is_empty() {
            return Err(EstimatorError::NoImages);
        }
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(Part::text(self.persona_prompt.clone()));
        for image in normalize_images(images) {
            let part = encode_inline_part(&image)
                .map_err(|err| EstimatorError::ImageEncoding(format!("{err:#}")))?;
            parts.push(part);
        }
        self.exchange(parts, session)
    }

    pub fn submit_text(
        &self,
        message: &str,
        session: &mut ChatSession,
    ) -> Result<ChatReply, EstimatorError> {
        self.exchange(vec![Part::text(message)], session)
    }

    fn exchange(
        &self,
        parts: Vec<Part>,
        session: &mut ChatSession,
    ) -> Result<ChatReply, EstimatorError> {
        let reply = self
            .model
            .generate(&ChatRequest {
                history: &session.history,
                turn: &parts,
            })
            .map_err(EstimatorError::from_model_error)?;
        session.history.push(Content {
            speaker: Speaker::User,
            parts,
        });
        session.history.push(Content {
            speaker: Speaker::Model,
            parts: vec![Part::text(reply.text.clone())],
        });
        Ok(reply)
    }
}
