use thiserror::Error;

/// Which user action a failure belongs to; selects the diagnostic wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Estimate,
    Message,
}

impl TurnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnKind::Estimate => "estimate",
            TurnKind::Message => "message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EstimatorError {
    #[error("no API key configured (set GEMINI_API_KEY or GOOGLE_API_KEY, or pass --api-key)")]
    MissingCredential,
    #[error("no active chat session")]
    NoActiveSession,
    #[error("no plan images were provided")]
    NoImages,
    #[error("profile '{profile}' does not accept plan images")]
    ImagesNotAccepted { profile: String },
    #[error("chat opens once an estimate has been generated")]
    ChatLocked,
    #[error("an estimate was already generated for this session; clear the history to start over")]
    EstimateAlreadyGenerated,
    #[error("failed to encode plan image: {0}")]
    ImageEncoding(String),
    #[error("request to the model service failed: {0}")]
    Transport(String),
    #[error("model service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },
    #[error("model returned no text ({0})")]
    EmptyResponse(String),
}

impl EstimatorError {
    /// Recovers the typed failure from a collaborator error, treating any
    /// untyped cause as a transmission failure.
    pub fn from_model_error(err: anyhow::Error) -> Self {
        if let Some(typed) = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<EstimatorError>())
        {
            return typed.clone();
        }
        EstimatorError::Transport(error_chain_text(&err, 512))
    }

    /// Rejections are refused before anything is sent; the transcript is
    /// left untouched for them.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EstimatorError::NoImages
                | EstimatorError::ImagesNotAccepted { .. }
                | EstimatorError::ChatLocked
                | EstimatorError::EstimateAlreadyGenerated
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            EstimatorError::MissingCredential => "missing_credential",
            EstimatorError::NoActiveSession => "no_active_session",
            EstimatorError::NoImages => "no_images",
            EstimatorError::ImagesNotAccepted { .. } => "images_not_accepted",
            EstimatorError::ChatLocked => "chat_locked",
            EstimatorError::EstimateAlreadyGenerated => "estimate_already_generated",
            EstimatorError::ImageEncoding(_) => "image_encoding",
            EstimatorError::Transport(_) => "transport",
            EstimatorError::Service { .. } => "service",
            EstimatorError::EmptyResponse(_) => "empty_response",
        }
    }

    /// Display-ready text for the assistant turn that failed.
    pub fn diagnostic_text(&self, kind: TurnKind) -> String {
        match kind {
            TurnKind::Estimate => format!(
                "Error analyzing images: {self}\nDetails: Please ensure your API key is valid and you're using supported image formats."
            ),
            TurnKind::Message => format!("Error sending message: {self}"),
        }
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{error_chain_text, truncate_text, EstimatorError, TurnKind};

    #[test]
    fn typed_errors_survive_context_layers() {
        let err = anyhow::Error::new(EstimatorError::MissingCredential).context("Gemini request");
        assert_eq!(
            EstimatorError::from_model_error(err),
            EstimatorError::MissingCredential
        );
    }

    #[test]
    fn untyped_errors_become_transport_failures() {
        let err = Err::<(), _>(anyhow::anyhow!("connection reset"))
            .context("Gemini request failed")
            .expect_err("error");
        let typed = EstimatorError::from_model_error(err);
        assert_eq!(
            typed,
            EstimatorError::Transport(
                "Gemini request failed | caused by: connection reset".to_string()
            )
        );
    }

    #[test]
    fn diagnostics_carry_recognizable_markers() {
        let err = EstimatorError::Service {
            status: 403,
            body: "API key not valid".to_string(),
        };
        let estimate = err.diagnostic_text(TurnKind::Estimate);
        assert!(estimate.starts_with("Error analyzing images: model service returned HTTP 403"));
        assert!(estimate.contains("Details: Please ensure your API key is valid"));
        assert_eq!(
            EstimatorError::NoActiveSession.diagnostic_text(TurnKind::Message),
            "Error sending message: no active chat session"
        );
    }

    #[test]
    fn only_precondition_failures_are_rejections() {
        assert!(EstimatorError::ChatLocked.is_rejection());
        assert!(EstimatorError::NoImages.is_rejection());
        assert!(!EstimatorError::Transport("x".to_string()).is_rejection());
        assert!(!EstimatorError::NoActiveSession.is_rejection());
    }

    #[test]
    fn chain_text_dedupes_and_truncates() {
        let err = Err::<(), _>(anyhow::anyhow!("same"))
            .context("same")
            .context("outer")
            .expect_err("error");
        assert_eq!(error_chain_text(&err, 100), "outer | caused by: same");
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }
}
