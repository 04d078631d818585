use std::path::{Path, PathBuf};

use anyhow::Result;
use image::DynamicImage;
use resframe_contracts::events::{EventLog, EventPayload};
use resframe_contracts::profiles::{ChatGate, WorkflowProfile};
use resframe_contracts::transcript::Transcript;
use serde_json::{json, Value};

use crate::error::{EstimatorError, TurnKind};
use crate::normalize::MAX_IMAGE_DIMENSION;
use crate::session::{ChatSession, SessionManager};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Active(ChatSession),
    Reset,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Active(_) => "active",
            SessionState::Reset => "reset",
        }
    }

    pub fn session(&self) -> Option<&ChatSession> {
        match self {
            SessionState::Active(session) => Some(session),
            _ => None,
        }
    }
}

/// Everything one running application instance knows about its dialogue.
/// Handed explicitly to each action handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub profile: WorkflowProfile,
    session: SessionState,
    transcript: Transcript,
    estimate_generated: bool,
    last_batch: Vec<DynamicImage>,
}

impl AppState {
    pub fn new(profile: WorkflowProfile) -> Self {
        Self {
            profile,
            session: SessionState::Uninitialized,
            transcript: Transcript::new(),
            estimate_generated: false,
            last_batch: Vec::new(),
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn estimate_generated(&self) -> bool {
        self.estimate_generated
    }

    /// Images from the most recent successful estimate.
    pub fn last_batch(&self) -> &[DynamicImage] {
        &self.last_batch
    }

    pub fn chat_enabled(&self) -> bool {
        match self.profile.chat_gate {
            ChatGate::Always => true,
            ChatGate::AfterEstimate => self.estimate_generated,
        }
    }
}

pub struct Workflow {
    manager: SessionManager,
    events: EventLog,
}

impl Workflow {
    pub fn new(manager: SessionManager, events: EventLog) -> Self {
        let workflow = Self { manager, events };
        if let Some(reason) = workflow.manager.fallback_reason() {
            workflow.record(
                "model_fallback",
                json!({ "model": workflow.manager.model_name(), "reason": reason }),
            );
        }
        workflow
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Returns the active session, starting one when there is none.
    /// A failed start leaves the state uninitialized.
    pub fn ensure_session<'a>(
        &self,
        state: &'a mut AppState,
    ) -> Result<&'a mut ChatSession, EstimatorError> {
        if !matches!(state.session, SessionState::Active(_)) {
            match self.manager.start_session() {
                Ok(session) => {
                    if let Err(err) = self.events.set_session_id(session.id()) {
                        eprintln!("resframe: event log unavailable: {err:#}");
                    }
                    self.record(
                        "session_started",
                        json!({
                            "provider": self.manager.provider(),
                            "model": self.manager.model_name(),
                            "profile": state.profile.name,
                            "after_reset": state.session == SessionState::Reset,
                        }),
                    );
                    state.session = SessionState::Active(session);
                }
                Err(err) => {
                    self.record(
                        "session_start_failed",
                        json!({ "error": format!("{err:#}") }),
                    );
                    state.session = SessionState::Uninitialized;
                    return Err(EstimatorError::NoActiveSession);
                }
            }
        }
        match &mut state.session {
            SessionState::Active(session) => Ok(session),
            _ => Err(EstimatorError::NoActiveSession),
        }
    }

    /// Analyzes a batch of plan images. Appends exactly one assistant entry
    /// (report or diagnostic) unless the request is rejected up front.
    pub fn generate_estimate(
        &self,
        state: &mut AppState,
        images: Vec<DynamicImage>,
    ) -> Result<String, EstimatorError> {
        let rejection = if !state.profile.accepts_images() {
            Some(EstimatorError::ImagesNotAccepted {
                profile: state.profile.name.clone(),
            })
        } else if state.estimate_generated {
            Some(EstimatorError::EstimateAlreadyGenerated)
        } else if images.is_empty() {
            Some(EstimatorError::NoImages)
        } else {
            None
        };
        if let Some(err) = rejection {
            self.record_failure("estimate_rejected", TurnKind::Estimate, &err);
            return Err(err);
        }

        let oversize = images
            .iter()
            .filter(|image| image.width().max(image.height()) > MAX_IMAGE_DIMENSION)
            .count();
        self.record(
            "estimate_requested",
            json!({ "images": images.len(), "oversize": oversize }),
        );

        let outcome = self
            .ensure_session(state)
            .and_then(|session| self.manager.submit_plan_images(&images, session));
        match outcome {
            Ok(reply) => {
                self.record(
                    "estimate_completed",
                    json!({
                        "chars": reply.text.chars().count(),
                        "input_tokens": reply.input_tokens,
                        "output_tokens": reply.output_tokens,
                        "finish_reason": reply.finish_reason,
                    }),
                );
                state.transcript.push_assistant(reply.text.clone());
                state.estimate_generated = true;
                state.last_batch = images;
                Ok(reply.text)
            }
            Err(err) => {
                self.record_failure("estimate_failed", TurnKind::Estimate, &err);
                state
                    .transcript
                    .push_diagnostic(err.diagnostic_text(TurnKind::Estimate));
                Err(err)
            }
        }
    }

    /// Sends a free-text turn. Appends the user entry, then exactly one
    /// assistant entry (reply or diagnostic).
    pub fn send_message(
        &self,
        state: &mut AppState,
        message: &str,
    ) -> Result<String, EstimatorError> {
        if !state.chat_enabled() {
            let err = EstimatorError::ChatLocked;
            self.record_failure("message_rejected", TurnKind::Message, &err);
            return Err(err);
        }

        state.transcript.push_user(message);
        let outcome = self
            .ensure_session(state)
            .and_then(|session| self.manager.submit_text(message, session));
        match outcome {
            Ok(reply) => {
                self.record(
                    "message_sent",
                    json!({
                        "chars_in": message.chars().count(),
                        "chars_out": reply.text.chars().count(),
                        "input_tokens": reply.input_tokens,
                        "output_tokens": reply.output_tokens,
                    }),
                );
                state.transcript.push_assistant(reply.text.clone());
                Ok(reply.text)
            }
            Err(err) => {
                self.record_failure("message_failed", TurnKind::Message, &err);
                state
                    .transcript
                    .push_diagnostic(err.diagnostic_text(TurnKind::Message));
                Err(err)
            }
        }
    }

    /// Discards the session and transcript; the next action starts fresh.
    pub fn clear_history(&self, state: &mut AppState) {
        let discarded = state.transcript.len();
        state.transcript.clear();
        state.estimate_generated = false;
        state.last_batch.clear();
        if matches!(state.session, SessionState::Active(_)) {
            state.session = SessionState::Reset;
        }
        self.record("history_cleared", json!({ "discarded_entries": discarded }));
    }

    pub fn set_profile(&self, state: &mut AppState, profile: WorkflowProfile) {
        self.record(
            "profile_changed",
            json!({ "from": state.profile.name, "to": profile.name }),
        );
        state.profile = profile;
    }

    /// Writes the transcript export. A directory target receives the
    /// profile's export file name.
    pub fn export(&self, state: &AppState, target: &Path) -> Result<PathBuf> {
        let path = if target.is_dir() || target.as_os_str().is_empty() {
            target.join(&state.profile.export_file_name)
        } else {
            target.to_path_buf()
        };
        state.transcript.write_export(&path)?;
        self.record(
            "transcript_exported",
            json!({
                "path": path.to_string_lossy(),
                "entries": state.transcript.len(),
            }),
        );
        Ok(path)
    }

    fn record_failure(&self, event_type: &str, kind: TurnKind, err: &EstimatorError) {
        self.record(
            event_type,
            json!({
                "action": kind.as_str(),
                "code": err.code(),
                "error": err.to_string(),
            }),
        );
    }

    fn record(&self, event_type: &str, payload: Value) {
        let payload: EventPayload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!("resframe: failed to record {event_type}: {err:#}");
        }
    }
}
