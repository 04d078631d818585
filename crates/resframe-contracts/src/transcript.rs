use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    /// Set when `content` is rendered error text rather than model output.
    #[serde(default)]
    pub diagnostic: bool,
}

/// Ordered record of the turns exchanged in the current session.
///
/// Entries can only be appended or cleared all at once; their order is the
/// order the requests and replies were exchanged with the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content.into(), false);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content.into(), false);
    }

    pub fn push_diagnostic(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content.into(), true);
    }

    fn push(&mut self, role: Role, content: String, diagnostic: bool) {
        self.entries.push(TranscriptEntry {
            role,
            content,
            diagnostic,
        });
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Plain-text export: `ROLE: content` blocks separated by a blank line.
    pub fn export_text(&self) -> String {
        self.entries
            .iter()
            .map(|entry| {
                format!(
                    "{}: {}",
                    entry.role.as_str().to_ascii_uppercase(),
                    entry.content
                )
            })
            .collect::<Vec<String>>()
            .join("\n\n")
    }

    pub fn write_export(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        std::fs::write(path, self.export_text())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}
