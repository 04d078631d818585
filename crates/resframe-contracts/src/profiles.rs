use std::env;
use std::fs;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DEFAULT_PROFILES_JSON: &str = include_str!("resources/profiles.json");

pub const DEFAULT_PROFILE: &str = "labor_estimate";
pub const PROFILES_PATH_ENV: &str = "RESFRAME_PROFILES_PATH";

/// When the free-text chat input accepts messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatGate {
    Always,
    AfterEstimate,
}

/// Instruction text prepended to plan images on an analysis turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    None,
    LaborEstimator,
}

/// One front-end variant expressed as data: labels, gating and persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowProfile {
    pub name: String,
    pub title: String,
    pub description: String,
    pub chat_placeholder: String,
    pub chat_gate: ChatGate,
    pub export_file_name: String,
    pub persona: Persona,
}

impl WorkflowProfile {
    pub fn accepts_images(&self) -> bool {
        self.persona != Persona::None
    }
}

#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: IndexMap<String, WorkflowProfile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileRegistry {
    pub fn builtin() -> Self {
        Self::from_json_layers(&[DEFAULT_PROFILES_JSON])
    }

    /// Built-ins merged with the file named by `RESFRAME_PROFILES_PATH`, if any.
    pub fn load() -> Self {
        let override_raw = profiles_override_path().and_then(|path| fs::read_to_string(path).ok());
        match override_raw {
            Some(raw) => Self::from_json_layers(&[DEFAULT_PROFILES_JSON, raw.as_str()]),
            None => Self::builtin(),
        }
    }

    /// Later layers override earlier ones field by field; rows that do not
    /// form a complete profile after merging are dropped.
    pub fn from_json_layers(layers: &[&str]) -> Self {
        let mut rows: IndexMap<String, Map<String, Value>> = IndexMap::new();
        for raw in layers {
            merge_profile_rows(&mut rows, raw);
        }
        let profiles = rows
            .into_iter()
            .filter_map(|(name, mut row)| {
                row.insert("name".to_string(), Value::String(name.clone()));
                serde_json::from_value::<WorkflowProfile>(Value::Object(row))
                    .ok()
                    .map(|profile| (name, profile))
            })
            .collect();
        Self { profiles }
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowProfile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn list(&self) -> impl Iterator<Item = &WorkflowProfile> {
        self.profiles.values()
    }
}

fn profiles_override_path() -> Option<PathBuf> {
    env::var_os(PROFILES_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
}

fn merge_profile_rows(rows: &mut IndexMap<String, Map<String, Value>>, raw: &str) {
    let Ok(payload) = serde_json::from_str::<Value>(raw) else {
        return;
    };
    let Some(items) = payload.as_array() else {
        return;
    };
    for item in items {
        let Some(row) = item.as_object() else {
            continue;
        };
        let Some(name) = row
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            continue;
        };
        let entry = rows.entry(name.to_string()).or_default();
        for (field, value) in row {
            entry.insert(field.to_string(), value.clone());
        }
    }
}
