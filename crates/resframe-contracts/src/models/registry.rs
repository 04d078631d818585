use indexmap::IndexMap;

pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.0-flash-exp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str], context_window: Option<u64>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                context_window,
            },
        );
    };

    insert(DEFAULT_CHAT_MODEL, "gemini", &["text", "vision"], Some(1_048_576));
    insert("gemini-1.5-pro", "gemini", &["text", "vision"], Some(2_097_152));
    insert("gemini-1.5-flash", "gemini", &["text", "vision"], Some(1_048_576));
    insert("dryrun-chat-1", "dryrun", &["text", "vision"], Some(8192));

    map
}

#[cfg(test)]
mod tests {
    use super::{ModelRegistry, DEFAULT_CHAT_MODEL};

    #[test]
    fn default_model_is_first_vision_model() {
        let registry = ModelRegistry::default();
        let vision = registry.by_capability("vision");
        assert_eq!(vision.first().map(|m| m.name.as_str()), Some(DEFAULT_CHAT_MODEL));
        assert_eq!(
            registry.get("dryrun-chat-1").map(|m| m.provider.as_str()),
            Some("dryrun")
        );
    }

    #[test]
    fn ensure_rejects_missing_capability() {
        let registry = ModelRegistry::default();
        assert!(registry.ensure("gemini-1.5-pro", "vision").is_some());
        assert!(registry.ensure("gemini-1.5-pro", "audio").is_none());
        assert!(registry.ensure("no-such-model", "text").is_none());
    }
}
