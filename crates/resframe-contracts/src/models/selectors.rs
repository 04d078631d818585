use super::registry::{ModelRegistry, ModelSpec};

/// Outcome of resolving a configured model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    /// Set when a non-blank request could not be honored.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Honors `requested` when it names a model with `capability`; otherwise
    /// the first capable model wins. A blank request is not a fallback.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        if let Some(model) = requested
            .as_deref()
            .and_then(|name| self.registry.ensure(name, capability))
        {
            return Ok(ModelSelection {
                model,
                requested,
                fallback_reason: None,
            });
        }

        let model = self
            .registry
            .by_capability(capability)
            .into_iter()
            .next()
            .ok_or_else(|| format!("no chat model supports '{capability}'"))?;
        let fallback_reason = requested.as_deref().map(|name| {
            format!(
                "Model '{name}' has no {capability} support here; using '{}'.",
                model.name
            )
        });
        Ok(ModelSelection {
            model,
            requested,
            fallback_reason,
        })
    }
}
