mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, DEFAULT_CHAT_MODEL};
pub use selectors::{ModelSelection, ModelSelector};
