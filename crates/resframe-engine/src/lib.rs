pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod session;
pub mod workflow;

pub use config::{EstimatorConfig, GenerationConfig};
pub use error::{EstimatorError, TurnKind};
pub use model::{ChatModel, ChatReply, DryrunChatModel, GeminiChatModel};
pub use normalize::{load_uploads, normalize_images, prepare_image, MAX_IMAGE_DIMENSION};
pub use session::{ChatSession, SessionManager};
pub use workflow::{AppState, SessionState, Workflow};
