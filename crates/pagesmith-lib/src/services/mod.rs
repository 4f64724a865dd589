// Service modules

pub mod generation;
pub mod navigation;
pub mod preview;
pub mod publish;
pub mod workspace;

pub use generation::{GeminiClient, GenerationBackend, GenerationError};
pub use preview::{PreviewBridge, PreviewError};
pub use publish::{PublishError, PublishService};
pub use workspace::WorkspaceStore;
