// Data models for sessions, generated sites, and the preview protocol

pub mod generation;
pub mod protocol;
pub mod session;
pub mod site;

pub use generation::{Attachment, AttachmentKind, GenerationRequest, TokenUsage};
pub use protocol::{
    ElementRect, HostCommand, InteractionMode, MoveDirection, PreviewEnvelope, RuntimeEvent,
    SelectedElementPayload,
};
pub use session::{ChatMessage, FileMap, MessageKind, MessageRole, Session, Snapshot};
pub use site::{FileVersion, PublishedSite};
