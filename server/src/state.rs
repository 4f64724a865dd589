// Server shared state

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use pagesmith_lib::services::generation::stream::StreamManager;
use pagesmith_lib::services::generation::usage::TokenSink;
use pagesmith_lib::services::preview::PreviewBridge;
use pagesmith_lib::services::{GenerationBackend, PublishService, WorkspaceStore};

pub struct AppState {
    pub store: WorkspaceStore,
    pub publisher: PublishService,
    /// Absent when no API key is configured; generation returns 503.
    pub generator: Option<Arc<dyn GenerationBackend>>,
    pub token_sink: Arc<dyn TokenSink>,
    pub streams: StreamManager,
    /// One preview bridge per session, created on first preview load
    pub bridges: Mutex<HashMap<String, PreviewBridge>>,
    /// Latest accumulated text per in-flight stream, for polling
    pub progress: RwLock<HashMap<String, String>>,
}

pub type SharedState = Arc<AppState>;
