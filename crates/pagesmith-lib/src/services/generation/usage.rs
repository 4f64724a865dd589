// Token usage sink
// Usage is recorded exactly once per completed, non-aborted request.
// Recording is bookkeeping: failures are logged and never surfaced to
// the request path.

use crate::models::TokenUsage;
use crate::repositories::UsageRepository;
use crate::utils::Database;

use super::stream::StreamOutcome;

pub trait TokenSink: Send + Sync {
    fn record(&self, session_id: &str, model: &str, usage: &TokenUsage);
}

/// SQLite-backed sink.
pub struct TokenUsageRecorder {
    repo: UsageRepository,
}

impl TokenUsageRecorder {
    pub fn new(db: Database) -> Self {
        Self {
            repo: UsageRepository::new(db),
        }
    }
}

impl TokenSink for TokenUsageRecorder {
    fn record(&self, session_id: &str, model: &str, usage: &TokenUsage) {
        if let Err(e) = self.repo.insert(session_id, model, usage) {
            log::error!("[generation] failed to record token usage: {}", e);
        }
    }
}

/// Record a finished stream. An aborted stream is never recorded; a
/// completed one is recorded exactly once.
pub fn record_outcome(
    sink: &dyn TokenSink,
    session_id: &str,
    model: &str,
    outcome: &StreamOutcome,
) {
    if outcome.aborted {
        log::debug!("[generation] skipping usage for aborted stream");
        return;
    }
    sink.record(session_id, model, &outcome.usage);
}

/// Sink that drops everything; used in tests and offline runs.
pub struct NullSink;

impl TokenSink for NullSink {
    fn record(&self, _session_id: &str, _model: &str, _usage: &TokenUsage) {}
}
