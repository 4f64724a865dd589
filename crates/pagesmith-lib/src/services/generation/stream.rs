// Streaming generation
// SSE-style streaming over :streamGenerateContent?alt=sse. The body is
// consumed as raw bytes and split into newline-delimited `data: `
// fragments by hand; a trailing partial line is carried between reads.
// Also the StreamManager that tracks one cancel channel per session.

use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::models::{GenerationRequest, TokenUsage};

use super::error::{GenerationError, GenerationResult};
use super::{build_wire_request, usage_from, GeminiClient, WireResponse};

/// Result of a streamed generation. `aborted` streams still carry the
/// partial accumulation; their usage is never recorded downstream.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub text: String,
    pub usage: TokenUsage,
    pub aborted: bool,
}

pub(crate) async fn run_stream(
    client: &GeminiClient,
    request: &GenerationRequest,
    cancel: &mut mpsc::Receiver<()>,
    on_progress: &(dyn for<'a> Fn(&'a str) + Send + Sync),
) -> GenerationResult<StreamOutcome> {
    let url = format!(
        "{}&alt=sse",
        client.api_url(&format!("/models/{}:streamGenerateContent", request.model))
    );
    let wire = build_wire_request(request);

    let response = client
        .client
        .post(&url)
        .headers(client.content_headers())
        .json(&wire)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GenerationError::AuthFailed(body));
        }
        return Err(GenerationError::ApiError(format!(
            "Gemini API error ({}): {}",
            status, body
        )));
    }

    let body_stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(GenerationError::from));
    consume_stream(body_stream, cancel, on_progress).await
}

/// Drive the response body to completion or cancellation. A cancel
/// message stops consumption and returns whatever accumulated so far
/// with `aborted = true`.
async fn consume_stream<S, B>(
    mut body_stream: S,
    cancel: &mut mpsc::Receiver<()>,
    on_progress: &(dyn for<'a> Fn(&'a str) + Send + Sync),
) -> GenerationResult<StreamOutcome>
where
    S: Stream<Item = GenerationResult<B>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut buffer = String::new();
    let mut accumulated = String::new();
    let mut usage = TokenUsage::default();
    let mut aborted = false;

    loop {
        tokio::select! {
            _ = cancel.recv() => {
                log::info!("[generation] stream cancelled after {} bytes", accumulated.len());
                aborted = true;
                break;
            }
            chunk = body_stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(bytes.as_ref()));
                        for line in drain_complete_lines(&mut buffer) {
                            process_line(&line, &mut accumulated, &mut usage, on_progress);
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        // Flush whatever partial line the stream ended on
                        let tail = std::mem::take(&mut buffer);
                        process_line(&tail, &mut accumulated, &mut usage, on_progress);
                        break;
                    }
                }
            }
        }
    }

    if !aborted && accumulated.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(StreamOutcome {
        text: accumulated,
        usage,
        aborted,
    })
}

/// Split off every complete line, leaving the trailing partial (if
/// any) in the buffer for the next read.
fn drain_complete_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line = buffer[..pos].trim_end_matches('\r').to_string();
        buffer.drain(..=pos);
        lines.push(line);
    }
    lines
}

/// Handle one SSE line. Non-`data:` lines, empty payloads, `[DONE]`
/// and malformed JSON are all skipped; a text delta appends to the
/// accumulator and reports the full accumulated text; usage metadata
/// replaces the last seen value, absence never overwrites it.
fn process_line(
    line: &str,
    accumulated: &mut String,
    usage: &mut TokenUsage,
    on_progress: &(dyn for<'a> Fn(&'a str) + Send + Sync),
) {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return;
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return;
    }
    let parsed: WireResponse = match serde_json::from_str(payload) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::debug!("[generation] skipping malformed stream fragment: {}", err);
            return;
        }
    };
    if let Some(meta) = parsed.usage_metadata.as_ref() {
        *usage = usage_from(meta);
    }
    let delta: String = parsed
        .candidates
        .into_iter()
        .flatten()
        .flat_map(|candidate| candidate.content.parts)
        .filter_map(|part| part.text)
        .collect();
    if !delta.is_empty() {
        accumulated.push_str(&delta);
        on_progress(accumulated);
    }
}

/// Tracks the active stream per session so a later request (or an
/// explicit cancel) can stop the one in flight.
pub struct StreamManager {
    active: Arc<RwLock<HashMap<String, mpsc::Sender<()>>>>,
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamManager {
    pub fn new() -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a stream for `session_id`, cancelling any previous one.
    pub async fn begin(&self, session_id: &str) -> mpsc::Receiver<()> {
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let mut active = self.active.write().await;
        if let Some(previous) = active.insert(session_id.to_string(), cancel_tx) {
            let _ = previous.send(()).await;
        }
        cancel_rx
    }

    pub async fn cancel(&self, session_id: &str) -> Result<(), String> {
        let mut active = self.active.write().await;
        if let Some(cancel_tx) = active.remove(session_id) {
            let _ = cancel_tx.send(()).await;
            Ok(())
        } else {
            Err(format!("No active stream for session: {}", session_id))
        }
    }

    /// Called when a stream completes on its own.
    pub async fn finish(&self, session_id: &str) {
        let mut active = self.active.write().await;
        active.remove(session_id);
    }

    pub async fn is_active(&self, session_id: &str) -> bool {
        let active = self.active.read().await;
        active.contains_key(session_id)
    }
}
