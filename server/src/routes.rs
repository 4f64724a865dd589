// HTTP routes
// Session, generation, preview-bridge, version, publish, and published
// viewer endpoints. Handlers follow a common shape: typed extractors
// in, (StatusCode, Json) out, bookkeeping failures logged rather than
// surfaced.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use pagesmith_lib::models::{Attachment, ChatMessage, GenerationRequest, HostCommand, PreviewEnvelope, Session};
use pagesmith_lib::services::generation::{usage, OutputParser, DEFAULT_MODEL};
use pagesmith_lib::services::preview::{BridgeEffect, PreviewBridge};
use pagesmith_lib::services::publish::PublishError;
use pagesmith_lib::services::workspace::choose_main_file;

use crate::state::SharedState;

/// Output contract handed to the model on every generation request
const SYSTEM_INSTRUCTION: &str = "\
You are a website generator. Respond with a short plan line starting \
with `ROADMAP:`, followed by one or more complete HTML documents, each \
introduced by a line `FILE: <name>.page.html`. Reusable fragments may \
use the .organism/.molecule/.atom suffixes instead of .page. Emit full \
standalone HTML with inline CSS; never wrap output in markdown fences. \
Cross-link pages with relative hrefs to the file names you emit.";

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/sessions/{id}/generate", post(generate))
        .route("/api/sessions/{id}/generate/cancel", post(cancel_generation))
        .route(
            "/api/sessions/{id}/generate/progress",
            get(generation_progress),
        )
        .route("/api/sessions/{id}/undo", post(undo))
        .route("/api/sessions/{id}/redo", post(redo))
        .route("/api/sessions/{id}/preview", get(preview_document))
        .route("/api/sessions/{id}/preview/events", post(preview_event))
        .route("/api/sessions/{id}/preview/commands", post(preview_command))
        .route("/api/sessions/{id}/versions/{file}", get(file_versions))
        .route("/api/sessions/{id}/publish", post(publish_session))
        .route("/view/{slug}", get(view_site))
        .route("/view/{slug}/{file}", get(view_site_file))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn storage_error(message: String) -> Response {
    log::error!("[server] storage error: {}", message);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
}

/// Load a session or produce the 404 response.
fn load_session(state: &SharedState, id: &str) -> Result<Session, Response> {
    match state.store.get_session(id) {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Session not found: {}", id),
        )),
        Err(e) => Err(storage_error(e)),
    }
}

// ----------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------

async fn create_session(State(state): State<SharedState>) -> Response {
    match state.store.create_session() {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn list_sessions(State(state): State<SharedState>) -> Response {
    match state.store.list_sessions() {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn get_session(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    match load_session(&state, &id) {
        Ok(session) => Json(session).into_response(),
        Err(resp) => resp,
    }
}

async fn delete_session(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    state.bridges.lock().await.remove(&id);
    match state.store.delete_session(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Session not found: {}", id)),
        Err(e) => storage_error(e),
    }
}

// ----------------------------------------------------------------------
// Generation
// ----------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    prompt: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
    model: Option<String>,
    #[serde(default)]
    stream: bool,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
}

async fn generate(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<GenerateBody>,
) -> Response {
    let Some(generator) = state.generator.clone() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Generation is not configured (set GEMINI_API_KEY)",
        );
    };
    if let Err(resp) = load_session(&state, &id) {
        return resp;
    }
    if let Err(e) = state
        .store
        .append_message(&id, ChatMessage::user(body.prompt.clone()))
    {
        return storage_error(e);
    }

    let model = body.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let request = GenerationRequest {
        prompt: body.prompt,
        attachments: body.attachments,
        system_instruction: SYSTEM_INSTRUCTION.to_string(),
        model: model.clone(),
        temperature: body.temperature,
        max_output_tokens: body.max_output_tokens,
    };

    let (text, usage, aborted) = if body.stream {
        let mut cancel_rx = state.streams.begin(&id).await;
        let progress_state = Arc::clone(&state);
        let progress_id = id.clone();
        let on_progress = move |accumulated: &str| {
            if let Ok(mut map) = progress_state.progress.write() {
                map.insert(progress_id.clone(), accumulated.to_string());
            }
        };

        let result = generator
            .stream_generate(&request, &mut cancel_rx, &on_progress)
            .await;
        state.streams.finish(&id).await;
        if let Ok(mut map) = state.progress.write() {
            map.remove(&id);
        }

        match result {
            Ok(outcome) => {
                // Recorded once, and never for an aborted stream
                usage::record_outcome(state.token_sink.as_ref(), &id, &model, &outcome);
                (outcome.text, outcome.usage, outcome.aborted)
            }
            Err(e) => {
                return error_response(StatusCode::BAD_GATEWAY, format!("Generation failed: {}", e))
            }
        }
    } else {
        match generator.generate(&request).await {
            Ok(output) => {
                state.token_sink.record(&id, &model, &output.usage);
                (output.text, output.usage, false)
            }
            Err(e) => {
                return error_response(StatusCode::BAD_GATEWAY, format!("Generation failed: {}", e))
            }
        }
    };

    let output = OutputParser::parse(&text);

    // A cancelled stream surfaces its partial result to the caller but
    // never commits it: no file merge, no snapshot, no model message.
    if aborted {
        let session = match load_session(&state, &id) {
            Ok(session) => session,
            Err(resp) => return resp,
        };
        return Json(json!({
            "session": session,
            "roadmap": output.roadmap,
            "files": output.files.keys().collect::<Vec<_>>(),
            "usage": usage,
            "aborted": true,
        }))
        .into_response();
    }

    let session = match state.store.apply_generation(&id, &output, text) {
        Ok(session) => session,
        Err(e) => return storage_error(e),
    };

    // A structural change invalidates any open preview
    state.bridges.lock().await.remove(&id);

    Json(json!({
        "session": session,
        "roadmap": output.roadmap,
        "files": output.files.keys().collect::<Vec<_>>(),
        "usage": usage,
        "aborted": false,
    }))
    .into_response()
}

async fn cancel_generation(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    match state.streams.cancel(&id).await {
        Ok(()) => Json(json!({ "cancelled": true })).into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, e),
    }
}

async fn generation_progress(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Response {
    let text = state
        .progress
        .read()
        .ok()
        .and_then(|map| map.get(&id).cloned());
    match text {
        Some(text) => {
            let output = OutputParser::parse(&text);
            Json(json!({
                "streaming": true,
                "roadmap": output.roadmap,
                "files": output.files.keys().collect::<Vec<_>>(),
            }))
            .into_response()
        }
        None => Json(json!({ "streaming": false })).into_response(),
    }
}

// ----------------------------------------------------------------------
// History
// ----------------------------------------------------------------------

async fn undo(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    if let Err(resp) = load_session(&state, &id) {
        return resp;
    }
    match state.store.undo(&id) {
        Ok((session, moved)) => {
            if moved {
                state.bridges.lock().await.remove(&id);
            }
            Json(json!({ "moved": moved, "session": session })).into_response()
        }
        Err(e) => storage_error(e),
    }
}

async fn redo(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    if let Err(resp) = load_session(&state, &id) {
        return resp;
    }
    match state.store.redo(&id) {
        Ok((session, moved)) => {
            if moved {
                state.bridges.lock().await.remove(&id);
            }
            Json(json!({ "moved": moved, "session": session })).into_response()
        }
        Err(e) => storage_error(e),
    }
}

// ----------------------------------------------------------------------
// Preview bridge
// ----------------------------------------------------------------------

#[derive(Deserialize)]
struct PreviewQuery {
    file: Option<String>,
}

async fn preview_document(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Response {
    let mut session = match load_session(&state, &id) {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let file_name = query
        .file
        .or_else(|| session.active_file_name.clone())
        .or_else(|| choose_main_file(&session.generated_files));
    let Some(file_name) = file_name else {
        return error_response(StatusCode::CONFLICT, "Session has no generated files");
    };

    let mut bridges = state.bridges.lock().await;
    let bridge = bridges.entry(id.clone()).or_insert_with(PreviewBridge::new);
    match bridge.activate_file(&mut session, &file_name) {
        Ok(html) => {
            let generation = bridge.generation();
            drop(bridges);
            if let Err(e) = state.store.save_session(&session) {
                log::error!("[server] failed to persist active file: {}", e);
            }
            (
                [("x-preview-generation", generation.to_string())],
                Html(html),
            )
                .into_response()
        }
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

fn effect_json(effect: &BridgeEffect) -> Value {
    match effect {
        BridgeEffect::Selected(payload) => json!({ "effect": "selected", "payload": payload }),
        BridgeEffect::Deselected => json!({ "effect": "deselected" }),
        BridgeEffect::DocumentSaved => json!({ "effect": "documentSaved" }),
        BridgeEffect::Navigated(file) => json!({ "effect": "navigated", "fileName": file }),
    }
}

/// Persist after bridge effects: preview edits checkpoint the active
/// file, navigation just saves the new active pointer.
fn persist_effects(state: &SharedState, session: &Session, effects: &[BridgeEffect]) {
    let saved = effects
        .iter()
        .any(|e| matches!(e, BridgeEffect::DocumentSaved));
    let navigated = effects
        .iter()
        .any(|e| matches!(e, BridgeEffect::Navigated(_)));
    let result = if saved {
        state.store.apply_preview_edit(session)
    } else if navigated {
        state.store.save_session(session)
    } else {
        Ok(())
    };
    if let Err(e) = result {
        log::error!("[server] failed to persist preview state: {}", e);
    }
}

async fn preview_event(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(envelope): Json<PreviewEnvelope>,
) -> Response {
    let mut session = match load_session(&state, &id) {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let mut bridges = state.bridges.lock().await;
    let Some(bridge) = bridges.get_mut(&id) else {
        return error_response(StatusCode::CONFLICT, "No active preview for session");
    };
    let effect = bridge.handle_event(&mut session, envelope);
    drop(bridges);

    match effect {
        Some(effect) => {
            persist_effects(&state, &session, std::slice::from_ref(&effect));
            Json(effect_json(&effect)).into_response()
        }
        None => Json(json!({ "effect": "ignored" })).into_response(),
    }
}

async fn preview_command(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(command): Json<HostCommand>,
) -> Response {
    let mut session = match load_session(&state, &id) {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let mut bridges = state.bridges.lock().await;
    let Some(bridge) = bridges.get_mut(&id) else {
        return error_response(StatusCode::CONFLICT, "No active preview for session");
    };
    let effects = match bridge.send_command(&mut session, command) {
        Ok(effects) => effects,
        Err(e) => return error_response(StatusCode::CONFLICT, e.to_string()),
    };
    drop(bridges);

    persist_effects(&state, &session, &effects);
    Json(json!({
        "effects": effects.iter().map(effect_json).collect::<Vec<_>>(),
    }))
    .into_response()
}

// ----------------------------------------------------------------------
// Versions
// ----------------------------------------------------------------------

async fn file_versions(
    State(state): State<SharedState>,
    Path((id, file)): Path<(String, String)>,
) -> Response {
    if let Err(resp) = load_session(&state, &id) {
        return resp;
    }
    match state.store.versions_for_file(&id, &file) {
        Ok(versions) => Json(versions).into_response(),
        Err(e) => storage_error(e),
    }
}

// ----------------------------------------------------------------------
// Publish and viewer
// ----------------------------------------------------------------------

async fn publish_session(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let session = match load_session(&state, &id) {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    match state.publisher.publish(&session) {
        Ok(site) => Json(site).into_response(),
        Err(PublishError::NothingToPublish) => {
            error_response(StatusCode::CONFLICT, "Session has no generated files")
        }
        Err(PublishError::Storage(e)) => storage_error(e),
    }
}

async fn view_site(State(state): State<SharedState>, Path(slug): Path<String>) -> Response {
    serve_published(&state, &slug, None)
}

async fn view_site_file(
    State(state): State<SharedState>,
    Path((slug, file)): Path<(String, String)>,
) -> Response {
    serve_published(&state, &slug, Some(&file))
}

/// Only an unknown slug is an error; anything else inside a published
/// site falls back to the main page.
fn serve_published(state: &SharedState, slug: &str, file: Option<&str>) -> Response {
    match state.publisher.site_by_slug(slug) {
        Ok(Some(site)) => Html(state.publisher.render_page(&site, file)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Html("<html><body><h1>Site not found</h1></body></html>".to_string()),
        )
            .into_response(),
        Err(PublishError::Storage(e)) => storage_error(e),
        Err(PublishError::NothingToPublish) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "unexpected publish state")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Mutex};

    use pagesmith_lib::models::TokenUsage;
    use pagesmith_lib::services::generation::stream::StreamManager;
    use pagesmith_lib::services::generation::usage::NullSink;
    use pagesmith_lib::services::generation::{
        GenerationBackend, GenerationOutput, GenerationResult, StreamOutcome,
    };
    use pagesmith_lib::services::{PublishService, WorkspaceStore};
    use pagesmith_lib::utils::Database;

    use crate::state::AppState;

    const SCRIPT: &str =
        "ROADMAP: one landing page\nFILE: index.page.html\n<html><body>draft</body></html>";

    /// Backend that replays a fixed script instead of calling out.
    struct ScriptedStream {
        text: &'static str,
        aborted: bool,
    }

    #[async_trait]
    impl GenerationBackend for ScriptedStream {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> GenerationResult<GenerationOutput> {
            Ok(GenerationOutput {
                text: self.text.to_string(),
                usage: TokenUsage::default(),
            })
        }

        async fn stream_generate(
            &self,
            _request: &GenerationRequest,
            _cancel: &mut mpsc::Receiver<()>,
            on_progress: &(dyn for<'a> Fn(&'a str) + Send + Sync),
        ) -> GenerationResult<StreamOutcome> {
            on_progress(self.text);
            Ok(StreamOutcome {
                text: self.text.to_string(),
                usage: TokenUsage::default(),
                aborted: self.aborted,
            })
        }
    }

    fn test_state(backend: ScriptedStream) -> SharedState {
        let db = Database::new_in_memory().unwrap();
        Arc::new(AppState {
            store: WorkspaceStore::new(db.clone()),
            publisher: PublishService::new(db),
            generator: Some(Arc::new(backend)),
            token_sink: Arc::new(NullSink),
            streams: StreamManager::new(),
            bridges: Mutex::new(HashMap::new()),
            progress: RwLock::new(HashMap::new()),
        })
    }

    fn stream_body() -> GenerateBody {
        GenerateBody {
            prompt: "build it".to_string(),
            attachments: Vec::new(),
            model: None,
            stream: true,
            temperature: None,
            max_output_tokens: None,
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_cancelled_stream_is_not_committed() {
        let state = test_state(ScriptedStream {
            text: SCRIPT,
            aborted: true,
        });
        let session = state.store.create_session().unwrap();

        let response = generate(
            State(Arc::clone(&state)),
            Path(session.id.clone()),
            Json(stream_body()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // The caller sees the partial result
        let json = body_json(response).await;
        assert_eq!(json["aborted"], true);
        assert_eq!(json["files"][0], "index.page.html");

        // The session does not: no files, no snapshot, no model reply
        let reloaded = state.store.get_session(&session.id).unwrap().unwrap();
        assert!(reloaded.generated_files.is_empty());
        assert!(reloaded.history.is_empty());
        assert!(!reloaded.messages.iter().any(|m| m.content.contains("ROADMAP")));
    }

    #[tokio::test]
    async fn test_completed_stream_commits_files_and_snapshot() {
        let state = test_state(ScriptedStream {
            text: SCRIPT,
            aborted: false,
        });
        let session = state.store.create_session().unwrap();

        let response = generate(
            State(Arc::clone(&state)),
            Path(session.id.clone()),
            Json(stream_body()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["aborted"], false);

        let reloaded = state.store.get_session(&session.id).unwrap().unwrap();
        assert!(reloaded.generated_files.contains_key("index.page.html"));
        assert_eq!(reloaded.history.len(), 1);
        assert_eq!(reloaded.history_index, 0);
    }
}
