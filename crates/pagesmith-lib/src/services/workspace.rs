// Workspace store
// Exclusive owner of the authoritative session documents. Every
// durable mutation (conversation, generation results, preview edits,
// undo/redo) funnels through here; version checkpoints are written as
// a side effect of file changes.

use chrono::Utc;
use uuid::Uuid;

use crate::models::{ChatMessage, FileMap, FileVersion, MessageRole, Session};
use crate::repositories::{SessionRepository, VersionRepository};
use crate::services::generation::GeneratedOutput;
use crate::utils::Database;

const DEFAULT_TITLE: &str = "New site";
const TITLE_MAX_LEN: usize = 50;

pub struct WorkspaceStore {
    sessions: SessionRepository,
    versions: VersionRepository,
}

impl WorkspaceStore {
    pub fn new(db: Database) -> Self {
        Self {
            sessions: SessionRepository::new(db.clone()),
            versions: VersionRepository::new(db),
        }
    }

    pub fn create_session(&self) -> Result<Session, String> {
        let session = Session::empty(Uuid::new_v4().to_string());
        self.sessions.save(&session)?;
        log::info!("[workspace] created session {}", session.id);
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>, String> {
        self.sessions.get(id)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>, String> {
        self.sessions.list()
    }

    pub fn save_session(&self, session: &Session) -> Result<(), String> {
        self.sessions.save(session)
    }

    /// Append one conversation message. The first user message also
    /// names an untitled session.
    pub fn append_message(&self, id: &str, message: ChatMessage) -> Result<Session, String> {
        let mut session = self.load(id)?;
        if session.title == DEFAULT_TITLE && message.role == MessageRole::User {
            session.title = derive_title(&message.content);
        }
        session.push_message(message);
        self.sessions.save(&session)?;
        Ok(session)
    }

    /// Fold a finished generation into the session: merge the emitted
    /// files into the map, checkpoint each one, record the model's
    /// reply, snapshot, and pick an active file if none survives.
    pub fn apply_generation(
        &self,
        id: &str,
        output: &GeneratedOutput,
        model_message: String,
    ) -> Result<Session, String> {
        let mut session = self.load(id)?;
        let timestamp = Utc::now();

        for (file_name, code) in &output.files {
            session
                .generated_files
                .insert(file_name.clone(), code.clone());
            self.versions.insert(
                id,
                &FileVersion {
                    file_name: file_name.clone(),
                    code: code.clone(),
                    label: "Generated".to_string(),
                    timestamp,
                },
            )?;
        }

        session.push_message(ChatMessage::model(model_message));
        session.push_snapshot();

        let active_is_valid = session
            .active_file_name
            .as_ref()
            .map(|name| session.generated_files.contains_key(name))
            .unwrap_or(false);
        if !active_is_valid {
            session.active_file_name = choose_main_file(&session.generated_files);
        }

        self.sessions.save(&session)?;
        log::info!(
            "[workspace] applied generation to {} ({} files)",
            id,
            output.files.len()
        );
        Ok(session)
    }

    /// Persist a session after a preview edit, checkpointing the
    /// active file. The bridge has already written the file back and
    /// pushed the history snapshot.
    pub fn apply_preview_edit(&self, session: &Session) -> Result<(), String> {
        if let Some(active) = &session.active_file_name {
            if let Some(code) = session.generated_files.get(active) {
                self.versions.insert(
                    &session.id,
                    &FileVersion {
                        file_name: active.clone(),
                        code: code.clone(),
                        label: "Manual edit".to_string(),
                        timestamp: Utc::now(),
                    },
                )?;
            }
        }
        self.sessions.save(session)
    }

    /// Returns the session and whether a step was taken; stepping past
    /// either end leaves the session untouched.
    pub fn undo(&self, id: &str) -> Result<(Session, bool), String> {
        let mut session = self.load(id)?;
        let moved = session.undo();
        if moved {
            self.sessions.save(&session)?;
        }
        Ok((session, moved))
    }

    pub fn redo(&self, id: &str) -> Result<(Session, bool), String> {
        let mut session = self.load(id)?;
        let moved = session.redo();
        if moved {
            self.sessions.save(&session)?;
        }
        Ok((session, moved))
    }

    pub fn versions_for_file(
        &self,
        id: &str,
        file_name: &str,
    ) -> Result<Vec<FileVersion>, String> {
        self.versions.list_for_file(id, file_name)
    }

    /// Version rows go first; the session row has no cascading delete.
    pub fn delete_session(&self, id: &str) -> Result<bool, String> {
        self.versions.delete_for_session(id)?;
        let deleted = self.sessions.delete(id)?;
        if deleted {
            log::info!("[workspace] deleted session {}", id);
        }
        Ok(deleted)
    }

    fn load(&self, id: &str) -> Result<Session, String> {
        self.sessions
            .get(id)?
            .ok_or_else(|| format!("Session not found: {}", id))
    }
}

/// Entry page preference: index.page.html, then any index*, then the
/// first .page file, then whatever sorts first.
pub fn choose_main_file(files: &FileMap) -> Option<String> {
    if files.contains_key("index.page.html") {
        return Some("index.page.html".to_string());
    }
    if let Some(name) = files.keys().find(|name| name.starts_with("index.")) {
        return Some(name.clone());
    }
    if let Some(name) = files.keys().find(|name| name.ends_with(".page.html")) {
        return Some(name.clone());
    }
    files.keys().next().cloned()
}

fn derive_title(prompt: &str) -> String {
    let line = prompt.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    let mut title: String = line.chars().take(TITLE_MAX_LEN).collect();
    if line.chars().count() > TITLE_MAX_LEN {
        title.push('\u{2026}');
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HostCommand, InteractionMode, PreviewEnvelope};
    use crate::services::generation::OutputParser;
    use crate::services::preview::{BridgeEffect, PreviewBridge};

    fn store() -> WorkspaceStore {
        WorkspaceStore::new(Database::new_in_memory().unwrap())
    }

    fn output(pairs: &[(&str, &str)]) -> GeneratedOutput {
        GeneratedOutput {
            roadmap: "plan".to_string(),
            files: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_create_and_reload() {
        let store = store();
        let session = store.create_session().unwrap();
        let loaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.title, DEFAULT_TITLE);
        assert_eq!(loaded.history_index, -1);
    }

    #[test]
    fn test_first_user_message_titles_session() {
        let store = store();
        let session = store.create_session().unwrap();
        let updated = store
            .append_message(
                &session.id,
                ChatMessage::user("Build a bakery site with a menu page".to_string()),
            )
            .unwrap();
        assert_eq!(updated.title, "Build a bakery site with a menu page");

        // Later messages leave the title alone
        let updated = store
            .append_message(&session.id, ChatMessage::user("Add a contact form".to_string()))
            .unwrap();
        assert_eq!(updated.title, "Build a bakery site with a menu page");
    }

    #[test]
    fn test_apply_generation_merges_and_selects_active() {
        let store = store();
        let session = store.create_session().unwrap();
        let updated = store
            .apply_generation(
                &session.id,
                &output(&[
                    ("index.page.html", "<html>home</html>"),
                    ("about.page.html", "<html>about</html>"),
                ]),
                "Here is your site".to_string(),
            )
            .unwrap();

        assert_eq!(updated.generated_files.len(), 2);
        assert_eq!(updated.active_file_name.as_deref(), Some("index.page.html"));
        assert_eq!(updated.history.len(), 1);

        // A second generation touching one file keeps the rest
        let updated = store
            .apply_generation(
                &session.id,
                &output(&[("about.page.html", "<html>about v2</html>")]),
                "Updated the about page".to_string(),
            )
            .unwrap();
        assert_eq!(updated.generated_files.len(), 2);
        assert_eq!(updated.generated_files["index.page.html"], "<html>home</html>");
        assert_eq!(updated.history.len(), 2);
    }

    #[test]
    fn test_generation_records_versions() {
        let store = store();
        let session = store.create_session().unwrap();
        store
            .apply_generation(
                &session.id,
                &output(&[("index.page.html", "<html>v1</html>")]),
                "done".to_string(),
            )
            .unwrap();

        let versions = store
            .versions_for_file(&session.id, "index.page.html")
            .unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].label, "Generated");
    }

    #[test]
    fn test_undo_redo_roundtrip_persists() {
        let store = store();
        let session = store.create_session().unwrap();
        store
            .apply_generation(
                &session.id,
                &output(&[("index.page.html", "<html>v1</html>")]),
                "v1".to_string(),
            )
            .unwrap();
        store
            .apply_generation(
                &session.id,
                &output(&[("index.page.html", "<html>v2</html>")]),
                "v2".to_string(),
            )
            .unwrap();

        let (after_undo, moved) = store.undo(&session.id).unwrap();
        assert!(moved);
        assert_eq!(after_undo.generated_files["index.page.html"], "<html>v1</html>");

        // Undo landed on disk
        let reloaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(reloaded.generated_files["index.page.html"], "<html>v1</html>");

        let (after_redo, moved) = store.redo(&session.id).unwrap();
        assert!(moved);
        assert_eq!(after_redo.generated_files["index.page.html"], "<html>v2</html>");

        let (_, moved) = store.redo(&session.id).unwrap();
        assert!(!moved);
    }

    #[test]
    fn test_delete_session_removes_versions_first() {
        let store = store();
        let session = store.create_session().unwrap();
        store
            .apply_generation(
                &session.id,
                &output(&[("index.page.html", "<html></html>")]),
                "done".to_string(),
            )
            .unwrap();

        assert!(store.delete_session(&session.id).unwrap());
        assert!(store.get_session(&session.id).unwrap().is_none());
        assert!(store
            .versions_for_file(&session.id, "index.page.html")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_end_to_end_generate_then_parse() {
        let store = store();
        let session = store.create_session().unwrap();
        let buffer = "ROADMAP: simple site\nFILE: index.page.html\n<html><body>hi</body></html>";
        let output = OutputParser::parse(buffer);
        let updated = store
            .apply_generation(&session.id, &output, output.roadmap.clone())
            .unwrap();
        assert_eq!(updated.generated_files.len(), 1);
        assert_eq!(updated.active_file_name.as_deref(), Some("index.page.html"));
    }

    #[test]
    fn test_generate_edit_undo_lifecycle() {
        let store = store();
        let created = store.create_session().unwrap();
        assert!(created.generated_files.is_empty());

        let mut session = store
            .apply_generation(
                &created.id,
                &output(&[(
                    "index.page.html",
                    "<html><body><div class=\"hero\">A</div></body></html>",
                )]),
                "built it".to_string(),
            )
            .unwrap();
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history_index, 0);

        // Open the preview and delete the hero element through the bridge
        let mut bridge = PreviewBridge::new();
        bridge
            .activate_file(&mut session, "index.page.html")
            .unwrap();
        bridge
            .send_command(
                &mut session,
                HostCommand::ModeChange {
                    mode: InteractionMode::Design,
                },
            )
            .unwrap();
        let events = bridge.runtime_mut().unwrap().click(".hero");
        let generation = bridge.generation();
        let selected = bridge
            .handle_event(
                &mut session,
                PreviewEnvelope {
                    generation,
                    event: events.into_iter().next().unwrap(),
                },
            )
            .unwrap();
        let element_id = match selected {
            BridgeEffect::Selected(payload) => payload.id,
            other => panic!("unexpected {:?}", other),
        };
        let effects = bridge
            .send_command(&mut session, HostCommand::ActionDelete { id: element_id })
            .unwrap();
        assert!(effects.contains(&BridgeEffect::DocumentSaved));
        store.apply_preview_edit(&session).unwrap();

        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history_index, 1);
        assert!(!session.generated_files["index.page.html"].contains(">A<"));

        // Undo brings the deleted markup back
        let (reverted, moved) = store.undo(&session.id).unwrap();
        assert!(moved);
        assert_eq!(reverted.history_index, 0);
        assert!(reverted.generated_files["index.page.html"].contains(">A<"));

        // The manual edit was checkpointed alongside the generation
        let versions = store
            .versions_for_file(&session.id, "index.page.html")
            .unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[test]
    fn test_choose_main_file_preference() {
        let mut files = FileMap::new();
        files.insert("zeta.page.html".to_string(), String::new());
        files.insert("logo.atom.html".to_string(), String::new());
        assert_eq!(choose_main_file(&files).as_deref(), Some("zeta.page.html"));

        files.insert("index.page.html".to_string(), String::new());
        assert_eq!(choose_main_file(&files).as_deref(), Some("index.page.html"));

        assert!(choose_main_file(&FileMap::new()).is_none());
    }
}
