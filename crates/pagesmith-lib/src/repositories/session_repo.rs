// Session Repository
// SQLite persistence for builder sessions. Messages, the generated
// file map and the history stack are stored as JSON text columns.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::models::Session;
use crate::utils::Database;

pub struct SessionRepository {
    db: Database,
}

struct SessionRow {
    id: String,
    title: String,
    messages: String,
    generated_files: String,
    active_file_name: Option<String>,
    history: String,
    history_index: i64,
    created_at: String,
}

impl SessionRow {
    fn into_session(self) -> Result<Session, String> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| format!("Failed to parse session timestamp: {}", e))?
            .with_timezone(&Utc);
        Ok(Session {
            id: self.id,
            title: self.title,
            messages: serde_json::from_str(&self.messages)
                .map_err(|e| format!("Failed to parse session messages: {}", e))?,
            generated_files: serde_json::from_str(&self.generated_files)
                .map_err(|e| format!("Failed to parse session files: {}", e))?,
            active_file_name: self.active_file_name,
            history: serde_json::from_str(&self.history)
                .map_err(|e| format!("Failed to parse session history: {}", e))?,
            history_index: self.history_index,
            created_at,
        })
    }
}

impl SessionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert the whole session document. An in-place update, never a
    /// delete-and-reinsert: version checkpoints reference this row.
    pub fn save(&self, session: &Session) -> Result<(), String> {
        let messages = serde_json::to_string(&session.messages)
            .map_err(|e| format!("Failed to serialize messages: {}", e))?;
        let files = serde_json::to_string(&session.generated_files)
            .map_err(|e| format!("Failed to serialize files: {}", e))?;
        let history = serde_json::to_string(&session.history)
            .map_err(|e| format!("Failed to serialize history: {}", e))?;

        self.db.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO sessions
                    (id, title, messages, generated_files, active_file_name, history, history_index, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    messages = excluded.messages,
                    generated_files = excluded.generated_files,
                    active_file_name = excluded.active_file_name,
                    history = excluded.history,
                    history_index = excluded.history_index
                "#,
                params![
                    session.id,
                    session.title,
                    messages,
                    files,
                    session.active_file_name,
                    history,
                    session.history_index,
                    session.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to save session: {}", e))?;
            Ok(())
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Session>, String> {
        self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, messages, generated_files, active_file_name, history, history_index, created_at \
                     FROM sessions WHERE id = ?1",
                )
                .map_err(|e| format!("Failed to prepare query: {}", e))?;

            let row = stmt
                .query_row(params![id], |row| {
                    Ok(SessionRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        messages: row.get(2)?,
                        generated_files: row.get(3)?,
                        active_file_name: row.get(4)?,
                        history: row.get(5)?,
                        history_index: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(format!("Failed to load session: {}", other)),
                })?;

            row.map(SessionRow::into_session).transpose()
        })
    }

    /// Most recent first.
    pub fn list(&self) -> Result<Vec<Session>, String> {
        self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, messages, generated_files, active_file_name, history, history_index, created_at \
                     FROM sessions ORDER BY created_at DESC",
                )
                .map_err(|e| format!("Failed to prepare query: {}", e))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(SessionRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        messages: row.get(2)?,
                        generated_files: row.get(3)?,
                        active_file_name: row.get(4)?,
                        history: row.get(5)?,
                        history_index: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })
                .map_err(|e| format!("Failed to list sessions: {}", e))?;

            let mut sessions = Vec::new();
            for row in rows {
                let row = row.map_err(|e| format!("Failed to read session row: {}", e))?;
                sessions.push(row.into_session()?);
            }
            Ok(sessions)
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool, String> {
        self.db.with_connection(|conn| {
            let affected = conn
                .execute("DELETE FROM sessions WHERE id = ?1", params![id])
                .map_err(|e| format!("Failed to delete session: {}", e))?;
            Ok(affected > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, FileVersion};
    use crate::repositories::VersionRepository;

    fn repo() -> SessionRepository {
        SessionRepository::new(Database::new_in_memory().unwrap())
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let repo = repo();
        let mut session = Session::empty("s1".to_string());
        session.push_message(ChatMessage::user("make a page".to_string()));
        session
            .generated_files
            .insert("index.page.html".to_string(), "<html></html>".to_string());
        session.push_snapshot();
        repo.save(&session).unwrap();

        let loaded = repo.get("s1").unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.messages.len(), session.messages.len());
        assert_eq!(loaded.generated_files, session.generated_files);
        assert_eq!(loaded.history_index, session.history_index);
        assert_eq!(loaded.history, session.history);
    }

    #[test]
    fn test_get_missing_returns_none() {
        assert!(repo().get("nope").unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_existing() {
        let repo = repo();
        let mut session = Session::empty("s1".to_string());
        repo.save(&session).unwrap();
        session.title = "Renamed".to_string();
        repo.save(&session).unwrap();

        let loaded = repo.get("s1").unwrap().unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn test_save_after_version_checkpoint() {
        let db = Database::new_in_memory().unwrap();
        let repo = SessionRepository::new(db.clone());
        let versions = VersionRepository::new(db);

        let mut session = Session::empty("s1".to_string());
        repo.save(&session).unwrap();
        versions
            .insert(
                "s1",
                &FileVersion {
                    file_name: "index.page.html".to_string(),
                    code: "<html></html>".to_string(),
                    label: "Generated".to_string(),
                    timestamp: Utc::now(),
                },
            )
            .unwrap();

        // The versions FK restricts deletes, so the re-save must be an
        // in-place update
        session.title = "After checkpoint".to_string();
        repo.save(&session).unwrap();

        let loaded = repo.get("s1").unwrap().unwrap();
        assert_eq!(loaded.title, "After checkpoint");
        assert_eq!(
            versions
                .list_for_file("s1", "index.page.html")
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_delete() {
        let repo = repo();
        repo.save(&Session::empty("s1".to_string())).unwrap();
        assert!(repo.delete("s1").unwrap());
        assert!(!repo.delete("s1").unwrap());
    }
}
