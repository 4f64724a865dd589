// File Version Repository
// Write-once per-file checkpoints. Writes are unbounded and
// append-only; the read path applies the retention cap of 20 most
// recent versions per file name.

use chrono::{DateTime, Utc};
use rusqlite::params;
use std::collections::BTreeMap;

use crate::models::FileVersion;
use crate::utils::Database;

/// Versions returned per file name on the read path
pub const VERSIONS_PER_FILE: usize = 20;

pub struct VersionRepository {
    db: Database,
}

impl VersionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record one version. A duplicate (session, file, timestamp) is
    /// ignored, never overwritten.
    pub fn insert(&self, session_id: &str, version: &FileVersion) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT OR IGNORE INTO file_versions (session_id, file_name, code, label, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    session_id,
                    version.file_name,
                    version.code,
                    version.label,
                    version.timestamp.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to insert file version: {}", e))?;
            Ok(())
        })
    }

    /// Versions for one file, ascending by timestamp, capped to the
    /// most recent VERSIONS_PER_FILE.
    pub fn list_for_file(
        &self,
        session_id: &str,
        file_name: &str,
    ) -> Result<Vec<FileVersion>, String> {
        let mut versions = self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT file_name, code, label, timestamp FROM file_versions \
                     WHERE session_id = ?1 AND file_name = ?2 \
                     ORDER BY timestamp DESC LIMIT ?3",
                )
                .map_err(|e| format!("Failed to prepare query: {}", e))?;

            let rows = stmt
                .query_map(
                    params![session_id, file_name, VERSIONS_PER_FILE as i64],
                    map_version_row,
                )
                .map_err(|e| format!("Failed to list versions: {}", e))?;

            let mut versions = Vec::new();
            for row in rows {
                versions.push(row.map_err(|e| format!("Failed to read version row: {}", e))??);
            }
            Ok(versions)
        })?;
        // Queried newest-first to apply the cap; callers see ascending
        versions.reverse();
        Ok(versions)
    }

    /// All versions for a session, grouped by file name, each group
    /// ascending and capped like list_for_file.
    pub fn list_for_session(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, Vec<FileVersion>>, String> {
        let all = self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT file_name, code, label, timestamp FROM file_versions \
                     WHERE session_id = ?1 ORDER BY file_name, timestamp ASC",
                )
                .map_err(|e| format!("Failed to prepare query: {}", e))?;

            let rows = stmt
                .query_map(params![session_id], map_version_row)
                .map_err(|e| format!("Failed to list versions: {}", e))?;

            let mut all: Vec<FileVersion> = Vec::new();
            for row in rows {
                all.push(row.map_err(|e| format!("Failed to read version row: {}", e))??);
            }
            Ok(all)
        })?;

        let mut grouped: BTreeMap<String, Vec<FileVersion>> = BTreeMap::new();
        for version in all {
            grouped
                .entry(version.file_name.clone())
                .or_default()
                .push(version);
        }
        for versions in grouped.values_mut() {
            if versions.len() > VERSIONS_PER_FILE {
                let drop = versions.len() - VERSIONS_PER_FILE;
                versions.drain(..drop);
            }
        }
        Ok(grouped)
    }

    /// Remove every version row for a session (done before deleting
    /// the session itself).
    pub fn delete_for_session(&self, session_id: &str) -> Result<usize, String> {
        self.db.with_connection(|conn| {
            conn.execute(
                "DELETE FROM file_versions WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(|e| format!("Failed to delete versions: {}", e))
        })
    }
}

#[allow(clippy::type_complexity)]
fn map_version_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<FileVersion, String>> {
    let timestamp: String = row.get(3)?;
    Ok(
        match DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| format!("Failed to parse version timestamp: {}", e))
        {
            Ok(ts) => Ok(FileVersion {
                file_name: row.get(0)?,
                code: row.get(1)?,
                label: row.get(2)?,
                timestamp: ts.with_timezone(&Utc),
            }),
            Err(e) => Err(e),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn repo() -> VersionRepository {
        let db = Database::new_in_memory().unwrap();
        db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, title, created_at) VALUES ('s1', 'T', '2026-01-01T00:00:00Z')",
                [],
            )
            .map_err(|e| e.to_string())?;
            Ok(())
        })
        .unwrap();
        VersionRepository::new(db)
    }

    fn version(file: &str, n: u32) -> FileVersion {
        FileVersion {
            file_name: file.to_string(),
            code: format!("<html>{}</html>", n),
            label: format!("Edit {}", n),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, n).unwrap(),
        }
    }

    #[test]
    fn test_read_path_caps_at_twenty() {
        let repo = repo();
        for n in 0..25 {
            repo.insert("s1", &version("index.page.html", n)).unwrap();
        }

        let versions = repo.list_for_file("s1", "index.page.html").unwrap();
        assert_eq!(versions.len(), VERSIONS_PER_FILE);
        // Oldest five dropped; remainder ascending
        assert_eq!(versions[0].label, "Edit 5");
        assert_eq!(versions.last().unwrap().label, "Edit 24");
        for pair in versions.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[test]
    fn test_duplicate_timestamp_is_ignored() {
        let repo = repo();
        let v = version("a.page.html", 1);
        repo.insert("s1", &v).unwrap();
        let mut clobber = v.clone();
        clobber.code = "<html>other</html>".to_string();
        repo.insert("s1", &clobber).unwrap();

        let versions = repo.list_for_file("s1", "a.page.html").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].code, v.code);
    }

    #[test]
    fn test_grouped_listing() {
        let repo = repo();
        repo.insert("s1", &version("a.page.html", 1)).unwrap();
        repo.insert("s1", &version("a.page.html", 2)).unwrap();
        repo.insert("s1", &version("b.page.html", 1)).unwrap();

        let grouped = repo.list_for_session("s1").unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["a.page.html"].len(), 2);
        assert_eq!(grouped["b.page.html"].len(), 1);
    }

    #[test]
    fn test_delete_for_session() {
        let repo = repo();
        repo.insert("s1", &version("a.page.html", 1)).unwrap();
        assert_eq!(repo.delete_for_session("s1").unwrap(), 1);
        assert!(repo.list_for_file("s1", "a.page.html").unwrap().is_empty());
    }
}
