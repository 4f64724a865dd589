// Published Site Repository
// One published record per session, keyed by session_id; the slug is
// unique across sites and never changes after the first publish.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::models::PublishedSite;
use crate::utils::Database;

pub struct SiteRepository {
    db: Database,
}

impl SiteRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or update the record for the site's session.
    pub fn upsert(&self, site: &PublishedSite) -> Result<(), String> {
        let file_contents = serde_json::to_string(&site.file_contents)
            .map_err(|e| format!("Failed to serialize site files: {}", e))?;

        self.db.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO published_sites
                    (session_id, slug, uid, title, file_contents, main_file, published_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(session_id) DO UPDATE SET
                    title = excluded.title,
                    file_contents = excluded.file_contents,
                    main_file = excluded.main_file,
                    updated_at = excluded.updated_at
                "#,
                params![
                    site.session_id,
                    site.slug,
                    site.uid,
                    site.title,
                    file_contents,
                    site.main_file,
                    site.published_at.to_rfc3339(),
                    site.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to save published site: {}", e))?;
            Ok(())
        })
    }

    pub fn get_by_slug(&self, slug: &str) -> Result<Option<PublishedSite>, String> {
        self.get_where("slug = ?1", slug)
    }

    pub fn get_by_session(&self, session_id: &str) -> Result<Option<PublishedSite>, String> {
        self.get_where("session_id = ?1", session_id)
    }

    pub fn slug_exists(&self, slug: &str) -> Result<bool, String> {
        self.db.with_connection_raw(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM published_sites WHERE slug = ?1",
                params![slug],
                |row| row.get::<_, i32>(0),
            )
        })
        .map(|count| count > 0)
    }

    pub fn delete_for_session(&self, session_id: &str) -> Result<bool, String> {
        self.db.with_connection(|conn| {
            let affected = conn
                .execute(
                    "DELETE FROM published_sites WHERE session_id = ?1",
                    params![session_id],
                )
                .map_err(|e| format!("Failed to delete published site: {}", e))?;
            Ok(affected > 0)
        })
    }

    fn get_where(&self, predicate: &str, value: &str) -> Result<Option<PublishedSite>, String> {
        self.db.with_connection(|conn| {
            let sql = format!(
                "SELECT session_id, slug, uid, title, file_contents, main_file, published_at, updated_at \
                 FROM published_sites WHERE {}",
                predicate
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| format!("Failed to prepare query: {}", e))?;

            let row = stmt
                .query_row(params![value], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                })
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(format!("Failed to load published site: {}", other)),
                })?;

            let Some((session_id, slug, uid, title, file_contents, main_file, published_at, updated_at)) =
                row
            else {
                return Ok(None);
            };

            let file_contents: crate::models::FileMap = serde_json::from_str(&file_contents)
                .map_err(|e| format!("Failed to parse site files: {}", e))?;
            let files = file_contents.keys().cloned().collect();

            Ok(Some(PublishedSite {
                session_id,
                slug,
                uid,
                title,
                files,
                file_contents,
                main_file,
                published_at: parse_timestamp(&published_at)?,
                updated_at: parse_timestamp(&updated_at)?,
            }))
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("Failed to parse site timestamp: {}", e))
}
