// Token Usage Repository
// Append-only bookkeeping rows, one per completed generation request.

use rusqlite::params;

use crate::models::TokenUsage;
use crate::utils::Database;

pub struct UsageRepository {
    db: Database,
}

impl UsageRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, session_id: &str, model: &str, usage: &TokenUsage) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO token_usage (session_id, model, prompt_tokens, output_tokens, total_tokens)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    session_id,
                    model,
                    usage.prompt_tokens,
                    usage.output_tokens,
                    usage.total_tokens,
                ],
            )
            .map_err(|e| format!("Failed to record token usage: {}", e))?;
            Ok(())
        })
    }

    /// Summed usage across every request in a session.
    pub fn total_for_session(&self, session_id: &str) -> Result<TokenUsage, String> {
        self.db.with_connection_raw(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(prompt_tokens), 0), COALESCE(SUM(output_tokens), 0), \
                 COALESCE(SUM(total_tokens), 0) FROM token_usage WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(TokenUsage {
                        prompt_tokens: row.get(0)?,
                        output_tokens: row.get(1)?,
                        total_tokens: row.get(2)?,
                    })
                },
            )
        })
    }
}
