//! Password reset tokens: random, time limited, single use.

use rusqlite::{params, Connection, OptionalExtension};

pub fn issue_reset_token(conn: &Connection, user_id: i64, hours: u64) -> rusqlite::Result<String> {
    let token = uuid::Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO password_resets (token, user_id, expires_at)
         VALUES (?1, ?2, datetime('now', ?3))",
        params![token, user_id, format!("+{} hours", hours)],
    )?;

    Ok(token)
}

/// Consume a token. The row is deleted whether or not it was still valid, so
/// a token can never be used twice. Inside a transaction the delete only
/// sticks once the transaction commits. Returns the user id for a live token.
pub fn consume_reset_token(conn: &Connection, token: &str) -> rusqlite::Result<Option<i64>> {
    let row: Option<(i64, bool)> = conn
        .query_row(
            "DELETE FROM password_resets WHERE token = ?1
             RETURNING user_id, expires_at > datetime('now')",
            params![token],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(row.and_then(|(user_id, live)| live.then_some(user_id)))
}
