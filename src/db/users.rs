use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};

use super::models::User;

pub fn insert_user(
    conn: &Connection,
    username: &str,
    email: &str,
    password_hash: &str,
) -> rusqlite::Result<User> {
    conn.query_row(
        &format!(
            "INSERT INTO users (username, email, password_hash) VALUES (?1, ?2, ?3)
             RETURNING {}",
            User::COLUMNS
        ),
        params![username, email, password_hash],
        User::from_row,
    )
}

/// Which unique column a failed insert collided with, if that is why it failed.
pub fn duplicate_field(err: &rusqlite::Error) -> Option<&'static str> {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) if e.code == ErrorCode::ConstraintViolation => {
            if msg.contains("users.username") {
                Some("username")
            } else if msg.contains("users.email") {
                Some("email")
            } else {
                None
            }
        }
        _ => None,
    }
}

pub fn find_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", User::COLUMNS),
        params![id],
        User::from_row,
    )
    .optional()
}

pub fn find_by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE username = ?1", User::COLUMNS),
        params![username],
        User::from_row,
    )
    .optional()
}

pub fn find_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE email = ?1", User::COLUMNS),
        params![email],
        User::from_row,
    )
    .optional()
}

/// Fetch every user whose id is in `ids`. Order of the result is unspecified.
pub fn find_many(conn: &Connection, ids: &[i64]) -> rusqlite::Result<Vec<User>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE id IN ({})",
        User::COLUMNS,
        placeholders
    ))?;
    let users = stmt
        .query_map(params_from_iter(ids.iter()), User::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(users)
}

pub fn update_password(conn: &Connection, id: i64, password_hash: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE users
         SET password_hash = ?1, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE id = ?2",
        params![password_hash, id],
    )?;
    Ok(rows > 0)
}
