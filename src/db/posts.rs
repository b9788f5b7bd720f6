//! Post rows. `points` is read here but only ever written by the vote ledger.

use rusqlite::{params, Connection, OptionalExtension};

use super::models::Post;

pub fn insert_post(
    conn: &Connection,
    creator_id: i64,
    title: &str,
    text: &str,
) -> rusqlite::Result<Post> {
    conn.query_row(
        &format!(
            "INSERT INTO posts (title, text, creator_id) VALUES (?1, ?2, ?3)
             RETURNING {}",
            Post::COLUMNS
        ),
        params![title, text, creator_id],
        Post::from_row,
    )
}

pub fn find_post(conn: &Connection, id: i64) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!("SELECT {} FROM posts WHERE id = ?1", Post::COLUMNS),
        params![id],
        Post::from_row,
    )
    .optional()
}

/// Newest posts first. With a cursor, only posts created strictly before it.
pub fn list_posts(
    conn: &Connection,
    limit: usize,
    before: Option<&str>,
) -> rusqlite::Result<Vec<Post>> {
    let limit = limit as i64;
    let mut stmt;
    let rows = match before {
        Some(cursor) => {
            stmt = conn.prepare(&format!(
                "SELECT {} FROM posts WHERE created_at < ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
                Post::COLUMNS
            ))?;
            stmt.query_map(params![cursor, limit], Post::from_row)?
        }
        None => {
            stmt = conn.prepare(&format!(
                "SELECT {} FROM posts ORDER BY created_at DESC, id DESC LIMIT ?1",
                Post::COLUMNS
            ))?;
            stmt.query_map(params![limit], Post::from_row)?
        }
    };
    rows.collect()
}

/// Update title and text. Only the creator may edit; returns None otherwise.
pub fn update_post(
    conn: &Connection,
    id: i64,
    creator_id: i64,
    title: &str,
    text: &str,
) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!(
            "UPDATE posts
             SET title = ?1, text = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?3 AND creator_id = ?4
             RETURNING {}",
            Post::COLUMNS
        ),
        params![title, text, id, creator_id],
        Post::from_row,
    )
    .optional()
}

/// Delete a post owned by `creator_id`. Its votes go with it (ON DELETE CASCADE).
pub fn delete_post(conn: &Connection, id: i64, creator_id: i64) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "DELETE FROM posts WHERE id = ?1 AND creator_id = ?2",
        params![id, creator_id],
    )?;
    Ok(rows > 0)
}
