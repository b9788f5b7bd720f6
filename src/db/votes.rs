//! Read side of the vote table. Writes go through [`crate::vote`].

use rusqlite::{params_from_iter, Connection};

use super::models::Vote;

/// Fetch the votes for the given `(post_id, user_id)` pairs. Pairs without a
/// vote are simply absent from the result.
pub fn find_many(conn: &Connection, keys: &[(i64, i64)]) -> rusqlite::Result<Vec<Vote>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let tuples = vec!["(?, ?)"; keys.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT user_id, post_id, value FROM votes
         WHERE (post_id, user_id) IN (VALUES {})",
        tuples
    ))?;
    let flat = keys.iter().flat_map(|(post_id, user_id)| [*post_id, *user_id]);
    let votes = stmt
        .query_map(params_from_iter(flat), Vote::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(votes)
}

/// Sum of vote values for a post. This is what `posts.points` must equal.
pub fn tally(conn: &Connection, post_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(value), 0) FROM votes WHERE post_id = ?1",
        [post_id],
        |row| row.get(0),
    )
}
