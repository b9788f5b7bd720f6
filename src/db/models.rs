use chrono::{DateTime, Utc};
use rusqlite::Row;

use super::parse_timestamp;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub const COLUMNS: &'static str = "id, username, email, password_hash, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            created_at: parse_timestamp(&row.get::<_, String>(4)?),
            updated_at: parse_timestamp(&row.get::<_, String>(5)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub text: String,
    /// Sum of all vote values for this post
    pub points: i64,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub const COLUMNS: &'static str =
        "id, title, text, points, creator_id, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Post {
            id: row.get(0)?,
            title: row.get(1)?,
            text: row.get(2)?,
            points: row.get(3)?,
            creator_id: row.get(4)?,
            created_at: parse_timestamp(&row.get::<_, String>(5)?),
            updated_at: parse_timestamp(&row.get::<_, String>(6)?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    pub user_id: i64,
    pub post_id: i64,
    /// Either 1 or -1
    pub value: i32,
}

impl Vote {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Vote {
            user_id: row.get(0)?,
            post_id: row.get(1)?,
            value: row.get(2)?,
        })
    }
}
