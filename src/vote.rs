//! The vote ledger: the `votes` table plus the `posts.points` aggregate.
//!
//! This module is the only writer of either. Every change runs inside one
//! transaction that reads the existing vote, writes the vote row and bumps the
//! post's points by the matching delta, so `points == SUM(votes.value)` holds
//! after every commit.

use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};

use crate::config::VotingConfig;
use crate::db;
use crate::error::StoreError;
use crate::state::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum VoteError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Invalid vote value {0}, expected 1 or -1")]
    InvalidValue(i32),

    #[error("Post {0} not found")]
    PostNotFound(i64),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<rusqlite::Error> for VoteError {
    fn from(e: rusqlite::Error) -> Self {
        VoteError::Storage(e.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    pub fn as_i32(self) -> i32 {
        match self {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
        }
    }

    fn from_stored(value: i32) -> Self {
        if value == -1 {
            VoteValue::Down
        } else {
            VoteValue::Up
        }
    }
}

/// How raw client values are turned into a [`VoteValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VotePolicy {
    /// -1 is a down-vote, anything else is an up-vote.
    #[default]
    Lenient,
    /// Only 1 and -1 are accepted.
    Strict,
}

impl VotePolicy {
    pub fn from_config(config: &VotingConfig) -> Self {
        if config.strict {
            VotePolicy::Strict
        } else {
            VotePolicy::Lenient
        }
    }

    pub fn normalize(self, raw: i32) -> Result<VoteValue, VoteError> {
        match (self, raw) {
            (_, -1) => Ok(VoteValue::Down),
            (VotePolicy::Lenient, _) | (VotePolicy::Strict, 1) => Ok(VoteValue::Up),
            (VotePolicy::Strict, other) => Err(VoteError::InvalidValue(other)),
        }
    }
}

/// What a vote did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// First vote by this user on this post
    Inserted(VoteValue),
    /// Existing vote changed sign
    Flipped(VoteValue),
    /// Same vote cast again
    Unchanged(VoteValue),
}

impl VoteOutcome {
    /// Change applied to `posts.points`.
    pub fn points_delta(&self) -> i64 {
        match *self {
            VoteOutcome::Inserted(v) => v.as_i32() as i64,
            // removes the old contribution (-v) and adds the new one (v)
            VoteOutcome::Flipped(v) => 2 * v.as_i32() as i64,
            VoteOutcome::Unchanged(_) => 0,
        }
    }
}

/// Apply one vote inside the caller's transaction. Nothing is committed here;
/// on error the caller drops `tx` and everything rolls back.
pub fn apply_vote(
    tx: &Transaction<'_>,
    post_id: i64,
    user_id: i64,
    value: VoteValue,
) -> Result<VoteOutcome, VoteError> {
    let post_exists = tx
        .query_row("SELECT 1 FROM posts WHERE id = ?1", params![post_id], |_| Ok(()))
        .optional()?
        .is_some();
    if !post_exists {
        return Err(VoteError::PostNotFound(post_id));
    }

    let existing: Option<i32> = tx
        .query_row(
            "SELECT value FROM votes WHERE user_id = ?1 AND post_id = ?2",
            params![user_id, post_id],
            |row| row.get(0),
        )
        .optional()?;

    let outcome = match existing.map(VoteValue::from_stored) {
        None => {
            tx.execute(
                "INSERT INTO votes (user_id, post_id, value) VALUES (?1, ?2, ?3)",
                params![user_id, post_id, value.as_i32()],
            )?;
            VoteOutcome::Inserted(value)
        }
        Some(previous) if previous == value => return Ok(VoteOutcome::Unchanged(value)),
        Some(_) => {
            tx.execute(
                "UPDATE votes SET value = ?1 WHERE user_id = ?2 AND post_id = ?3",
                params![value.as_i32(), user_id, post_id],
            )?;
            VoteOutcome::Flipped(value)
        }
    };

    tx.execute(
        "UPDATE posts SET points = points + ?1 WHERE id = ?2",
        params![outcome.points_delta(), post_id],
    )?;

    Ok(outcome)
}

/// Entry point used by the API: validates the caller and the value, then runs
/// [`apply_vote`] in its own write transaction.
#[derive(Clone)]
pub struct VoteLedger {
    db: DbPool,
    policy: VotePolicy,
}

impl VoteLedger {
    pub fn new(db: DbPool, policy: VotePolicy) -> Self {
        Self { db, policy }
    }

    pub async fn cast(
        &self,
        post_id: i64,
        user_id: Option<i64>,
        raw_value: i32,
    ) -> Result<VoteOutcome, VoteError> {
        let user_id = user_id.ok_or(VoteError::Unauthenticated)?;
        let value = self.policy.normalize(raw_value)?;

        let outcome = db::with_conn(&self.db, move |conn| {
            // IMMEDIATE takes the write lock up front, so two votes on the same
            // pair cannot both read the old value before either writes.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let outcome = apply_vote(&tx, post_id, user_id, value)?;
            tx.commit()?;
            Ok::<_, VoteError>(outcome)
        })
        .await?;

        tracing::debug!(
            post_id,
            user_id,
            value = value.as_i32(),
            delta = outcome.points_delta(),
            "Applied vote: {:?}",
            outcome
        );

        Ok(outcome)
    }
}
