use async_trait::async_trait;
use std::collections::HashMap;

use super::BatchFn;
use crate::db::{self, models::Vote, votes};
use crate::error::StoreError;
use crate::state::DbPool;

/// Identity of a vote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoteKey {
    pub post_id: i64,
    pub user_id: i64,
}

impl From<&Vote> for VoteKey {
    fn from(vote: &Vote) -> Self {
        VoteKey {
            post_id: vote.post_id,
            user_id: vote.user_id,
        }
    }
}

/// A user's vote on a post, used to resolve `Post.voteStatus`.
pub struct VoteFetcher {
    db: DbPool,
}

impl VoteFetcher {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BatchFn for VoteFetcher {
    type Key = VoteKey;
    type Value = Vote;

    async fn fetch_many(&self, keys: &[VoteKey]) -> Result<HashMap<VoteKey, Vote>, StoreError> {
        let pairs: Vec<(i64, i64)> = keys.iter().map(|k| (k.post_id, k.user_id)).collect();
        db::with_conn(&self.db, move |conn| {
            let found = votes::find_many(conn, &pairs)?;
            Ok::<_, StoreError>(found.into_iter().map(|v| (VoteKey::from(&v), v)).collect())
        })
        .await
    }
}
