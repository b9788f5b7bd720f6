use async_trait::async_trait;
use std::collections::HashMap;

use super::BatchFn;
use crate::db::{self, models::User, users};
use crate::error::StoreError;
use crate::state::DbPool;

/// Users by id, used to resolve `Post.creator`.
pub struct UserFetcher {
    db: DbPool,
}

impl UserFetcher {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BatchFn for UserFetcher {
    type Key = i64;
    type Value = User;

    async fn fetch_many(&self, ids: &[i64]) -> Result<HashMap<i64, User>, StoreError> {
        let ids = ids.to_vec();
        db::with_conn(&self.db, move |conn| {
            let found = users::find_many(conn, &ids)?;
            Ok::<_, StoreError>(found.into_iter().map(|u| (u.id, u)).collect())
        })
        .await
    }
}
