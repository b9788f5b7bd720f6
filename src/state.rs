use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::graphql::ForumSchema;
use crate::mail::DynMailer;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub mailer: DynMailer,
    pub graphql_schema: ForumSchema,
}

impl AppState {
    pub fn new(db: DbPool, config: Config, mailer: DynMailer) -> Self {
        Self {
            db,
            config: Arc::new(config),
            mailer,
            graphql_schema: crate::graphql::build_schema(),
        }
    }
}
