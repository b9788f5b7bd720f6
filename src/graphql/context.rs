use async_graphql::Context;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::error::AppError;
use crate::loader::Loaders;
use crate::mail::DynMailer;
use crate::state::{AppState, DbPool};
use crate::vote::{VoteLedger, VotePolicy};

/// What the HTTP layer has to do with the session cookie once the request is
/// done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Started(String),
    Ended,
}

#[derive(Default)]
struct SessionInner {
    user_id: Option<i64>,
    token: Option<String>,
    change: Option<SessionChange>,
}

/// The caller's session for one request. Clones share state, so the route
/// handler keeps a clone and reads back logins and logouts after execution.
#[derive(Clone, Default)]
pub struct SessionState {
    inner: Arc<Mutex<SessionInner>>,
}

impl SessionState {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user_id: i64, token: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                user_id: Some(user_id),
                token: Some(token),
                change: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn user_id(&self) -> Option<i64> {
        self.lock().user_id
    }

    pub fn require_user(&self) -> Result<i64, AppError> {
        self.user_id().ok_or(AppError::Unauthorized)
    }

    /// Log in: later resolvers in this request see the new user.
    pub fn start(&self, user_id: i64, token: String) {
        let mut inner = self.lock();
        inner.user_id = Some(user_id);
        inner.token = Some(token.clone());
        inner.change = Some(SessionChange::Started(token));
    }

    /// Log out. Returns the token that was in use, if any.
    pub fn end(&self) -> Option<String> {
        let mut inner = self.lock();
        inner.user_id = None;
        inner.change = Some(SessionChange::Ended);
        inner.token.take()
    }

    pub fn take_change(&self) -> Option<SessionChange> {
        self.lock().change.take()
    }
}

/// Everything a resolver may use. One per GraphQL request; the loaders'
/// memo lives and dies with it.
pub struct RequestContext {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub session: SessionState,
    pub loaders: Loaders,
    pub ledger: VoteLedger,
    pub mailer: DynMailer,
}

impl RequestContext {
    pub fn new(db: DbPool, config: Arc<Config>, mailer: DynMailer, session: SessionState) -> Self {
        let loaders = Loaders::new(&db, config.loader.batch_delay());
        let ledger = VoteLedger::new(db.clone(), VotePolicy::from_config(&config.voting));
        Self {
            db,
            config,
            session,
            loaders,
            ledger,
            mailer,
        }
    }

    pub fn from_state(state: &AppState, session: SessionState) -> Self {
        Self::new(
            state.db.clone(),
            state.config.clone(),
            state.mailer.clone(),
            session,
        )
    }
}

pub fn request_context<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a RequestContext> {
    ctx.data::<RequestContext>()
}
