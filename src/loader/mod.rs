//! Request-scoped batch loading.
//!
//! A [`BatchLoader`] collects every `load` issued during one scheduling tick,
//! hands the distinct keys to a single [`BatchFn::fetch_many`] call, and then
//! gives each caller the value for its own key (or `None`). Results are
//! memoized per loader, so a loader must be created per request and dropped
//! with it.
//!
//! Each batch window goes through:
//!
//! ```text
//! Accumulating --(dispatcher wakes)--> Dispatched --> Resolved | Failed
//! ```
//!
//! A load issued after a window has been dispatched opens a new window.

mod users;
mod votes;

pub use users::UserFetcher;
pub use votes::{VoteFetcher, VoteKey};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::StoreError;
use crate::state::DbPool;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    #[error("Batch fetch failed: {0}")]
    Fetch(Arc<StoreError>),

    #[error("Batch dispatcher stopped before resolving")]
    Cancelled,
}

/// Bulk lookup used by a [`BatchLoader`].
#[async_trait]
pub trait BatchFn: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    /// Fetch all of `keys` (distinct, in first-requested order). Keys without
    /// a record are left out of the map. The order of the underlying query is
    /// irrelevant: callers are matched by key.
    async fn fetch_many(
        &self,
        keys: &[Self::Key],
    ) -> Result<HashMap<Self::Key, Self::Value>, StoreError>;
}

type BatchResult<K, V> = Result<Arc<HashMap<K, V>>, LoadError>;
type BatchHandle<K, V> = Shared<BoxFuture<'static, BatchResult<K, V>>>;

/// The batch currently accepting keys.
struct Window<K, V> {
    keys: Vec<K>,
    queued: HashSet<K>,
    handle: BatchHandle<K, V>,
    resolve: oneshot::Sender<BatchResult<K, V>>,
}

struct LoaderState<K, V> {
    memo: HashMap<K, BatchHandle<K, V>>,
    window: Option<Window<K, V>>,
}

struct Inner<F: BatchFn> {
    fetcher: F,
    delay: Duration,
    state: Mutex<LoaderState<F::Key, F::Value>>,
}

impl<F: BatchFn> Inner<F> {
    fn lock(&self) -> MutexGuard<'_, LoaderState<F::Key, F::Value>> {
        // The state is only touched in short synchronous sections, so a
        // poisoned lock still holds consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct BatchLoader<F: BatchFn> {
    inner: Arc<Inner<F>>,
}

impl<F: BatchFn> Clone for BatchLoader<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: BatchFn> BatchLoader<F> {
    /// Loader whose windows close as soon as the dispatcher task gets polled,
    /// i.e. after the current task yields.
    pub fn new(fetcher: F) -> Self {
        Self::with_delay(fetcher, Duration::ZERO)
    }

    /// Loader whose windows stay open for `delay` after the first key. Useful
    /// on a multi-threaded runtime where the dispatcher may otherwise run
    /// before sibling resolvers have issued their loads.
    pub fn with_delay(fetcher: F, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                delay,
                state: Mutex::new(LoaderState {
                    memo: HashMap::new(),
                    window: None,
                }),
            }),
        }
    }

    /// Load one value. `Ok(None)` means the store has no record for `key`.
    pub async fn load(&self, key: F::Key) -> Result<Option<F::Value>, LoadError> {
        let handle = self.enqueue(key.clone());
        let values = handle.await?;
        Ok(values.get(&key).cloned())
    }

    /// Forget a memoized result so the next load fetches again.
    pub fn clear(&self, key: &F::Key) {
        self.inner.lock().memo.remove(key);
    }

    fn enqueue(&self, key: F::Key) -> BatchHandle<F::Key, F::Value> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        if let Some(handle) = state.memo.get(&key) {
            return handle.clone();
        }

        let handle = match state.window.as_mut() {
            Some(window) => {
                // a key cleared while its window is open is already queued
                if window.queued.insert(key.clone()) {
                    window.keys.push(key.clone());
                }
                window.handle.clone()
            }
            None => {
                let (resolve, rx) = oneshot::channel();
                let handle = rx
                    .map(|received| received.unwrap_or(Err(LoadError::Cancelled)))
                    .boxed()
                    .shared();
                state.window = Some(Window {
                    keys: vec![key.clone()],
                    queued: HashSet::from([key.clone()]),
                    handle: handle.clone(),
                    resolve,
                });
                tokio::spawn(dispatch(self.inner.clone()));
                handle
            }
        };

        state.memo.insert(key, handle.clone());
        handle
    }
}

async fn dispatch<F: BatchFn>(inner: Arc<Inner<F>>) {
    if inner.delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(inner.delay).await;
    }

    let window = {
        let mut state = inner.lock();
        state.window.take()
    };
    let Some(window) = window else {
        return;
    };

    tracing::trace!(keys = window.keys.len(), "Dispatching batch");

    let result = match inner.fetcher.fetch_many(&window.keys).await {
        Ok(values) => Ok(Arc::new(values)),
        Err(e) => {
            tracing::warn!(keys = window.keys.len(), "Batch fetch failed: {}", e);
            // Failed keys are not memoized; a later load fetches them again.
            // Entries replaced by a newer window after a clear are kept.
            let mut state = inner.lock();
            for key in &window.keys {
                if state
                    .memo
                    .get(key)
                    .is_some_and(|handle| Shared::ptr_eq(handle, &window.handle))
                {
                    state.memo.remove(key);
                }
            }
            Err(LoadError::Fetch(Arc::new(e)))
        }
    };

    // Every waiter may already be gone; nothing to do then.
    let _ = window.resolve.send(result);
}

/// The loaders available to one GraphQL request.
#[derive(Clone)]
pub struct Loaders {
    pub users: BatchLoader<UserFetcher>,
    pub votes: BatchLoader<VoteFetcher>,
}

impl Loaders {
    pub fn new(db: &DbPool, delay: Duration) -> Self {
        Self {
            users: BatchLoader::with_delay(UserFetcher::new(db.clone()), delay),
            votes: BatchLoader::with_delay(VoteFetcher::new(db.clone()), delay),
        }
    }
}
