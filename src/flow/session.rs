use crate::pipeline::SessionEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type SessionStore = Arc<dyn SessionRegistry>;

/// Registry of live sessions.
#[async_trait]
pub trait SessionRegistry: Send + Sync + Debug {
    /// Returns the handle for a session if it is still live.
    async fn get(&self, session_id: &str) -> Option<SessionHandle>;

    /// Registers a freshly created session.
    async fn insert(&self, handle: SessionHandle);

    /// Explicitly removes a session from the store.
    async fn remove(&self, session_id: &str);

    /// Clears all sessions (typically for tests or shutdown).
    fn clear(&self);
}

/// Cheap, cloneable handle to one session: the event-queue sender feeding the
/// session's event loop and the token that cancels its in-flight work.
///
/// The session's state and flow manager live inside the loop task; a handle
/// never outlives the ability to observe the session closing.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: String,
    started_at: DateTime<Utc>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(id: &str, events: mpsc::Sender<SessionEvent>, cancel: CancellationToken) -> Self {
        Self {
            id: id.to_string(),
            started_at: Utc::now(),
            events,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Enqueues an event for the session loop; events arriving after the loop
    /// closed are dropped.
    pub async fn send(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("session {}: event dropped, loop already closed", self.id);
        }
    }

    /// Cancels all in-flight generation and synthesis work for this session.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the session has terminated.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug)]
pub struct InMemorySessionStore {
    cache: Cache<String, SessionHandle>,
}

impl InMemorySessionStore {
    /// Creates a store evicting idle sessions after `ttl_secs`. Eviction only
    /// drops the handle; a live loop still terminates via its own token.
    pub fn new(ttl_secs: u64) -> Arc<Self> {
        let cache = Cache::builder()
            .time_to_idle(Duration::from_secs(ttl_secs))
            .eviction_listener(|key: Arc<String>, _value: SessionHandle, cause| {
                info!("session evicted: key={}, cause={:?}", key, cause);
            })
            .build();
        Arc::new(Self { cache })
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.cache.get(session_id).await
    }

    async fn insert(&self, handle: SessionHandle) {
        self.cache.insert(handle.id().to_string(), handle).await;
    }

    async fn remove(&self, session_id: &str) {
        self.cache.invalidate(session_id).await;
    }

    fn clear(&self) {
        self.cache.invalidate_all();
    }
}
