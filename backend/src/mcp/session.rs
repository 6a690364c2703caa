//! MCP session management.
//!
//! Manages session lifecycle for MCP Streamable HTTP connections.
//! Sessions are identified by server-generated UUIDs and bind one caller's
//! credential to its transport.
//!
//! The store is the only process-wide mutable structure in the gateway.
//! Every mutation runs under a synchronous lock that is never held across
//! an `.await`, so each create/touch/swap/remove/sweep is one atomic step.

use chrono::{DateTime, Utc};
use labgate_types::SessionInfo;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::transport::Transport;
use crate::auth::Credential;

#[derive(Debug, Clone, Copy)]
struct Activity {
    instant: Instant,
    at: DateTime<Utc>,
}

impl Activity {
    fn now() -> Self {
        Self {
            instant: Instant::now(),
            at: Utc::now(),
        }
    }
}

/// An MCP session.
#[derive(Debug)]
pub struct Session {
    id: String,
    credential: RwLock<Credential>,
    created_at: DateTime<Utc>,
    activity: Mutex<Activity>,
    transport: Arc<Transport>,
}

impl Session {
    fn new(id: String, credential: Credential) -> Self {
        let activity = Activity::now();
        Self {
            transport: Transport::new(id.clone()),
            id,
            credential: RwLock::new(credential),
            created_at: activity.at,
            activity: Mutex::new(activity),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the credential currently bound to the session.
    pub fn credential(&self) -> Credential {
        self.credential.read().clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.activity.lock().at
    }

    /// How long the session has been idle as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.activity.lock().instant)
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Operator view; never includes the credential.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity(),
            connected: self.transport.is_connected(),
        }
    }

    fn touch_at(&self, instant: Instant) {
        let mut activity = self.activity.lock();
        if instant > activity.instant {
            activity.instant = instant;
        }
        activity.at = Utc::now();
    }
}

/// Manager for MCP sessions.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    /// Set by `close_all`; no session is created afterwards.
    closing: Arc<AtomicBool>,
}

impl SessionStore {
    /// Create a new session store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session bound to `credential`.
    ///
    /// The id is generated here and never taken from the caller. Returns
    /// `None` once the store has started closing.
    pub fn create(&self, credential: Credential) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        if self.closing.load(Ordering::Acquire) {
            debug!("Refusing new MCP session during shutdown");
            return None;
        }
        loop {
            let id = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = sessions.entry(id.clone()) {
                let session = Arc::new(Session::new(id.clone(), credential));
                slot.insert(Arc::clone(&session));
                info!("Created MCP session: {}", id);
                return Some(session);
            }
        }
    }

    /// Get a session by ID.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Check if a session exists.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Record activity on a session.
    pub fn touch(&self, id: &str) -> bool {
        self.touch_at(id, Instant::now())
    }

    /// Record activity on a session at an explicit instant.
    pub fn touch_at(&self, id: &str, instant: Instant) -> bool {
        match self.sessions.read().get(id) {
            Some(session) => {
                session.touch_at(instant);
                true
            }
            None => false,
        }
    }

    /// Replace a session's credential. Callers must have validated it first.
    pub fn swap_credential(&self, id: &str, credential: Credential) -> bool {
        match self.sessions.read().get(id) {
            Some(session) => {
                *session.credential.write() = credential;
                debug!("MCP session {} credential replaced", id);
                true
            }
            None => false,
        }
    }

    /// Remove a session and close its transport.
    ///
    /// Returns `None` if the session was already gone.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id)?;
        removed.transport.close();
        info!("Terminated MCP session: {}", id);
        Some(removed)
    }

    /// Remove every session idle for longer than `timeout` as of `now`.
    ///
    /// Returns the ids of the removed sessions.
    pub fn sweep(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let mut expired = Vec::new();
        {
            let mut sessions = self.sessions.write();
            sessions.retain(|_, session| {
                let keep = session.idle_for(now) <= timeout;
                if !keep {
                    expired.push(Arc::clone(session));
                }
                keep
            });
        }

        expired
            .into_iter()
            .map(|session| {
                info!(
                    "Cleaning up idle MCP session: {} (idle: {}s)",
                    session.id,
                    session.idle_for(now).as_secs()
                );
                session.transport.close();
                session.id.clone()
            })
            .collect()
    }

    /// Remove every session, giving each transport up to `grace` to finish
    /// in-flight calls. Used at shutdown; later `create` calls are refused.
    pub async fn close_all(&self, grace: Duration) -> usize {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write();
            self.closing.store(true, Ordering::Release);
            sessions.drain().map(|(_, session)| session).collect()
        };
        let count = drained.len();

        futures::future::join_all(drained.into_iter().map(|session| async move {
            session.transport.shutdown(grace).await;
            session.transport.close();
            debug!("Closed MCP session {} at shutdown", session.id);
        }))
        .await;

        count
    }

    /// Get the number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operator view of every session, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self.sessions.read().values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }
}

/// Periodically sweep idle sessions until `cancel` fires.
pub fn spawn_sweeper(
    store: SessionStore,
    interval: Duration,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Session sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let removed = store.sweep(Instant::now(), idle_timeout);
                    if !removed.is_empty() {
                        info!("Swept {} idle MCP session(s)", removed.len());
                    }
                }
            }
        }
    })
}
