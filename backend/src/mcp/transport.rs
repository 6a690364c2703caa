//! Per-session transport.
//!
//! A [`Transport`] is owned by exactly one session. It tracks the calls in
//! flight on that session, owns the broadcast channel behind the server push
//! stream, and guarantees that at most one push stream is live at a time.

use labgate_types::JsonRpcNotification;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

/// Buffered server-initiated messages per session.
const EVENT_BUFFER: usize = 100;

/// Events that can be sent to MCP clients via SSE.
#[derive(Clone, Debug)]
pub enum McpEvent {
    /// A JSON-RPC message to send to the client.
    JsonRpc(String),
}

struct StreamSlot {
    generation: u64,
    cancel: CancellationToken,
}

/// Channel carrying JSON-RPC calls and pushed events for one session.
pub struct Transport {
    session_id: String,
    events: broadcast::Sender<McpEvent>,
    closed: CancellationToken,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    stream: Mutex<Option<StreamSlot>>,
    next_generation: AtomicU64,
}

impl Transport {
    pub fn new(session_id: impl Into<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            session_id: session_id.into(),
            events,
            closed: CancellationToken::new(),
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            stream: Mutex::new(None),
            next_generation: AtomicU64::new(0),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Register a call as in flight. The returned guard unregisters it when
    /// dropped, whether the call succeeded, failed or panicked.
    pub fn begin_call(self: &Arc<Self>) -> Result<CallGuard> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = CallGuard {
            transport: Arc::clone(self),
        };
        if !self.accepting.load(Ordering::SeqCst) || self.closed.is_cancelled() {
            return Err(GatewayError::SessionNotFound);
        }
        Ok(guard)
    }

    /// Number of calls currently being handled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Claim the push stream slot.
    ///
    /// Fails with [`GatewayError::StreamConflict`] while another stream is live.
    pub fn open_stream(self: &Arc<Self>) -> Result<StreamLease> {
        if self.closed.is_cancelled() {
            return Err(GatewayError::SessionNotFound);
        }
        let mut slot = self.stream.lock();
        if slot.is_some() {
            return Err(GatewayError::StreamConflict);
        }
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let cancel = self.closed.child_token();
        *slot = Some(StreamSlot {
            generation,
            cancel: cancel.clone(),
        });
        info!("MCP: Push stream opened for session {}", self.session_id);
        Ok(StreamLease {
            transport: Arc::clone(self),
            generation,
            cancel,
        })
    }

    /// Whether a push stream is currently attached.
    pub fn is_connected(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Subscribe to session events for SSE streaming.
    pub fn subscribe(&self) -> broadcast::Receiver<McpEvent> {
        self.events.subscribe()
    }

    /// Push a notification to the live stream, if any.
    pub fn notify(&self, notification: &JsonRpcNotification) -> bool {
        match serde_json::to_string(notification) {
            Ok(json) => self.events.send(McpEvent::JsonRpc(json)).is_ok(),
            Err(e) => {
                warn!("Failed to serialize notification: {}", e);
                false
            }
        }
    }

    /// Orderly shutdown handshake: refuse new calls, tell the push stream we
    /// are closing, then wait up to `grace` for in-flight calls to finish.
    ///
    /// Returns the number of calls still running when the grace period ended.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.accepting.store(false, Ordering::SeqCst);
        self.notify(&JsonRpcNotification::new(
            "notifications/session/closing",
            serde_json::json!({ "sessionId": self.session_id }),
        ));

        let drained = tokio::time::timeout(grace, self.wait_idle()).await.is_ok();
        let remaining = self.in_flight();
        if !drained {
            warn!(
                "MCP: Session {} closing with {} call(s) still in flight",
                self.session_id, remaining
            );
        }
        remaining
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Close the transport, ending any live push stream.
    ///
    /// Idempotent; returns `true` only for the call that actually closed it.
    /// Called by the session store when the owning session is removed.
    pub(crate) fn close(&self) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        if self.closed.is_cancelled() {
            return false;
        }
        self.closed.cancel();
        debug!("MCP: Transport closed for session {}", self.session_id);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn release_stream(&self, generation: u64) {
        let mut slot = self.stream.lock();
        if slot.as_ref().map(|s| s.generation) == Some(generation) {
            if let Some(released) = slot.take() {
                released.cancel.cancel();
            }
            info!("MCP: Push stream closed for session {}", self.session_id);
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("session_id", &self.session_id)
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Marks one call as in flight on a transport.
pub struct CallGuard {
    transport: Arc<Transport>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.transport.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.transport.idle.notify_waiters();
        }
    }
}

/// Exclusive claim on a transport's push stream.
///
/// Teardown happens on whichever comes first: the lease being dropped
/// (client disconnect), [`StreamLease::end`] (stream error), or the
/// transport closing (session removal). Later triggers are no-ops.
pub struct StreamLease {
    transport: Arc<Transport>,
    generation: u64,
    cancel: CancellationToken,
}

impl StreamLease {
    /// Resolves once the stream must end.
    pub fn cancelled(&self) -> WaitForCancellationFutureOwned {
        self.cancel.clone().cancelled_owned()
    }

    /// End the stream from the server side.
    pub fn end(&self) {
        self.transport.release_stream(self.generation);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.transport.release_stream(self.generation);
    }
}
