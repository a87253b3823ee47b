//! Connection Hub (C8) — the owner.
//!
//! Accepts incoming execution-plane WebSockets, authenticates them,
//! installs per-connection dispatch, holds the `userId → Connection` map,
//! and exposes the outbound send operations. A process-wide singleton
//! with an explicit `init`/`get` lifecycle (§4.3, §9) rather than an
//! implicit global — `get()` before `init()` is a programmer error and
//! panics loudly, same as the teacher's own hub accessor.
//!
//! # Architecture
//!
//! ```text
//!    execution plane  ⇄  [accept/handshake] ─► per-connection task ─► dispatch ─► {C5 | C6 | C7}
//!                                                     │                               │
//!                                                     │                               └─► C1 ─► C2 ─► SSE clients
//!                                                     └─► outbound: start_session | user_message | cancel | config_update
//!    [heartbeat] scans `connections` every tick ──► timeout ──► teardown_connection
//! ```

pub mod dispatch;
pub mod fire_and_forget;
pub mod handshake;
pub mod heartbeat;
pub mod ingest;
pub mod outbound;
pub mod request;
pub mod resume;
pub mod state;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::collaborators::Collaborators;
use crate::config::Config;
use state::{Connection, ProcessBuffer};

static HUB: OnceLock<Arc<Hub>> = OnceLock::new();

/// A point-in-time operational snapshot (§A of `SPEC_FULL.md`'s
/// supplemented features — not a metrics pipeline, just an accessor).
#[derive(Debug, Clone, Copy, Default)]
pub struct HubSnapshot {
    pub connection_count: usize,
    pub active_session_count: usize,
    pub buffered_process_event_count: usize,
}

pub struct Hub {
    pub config: Config,
    pub collaborators: Collaborators,
    connections: tokio::sync::RwLock<HashMap<String, Arc<Connection>>>,
    process_buffers: Mutex<HashMap<String, ProcessBuffer>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub").finish_non_exhaustive()
    }
}

impl Hub {
    #[must_use]
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            connections: tokio::sync::RwLock::new(HashMap::new()),
            process_buffers: Mutex::new(HashMap::new()),
            heartbeat_task: Mutex::new(None),
            accept_task: Mutex::new(None),
        }
    }

    /// Install `hub` as the process-wide singleton.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn init(hub: Hub) -> Arc<Hub> {
        let arc = Arc::new(hub);
        HUB.set(Arc::clone(&arc))
            .unwrap_or_else(|_| panic!("Hub::init called more than once"));
        arc
    }

    /// Fetch the process-wide singleton.
    ///
    /// # Panics
    ///
    /// Panics if called before [`Hub::init`].
    #[must_use]
    pub fn get() -> Arc<Hub> {
        Arc::clone(HUB.get().expect("Hub::get called before Hub::init"))
    }

    /// Bind the acceptor and start the heartbeat supervisor.
    pub async fn start(self: &Arc<Self>, listener: TcpListener) {
        let accept_hub = Arc::clone(self);
        let accept_task = tokio::spawn(async move {
            handshake::run_accept_loop(accept_hub, listener).await;
        });
        *self.accept_task.lock().await = Some(accept_task);

        let heartbeat_hub = Arc::clone(self);
        let heartbeat_task = tokio::spawn(async move {
            heartbeat::run_supervisor(heartbeat_hub).await;
        });
        *self.heartbeat_task.lock().await = Some(heartbeat_task);
    }

    /// Stop the heartbeat supervisor and close every socket, draining
    /// already-queued writes rather than aborting mid-write (graceful
    /// shutdown, supplemented feature B).
    pub async fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.heartbeat_task.lock().await.take() {
            task.abort();
        }

        let connections: Vec<Arc<Connection>> = {
            let map = self.connections.read().await;
            map.values().cloned().collect()
        };
        for connection in connections {
            connection.close(1001, "gateway shutting down").await;
        }
        // Give the per-connection writer tasks a short grace period to
        // flush the close frame before the process exits.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        self.connections.write().await.clear();
        self.process_buffers.lock().await.clear();
    }

    #[must_use]
    pub async fn snapshot(&self) -> HubSnapshot {
        let connections = self.connections.read().await;
        let mut active_session_count = 0;
        for connection in connections.values() {
            active_session_count += connection.active_sessions().await.len();
        }
        let buffers = self.process_buffers.lock().await;
        let buffered_process_event_count = buffers.values().map(ProcessBuffer::len).sum();

        HubSnapshot {
            connection_count: connections.len(),
            active_session_count,
            buffered_process_event_count,
        }
    }

    pub(crate) async fn connection_for(&self, user_id: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(user_id).cloned()
    }

    /// Insert `connection` under `user_id`, first tearing down any prior
    /// connection for that user (intentional supersession, §9).
    pub(crate) async fn insert_connection(&self, user_id: &str, connection: Arc<Connection>) {
        let previous = {
            let mut map = self.connections.write().await;
            map.insert(user_id.to_string(), connection)
        };
        if let Some(previous) = previous {
            log::info!("connection for user {user_id} superseded by a new one");
            self.teardown_superseded(user_id, &previous).await;
        }
    }

    async fn teardown_superseded(&self, user_id: &str, connection: &Arc<Connection>) {
        connection
            .set_status(state::ConnectionStatus::Disconnected)
            .await;
        for session_id in connection.active_sessions().await {
            if self.collaborators.sse.has_subscribers(&session_id).await {
                self.collaborators
                    .sse
                    .forward(
                        &session_id,
                        "error",
                        &serde_json::json!({
                            "code": "EXECUTION_PLANE_DISCONNECTED",
                            "message": "execution plane connection was superseded",
                        }),
                    )
                    .await;
                self.collaborators.sse.close_session(&session_id).await;
            }
        }
        connection.close(1000, "superseded by new connection").await;
        let _ = self.collaborators.vm_instances.mark_disconnected(user_id).await;
    }

    /// Remove `user_id`'s connection and mark it disconnected (§4.3
    /// teardown). Used for ordinary socket close, not for supersession
    /// (which replaces rather than just removing).
    pub(crate) async fn remove_connection(&self, user_id: &str) {
        let removed = self.connections.write().await.remove(user_id);
        if let Some(connection) = removed {
            connection
                .set_status(state::ConnectionStatus::Disconnected)
                .await;
        }
        let _ = self.collaborators.vm_instances.mark_disconnected(user_id).await;
    }

    /// Close a connection with the given WebSocket close code and tear it
    /// down, forwarding `EXECUTION_PLANE_DISCONNECTED` to every active
    /// session's SSE subscribers first (used by heartbeat timeout, §4.4).
    pub(crate) async fn close_and_remove(&self, user_id: &str, code: u16, reason: &str) {
        let Some(connection) = self.connection_for(user_id).await else {
            return;
        };
        connection
            .set_status(state::ConnectionStatus::Disconnected)
            .await;
        for session_id in connection.active_sessions().await {
            if self.collaborators.sse.has_subscribers(&session_id).await {
                self.collaborators
                    .sse
                    .forward(
                        &session_id,
                        "error",
                        &serde_json::json!({
                            "code": "EXECUTION_PLANE_DISCONNECTED",
                            "message": "execution plane connection disconnected",
                        }),
                    )
                    .await;
                self.collaborators.sse.close_session(&session_id).await;
            }
        }
        connection.close(code, reason).await;
        self.connections.write().await.remove(user_id);
        let _ = self.collaborators.vm_instances.mark_disconnected(user_id).await;
    }

    pub(crate) async fn take_process_buffer(&self, session_id: &str) -> Option<ProcessBuffer> {
        self.process_buffers.lock().await.remove(session_id)
    }

    pub(crate) async fn push_process_event(
        &self,
        session_id: &str,
        message: crate::normalize::UiMessage,
    ) {
        let mut buffers = self.process_buffers.lock().await;
        buffers
            .entry(session_id.to_string())
            .or_default()
            .push(message, self.config.process_buffer_cap);
    }

    pub(crate) async fn drop_process_buffer(&self, session_id: &str) {
        self.process_buffers.lock().await.remove(session_id);
    }

    #[cfg(test)]
    pub(crate) async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
