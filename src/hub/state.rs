//! The Connection data record (C3) and the per-session ProcessBuffer,
//! owned exclusively by the [`super::Hub`] (spec §3, §5's shared-resource
//! policy).

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::error::GatewayError;
use crate::normalize::UiMessage;
use crate::ws::WsWriter;

/// Connection lifecycle state (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Initializing,
    Ready,
    Disconnected,
}

/// Either outcome an RPC can resolve to (§3, PendingResult).
#[derive(Debug, Clone)]
pub enum PendingOutcome {
    Completed(Value),
    Failed { code: String, message: String },
}

#[derive(Debug, Clone)]
pub struct PendingResult {
    pub outcome: PendingOutcome,
    pub updated_at: Instant,
}

/// Mutable fields of a Connection, guarded by one lock so every mutation
/// (heartbeat touch, session bookkeeping, pending-result cache) is
/// atomic with respect to the others.
#[derive(Debug)]
struct ConnectionMutState {
    org_id: Option<String>,
    status: ConnectionStatus,
    last_heartbeat_at: Instant,
    active_sessions: HashSet<String>,
    pending_results: HashMap<String, PendingResult>,
}

/// One live (or recently live) link from an execution plane (§3).
///
/// Outbound writes go through a dedicated per-connection task reached via
/// `writer_tx`, giving the connection a single writer (§9) so concurrent
/// callers can never interleave partial frames.
#[derive(Debug)]
pub struct Connection {
    pub user_id: String,
    writer_tx: mpsc::UnboundedSender<Message>,
    writer_task: JoinHandle<()>,
    state: Mutex<ConnectionMutState>,
}

impl Connection {
    /// Spawn the dedicated writer task over `writer` and wrap it as a
    /// fresh `initializing` connection.
    pub fn spawn(user_id: String, mut writer: WsWriter) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let result = match message {
                    Message::Text(text) => writer.send_text(&text).await,
                    Message::Close(frame) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1000, String::new()));
                        writer.send_close(code, &reason).await
                    }
                    _ => Ok(()),
                };
                if let Err(err) = result {
                    log::debug!("connection writer task exiting after send error: {err}");
                    break;
                }
            }
            let _ = writer.close().await;
        });

        Self {
            user_id,
            writer_tx: tx,
            writer_task,
            state: Mutex::new(ConnectionMutState {
                org_id: None,
                status: ConnectionStatus::Initializing,
                last_heartbeat_at: Instant::now(),
                active_sessions: HashSet::new(),
                pending_results: HashMap::new(),
            }),
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.state.lock().await.status
    }

    pub async fn set_status(&self, status: ConnectionStatus) {
        self.state.lock().await.status = status;
    }

    pub async fn mark_ready(&self, org_id: String) {
        let mut state = self.state.lock().await;
        state.org_id = Some(org_id);
        state.status = ConnectionStatus::Ready;
    }

    pub async fn org_id(&self) -> Option<String> {
        self.state.lock().await.org_id.clone()
    }

    /// Record a heartbeat, enforcing monotonicity (§3 invariant b).
    pub async fn touch_heartbeat(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if now > state.last_heartbeat_at {
            state.last_heartbeat_at = now;
        }
    }

    pub async fn seconds_since_heartbeat(&self) -> f64 {
        let state = self.state.lock().await;
        state.last_heartbeat_at.elapsed().as_secs_f64()
    }

    pub async fn replace_active_sessions(&self, sessions: HashSet<String>) {
        self.state.lock().await.active_sessions = sessions;
    }

    pub async fn active_sessions(&self) -> HashSet<String> {
        self.state.lock().await.active_sessions.clone()
    }

    /// Cache an RPC outcome under `request_id`, evicting `evict_batch`
    /// oldest-`updated_at` entries whenever the cache exceeds `cap` (§4.5).
    pub async fn cache_pending_result(
        &self,
        request_id: String,
        outcome: PendingOutcome,
        cap: usize,
        evict_batch: usize,
    ) {
        let mut state = self.state.lock().await;
        state.pending_results.insert(
            request_id,
            PendingResult {
                outcome,
                updated_at: Instant::now(),
            },
        );

        if state.pending_results.len() > cap {
            let mut entries: Vec<(String, Instant)> = state
                .pending_results
                .iter()
                .map(|(id, result)| (id.clone(), result.updated_at))
                .collect();
            entries.sort_by_key(|(_, updated_at)| *updated_at);
            for (id, _) in entries.into_iter().take(evict_batch) {
                state.pending_results.remove(&id);
            }
        }
    }

    pub async fn pending_result(&self, request_id: &str) -> Option<PendingResult> {
        self.state.lock().await.pending_results.get(request_id).cloned()
    }

    pub async fn pending_result_count(&self) -> usize {
        self.state.lock().await.pending_results.len()
    }

    /// Queue a JSON frame for the writer task to send. Fails if the
    /// connection is not `ready` or the writer task has already exited.
    pub async fn send_json(&self, value: &Value) -> Result<(), GatewayError> {
        if self.status().await != ConnectionStatus::Ready {
            return Err(GatewayError::NotReady(self.user_id.clone()));
        }
        let text = serde_json::to_string(value).expect("JSON value is always serializable");
        self.writer_tx
            .send(Message::Text(text))
            .map_err(|_| GatewayError::WriterClosed)
    }

    /// Send a close frame and stop the writer task, regardless of current
    /// status (used by teardown paths where status has already flipped to
    /// `disconnected`).
    pub async fn close(&self, code: u16, reason: &str) {
        let frame = tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = self.writer_tx.send(Message::Close(Some(frame)));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.writer_task.abort();
    }
}

/// Per-session buffer of "process" UI messages (§3, ProcessBuffer),
/// bounded at `cap`; overflow drops the oldest entries by truncation.
#[derive(Debug, Default)]
pub struct ProcessBuffer {
    messages: Vec<UiMessage>,
}

impl ProcessBuffer {
    pub fn push(&mut self, message: UiMessage, cap: usize) {
        self.messages.push(message);
        if self.messages.len() > cap {
            let overflow = self.messages.len() - cap;
            self.messages.drain(0..overflow);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn into_messages(self) -> Vec<UiMessage> {
        self.messages
    }
}
