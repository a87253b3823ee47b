//! SSE Relay (C2).
//!
//! A per-session registry of subscribers with best-effort, at-most-once
//! delivery. `forward` never blocks a caller for longer than
//! [`WRITE_ATTEMPT_TIMEOUT`] per subscriber — a subscriber that fails or
//! is too slow is dropped rather than stalling the session, per §4.2 and
//! §5's "bounded write attempt" rule.
//!
//! Transport-agnostic by design: `SseWriter` is implemented by whatever
//! the HTTP-side collaborator uses to push bytes to a browser. This crate
//! never depends on a specific web framework (out of scope per spec §1).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

/// How long `forward` waits on a single subscriber's write before giving
/// up on it for this event.
const WRITE_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

/// One outbound SSE stream, as seen by the relay. Implemented by the
/// HTTP-side collaborator that actually owns the browser connection.
#[async_trait]
pub trait SseWriter: Send + Sync + std::fmt::Debug {
    /// Push one named SSE event with a JSON payload.
    async fn write_event(&self, event_name: &str, payload: &Value) -> anyhow::Result<()>;

    /// Close the underlying stream.
    async fn close(&self);
}

/// A registered subscriber (§3, SSESubscriber).
#[derive(Debug)]
struct Subscriber {
    id: Uuid,
    writer: Arc<dyn SseWriter>,
}

/// Per-session registry of subscribers, owned exclusively by the relay
/// (the hub never reaches into this map directly).
#[derive(Debug, Default)]
pub struct SseRelay {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl SseRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `writer` to `session_id`'s subscriber set. Returns the
    /// generated subscriber id (useful for tests and logging).
    pub async fn register(&self, session_id: &str, writer: Arc<dyn SseWriter>) -> Uuid {
        let id = Uuid::new_v4();
        let mut subscribers = self.subscribers.lock().await;
        subscribers
            .entry(session_id.to_string())
            .or_default()
            .push(Subscriber { id, writer });
        id
    }

    /// Best-effort write of `(event_name, payload)` to every active
    /// subscriber of `session_id`. A subscriber whose write fails or times
    /// out is removed from the set; remaining subscribers are unaffected.
    pub async fn forward(&self, session_id: &str, event_name: &str, payload: &Value) {
        // Copy-then-iterate: snapshot the writer handles, release the lock,
        // then perform the (possibly slow) writes outside it so a stalled
        // subscriber never blocks `register`/`closeSession` on other
        // sessions or a concurrent `forward`.
        let snapshot: Vec<Subscriber> = {
            let subscribers = self.subscribers.lock().await;
            subscribers
                .get(session_id)
                .map(|list| {
                    list.iter()
                        .map(|s| Subscriber {
                            id: s.id,
                            writer: Arc::clone(&s.writer),
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        if snapshot.is_empty() {
            return;
        }

        let mut dead = Vec::new();
        for subscriber in &snapshot {
            let attempt =
                tokio::time::timeout(WRITE_ATTEMPT_TIMEOUT, subscriber.writer.write_event(event_name, payload))
                    .await;
            match attempt {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::warn!("SSE subscriber {} write failed: {err}", subscriber.id);
                    dead.push(subscriber.id);
                }
                Err(_) => {
                    log::warn!("SSE subscriber {} write timed out", subscriber.id);
                    dead.push(subscriber.id);
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock().await;
            if let Some(list) = subscribers.get_mut(session_id) {
                list.retain(|s| !dead.contains(&s.id));
            }
        }
    }

    /// Close and deregister every subscriber for `session_id`.
    pub async fn close_session(&self, session_id: &str) {
        let removed = {
            let mut subscribers = self.subscribers.lock().await;
            subscribers.remove(session_id).unwrap_or_default()
        };
        for subscriber in removed {
            subscriber.writer.close().await;
        }
    }

    /// Whether `session_id` currently has at least one subscriber.
    pub async fn has_subscribers(&self, session_id: &str) -> bool {
        let subscribers = self.subscribers.lock().await;
        subscribers.get(session_id).is_some_and(|list| !list.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Default)]
    struct RecordingWriter {
        events: TokioMutex<Vec<(String, Value)>>,
        closed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SseWriter for RecordingWriter {
        async fn write_event(&self, event_name: &str, payload: &Value) -> anyhow::Result<()> {
            self.events
                .lock()
                .await
                .push((event_name.to_string(), payload.clone()));
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    struct FailingWriter;

    #[async_trait]
    impl SseWriter for FailingWriter {
        async fn write_event(&self, _event_name: &str, _payload: &Value) -> anyhow::Result<()> {
            anyhow::bail!("connection reset")
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_register_and_forward_delivers_event() {
        let relay = SseRelay::new();
        let writer = Arc::new(RecordingWriter::default());
        relay.register("s1", writer.clone()).await;

        relay.forward("s1", "message", &serde_json::json!({"hello": "world"})).await;

        let events = writer.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "message");
    }

    #[tokio::test]
    async fn test_forward_to_unknown_session_is_noop() {
        let relay = SseRelay::new();
        relay.forward("missing", "message", &serde_json::json!({})).await;
        assert!(!relay.has_subscribers("missing").await);
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_dropped_others_unaffected() {
        let relay = SseRelay::new();
        let good = Arc::new(RecordingWriter::default());
        relay.register("s1", Arc::new(FailingWriter)).await;
        relay.register("s1", good.clone()).await;

        relay.forward("s1", "message", &serde_json::json!({})).await;

        assert_eq!(good.events.lock().await.len(), 1);
        // The failing subscriber should have been evicted; only one remains.
        let count = {
            let subs = relay.subscribers.lock().await;
            subs.get("s1").map(Vec::len).unwrap_or(0)
        };
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_close_session_closes_all_and_clears_registry() {
        let relay = SseRelay::new();
        let writer = Arc::new(RecordingWriter::default());
        relay.register("s1", writer.clone()).await;

        relay.close_session("s1").await;

        assert!(writer.closed.load(Ordering::SeqCst));
        assert!(!relay.has_subscribers("s1").await);
    }

    #[tokio::test]
    async fn test_has_subscribers() {
        let relay = SseRelay::new();
        assert!(!relay.has_subscribers("s1").await);
        relay.register("s1", Arc::new(RecordingWriter::default())).await;
        assert!(relay.has_subscribers("s1").await);
    }

    #[tokio::test]
    async fn test_forward_preserves_call_order_per_session() {
        let relay = SseRelay::new();
        let writer = Arc::new(RecordingWriter::default());
        relay.register("s1", writer.clone()).await;

        relay.forward("s1", "a", &serde_json::json!(1)).await;
        relay.forward("s1", "b", &serde_json::json!(2)).await;

        let events = writer.events.lock().await;
        assert_eq!(events[0].0, "a");
        assert_eq!(events[1].0, "b");
    }
}
