//! Resume Handler, §4.6.
//!
//! Replays cached RPC outcomes so a restarted execution plane can
//! re-synchronize without re-running side-effectful requests.

use std::sync::Arc;

use serde_json::{json, Value};

use super::state::{Connection, PendingOutcome};

pub async fn handle_resume(connection: &Arc<Connection>, frame: &Value) {
    let Some(pending_ids) = frame.get("pending_ids").and_then(Value::as_array) else {
        log::warn!("resume frame missing pending_ids, dropping");
        return;
    };

    let mut results = serde_json::Map::new();
    for id in pending_ids.iter().filter_map(Value::as_str) {
        let entry = match connection.pending_result(id).await {
            Some(cached) => match cached.outcome {
                PendingOutcome::Completed(data) => json!({"status": "completed", "data": data}),
                PendingOutcome::Failed { code, message } => {
                    json!({"status": "failed", "error": {"code": code, "message": message}})
                }
            },
            None => json!({"status": "lost"}),
        };
        results.insert(id.to_string(), entry);
    }

    let response = json!({"type": "resume_response", "results": Value::Object(results)});
    if let Err(err) = connection.send_json(&response).await {
        log::warn!("failed to send resume_response: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::state::PendingOutcome as Outcome;
    use crate::ws;

    async fn paired_connection() -> (Arc<Connection>, tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_task = tokio::spawn(async move {
            let (stream, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/vm")).await.unwrap();
            stream
        });
        let (tcp_stream, _) = listener.accept().await.unwrap();
        let (writer, _reader, _request) = ws::accept(tcp_stream).await.unwrap();
        let connection = Arc::new(Connection::spawn("u1".to_string(), writer));
        connection.mark_ready("org1".to_string()).await;
        let client = client_task.await.unwrap();
        (connection, client)
    }

    #[tokio::test]
    async fn test_resume_reports_completed_failed_and_lost() {
        let (connection, mut client) = paired_connection().await;
        connection
            .cache_pending_result("r1".to_string(), Outcome::Completed(json!({"ok": true})), 200, 50)
            .await;
        connection
            .cache_pending_result(
                "r2".to_string(),
                Outcome::Failed {
                    code: "REQUEST_FAILED".to_string(),
                    message: "boom".to_string(),
                },
                200,
                50,
            )
            .await;

        let frame = json!({"type": "resume", "pending_ids": ["r1", "r2", "r3"]});
        handle_resume(&connection, &frame).await;

        use futures_util::StreamExt;
        let reply = client.next().await.unwrap().unwrap();
        let tokio_tungstenite::tungstenite::Message::Text(text) = reply else {
            panic!("expected text");
        };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["results"]["r1"]["status"], "completed");
        assert_eq!(parsed["results"]["r2"]["status"], "failed");
        assert_eq!(parsed["results"]["r3"]["status"], "lost");
    }
}
