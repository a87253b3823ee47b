//! Public outbound API (§4.3 "Outbound contract").
//!
//! Thin wrappers around `Connection::send_json`; every call refuses with
//! [`crate::error::GatewayError::NotReady`]/`NoConnection` when the
//! target connection is absent or not ready (§7).

use std::sync::Arc;

use serde_json::{json, Value};

use super::Hub;
use crate::error::GatewayError;

async fn send(hub: &Arc<Hub>, user_id: &str, payload: Value) -> Result<(), GatewayError> {
    let connection = hub
        .connection_for(user_id)
        .await
        .ok_or_else(|| GatewayError::NoConnection(user_id.to_string()))?;
    connection.send_json(&payload).await
}

pub async fn start_session(hub: &Arc<Hub>, user_id: &str, session_id: &str, params: Value) -> Result<(), GatewayError> {
    send(
        hub,
        user_id,
        json!({"type": "start_session", "session_id": session_id, "params": params}),
    )
    .await
}

pub async fn send_user_message(
    hub: &Arc<Hub>,
    user_id: &str,
    session_id: &str,
    message: Value,
) -> Result<(), GatewayError> {
    send(
        hub,
        user_id,
        json!({"type": "user_message", "session_id": session_id, "message": message}),
    )
    .await
}

pub async fn send_cancel(
    hub: &Arc<Hub>,
    user_id: &str,
    session_id: &str,
    reason: Option<&str>,
) -> Result<(), GatewayError> {
    let reason = reason.unwrap_or("user_cancelled");
    send(
        hub,
        user_id,
        json!({"type": "cancel", "session_id": session_id, "reason": reason}),
    )
    .await
}

pub async fn send_config_update(hub: &Arc<Hub>, user_id: &str, config: Value) -> Result<(), GatewayError> {
    send(hub, user_id, json!({"type": "config_update", "config": config})).await
}

/// Best-effort across every `ready` connection; a single failure is
/// logged and does not stop the broadcast.
pub async fn broadcast_llm_config_update(hub: &Arc<Hub>, config: Value) {
    let user_ids: Vec<String> = {
        let connections = hub.connections.read().await;
        connections.keys().cloned().collect()
    };
    for user_id in user_ids {
        if let Err(err) = send_config_update(hub, &user_id, config.clone()).await {
            log::warn!("broadcastLLMConfigUpdate failed for user {user_id}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::FakeCollaborators;
    use crate::config::Config;
    use crate::hub::state::Connection;
    use crate::ws;
    use futures_util::StreamExt;

    async fn hub_with_connection() -> (Arc<Hub>, tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>) {
        let fakes = FakeCollaborators::new();
        let hub = Arc::new(Hub::new(Config::default(), fakes.bundle()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_task = tokio::spawn(async move {
            tokio_tungstenite::connect_async(format!("ws://{addr}/ws/vm")).await.unwrap().0
        });
        let (tcp_stream, _) = listener.accept().await.unwrap();
        let (writer, _reader, _request) = ws::accept(tcp_stream).await.unwrap();
        let connection = Arc::new(Connection::spawn("u1".to_string(), writer));
        connection.mark_ready("org1".to_string()).await;
        hub.insert_connection("u1", connection).await;
        let client = client_task.await.unwrap();
        (hub, client)
    }

    #[tokio::test]
    async fn test_send_cancel_defaults_reason() {
        let (hub, mut client) = hub_with_connection().await;
        send_cancel(&hub, "u1", "s1", None).await.unwrap();

        let reply = client.next().await.unwrap().unwrap();
        let tokio_tungstenite::tungstenite::Message::Text(text) = reply else {
            panic!("expected text");
        };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["reason"], "user_cancelled");
    }

    #[tokio::test]
    async fn test_send_to_missing_connection_errors() {
        let fakes = FakeCollaborators::new();
        let hub = Arc::new(Hub::new(Config::default(), fakes.bundle()));
        let result = start_session(&hub, "ghost", "s1", json!({})).await;
        assert!(matches!(result, Err(GatewayError::NoConnection(_))));
    }

    #[tokio::test]
    async fn test_broadcast_llm_config_update_reaches_ready_connection() {
        let (hub, mut client) = hub_with_connection().await;
        broadcast_llm_config_update(&hub, json!({"provider": "anthropic"})).await;

        let reply = client.next().await.unwrap().unwrap();
        let tokio_tungstenite::tungstenite::Message::Text(text) = reply else {
            panic!("expected text");
        };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "config_update");
    }
}
