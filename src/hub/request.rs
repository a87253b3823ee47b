//! Request Dispatcher (C5), §4.5.
//!
//! Requests on one connection are handled serially by the connection's
//! own read loop (`dispatch::run_connection` awaits this before reading
//! the next frame), which is what gives per-connection ordering (§5).

use std::sync::Arc;

use serde_json::{json, Value};

use super::state::{Connection, PendingOutcome};
use super::Hub;

pub async fn handle_request(hub: &Arc<Hub>, connection: &Arc<Connection>, org_id: &str, frame: &Value) {
    let Some(id) = frame.get("id").and_then(Value::as_str).map(String::from) else {
        log::warn!("request frame missing id, dropping");
        return;
    };
    let method = frame.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = frame.get("params").cloned().unwrap_or(Value::Null);
    let session_id = frame.get("session_id").and_then(Value::as_str).unwrap_or_default();

    let outcome = run_method(hub, org_id, method, session_id, &params).await;

    let (result, error, pending) = match outcome {
        Ok(result) => (result.clone(), Value::Null, PendingOutcome::Completed(result)),
        Err((code, message)) => (
            Value::Null,
            json!({"code": code, "message": message}),
            PendingOutcome::Failed {
                code: code.to_string(),
                message: message.clone(),
            },
        ),
    };

    connection
        .cache_pending_result(
            id.clone(),
            pending,
            hub.config.pending_result_cap,
            hub.config.pending_result_evict_batch,
        )
        .await;

    let response = json!({
        "type": "response",
        "id": id,
        "result": result,
        "error": error,
    });
    if let Err(err) = connection.send_json(&response).await {
        log::warn!("failed to send response for request {id}: {err}");
    }
}

type MethodResult = Result<Value, (&'static str, String)>;

async fn run_method(hub: &Arc<Hub>, org_id: &str, method: &str, session_id: &str, params: &Value) -> MethodResult {
    match method {
        "get_session" => get_session(hub, org_id, session_id, params).await,
        "get_config" => get_config(hub, org_id, params).await,
        "mcp_call" => mcp_call(hub, org_id, params).await,
        "memory_search" => memory_search(hub, org_id, params).await,
        "get_skill_package" => get_skill_package(hub, params).await,
        other => Err(("UNSUPPORTED_METHOD", format!("unsupported method: {other}"))),
    }
}

fn collaborator_failed(err: anyhow::Error) -> (&'static str, String) {
    ("REQUEST_FAILED", err.to_string())
}

async fn get_session(hub: &Arc<Hub>, org_id: &str, session_id: &str, params: &Value) -> MethodResult {
    let target = params
        .get("session_id")
        .and_then(Value::as_str)
        .unwrap_or(session_id);
    let session = hub
        .collaborators
        .sessions
        .get_session(org_id, target)
        .await
        .map_err(collaborator_failed)?;
    let agent = match &session {
        Some(session) => hub
            .collaborators
            .agents
            .get_agent(org_id, &session.agent_id)
            .await
            .map_err(collaborator_failed)?,
        None => None,
    };
    Ok(json!({"session": session, "agent": agent}))
}

async fn get_config(hub: &Arc<Hub>, org_id: &str, params: &Value) -> MethodResult {
    let agent_id = params.get("agent_id").and_then(Value::as_str).unwrap_or_default();
    let agent = hub
        .collaborators
        .agents
        .get_agent(org_id, agent_id)
        .await
        .map_err(collaborator_failed)?;
    Ok(json!(agent))
}

async fn mcp_call(hub: &Arc<Hub>, org_id: &str, params: &Value) -> MethodResult {
    let server = params.get("server").and_then(Value::as_str).unwrap_or_default();
    let tool = params.get("tool").and_then(Value::as_str).unwrap_or_default();
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    hub.collaborators
        .mcp
        .call_tool(server, org_id, tool, arguments)
        .await
        .map_err(collaborator_failed)
}

async fn memory_search(hub: &Arc<Hub>, org_id: &str, params: &Value) -> MethodResult {
    let query = params.get("query").and_then(Value::as_str).unwrap_or_default().trim();
    if query.is_empty() {
        return Ok(json!({"results": []}));
    }
    let top_k = hub
        .config
        .clamp_top_k(params.get("top_k").and_then(Value::as_i64).unwrap_or(10));

    let embedding = hub
        .collaborators
        .embeddings
        .embed(query)
        .await
        .map_err(collaborator_failed)?;

    let rows = if let Some(embedding) = embedding {
        hub.collaborators
            .memory
            .vector_search(org_id, &embedding, top_k)
            .await
            .map_err(collaborator_failed)?
    } else {
        hub.collaborators
            .memory
            .substring_search(org_id, query, top_k)
            .await
            .map_err(collaborator_failed)?
    };

    Ok(json!({"results": rows}))
}

async fn get_skill_package(hub: &Arc<Hub>, params: &Value) -> MethodResult {
    let skill_id = params.get("skill_id").and_then(Value::as_str).unwrap_or_default();
    let package = crate::skill_package::load_skill_package(hub.collaborators.skill_packages.as_ref(), skill_id)
        .await
        .map_err(collaborator_failed)?;
    Ok(crate::skill_package::to_response(package))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::FakeCollaborators;
    use crate::collaborators::traits::{AgentRecord, SessionRecord};
    use crate::config::Config;
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
    async fn test_unsupported_method_caches_failed_outcome() {
        let fakes = FakeCollaborators::new();
        let hub = Arc::new(Hub::new(Config::default(), fakes.bundle()));
        let (connection, mut client) = paired_connection().await;

        let frame = json!({"id": "r1", "session_id": "s1", "method": "bogus"});
        handle_request(&hub, &connection, "org1", &frame).await;

        use futures_util::StreamExt;
        let reply = client.next().await.unwrap().unwrap();
        let tokio_tungstenite::tungstenite::Message::Text(text) = reply else {
            panic!("expected text");
        };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["error"]["code"], "UNSUPPORTED_METHOD");

        let cached = connection.pending_result("r1").await.unwrap();
        assert!(matches!(cached.outcome, PendingOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_get_session_joins_agent() {
        let fakes = FakeCollaborators::new();
        fakes
            .sessions
            .seed(SessionRecord {
                id: "s1".to_string(),
                org_id: "org1".to_string(),
                agent_id: "a1".to_string(),
                extra: Value::Null,
            })
            .await;
        fakes
            .agents
            .seed(AgentRecord {
                id: "a1".to_string(),
                org_id: "org1".to_string(),
                extra: Value::Null,
            })
            .await;
        let hub = Arc::new(Hub::new(Config::default(), fakes.bundle()));
        let (connection, mut client) = paired_connection().await;

        let frame = json!({"id": "r1", "session_id": "s1", "method": "get_session"});
        handle_request(&hub, &connection, "org1", &frame).await;

        use futures_util::StreamExt;
        let reply = client.next().await.unwrap().unwrap();
        let tokio_tungstenite::tungstenite::Message::Text(text) = reply else {
            panic!("expected text");
        };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["result"]["session"]["id"], "s1");
        assert_eq!(parsed["result"]["agent"]["id"], "a1");
    }

    /// Scenario 2, §8: `get_config`'s `result` is the agent record itself,
    /// not wrapped in an enclosing object.
    #[tokio::test]
    async fn test_get_config_returns_agent_unwrapped() {
        let fakes = FakeCollaborators::new();
        fakes
            .agents
            .seed(AgentRecord {
                id: "a1".to_string(),
                org_id: "org1".to_string(),
                extra: json!({"model": "demo"}),
            })
            .await;
        let hub = Arc::new(Hub::new(Config::default(), fakes.bundle()));
        let (connection, mut client) = paired_connection().await;

        let frame = json!({"id": "r1", "session_id": "s1", "method": "get_config", "params": {"agent_id": "a1"}});
        handle_request(&hub, &connection, "org1", &frame).await;

        use futures_util::StreamExt;
        let reply = client.next().await.unwrap().unwrap();
        let tokio_tungstenite::tungstenite::Message::Text(text) = reply else {
            panic!("expected text");
        };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["result"]["id"], "a1");
        assert_eq!(parsed["result"]["model"], "demo");
        assert!(parsed["result"].get("agent").is_none());
    }

    #[tokio::test]
    async fn test_memory_search_empty_query_returns_empty() {
        let fakes = FakeCollaborators::new();
        let hub = Arc::new(Hub::new(Config::default(), fakes.bundle()));
        let (connection, mut client) = paired_connection().await;

        let frame = json!({"id": "r1", "session_id": "s1", "method": "memory_search", "params": {"query": "  "}});
        handle_request(&hub, &connection, "org1", &frame).await;

        use futures_util::StreamExt;
        let reply = client.next().await.unwrap().unwrap();
        let tokio_tungstenite::tungstenite::Message::Text(text) = reply else {
            panic!("expected text");
        };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["result"]["results"], json!([]));
    }
}
