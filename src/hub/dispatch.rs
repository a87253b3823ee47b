//! Per-connection frame dispatch (§4.3 "Dispatch").
//!
//! One task per connection reads frames serially off its `WsReader`, so
//! requests on a single socket are always answered in arrival order
//! (§5); concurrency only happens across connections.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use super::state::Connection;
use super::Hub;
use crate::ws::{WsMessage, WsReader};

pub async fn run_connection(
    hub: Arc<Hub>,
    connection: Arc<Connection>,
    mut reader: WsReader,
    org_id: String,
) {
    loop {
        let message = match reader.recv().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                log::debug!("read error for user {}: {err}", connection.user_id);
                break;
            }
            None => break,
        };

        match message {
            WsMessage::Text(text) => {
                handle_frame(&hub, &connection, &org_id, &text).await;
            }
            WsMessage::Close { .. } => break,
            _ => {}
        }
    }

    hub.remove_connection(&connection.user_id).await;
}

async fn handle_frame(hub: &Arc<Hub>, connection: &Arc<Connection>, org_id: &str, text: &str) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            log::warn!("malformed frame from user {}: {err}", connection.user_id);
            return;
        }
    };

    let frame_type = frame.get("type").and_then(Value::as_str).unwrap_or_default();
    match frame_type {
        "heartbeat" => handle_heartbeat(hub, connection, &frame).await,
        "request" => super::request::handle_request(hub, connection, org_id, &frame).await,
        "sse_event" => super::ingest::handle_sse_event(hub, org_id, &frame).await,
        "fire_and_forget" => super::fire_and_forget::handle(hub, connection, org_id, &frame).await,
        "resume" => super::resume::handle_resume(connection, &frame).await,
        other => {
            log::debug!("ignoring unrecognized frame type {other:?}");
        }
    }
}

async fn handle_heartbeat(hub: &Arc<Hub>, connection: &Arc<Connection>, frame: &Value) {
    connection.touch_heartbeat().await;
    let _ = hub.collaborators.vm_instances.touch_heartbeat(&connection.user_id).await;

    if let Some(sessions) = frame.get("active_sessions").and_then(Value::as_array) {
        let set: HashSet<String> = sessions
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect();
        connection.replace_active_sessions(set).await;
    }
}
