//! Event Ingest (C7), §4.8.
//!
//! Turns one `sse_event` frame from the execution plane into zero or one
//! durable message, plus at most one SSE push to browser subscribers.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use super::Hub;
use crate::collaborators::traits::NewMessage;
use crate::normalize;

pub async fn handle_sse_event(hub: &Arc<Hub>, org_id: &str, frame: &Value) {
    let session_id = match frame.get("session_id").and_then(Value::as_str) {
        Some(v) => v.to_string(),
        None => {
            log::warn!("sse_event frame missing session_id, dropping");
            return;
        }
    };
    let raw_data = match frame.get("data").and_then(Value::as_str) {
        Some(v) => v,
        None => {
            log::warn!("sse_event frame missing data, dropping");
            return;
        }
    };
    let event: Value = match serde_json::from_str(raw_data) {
        Ok(v) => v,
        Err(err) => {
            log::warn!("unparseable sse_event data for session {session_id}: {err}");
            return;
        }
    };

    if normalize::is_error(&event) {
        handle_error(hub, &session_id, &event).await;
        return;
    }
    if normalize::is_complete(&event) {
        handle_complete(hub, org_id, &session_id, &event).await;
        return;
    }

    let Some(message) = normalize::normalize(&event) else {
        return;
    };

    if message.msg_type.is_process_event() {
        hub.push_process_event(&session_id, message.clone()).await;
    }

    if message.msg_type == normalize::UiMessageType::File {
        persist_file_card(hub, org_id, &session_id, &message).await;
    }

    hub.collaborators
        .sse
        .forward(&session_id, "message", &serde_json::to_value(&message).expect("UiMessage serializes"))
        .await;
}

async fn handle_error(hub: &Arc<Hub>, session_id: &str, event: &Value) {
    hub.drop_process_buffer(session_id).await;
    let code = event.get("code").and_then(Value::as_str).unwrap_or("SSE_STREAM_ERROR");
    let message = event.get("error").and_then(Value::as_str).unwrap_or("execution failed");
    hub.collaborators
        .sse
        .forward(session_id, "error", &json!({"code": code, "message": message}))
        .await;
    hub.collaborators.sse.close_session(session_id).await;
}

async fn handle_complete(hub: &Arc<Hub>, org_id: &str, session_id: &str, event: &Value) {
    let final_response = event
        .get("final_response")
        .and_then(Value::as_str)
        .or_else(|| event.get("content").and_then(Value::as_str))
        .unwrap_or_default();

    let buffer = hub.take_process_buffer(session_id).await;

    let message_id = if final_response.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        let metadata = match buffer {
            Some(buffer) if !buffer.is_empty() => Some(json!({
                "execution_process": {
                    "version": 1,
                    "messages": buffer.into_messages(),
                }
            })),
            _ => None,
        };
        match hub
            .collaborators
            .sessions
            .add_message(
                org_id,
                session_id,
                NewMessage {
                    role: "assistant".to_string(),
                    content: final_response.to_string(),
                    metadata,
                },
            )
            .await
        {
            Ok(created) => created.id,
            Err(err) => {
                log::warn!("failed to persist completion message for session {session_id}: {err}");
                Uuid::new_v4().to_string()
            }
        }
    };

    hub.collaborators
        .sse
        .forward(
            session_id,
            "execution_complete",
            &json!({"sessionId": session_id, "messageId": message_id}),
        )
        .await;
    hub.collaborators.sse.close_session(session_id).await;
}

async fn persist_file_card(hub: &Arc<Hub>, org_id: &str, session_id: &str, message: &normalize::UiMessage) {
    let result = hub
        .collaborators
        .sessions
        .add_message(
            org_id,
            session_id,
            NewMessage {
                role: "assistant".to_string(),
                content: String::new(),
                metadata: Some(json!({"agent2ui": message})),
            },
        )
        .await;
    if let Err(err) = result {
        log::warn!("failed to persist file card for session {session_id}: {err}");
    }
}
