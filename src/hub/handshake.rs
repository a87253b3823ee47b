//! Accept & handshake (§4.3).
//!
//! One task per inbound TCP connection: perform the WebSocket upgrade,
//! require `user_id` on the query string, validate the optional `ticket`
//! against the VM instance registry, require exactly one `auth` frame,
//! verify it, then hand the connection off to
//! [`super::dispatch::run_connection`] for its lifetime.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};

use super::state::Connection;
use super::Hub;
use crate::ws::{self, WsMessage};

/// How long the hub waits for the first (`auth`) frame after the upgrade
/// completes before giving up on the connection.
const AUTH_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run_accept_loop(hub: Arc<Hub>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    accept_connection(hub, stream).await;
                });
            }
            Err(err) => {
                log::warn!("accept failed: {err}");
            }
        }
    }
}

async fn accept_connection(hub: Arc<Hub>, stream: TcpStream) {
    let (mut writer, mut reader, request) = match ws::accept(stream).await {
        Ok(v) => v,
        Err(err) => {
            log::debug!("websocket upgrade failed: {err}");
            return;
        }
    };

    let params = ws::parse_query(&request.query);
    let user_id = match params.get("user_id") {
        Some(v) if !v.is_empty() => v.clone(),
        _ => {
            log::warn!("rejecting upgrade: missing user_id");
            let _ = writer.send_close(4001, "missing user_id").await;
            return;
        }
    };

    if let Some(ticket) = params.get("ticket").filter(|t| !t.is_empty()) {
        if !validate_ticket(&hub, &user_id, ticket).await {
            log::warn!("rejecting upgrade for user_id={user_id}: invalid connect ticket");
            let _ = writer.send_close(4001, "invalid connect ticket").await;
            return;
        }
    }

    let Some(token) = read_auth_token(&mut reader, &mut writer).await else {
        return;
    };

    let identity = match hub.collaborators.auth.verify(&token).await {
        Ok(identity) => identity,
        Err(err) => {
            log::info!("auth failed for user_id={user_id}: {err}");
            let _ = writer.send_close(4001, "authentication failed").await;
            return;
        }
    };

    let connection = Arc::new(Connection::spawn(identity.user_id.clone(), writer));
    connection.mark_ready(identity.org_id.clone()).await;
    hub.insert_connection(&identity.user_id, Arc::clone(&connection)).await;
    let _ = hub.collaborators.vm_instances.mark_ready(&identity.user_id).await;

    log::info!("connection ready for user {}", identity.user_id);

    let init_frame = build_init_frame(&identity);
    if connection.send_json(&init_frame).await.is_err() {
        log::warn!("failed to send init frame to user {}", identity.user_id);
        hub.remove_connection(&identity.user_id).await;
        return;
    }

    super::dispatch::run_connection(hub, connection, reader, identity.org_id).await;
}

/// Validate an optional `ticket` query param against the VM instance
/// registry (§6.1, §6.5): the instance must exist and the ticket must be
/// a genuine, unconsumed single-use token for `user_id`.
async fn validate_ticket(hub: &Arc<Hub>, user_id: &str, ticket: &str) -> bool {
    match hub.collaborators.vm_instances.exists(user_id).await {
        Ok(true) => {}
        Ok(false) => return false,
        Err(err) => {
            log::warn!("vm instance existence check failed for {user_id}: {err}");
            return false;
        }
    }

    match hub.collaborators.vm_instances.consume_ticket(user_id, ticket).await {
        Ok(consumed) => consumed,
        Err(err) => {
            log::warn!("ticket consumption failed for {user_id}: {err}");
            false
        }
    }
}

/// Wait for exactly one `{type:"auth", token}` frame, closing with 4001
/// on anything else (timeout, non-text frame, malformed JSON, wrong
/// shape).
async fn read_auth_token(
    reader: &mut crate::ws::WsReader,
    writer: &mut crate::ws::WsWriter,
) -> Option<String> {
    let first = tokio::time::timeout(AUTH_FRAME_TIMEOUT, reader.recv()).await;
    let text = match first {
        Ok(Some(Ok(WsMessage::Text(text)))) => text,
        _ => {
            let _ = writer.send_close(4001, "expected auth frame").await;
            return None;
        }
    };

    let parsed: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => {
            let _ = writer.send_close(4001, "malformed auth frame").await;
            return None;
        }
    };

    if parsed.get("type").and_then(Value::as_str) != Some("auth") {
        let _ = writer.send_close(4001, "expected auth frame").await;
        return None;
    }

    match parsed.get("token").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => Some(token.to_string()),
        _ => {
            let _ = writer.send_close(4001, "missing token").await;
            None
        }
    }
}

/// The `init` frame: identity, the §6.3 encrypted provider-key envelopes,
/// and runtime LLM routing config.
fn build_init_frame(identity: &crate::collaborators::traits::AuthenticatedIdentity) -> Value {
    let key = crate::crypto::derive_init_key(&identity.bearer_token);
    let mut encrypted_keys = serde_json::Map::new();
    for (provider, plaintext) in &identity.provider_api_keys {
        match crate::crypto::encrypt_secret(&key, plaintext.as_bytes()) {
            Ok(envelope) => {
                encrypted_keys.insert(
                    provider.clone(),
                    serde_json::to_value(envelope).expect("envelope serializes"),
                );
            }
            Err(err) => {
                log::error!("failed to encrypt provider key for {provider}: {err}");
            }
        }
    }

    serde_json::json!({
        "type": "init",
        "userId": identity.user_id,
        "orgId": identity.org_id,
        "apiKeys": encrypted_keys,
        "llmConfig": identity.llm_routing_config,
    })
}
