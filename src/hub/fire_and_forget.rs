//! Fire-and-Forget Dispatcher (C6), §4.7.
//!
//! No reply is ever sent on this path; every method body runs under a
//! catch-all that logs failure and never propagates, so one bad call
//! can't take down the connection's read loop.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Local, TimeZone, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::state::Connection;
use super::Hub;
use crate::collaborators::traits::{
    EvolvedSkillRecord, ExecutionLogEntry, MemoryWriteParams, SnapshotRecord, UsageCounters,
};

pub async fn handle(hub: &Arc<Hub>, connection: &Arc<Connection>, org_id: &str, frame: &Value) {
    let method = frame.get("method").and_then(Value::as_str).unwrap_or_default();
    let session_id = frame.get("session_id").and_then(Value::as_str).unwrap_or_default();
    let params = frame.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        "usage_report" => usage_report(hub, connection, org_id).await,
        "audit_log" => audit_log(hub, connection, org_id, session_id, &params).await,
        "snapshot_sync" => snapshot_sync(hub, org_id, session_id, &params).await,
        "memory_write" => memory_write(hub, org_id, session_id, connection, &params).await,
        "evolution_submit" => evolution_submit(hub, org_id, &params).await,
        other => {
            log::warn!("unknown fire_and_forget method {other:?}, dropping");
            return;
        }
    };

    if let Err(err) = result {
        log::warn!("fire_and_forget {method} failed: {err}");
    }
}

async fn usage_report(hub: &Arc<Hub>, connection: &Arc<Connection>, org_id: &str) -> anyhow::Result<()> {
    let period_start = local_midnight_utc();
    let period_end = period_start + ChronoDuration::days(1);
    hub.collaborators
        .logs
        .record_usage(
            org_id,
            &connection.user_id,
            period_start,
            period_end,
            UsageCounters {
                tokens_input: 0,
                tokens_output: 0,
                api_calls: 1,
                sessions_count: 1,
                messages_count: 1,
                cost_usd: 0.0,
            },
        )
        .await
}

/// The start of the current *local* calendar day (§4.7), expressed as a
/// `DateTime<Utc>` instant since that's what `Logs::record_usage` takes.
/// Falls back to the ambiguous-offset candidate nearest `now` around a DST
/// transition rather than failing the report outright.
fn local_midnight_utc() -> chrono::DateTime<Utc> {
    let now = Local::now();
    let midnight = now.date_naive().and_hms_opt(0, 0, 0).expect("midnight is always a valid time");
    Local
        .from_local_datetime(&midnight)
        .single()
        .unwrap_or(now)
        .with_timezone(&Utc)
}

async fn audit_log(
    hub: &Arc<Hub>,
    connection: &Arc<Connection>,
    org_id: &str,
    session_id: &str,
    params: &Value,
) -> anyhow::Result<()> {
    hub.collaborators
        .logs
        .log_execution(ExecutionLogEntry {
            org_id: org_id.to_string(),
            session_id: session_id.to_string(),
            source: "execution_plane".to_string(),
            user_id: connection.user_id.clone(),
            data: params.clone(),
        })
        .await
}

async fn snapshot_sync(hub: &Arc<Hub>, org_id: &str, session_id: &str, params: &Value) -> anyhow::Result<()> {
    let snapshot = SnapshotRecord {
        session_id: session_id.to_string(),
        checkpoint: params.get("checkpoint").cloned().unwrap_or(Value::Null),
        short_term_memory: params.get("short_term_memory").cloned().unwrap_or(Value::Null),
        conversation_state: params.get("conversation_state").cloned().unwrap_or(Value::Null),
        file_manifest: params.get("file_manifest").cloned().unwrap_or(Value::Null),
    };
    hub.collaborators
        .sessions
        .save_snapshot(org_id, snapshot, hub.config.snapshot_retention)
        .await
}

async fn memory_write(
    hub: &Arc<Hub>,
    org_id: &str,
    session_id: &str,
    connection: &Arc<Connection>,
    params: &Value,
) -> anyhow::Result<()> {
    let agent_id = params.get("agent_id").and_then(Value::as_str);
    let content = params.get("content").and_then(Value::as_str).unwrap_or_default();
    let Some(agent_id) = agent_id else {
        return Ok(());
    };
    if content.is_empty() {
        return Ok(());
    }

    let raw_type = params.get("memory_type").and_then(Value::as_str).unwrap_or_default();
    let memory_type = crate::collaborators::normalize_memory_type(raw_type);

    let embedding = hub.collaborators.embeddings.embed(content).await?;

    let mut metadata = params.get("metadata").cloned().unwrap_or_else(|| Value::Object(Default::default()));
    let session_id = if Uuid::parse_str(session_id).is_ok() {
        Some(session_id.to_string())
    } else {
        if let Value::Object(map) = &mut metadata {
            map.insert("runtime_session_id".to_string(), Value::String(session_id.to_string()));
        }
        None
    };

    hub.collaborators
        .memory
        .upsert(MemoryWriteParams {
            org_id: org_id.to_string(),
            agent_id: agent_id.to_string(),
            session_id,
            user_id: connection.user_id.clone(),
            content: content.to_string(),
            embedding,
            memory_type: memory_type.to_string(),
            importance: params.get("importance").and_then(Value::as_f64).unwrap_or(0.5),
            metadata,
        })
        .await
}

async fn evolution_submit(hub: &Arc<Hub>, org_id: &str, params: &Value) -> anyhow::Result<()> {
    let quality_score = params.get("quality_score").and_then(Value::as_f64).unwrap_or(0.0);
    let status = if quality_score >= 0.8 { "approved" } else { "pending_review" };
    hub.collaborators
        .evolved_skills
        .create(EvolvedSkillRecord {
            org_id: org_id.to_string(),
            agent_id: params.get("agent_id").and_then(Value::as_str).map(String::from),
            status: status.to_string(),
            data: params.clone(),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::FakeCollaborators;
    use crate::config::Config;
    use crate::ws;
    use serde_json::json;

    async fn connection() -> Arc<Connection> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_task = tokio::spawn(async move {
            tokio_tungstenite::connect_async(format!("ws://{addr}/ws/vm")).await.unwrap()
        });
        let (tcp_stream, _) = listener.accept().await.unwrap();
        let (writer, _reader, _request) = ws::accept(tcp_stream).await.unwrap();
        let connection = Arc::new(Connection::spawn("u1".to_string(), writer));
        connection.mark_ready("org1".to_string()).await;
        client_task.await.unwrap();
        connection
    }

    #[tokio::test]
    async fn test_evolution_submit_high_score_is_approved() {
        let fakes = FakeCollaborators::new();
        let hub = Arc::new(Hub::new(Config::default(), fakes.bundle()));
        let frame = json!({"type": "fire_and_forget", "method": "evolution_submit", "params": {"quality_score": 0.9}});
        handle(&hub, &connection().await, "org1", &frame).await;
        let created = fakes.evolved_skills.created.lock().await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].status, "approved");
    }

    #[tokio::test]
    async fn test_evolution_submit_low_score_is_pending_review() {
        let fakes = FakeCollaborators::new();
        let hub = Arc::new(Hub::new(Config::default(), fakes.bundle()));
        let frame = json!({"type": "fire_and_forget", "method": "evolution_submit", "params": {"quality_score": 0.2}});
        handle(&hub, &connection().await, "org1", &frame).await;
        let created = fakes.evolved_skills.created.lock().await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].status, "pending_review");
    }

    #[tokio::test]
    async fn test_memory_write_demotes_non_uuid_session_id() {
        let fakes = FakeCollaborators::new();
        let hub = Arc::new(Hub::new(Config::default(), fakes.bundle()));
        let frame = json!({
            "type": "fire_and_forget",
            "method": "memory_write",
            "session_id": "not-a-uuid",
            "params": {"agent_id": "a1", "content": "hello", "memory_type": "episodic"}
        });
        handle(&hub, &connection().await, "org1", &frame).await;

        let rows = fakes.memory.rows.lock().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.metadata["runtime_session_id"], "not-a-uuid");
    }

    #[tokio::test]
    async fn test_unknown_method_is_dropped_without_error() {
        let fakes = FakeCollaborators::new();
        let hub = Arc::new(Hub::new(Config::default(), fakes.bundle()));
        let frame = json!({"type": "fire_and_forget", "method": "bogus", "params": {}});
        handle(&hub, &connection().await, "org1", &frame).await;
    }

    #[tokio::test]
    async fn test_audit_log_forwards_entry_with_user_and_session() {
        let fakes = FakeCollaborators::new();
        let hub = Arc::new(Hub::new(Config::default(), fakes.bundle()));
        let frame = json!({
            "type": "fire_and_forget",
            "method": "audit_log",
            "session_id": "s1",
            "params": {"action": "tool_invoked"}
        });
        handle(&hub, &connection().await, "org1", &frame).await;

        let audit = fakes.logs.audit.lock().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].org_id, "org1");
        assert_eq!(audit[0].session_id, "s1");
        assert_eq!(audit[0].user_id, "u1");
        assert_eq!(audit[0].data["action"], "tool_invoked");
    }

    /// Scenario 6, §8: four `snapshot_sync` calls for the same session
    /// leave exactly three rows, the three latest.
    #[tokio::test]
    async fn test_snapshot_sync_retains_configured_count() {
        let fakes = FakeCollaborators::new();
        let mut config = Config::default();
        config.snapshot_retention = 3;
        let hub = Arc::new(Hub::new(config, fakes.bundle()));

        for i in 0..4 {
            let frame = json!({
                "type": "fire_and_forget",
                "method": "snapshot_sync",
                "session_id": "s1",
                "params": {"checkpoint": {"step": i}}
            });
            handle(&hub, &connection().await, "org1", &frame).await;
        }

        let snapshots = fakes.sessions.snapshots.lock().await;
        let rows = snapshots.get("s1").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].checkpoint["step"], 1);
        assert_eq!(rows[2].checkpoint["step"], 3);
    }
}
