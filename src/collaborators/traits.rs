//! The narrow collaborator surface the core consumes (§6.5).
//!
//! Per the design notes, untyped collaborator returns become explicit
//! record types at this boundary rather than passing `serde_json::Value`
//! around uninspected. Storage and schema stay entirely on the
//! implementor's side; this crate only depends on these shapes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A session record as the core needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub org_id: String,
    pub agent_id: String,
    #[serde(flatten)]
    pub extra: Value,
}

/// An agent record as the core needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub org_id: String,
    #[serde(flatten)]
    pub extra: Value,
}

/// A message to append to a session's transcript.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: String,
    pub content: String,
    pub metadata: Option<Value>,
}

/// The identifier of a message `addMessage` just created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedMessage {
    pub id: String,
}

/// A session snapshot row (§4.7 `snapshot_sync`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub session_id: String,
    pub checkpoint: Value,
    pub short_term_memory: Value,
    pub conversation_state: Value,
    pub file_manifest: Value,
}

/// Sessions & their transcripts/snapshots.
#[async_trait]
pub trait Sessions: Send + Sync + std::fmt::Debug {
    async fn get_session(&self, org_id: &str, session_id: &str) -> Result<Option<SessionRecord>>;
    async fn add_message(
        &self,
        org_id: &str,
        session_id: &str,
        message: NewMessage,
    ) -> Result<CreatedMessage>;
    /// Persist a new snapshot row for `session_id`, then delete all but the
    /// `retain` most recent snapshots for that session.
    async fn save_snapshot(&self, org_id: &str, snapshot: SnapshotRecord, retain: usize) -> Result<()>;
}

/// Agent definitions.
#[async_trait]
pub trait Agents: Send + Sync + std::fmt::Debug {
    async fn get_agent(&self, org_id: &str, agent_id: &str) -> Result<Option<AgentRecord>>;
}

/// MCP tool invocation.
#[async_trait]
pub trait Mcp: Send + Sync + std::fmt::Debug {
    async fn call_tool(&self, server: &str, org_id: &str, tool: &str, arguments: Value) -> Result<Value>;
}

/// Daily usage counters recorded by `usage_report`.
#[derive(Debug, Clone, Default)]
pub struct UsageCounters {
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub api_calls: i64,
    pub sessions_count: i64,
    pub messages_count: i64,
    pub cost_usd: f64,
}

/// An execution log entry recorded by `audit_log`.
#[derive(Debug, Clone)]
pub struct ExecutionLogEntry {
    pub org_id: String,
    pub session_id: String,
    pub source: String,
    pub user_id: String,
    pub data: Value,
}

/// Usage counters and audit trail.
#[async_trait]
pub trait Logs: Send + Sync + std::fmt::Debug {
    async fn record_usage(
        &self,
        org_id: &str,
        user_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        counters: UsageCounters,
    ) -> Result<()>;
    async fn log_execution(&self, entry: ExecutionLogEntry) -> Result<()>;
}

/// A submitted evolved-skill candidate (§4.7 `evolution_submit`).
#[derive(Debug, Clone)]
pub struct EvolvedSkillRecord {
    pub org_id: String,
    pub agent_id: Option<String>,
    pub status: String,
    pub data: Value,
}

/// Evolved-skill submissions.
#[async_trait]
pub trait EvolvedSkills: Send + Sync + std::fmt::Debug {
    async fn create(&self, record: EvolvedSkillRecord) -> Result<()>;
}

/// A skill definition, resolved from a skill id.
#[derive(Debug, Clone)]
pub struct SkillDefinition {
    pub id: String,
    pub package_definition_id: String,
}

/// The filesystem location of a resolved skill package.
#[derive(Debug, Clone)]
pub struct SkillPackageLocation {
    pub skill_id: String,
    pub directory: std::path::PathBuf,
}

/// Resolving a skill id to the on-disk package that implements it (§6.6).
#[async_trait]
pub trait SkillPackages: Send + Sync + std::fmt::Debug {
    async fn find_definition_by_skill_id(&self, skill_id: &str) -> Result<Option<SkillDefinition>>;
    async fn find_package_by_definition(
        &self,
        definition_id: &str,
    ) -> Result<Option<SkillPackageLocation>>;
}

/// One scored memory row returned by `memory_search`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryRow {
    pub content: String,
    pub score: f64,
    pub metadata: Value,
}

/// Parameters for a `memory_write` upsert.
#[derive(Debug, Clone)]
pub struct MemoryWriteParams {
    pub org_id: String,
    pub agent_id: String,
    pub session_id: Option<String>,
    pub user_id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub memory_type: String,
    pub importance: f64,
    pub metadata: Value,
}

/// The memory store: vector search with a substring fallback.
#[async_trait]
pub trait MemoryStore: Send + Sync + std::fmt::Debug {
    async fn upsert(&self, params: MemoryWriteParams) -> Result<()>;
    /// Cosine-distance vector search scoped to `org_id`, excluding expired
    /// rows, returning at most `top_k` results ordered best-first.
    async fn vector_search(&self, org_id: &str, embedding: &[f32], top_k: usize) -> Result<Vec<MemoryRow>>;
    /// Case-insensitive substring fallback, ranked by the caller (see
    /// `collaborators::memory_search_fallback_score`), returning at most
    /// `top_k` results ordered best-first.
    async fn substring_search(&self, org_id: &str, query: &str, top_k: usize) -> Result<Vec<MemoryRow>>;
}

/// VM instance liveness bookkeeping external to the hub's own in-memory
/// `Connection` state.
#[async_trait]
pub trait VmInstanceRegistry: Send + Sync + std::fmt::Debug {
    async fn mark_ready(&self, user_id: &str) -> Result<()>;
    async fn mark_disconnected(&self, user_id: &str) -> Result<()>;
    /// Best-effort; failures here must never affect in-memory connection
    /// state (§9).
    async fn touch_heartbeat(&self, user_id: &str) -> Result<()>;
    async fn exists(&self, user_id: &str) -> Result<bool>;
    /// Validate (and consume) a single-use connect ticket for `user_id`.
    async fn consume_ticket(&self, user_id: &str, ticket: &str) -> Result<bool>;
}

/// The identity produced by a successful auth handshake.
///
/// `provider_api_keys` and `llm_routing_config` ride along on the same
/// call since no separate collaborator is named for them (§6.5 lists
/// `Auth` as the only identity-adjacent interface); they are exactly the
/// two things `init` needs to hand the execution plane (§4.3, §6.3).
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    pub user_id: String,
    pub org_id: String,
    /// Retained so the gateway can derive the §6.3 `init` encryption key
    /// without a second round-trip to the auth collaborator.
    pub bearer_token: String,
    /// Server-held provider API keys, by provider name, to be delivered
    /// encrypted in the `init` frame.
    pub provider_api_keys: std::collections::HashMap<String, String>,
    /// Runtime LLM routing config sent verbatim in `init`.
    pub llm_routing_config: Value,
}

/// Bearer token verification.
#[async_trait]
pub trait Auth: Send + Sync + std::fmt::Debug {
    async fn verify(&self, token: &str) -> Result<AuthenticatedIdentity>;
}

/// Text embedding generation, used opportunistically by `memory_search`
/// and `memory_write`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>>;
}
