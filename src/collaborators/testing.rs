//! In-memory fakes for every collaborator trait (§6.5), bundled as
//! [`FakeCollaborators`] so unit and integration tests share one harness
//! instead of each hand-rolling mocks. Mirrors the teacher's own habit of
//! keeping test doubles next to the real implementation rather than in a
//! separate crate.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::traits::{
    AgentRecord, Agents, Auth, AuthenticatedIdentity, CreatedMessage, EmbeddingProvider,
    EvolvedSkillRecord, EvolvedSkills, ExecutionLogEntry, Logs, Mcp, MemoryRow, MemoryStore,
    MemoryWriteParams, NewMessage, SessionRecord, Sessions, SkillDefinition, SkillPackageLocation,
    SkillPackages, SnapshotRecord, UsageCounters, VmInstanceRegistry,
};
use super::{substring_fallback_score, Collaborators};
use crate::relay::SseRelay;

#[derive(Debug, Default)]
pub struct FakeSessions {
    pub sessions: Mutex<HashMap<String, SessionRecord>>,
    pub messages: Mutex<Vec<(String, String, NewMessage)>>,
    pub snapshots: Mutex<HashMap<String, Vec<SnapshotRecord>>>,
}

impl FakeSessions {
    pub async fn seed(&self, session: SessionRecord) {
        self.sessions.lock().await.insert(session.id.clone(), session);
    }
}

#[async_trait]
impl Sessions for FakeSessions {
    async fn get_session(&self, org_id: &str, session_id: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(session_id)
            .filter(|s| s.org_id == org_id)
            .cloned())
    }

    async fn add_message(
        &self,
        org_id: &str,
        session_id: &str,
        message: NewMessage,
    ) -> Result<CreatedMessage> {
        let id = Uuid::new_v4().to_string();
        self.messages
            .lock()
            .await
            .push((org_id.to_string(), session_id.to_string(), message));
        Ok(CreatedMessage { id })
    }

    async fn save_snapshot(&self, _org_id: &str, snapshot: SnapshotRecord, retain: usize) -> Result<()> {
        let mut snapshots = self.snapshots.lock().await;
        let list = snapshots.entry(snapshot.session_id.clone()).or_default();
        list.push(snapshot);
        if list.len() > retain {
            let drop_count = list.len() - retain;
            list.drain(0..drop_count);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeAgents {
    pub agents: Mutex<HashMap<String, AgentRecord>>,
}

impl FakeAgents {
    pub async fn seed(&self, agent: AgentRecord) {
        self.agents.lock().await.insert(agent.id.clone(), agent);
    }
}

#[async_trait]
impl Agents for FakeAgents {
    async fn get_agent(&self, org_id: &str, agent_id: &str) -> Result<Option<AgentRecord>> {
        let agents = self.agents.lock().await;
        Ok(agents.get(agent_id).filter(|a| a.org_id == org_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct FakeMcp {
    pub calls: Mutex<Vec<(String, String, String, Value)>>,
}

#[async_trait]
impl Mcp for FakeMcp {
    async fn call_tool(&self, server: &str, org_id: &str, tool: &str, arguments: Value) -> Result<Value> {
        self.calls.lock().await.push((
            server.to_string(),
            org_id.to_string(),
            tool.to_string(),
            arguments.clone(),
        ));
        Ok(serde_json::json!({ "server": server, "tool": tool, "echo": arguments }))
    }
}

#[derive(Debug, Default)]
pub struct FakeLogs {
    pub usage: Mutex<Vec<(String, String, DateTime<Utc>, DateTime<Utc>, UsageCounters)>>,
    pub audit: Mutex<Vec<ExecutionLogEntry>>,
}

#[async_trait]
impl Logs for FakeLogs {
    async fn record_usage(
        &self,
        org_id: &str,
        user_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        counters: UsageCounters,
    ) -> Result<()> {
        self.usage.lock().await.push((
            org_id.to_string(),
            user_id.to_string(),
            period_start,
            period_end,
            counters,
        ));
        Ok(())
    }

    async fn log_execution(&self, entry: ExecutionLogEntry) -> Result<()> {
        self.audit.lock().await.push(entry);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeEvolvedSkills {
    pub created: Mutex<Vec<EvolvedSkillRecord>>,
}

#[async_trait]
impl EvolvedSkills for FakeEvolvedSkills {
    async fn create(&self, record: EvolvedSkillRecord) -> Result<()> {
        self.created.lock().await.push(record);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeSkillPackages {
    pub definitions: Mutex<HashMap<String, SkillDefinition>>,
    pub packages: Mutex<HashMap<String, SkillPackageLocation>>,
}

impl FakeSkillPackages {
    pub async fn seed(&self, definition: SkillDefinition, location: SkillPackageLocation) {
        let def_id = definition.package_definition_id.clone();
        self.definitions.lock().await.insert(definition.id.clone(), definition);
        self.packages.lock().await.insert(def_id, location);
    }
}

#[async_trait]
impl SkillPackages for FakeSkillPackages {
    async fn find_definition_by_skill_id(&self, skill_id: &str) -> Result<Option<SkillDefinition>> {
        Ok(self.definitions.lock().await.get(skill_id).cloned())
    }

    async fn find_package_by_definition(
        &self,
        definition_id: &str,
    ) -> Result<Option<SkillPackageLocation>> {
        Ok(self.packages.lock().await.get(definition_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct FakeMemoryStore {
    pub rows: Mutex<Vec<(String, MemoryRow, Option<Vec<f32>>)>>,
}

#[async_trait]
impl MemoryStore for FakeMemoryStore {
    async fn upsert(&self, params: MemoryWriteParams) -> Result<()> {
        let row = MemoryRow {
            content: params.content,
            score: params.importance,
            metadata: params.metadata,
        };
        self.rows.lock().await.push((params.org_id, row, params.embedding));
        Ok(())
    }

    async fn vector_search(&self, org_id: &str, embedding: &[f32], top_k: usize) -> Result<Vec<MemoryRow>> {
        let rows = self.rows.lock().await;
        let mut scored: Vec<(f64, MemoryRow)> = rows
            .iter()
            .filter(|(org, _, vector)| org == org_id && vector.is_some())
            .map(|(_, row, vector)| {
                let similarity = cosine_similarity(embedding, vector.as_ref().unwrap());
                (similarity, row.clone())
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored
            .into_iter()
            .map(|(score, mut row)| {
                row.score = score;
                row
            })
            .collect())
    }

    async fn substring_search(&self, org_id: &str, query: &str, top_k: usize) -> Result<Vec<MemoryRow>> {
        let rows = self.rows.lock().await;
        let mut scored: Vec<MemoryRow> = rows
            .iter()
            .filter(|(org, _, _)| org == org_id)
            .filter_map(|(_, row, _)| {
                substring_fallback_score(&row.content, query).map(|score| MemoryRow {
                    content: row.content.clone(),
                    score,
                    metadata: row.metadata.clone(),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    f64::from(dot / (norm_a * norm_b))
}

#[derive(Debug, Default)]
pub struct FakeVmInstanceRegistry {
    pub ready: Mutex<HashMap<String, bool>>,
    pub tickets: Mutex<HashMap<(String, String), bool>>,
}

impl FakeVmInstanceRegistry {
    pub async fn allow_ticket(&self, user_id: &str, ticket: &str) {
        self.tickets
            .lock()
            .await
            .insert((user_id.to_string(), ticket.to_string()), true);
    }
}

#[async_trait]
impl VmInstanceRegistry for FakeVmInstanceRegistry {
    async fn mark_ready(&self, user_id: &str) -> Result<()> {
        self.ready.lock().await.insert(user_id.to_string(), true);
        Ok(())
    }

    async fn mark_disconnected(&self, user_id: &str) -> Result<()> {
        self.ready.lock().await.insert(user_id.to_string(), false);
        Ok(())
    }

    async fn touch_heartbeat(&self, _user_id: &str) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, user_id: &str) -> Result<bool> {
        Ok(self.ready.lock().await.contains_key(user_id))
    }

    async fn consume_ticket(&self, user_id: &str, ticket: &str) -> Result<bool> {
        let mut tickets = self.tickets.lock().await;
        Ok(tickets.remove(&(user_id.to_string(), ticket.to_string())).unwrap_or(false))
    }
}

#[derive(Debug, Default)]
pub struct FakeAuth {
    pub tokens: Mutex<HashMap<String, AuthenticatedIdentity>>,
}

impl FakeAuth {
    pub async fn register(&self, token: &str, identity: AuthenticatedIdentity) {
        self.tokens.lock().await.insert(token.to_string(), identity);
    }

    /// Convenience for tests that don't care about provider keys/routing
    /// config, just identity.
    pub async fn register_simple(&self, token: &str, user_id: &str, org_id: &str) {
        self.register(
            token,
            AuthenticatedIdentity {
                user_id: user_id.to_string(),
                org_id: org_id.to_string(),
                bearer_token: token.to_string(),
                provider_api_keys: HashMap::new(),
                llm_routing_config: Value::Null,
            },
        )
        .await;
    }
}

#[async_trait]
impl Auth for FakeAuth {
    async fn verify(&self, token: &str) -> Result<AuthenticatedIdentity> {
        self.tokens
            .lock()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("invalid or unknown bearer token"))
    }
}

#[derive(Debug, Default)]
pub struct FakeEmbeddingProvider {
    pub enabled: bool,
}

#[async_trait]
impl EmbeddingProvider for FakeEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if !self.enabled {
            return Ok(None);
        }
        // Deterministic stand-in vector derived from text length and byte
        // sum, enough for vector_search's cosine comparisons in tests.
        let sum: u32 = text.bytes().map(u32::from).sum();
        Ok(Some(vec![text.len() as f32, sum as f32]))
    }
}

/// A fully-wired [`Collaborators`] bundle backed entirely by the fakes in
/// this module, plus typed handles to each fake so tests can seed state
/// and assert on recorded calls.
pub struct FakeCollaborators {
    pub sessions: Arc<FakeSessions>,
    pub agents: Arc<FakeAgents>,
    pub mcp: Arc<FakeMcp>,
    pub logs: Arc<FakeLogs>,
    pub evolved_skills: Arc<FakeEvolvedSkills>,
    pub skill_packages: Arc<FakeSkillPackages>,
    pub memory: Arc<FakeMemoryStore>,
    pub vm_instances: Arc<FakeVmInstanceRegistry>,
    pub auth: Arc<FakeAuth>,
    pub embeddings: Arc<FakeEmbeddingProvider>,
    pub sse: Arc<SseRelay>,
}

impl FakeCollaborators {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(FakeSessions::default()),
            agents: Arc::new(FakeAgents::default()),
            mcp: Arc::new(FakeMcp::default()),
            logs: Arc::new(FakeLogs::default()),
            evolved_skills: Arc::new(FakeEvolvedSkills::default()),
            skill_packages: Arc::new(FakeSkillPackages::default()),
            memory: Arc::new(FakeMemoryStore::default()),
            vm_instances: Arc::new(FakeVmInstanceRegistry::default()),
            auth: Arc::new(FakeAuth::default()),
            embeddings: Arc::new(FakeEmbeddingProvider::default()),
            sse: Arc::new(SseRelay::new()),
        }
    }

    /// Build the type-erased [`Collaborators`] bundle the hub actually
    /// takes, cloning each `Arc` handle so the caller retains its typed
    /// references for assertions.
    #[must_use]
    pub fn bundle(&self) -> Collaborators {
        Collaborators {
            sessions: self.sessions.clone(),
            agents: self.agents.clone(),
            mcp: self.mcp.clone(),
            logs: self.logs.clone(),
            evolved_skills: self.evolved_skills.clone(),
            skill_packages: self.skill_packages.clone(),
            memory: self.memory.clone(),
            vm_instances: self.vm_instances.clone(),
            auth: self.auth.clone(),
            embeddings: self.embeddings.clone(),
            sse: self.sse.clone(),
        }
    }
}

impl Default for FakeCollaborators {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_sessions_round_trip() {
        let fake = FakeSessions::default();
        fake.seed(SessionRecord {
            id: "s1".to_string(),
            org_id: "org1".to_string(),
            agent_id: "a1".to_string(),
            extra: Value::Null,
        })
        .await;

        let found = fake.get_session("org1", "s1").await.unwrap();
        assert!(found.is_some());
        assert!(fake.get_session("org2", "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fake_sessions_snapshot_retention() {
        let fake = FakeSessions::default();
        for i in 0..4 {
            fake.save_snapshot(
                "org1",
                SnapshotRecord {
                    session_id: "s1".to_string(),
                    checkpoint: serde_json::json!({ "n": i }),
                    short_term_memory: Value::Null,
                    conversation_state: Value::Null,
                    file_manifest: Value::Null,
                },
                3,
            )
            .await
            .unwrap();
        }
        let snapshots = fake.snapshots.lock().await;
        assert_eq!(snapshots.get("s1").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fake_auth_unknown_token_errors() {
        let fake = FakeAuth::default();
        assert!(fake.verify("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_fake_embedding_provider_disabled_returns_none() {
        let fake = FakeEmbeddingProvider::default();
        assert!(fake.embed("hello").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fake_vm_instance_ticket_is_single_use() {
        let fake = FakeVmInstanceRegistry::default();
        fake.allow_ticket("u1", "t1").await;
        assert!(fake.consume_ticket("u1", "t1").await.unwrap());
        assert!(!fake.consume_ticket("u1", "t1").await.unwrap());
    }
}
