//! Bundles the narrow collaborator surface (§6.5) the hub's dispatch code
//! depends on, plus the handful of pure helpers (memory-type
//! normalization, the substring-search scoring heuristic) that sit right
//! at that boundary.

pub mod testing;
pub mod traits;

use std::sync::Arc;

use crate::relay::SseRelay;
use traits::{
    Agents, Auth, EmbeddingProvider, EvolvedSkills, Logs, Mcp, MemoryStore, Sessions,
    SkillPackages, VmInstanceRegistry,
};

/// One handle per collaborator, shared (via `Arc`) across every connection
/// task and the hub itself.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn Sessions>,
    pub agents: Arc<dyn Agents>,
    pub mcp: Arc<dyn Mcp>,
    pub logs: Arc<dyn Logs>,
    pub evolved_skills: Arc<dyn EvolvedSkills>,
    pub skill_packages: Arc<dyn SkillPackages>,
    pub memory: Arc<dyn MemoryStore>,
    pub vm_instances: Arc<dyn VmInstanceRegistry>,
    pub auth: Arc<dyn Auth>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub sse: Arc<SseRelay>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Normalize a `memory_write` caller's `memory_type` (§4.8): lowercase and
/// trim; `long_term`/`long-term` map to `semantic`; the canonical set
/// passes through unchanged; anything else maps to `episodic`.
#[must_use]
pub fn normalize_memory_type(raw: &str) -> &'static str {
    match raw.trim().to_lowercase().as_str() {
        "long_term" | "long-term" => "semantic",
        "episodic" => "episodic",
        "semantic" => "semantic",
        "procedural" => "procedural",
        _ => "episodic",
    }
}

/// The positional-score heuristic used when `memory_search` falls back to
/// a substring match: `1 / (1 + position of first match)`, case
/// insensitive. Returns `None` when `query` does not occur in `content` at
/// all, so callers can exclude non-matching rows per §4.5.
#[must_use]
pub fn substring_fallback_score(content: &str, query: &str) -> Option<f64> {
    if query.is_empty() {
        return None;
    }
    let haystack = content.to_lowercase();
    let needle = query.to_lowercase();
    haystack
        .find(&needle)
        .map(|position| 1.0 / (1.0 + position as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_memory_type_long_term_variants() {
        assert_eq!(normalize_memory_type("long_term"), "semantic");
        assert_eq!(normalize_memory_type("long-term"), "semantic");
        assert_eq!(normalize_memory_type("LONG_TERM"), "semantic");
    }

    #[test]
    fn test_normalize_memory_type_canonical_passthrough() {
        assert_eq!(normalize_memory_type("episodic"), "episodic");
        assert_eq!(normalize_memory_type("semantic"), "semantic");
        assert_eq!(normalize_memory_type("procedural"), "procedural");
    }

    #[test]
    fn test_normalize_memory_type_unknown_defaults_to_episodic() {
        assert_eq!(normalize_memory_type("whatever"), "episodic");
        assert_eq!(normalize_memory_type(""), "episodic");
    }

    #[test]
    fn test_normalize_memory_type_is_idempotent() {
        for input in ["long_term", "episodic", "garbage", "  SEMANTIC  "] {
            let once = normalize_memory_type(input);
            let twice = normalize_memory_type(once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_substring_fallback_score_earlier_match_scores_higher() {
        let early = substring_fallback_score("hello world", "hello").unwrap();
        let late = substring_fallback_score("say hello world", "hello").unwrap();
        assert!(early > late);
    }

    #[test]
    fn test_substring_fallback_score_no_match_is_none() {
        assert!(substring_fallback_score("hello world", "xyz").is_none());
    }

    #[test]
    fn test_substring_fallback_score_case_insensitive() {
        assert!(substring_fallback_score("Hello World", "hello").is_some());
    }
}
