//! Process configuration.
//!
//! Precedence, narrowest wins: CLI flag > `GATEWAY_*` env var > built-in
//! default. `Config::from_args` is the only constructor `main` uses; tests
//! build `Config` literals (or `Config::default()`) directly.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Tunables and process-level settings for one gateway instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the execution-plane WebSocket acceptor binds.
    pub bind: SocketAddr,
    /// `env_logger` filter string (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: String,
    /// Filesystem root skill package directories are resolved under (§6.6).
    pub skills_root: PathBuf,
    /// How often the heartbeat supervisor scans connections (§6.4).
    pub heartbeat_interval_secs: u64,
    /// Silence beyond this bound marks a connection timed out (§6.4).
    pub heartbeat_timeout_secs: u64,
    /// Max `pendingResults` entries per connection before eviction (§6.4).
    pub pending_result_cap: usize,
    /// Entries dropped per eviction pass, oldest-`updatedAt` first (§6.4).
    pub pending_result_evict_batch: usize,
    /// Max buffered process events per session (§6.4).
    pub process_buffer_cap: usize,
    /// Snapshots retained per session after `snapshot_sync` (§6.4).
    pub snapshot_retention: usize,
    /// Lower clamp for `memory_search`'s `top_k` (§6.4).
    pub memory_search_top_k_min: usize,
    /// Upper clamp for `memory_search`'s `top_k` (§6.4).
    pub memory_search_top_k_max: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8787".parse().expect("valid default bind addr"),
            log_level: "info".to_string(),
            skills_root: PathBuf::from("./skills"),
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 30,
            pending_result_cap: 200,
            pending_result_evict_batch: 50,
            process_buffer_cap: 500,
            snapshot_retention: 3,
            memory_search_top_k_min: 1,
            memory_search_top_k_max: 20,
        }
    }
}

impl Config {
    /// Build a `Config` from already-parsed CLI flags (see `main.rs`'s
    /// `clap` definitions), applying `GATEWAY_*` env var overrides to any
    /// field the caller did not pass explicitly.
    #[must_use]
    pub fn from_args(args: &crate::cli::ServeArgs) -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();

        if let Some(bind) = &args.bind {
            config.bind = bind.parse().unwrap_or(config.bind);
        }
        if let Some(level) = &args.log_level {
            config.log_level = level.clone();
        }
        if let Some(root) = &args.skills_root {
            config.skills_root = root.clone();
        }
        if let Some(v) = args.heartbeat_interval_secs {
            config.heartbeat_interval_secs = v;
        }
        if let Some(v) = args.heartbeat_timeout_secs {
            config.heartbeat_timeout_secs = v;
        }
        if let Some(v) = args.pending_result_cap {
            config.pending_result_cap = v;
        }
        if let Some(v) = args.pending_result_evict_batch {
            config.pending_result_evict_batch = v;
        }
        if let Some(v) = args.process_buffer_cap {
            config.process_buffer_cap = v;
        }
        if let Some(v) = args.snapshot_retention {
            config.snapshot_retention = v;
        }
        if let Some(v) = args.memory_search_top_k_min {
            config.memory_search_top_k_min = v;
        }
        if let Some(v) = args.memory_search_top_k_max {
            config.memory_search_top_k_max = v;
        }

        config
    }

    /// Apply any `GATEWAY_*` environment variable that is set, overwriting
    /// the current (default) value. Malformed values are ignored, leaving
    /// the prior value in place — consistent with the teacher's
    /// `apply_env_overrides` behavior of never hard-failing startup on a
    /// bad env var.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GATEWAY_BIND") {
            if let Ok(addr) = v.parse() {
                self.bind = addr;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_SKILLS_ROOT") {
            self.skills_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GATEWAY_HEARTBEAT_INTERVAL_SECS") {
            if let Ok(parsed) = v.parse() {
                self.heartbeat_interval_secs = parsed;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_HEARTBEAT_TIMEOUT_SECS") {
            if let Ok(parsed) = v.parse() {
                self.heartbeat_timeout_secs = parsed;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_PENDING_RESULT_CAP") {
            if let Ok(parsed) = v.parse() {
                self.pending_result_cap = parsed;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_PENDING_RESULT_EVICT_BATCH") {
            if let Ok(parsed) = v.parse() {
                self.pending_result_evict_batch = parsed;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_PROCESS_BUFFER_CAP") {
            if let Ok(parsed) = v.parse() {
                self.process_buffer_cap = parsed;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_SNAPSHOT_RETENTION") {
            if let Ok(parsed) = v.parse() {
                self.snapshot_retention = parsed;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_MEMORY_SEARCH_TOP_K_MIN") {
            if let Ok(parsed) = v.parse() {
                self.memory_search_top_k_min = parsed;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_MEMORY_SEARCH_TOP_K_MAX") {
            if let Ok(parsed) = v.parse() {
                self.memory_search_top_k_max = parsed;
            }
        }
    }

    /// Clamp a requested `top_k` into the configured `memory_search` bound.
    #[must_use]
    pub fn clamp_top_k(&self, top_k: i64) -> usize {
        let min = self.memory_search_top_k_min as i64;
        let max = self.memory_search_top_k_max as i64;
        top_k.clamp(min, max) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_spec_tunables() {
        let config = Config::default();
        assert_eq!(config.heartbeat_interval_secs, 5);
        assert_eq!(config.heartbeat_timeout_secs, 30);
        assert_eq!(config.pending_result_cap, 200);
        assert_eq!(config.pending_result_evict_batch, 50);
        assert_eq!(config.process_buffer_cap, 500);
        assert_eq!(config.snapshot_retention, 3);
        assert_eq!(config.memory_search_top_k_min, 1);
        assert_eq!(config.memory_search_top_k_max, 20);
    }

    #[test]
    fn test_clamp_top_k_below_min() {
        let config = Config::default();
        assert_eq!(config.clamp_top_k(0), 1);
    }

    #[test]
    fn test_clamp_top_k_above_max() {
        let config = Config::default();
        assert_eq!(config.clamp_top_k(100), 20);
    }

    #[test]
    fn test_clamp_top_k_within_range() {
        let config = Config::default();
        assert_eq!(config.clamp_top_k(7), 7);
    }
}
