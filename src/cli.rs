//! Command-line surface, mirrored 1:1 onto [`crate::config::Config`]'s
//! fields so CLI flags take precedence over env vars and defaults.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "gateway", about = "Execution-plane WebSocket gateway")]
pub struct ServeArgs {
    /// Address to bind the execution-plane WebSocket acceptor to.
    #[arg(long)]
    pub bind: Option<String>,

    /// `env_logger` filter string.
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Filesystem root skill packages are resolved under.
    #[arg(long = "skills-root")]
    pub skills_root: Option<PathBuf>,

    #[arg(long = "heartbeat-interval-secs")]
    pub heartbeat_interval_secs: Option<u64>,

    #[arg(long = "heartbeat-timeout-secs")]
    pub heartbeat_timeout_secs: Option<u64>,

    #[arg(long = "pending-result-cap")]
    pub pending_result_cap: Option<usize>,

    #[arg(long = "pending-result-evict-batch")]
    pub pending_result_evict_batch: Option<usize>,

    #[arg(long = "process-buffer-cap")]
    pub process_buffer_cap: Option<usize>,

    #[arg(long = "snapshot-retention")]
    pub snapshot_retention: Option<usize>,

    #[arg(long = "memory-search-top-k-min")]
    pub memory_search_top_k_min: Option<usize>,

    #[arg(long = "memory-search-top-k-max")]
    pub memory_search_top_k_max: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_no_flags_leaves_everything_none() {
        let args = ServeArgs::parse_from(["gateway"]);
        assert!(args.bind.is_none());
        assert!(args.heartbeat_timeout_secs.is_none());
    }

    #[test]
    fn test_parse_bind_and_numeric_flags() {
        let args = ServeArgs::parse_from([
            "gateway",
            "--bind",
            "127.0.0.1:9000",
            "--heartbeat-timeout-secs",
            "45",
        ]);
        assert_eq!(args.bind.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(args.heartbeat_timeout_secs, Some(45));
    }
}
