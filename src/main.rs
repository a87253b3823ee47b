//! Execution-plane gateway entry point.
//!
//! Parses CLI flags, builds [`Config`], wires up the collaborator
//! implementations, installs the process-wide [`Hub`] singleton, binds
//! the acceptor, and waits for a shutdown signal.

use anyhow::{Context, Result};
use clap::Parser;
use execplane_gateway::cli::ServeArgs;
use execplane_gateway::collaborators::Collaborators;
use execplane_gateway::config::Config;
use execplane_gateway::hub::Hub;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServeArgs::parse();
    let config = Config::from_args(&args);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    log::info!("binding execution-plane acceptor on {}", config.bind);
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    let collaborators = build_collaborators();
    let hub = Hub::init(Hub::new(config, collaborators));
    hub.start(listener).await;

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, draining connections");
    hub.shutdown().await;

    Ok(())
}

/// Persistence, auth, MCP, LLM and embedding backends are all explicitly
/// out of scope (§1): the core only depends on the trait seam in
/// `execplane_gateway::collaborators::traits`. A deployment that embeds
/// this gateway supplies its own implementations of those traits; absent
/// one, `serve` runs against the in-memory fakes, which is enough to
/// exercise the protocol and concurrency surface end-to-end.
fn build_collaborators() -> Collaborators {
    execplane_gateway::collaborators::testing::FakeCollaborators::new().bundle()
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
