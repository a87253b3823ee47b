//! Heartbeat Supervisor (C4).
//!
//! A periodic job that only reads connection state and invokes the
//! hub's timeout handling; it never mutates a [`super::state::Connection`]
//! itself (§4.4) — that discipline keeps this module pure scheduling and
//! the actual teardown logic in one place (`Hub::close_and_remove`).

use std::sync::Arc;

use super::state::ConnectionStatus;
use super::Hub;

pub async fn run_supervisor(hub: Arc<Hub>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(hub.config.heartbeat_interval_secs));
    loop {
        ticker.tick().await;
        scan_once(&hub).await;
    }
}

async fn scan_once(hub: &Arc<Hub>) {
    let timeout_secs = hub.config.heartbeat_timeout_secs as f64;

    let candidates: Vec<String> = {
        let connections = hub.connections.read().await;
        let mut expired = Vec::new();
        for (user_id, connection) in connections.iter() {
            if connection.status().await != ConnectionStatus::Ready {
                continue;
            }
            if connection.seconds_since_heartbeat().await > timeout_secs {
                expired.push(user_id.clone());
            }
        }
        expired
    };

    for user_id in candidates {
        log::info!("heartbeat timeout for user {user_id}");
        hub.close_and_remove(&user_id, 4008, "Heartbeat timeout").await;
    }
}
