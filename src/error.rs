//! Error taxonomy for the gateway.
//!
//! Mirrors the error kinds spelled out by the gateway's design: malformed
//! frames are dropped (not errors that propagate), everything else gets a
//! variant here so call sites can match on kind instead of string content.

use thiserror::Error;

/// Errors raised by the connection hub and its collaborators.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// An outbound send was attempted on a connection that is absent or not
    /// `ready`.
    #[error("connection for user {0} is not ready")]
    NotReady(String),

    /// No connection exists for the given user id.
    #[error("no connection for user {0}")]
    NoConnection(String),

    /// The execution plane failed the auth handshake.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A collaborator call (persistence, MCP, embeddings, ...) failed.
    #[error("collaborator call failed: {0}")]
    Collaborator(#[from] anyhow::Error),

    /// The requested RPC method is not implemented.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Sending on the per-connection writer channel failed because the
    /// writer task has already exited.
    #[error("connection writer is closed")]
    WriterClosed,
}

impl GatewayError {
    /// The `{code, message}` shape used in RPC error responses (spec §4.5,
    /// §7).
    #[must_use]
    pub fn as_rpc_error(&self) -> (&'static str, String) {
        match self {
            Self::UnsupportedMethod(method) => {
                ("UNSUPPORTED_METHOD", format!("Unsupported method: {method}"))
            }
            other => ("REQUEST_FAILED", other.to_string()),
        }
    }
}
