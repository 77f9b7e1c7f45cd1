//! Error types shared across the crate.

use thiserror::Error;

/// Everything that can go wrong while configuring or driving a run.
#[derive(Debug, Error)]
pub enum MutenantError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("remote closed the connection")]
    RemoteEof,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("SASL authentication failed: {0}")]
    Sasl(String),

    #[error("trace exhausted before the run finished")]
    TraceExhausted,

    #[error("agent protocol error: {0}")]
    AgentProtocol(String),
}

pub type Result<T> = std::result::Result<T, MutenantError>;
