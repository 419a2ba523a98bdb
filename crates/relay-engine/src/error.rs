use std::net::SocketAddr;

use thiserror::Error;

/// Failures that stop an engine from starting or from running.
///
/// Errors on an individual session never surface here; they close that
/// session only.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create readiness poll: {0}")]
    Poll(#[source] std::io::Error),

    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to register listener: {0}")]
    Register(#[source] std::io::Error),

    #[error("failed to create stop waker: {0}")]
    Waker(#[source] std::io::Error),

    #[error("readiness wait failed: {0}")]
    Wait(#[source] std::io::Error),

    #[error("failed to resolve target {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("target {target} resolved to no addresses")]
    NoAddress { target: String },
}
