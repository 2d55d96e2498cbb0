//! # Error Taxonomy
//!
//! Purpose: Separate transport failures from content failures so callers can
//! decide what is worth retrying.
//!
//! ## Design Principles
//! 1. **Layered Failures**: Transport, framing, and semantic errors never share
//!    a variant.
//! 2. **Per-Service Outcomes**: Node-reported service failures have their own
//!    small type so they can travel inside successful batch results.

use std::io;

use serde::Serialize;
use thiserror::Error;

/// Result type for the node client.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors surfaced by the node client.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Peer unreachable, reset, closed mid-read, or the connection is closed
    /// with reconnect disabled.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),
    /// Connected, but the node sent content that does not parse.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Reply parsed but was not what the command promises.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Caller supplied an unusable service argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The node does not know the service.
    #[error("unknown service: {0}")]
    UnknownService(String),
    /// The service plugin exited abnormally on the node.
    #[error("bad exit from service: {0}")]
    BadExit(String),
}

impl NodeError {
    pub(crate) fn not_connected() -> Self {
        NodeError::Connection(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection closed and reconnect is disabled",
        ))
    }

    pub(crate) fn peer_closed() -> Self {
        NodeError::Connection(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "node closed the connection",
        ))
    }

    /// True for transport-level failures.
    pub fn is_connection(&self) -> bool {
        matches!(self, NodeError::Connection(_))
    }

    /// True when the node reported a per-service failure.
    pub fn is_service_failure(&self) -> bool {
        matches!(self, NodeError::UnknownService(_) | NodeError::BadExit(_))
    }
}

/// Failure a node reports for a single service inside a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFailure {
    /// `# Unknown service`
    UnknownService,
    /// `# Bad exit`
    BadExit,
}

impl ServiceFailure {
    /// Converts the failure into the matching error for `service`.
    pub fn into_error(self, service: impl Into<String>) -> NodeError {
        match self {
            ServiceFailure::UnknownService => NodeError::UnknownService(service.into()),
            ServiceFailure::BadExit => NodeError::BadExit(service.into()),
        }
    }
}
