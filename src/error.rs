//! Error types shared by the agent and the collector

use std::{fmt, io};

use crate::storage::StoreError;

/// Errors raised while encoding or decoding wire messages
#[derive(Debug)]
pub enum ProtocolError {
    /// The underlying stream failed (including an unexpected EOF)
    Io(io::Error),

    /// A length prefix announced more bytes than any message can carry
    FrameTooLarge(u32),

    /// A violation payload did not have the fixed layout size
    InvalidLength { expected: usize, actual: usize },

    /// Metric tag outside of the known range
    InvalidMetric(u8),

    /// Configuration payload is not a valid JSON entry array
    Json(serde_json::Error),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Io(err) => write!(f, "I/O error: {}", err),
            ProtocolError::FrameTooLarge(len) => write!(f, "frame of {} bytes is too large", len),
            ProtocolError::InvalidLength { expected, actual } => write!(
                f,
                "invalid violation payload: expected {} bytes, got {}",
                expected, actual
            ),
            ProtocolError::InvalidMetric(raw) => write!(f, "unknown metric tag {}", raw),
            ProtocolError::Json(err) => write!(f, "malformed configuration: {}", err),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Io(err) => Some(err),
            ProtocolError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        ProtocolError::Io(err)
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Json(err)
    }
}

/// Errors reported by a tracer implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracerError {
    /// Registering a monitored name was refused
    MonitorRejected { name: String, reason: String },
}

impl fmt::Display for TracerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracerError::MonitorRejected { name, reason } => {
                write!(f, "tracer rejected monitor for {}: {}", name, reason)
            }
        }
    }
}

impl std::error::Error for TracerError {}

/// Errors surfaced by the agent runtime
#[derive(Debug)]
pub enum AgentError {
    /// Socket connect, read or write failed
    Io(io::Error),

    /// A message from the collector could not be decoded
    Protocol(ProtocolError),

    /// The tracer refused a setup or monitor operation
    Tracer(TracerError),

    /// The collector is unreachable and no cached configuration exists
    NoConfiguration(StoreError),

    /// A worker thread could not be spawned
    Spawn(io::Error),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Io(err) => write!(f, "connection error: {}", err),
            AgentError::Protocol(err) => write!(f, "protocol error: {}", err),
            AgentError::Tracer(err) => write!(f, "{}", err),
            AgentError::NoConfiguration(err) => write!(
                f,
                "collector unreachable and no cached configuration available: {}",
                err
            ),
            AgentError::Spawn(err) => write!(f, "failed to spawn worker thread: {}", err),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Io(err) | AgentError::Spawn(err) => Some(err),
            AgentError::Protocol(err) => Some(err),
            AgentError::Tracer(err) => Some(err),
            AgentError::NoConfiguration(err) => Some(err),
        }
    }
}

impl From<io::Error> for AgentError {
    fn from(err: io::Error) -> Self {
        AgentError::Io(err)
    }
}

impl From<ProtocolError> for AgentError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(err) => AgentError::Io(err),
            other => AgentError::Protocol(other),
        }
    }
}

impl From<TracerError> for AgentError {
    fn from(err: TracerError) -> Self {
        AgentError::Tracer(err)
    }
}
