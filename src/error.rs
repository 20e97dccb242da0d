//! Error taxonomy for the core (spec.md §7). All public operations return
//! `Result<T, NexusError>`; no exception-for-control-flow.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum NexusError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("permission denied: {subject} lacks {permission} on {object}")]
    PermissionDenied { subject: String, permission: String, object: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend unavailable: {reason}{}", .tag.as_ref().map(|t| format!(" ({t})")).unwrap_or_default())]
    BackendUnavailable { reason: String, tag: Option<BackendUnavailableTag> },
    #[error("operation cancelled")]
    Cancelled,
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
    #[error("usage error: {0}")]
    Usage(String),
}

/// Distinguishes why a backend call failed, so clients can decide how to
/// back off (spec.md §7 "Circuit-breaker open is reported as
/// `BackendUnavailable` with a distinguishing tag").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendUnavailableTag {
    CircuitOpen,
    RetriesExhausted,
    Timeout,
}

impl fmt::Display for BackendUnavailableTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CircuitOpen => "circuit-open",
            Self::RetriesExhausted => "retries-exhausted",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

impl NexusError {
    pub fn backend_unavailable(reason: impl Into<String>, tag: BackendUnavailableTag) -> Self {
        Self::BackendUnavailable {
            reason: reason.into(),
            tag: Some(tag),
        }
    }
}

impl From<nexus_rebac::RebacError> for NexusError {
    fn from(e: nexus_rebac::RebacError) -> Self {
        match e {
            nexus_rebac::RebacError::NotFound(m) => NexusError::NotFound(m),
            nexus_rebac::RebacError::AlreadyExists(m) => NexusError::AlreadyExists(m),
            nexus_rebac::RebacError::Usage(m) => NexusError::Usage(m),
            nexus_rebac::RebacError::DepthExceeded { relation, object } => {
                NexusError::Usage(format!("recursion depth exceeded on relation '{relation}' for {object}"))
            }
        }
    }
}

impl From<std::io::Error> for NexusError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => NexusError::NotFound(e.to_string()),
            std::io::ErrorKind::AlreadyExists => NexusError::AlreadyExists(e.to_string()),
            _ => NexusError::backend_unavailable(e.to_string(), BackendUnavailableTag::RetriesExhausted),
        }
    }
}

impl From<sled::Error> for NexusError {
    fn from(e: sled::Error) -> Self {
        NexusError::backend_unavailable(e.to_string(), BackendUnavailableTag::RetriesExhausted)
    }
}

pub type Result<T> = std::result::Result<T, NexusError>;
