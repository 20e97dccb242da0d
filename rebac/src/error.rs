//! Error taxonomy for the ReBAC core. A subset of the core's overall
//! taxonomy (spec.md §7) relevant to tuple storage and relation evaluation.

#[derive(Clone, Debug, thiserror::Error)]
pub enum RebacError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("malformed request: {0}")]
    Usage(String),
    #[error("recursion depth exceeded evaluating relation '{relation}' on {object}")]
    DepthExceeded { relation: String, object: String },
}

pub type Result<T> = std::result::Result<T, RebacError>;
