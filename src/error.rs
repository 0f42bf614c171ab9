//! Error taxonomy for the question-answering core.
//!
//! Every component returns the same [`EngineError`] enum; the boundary layer
//! (CLI, or whatever transport an integrator puts in front) maps variants to
//! user-facing output. [`EngineError::Chat`] is the umbrella the orchestrator
//! wraps around any step failure so callers see a single error kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad caller arguments, rejected before any external call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The text extractor could not parse the uploaded bytes.
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// The embedding provider failed after retries were exhausted.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The generator returned an error or an empty completion.
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("{kind} {id} is not owned by the caller")]
    Ownership { kind: &'static str, id: i64 },

    /// Stored data contradicts itself (e.g. embedding count != chunk count).
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// Query and stored vectors disagree on dimensionality. This is a
    /// configuration fault, not a per-query condition.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Umbrella for any failure inside the chat pipeline; the original
    /// cause is preserved as the source.
    #[error("chat request failed")]
    Chat(#[source] Box<EngineError>),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Wrap an error from a chat pipeline step. Already-wrapped errors are
    /// passed through so the cause chain stays one level deep.
    pub fn chat(err: EngineError) -> Self {
        match err {
            chat @ Self::Chat(_) => chat,
            other => Self::Chat(Box::new(other)),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(anyhow::Error::new(err))
    }
}
