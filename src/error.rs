use thiserror::Error;

/// Failure reported by a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("duplicate result for {0}")]
    Duplicate(String),
}

/// Failure surfaced to callers of the leaderboard, performance and results services.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("upstream failure while {context}")]
    Upstream {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl EngineError {
    /// Logs the backend detail and wraps it behind a generic message.
    pub fn upstream(context: &'static str, source: StoreError) -> Self {
        tracing::error!(error = %source, context, "persistence collaborator failed");
        Self::Upstream { context, source }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
