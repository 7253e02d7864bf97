//! Pipeline-facing error taxonomy (spec.md §7). An operation's error is
//! recorded against its record rather than unwinding the runtime.

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("hashing failed: {0}")]
    Hash(#[from] anidb_hash::HashError),
    #[error(transparent)]
    Query(#[from] anidb_query::QueryError),
    #[error(transparent)]
    Engine(#[from] anidb_transport::EngineError),
    #[error("file reported unknown to the server (NO SUCH FILE)")]
    NotFound,
    #[error("rename target already exists: {0}")]
    RenameTargetExists(String),
    #[error("local filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("required field {0:?} missing from server response")]
    MissingField(String),
}
