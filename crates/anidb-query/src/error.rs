//! Query-planner error taxonomy (spec.md §7).

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Cache(#[from] anidb_cache::CacheError),
    #[error(transparent)]
    Engine(#[from] anidb_transport::EngineError),
    #[error(transparent)]
    Proto(#[from] anidb_proto::ProtoError),
    #[error("unexpected response code {0} for a FILE query")]
    UnexpectedCode(u16),
}
