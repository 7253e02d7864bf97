//! Cache-store error taxonomy (spec.md §7, the `CacheError` subset).

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("local cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}
