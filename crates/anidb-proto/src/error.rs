//! Protocol-level error taxonomy (spec.md §7, the codec-facing subset).

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("unexpected response code: expected {expected}, got {got} ({tag})")]
    BadCode { expected: u16, got: u16, tag: String },

    #[error("response body truncated: expected at least {expected} columns, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("malformed response line: {0:?}")]
    Malformed(String),

    #[error("field {0:?} is not a known field")]
    UnknownField(String),
}
