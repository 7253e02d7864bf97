//! Sequential per-record pipeline runtime (C8).

pub mod error;
pub mod operations;
pub mod record;
pub mod rename;
pub mod runtime;

pub use error::PipelineError;
pub use operations::{GetFileInfoOperation, HashOperation, MylistAddOperation, Operation, OperationContext, RenameOperation};
pub use record::{Record, RecordState};
pub use rename::{format_aired, format_name, RenameConfig, RenameMode};
pub use runtime::{Pipeline, RecordOutcome};
