//! The per-record attribute bag and its state machine (spec.md §4.8):
//! `PRESENTED -> HASHED -> IDENTIFIED -> METADATA_READY -> RENAMED`, any
//! state may transition to `FAILED`.

use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Presented,
    Hashed,
    Identified,
    MetadataReady,
    Renamed,
    Failed,
}

/// One file moving through the pipeline. Failure of any operation aborts
/// this record's remaining pipeline but never touches its siblings.
#[derive(Debug, Clone)]
pub struct Record {
    pub path: PathBuf,
    pub state: RecordState,
    attributes: HashMap<String, String>,
    pub error: Option<String>,
}

impl Record {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RecordState::Presented,
            attributes: HashMap::new(),
            error: None,
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn is_failed(&self) -> bool {
        self.state == RecordState::Failed
    }

    pub fn fail(&mut self, err: impl std::fmt::Display) {
        log::warn!("record {:?} failed: {err}", self.path);
        self.state = RecordState::Failed;
        self.error = Some(err.to_string());
    }
}
