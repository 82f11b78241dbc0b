use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Workflow phase the extraction checkpoints live under.
pub const PHASE_EXTRACTION: &str = "extraction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    /// The run hit its per-run document bound; a follow-up run resumes
    /// from this checkpoint's offset.
    Continued,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Continued => "continued",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "continued" => Ok(Self::Continued),
            _ => Err(crate::Error::InvalidRunStatus(s.to_string())),
        }
    }
}

/// Durable position of one workflow run. `doc_offset` is the line index of
/// the first unprocessed document; it only ever moves forward, and never
/// past a batch that was not fully persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub workflow_id: String,
    pub run_id: String,
    pub phase: String,
    pub doc_offset: u64,
    pub processed: u64,
    pub entities: u64,
    pub relationships: u64,
    pub status: RunStatus,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointState {
    #[must_use]
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            phase: PHASE_EXTRACTION.to_string(),
            doc_offset: 0,
            processed: 0,
            entities: 0,
            relationships: 0,
            status: RunStatus::InProgress,
            updated_at: Utc::now(),
        }
    }

    /// Advance past a fully persisted batch.
    pub fn advance(&mut self, next_offset: u64, processed: u64, entities: u64, relationships: u64) {
        debug_assert!(next_offset >= self.doc_offset);
        self.doc_offset = next_offset;
        self.processed += processed;
        self.entities += entities;
        self.relationships += relationships;
        self.updated_at = Utc::now();
    }
}
