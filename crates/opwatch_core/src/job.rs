use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-assigned identity of one job run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    MetadataExtraction,
    RequirementExtraction,
    DirectoryGeneration,
    ResponseExtraction,
    ComplianceReview,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::MetadataExtraction,
        JobKind::RequirementExtraction,
        JobKind::DirectoryGeneration,
        JobKind::ResponseExtraction,
        JobKind::ComplianceReview,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            JobKind::MetadataExtraction => "metadata_extraction",
            JobKind::RequirementExtraction => "requirement_extraction",
            JobKind::DirectoryGeneration => "directory_generation",
            JobKind::ResponseExtraction => "response_extraction",
            JobKind::ComplianceReview => "compliance_review",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }

    /// Route (relative to the workspace) that starts a run of this kind.
    pub fn start_route(self) -> &'static str {
        match self {
            JobKind::MetadataExtraction => "metadata/extract",
            JobKind::RequirementExtraction => "requirements/extract",
            JobKind::DirectoryGeneration => "directory/generate",
            JobKind::ResponseExtraction => "responses/extract",
            JobKind::ComplianceReview => "compliance/review",
        }
    }

    /// Route (relative to the workspace) of the read model this kind produces.
    pub fn read_model_route(self) -> &'static str {
        match self {
            JobKind::MetadataExtraction => "metadata",
            JobKind::RequirementExtraction => "requirements",
            JobKind::DirectoryGeneration => "directory",
            JobKind::ResponseExtraction => "responses",
            JobKind::ComplianceReview => "compliance",
        }
    }

    /// Whether the server exposes partial results while a run is in flight.
    pub fn has_incremental_results(self) -> bool {
        !matches!(self, JobKind::MetadataExtraction)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[serde(alias = "queued")]
    Pending,
    #[serde(alias = "in_progress")]
    Running,
    #[serde(alias = "succeeded", alias = "completed")]
    Success,
    #[serde(alias = "error")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

/// One status observation of a run as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: RunId,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "result_json")]
    pub result: Option<Value>,
}

/// Outcome of applying a [`RunSnapshot`] to a [`JobHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Snapshot belongs to another run.
    Ignored,
    /// Nothing observable changed, or the handle was already terminal.
    Unchanged,
    Progressed,
    Succeeded,
    Failed,
}

/// Client-side mirror of one server-side run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub id: RunId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub result: Option<Value>,
}

impl JobHandle {
    /// Optimistic handle for a run the server just accepted.
    pub fn started(id: RunId, kind: JobKind) -> Self {
        Self {
            id,
            kind,
            status: JobStatus::Running,
            progress: Some(0.0),
            message: None,
            result: None,
        }
    }

    pub fn from_snapshot(kind: JobKind, snapshot: RunSnapshot) -> Self {
        let progress = match snapshot.status {
            JobStatus::Success => Some(1.0),
            _ => snapshot.progress.map(clamp_progress),
        };
        Self {
            id: snapshot.id,
            kind,
            status: snapshot.status,
            progress,
            message: snapshot.message,
            result: snapshot.result,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a status observation. Terminal states are absorbing, so
    /// `Succeeded` and `Failed` are returned at most once per handle.
    pub fn apply(&mut self, snapshot: &RunSnapshot) -> Transition {
        if snapshot.id != self.id {
            return Transition::Ignored;
        }
        if self.is_terminal() {
            return Transition::Unchanged;
        }

        let status = match (self.status, snapshot.status) {
            (JobStatus::Running, JobStatus::Pending) => JobStatus::Running,
            (_, next) => next,
        };
        let progress = match status {
            JobStatus::Success => Some(1.0),
            _ => snapshot.progress.map(clamp_progress).or(self.progress),
        };
        let message = snapshot.message.clone().or_else(|| self.message.clone());
        let result = snapshot.result.clone().or_else(|| self.result.clone());

        let changed = status != self.status
            || progress != self.progress
            || message != self.message
            || result != self.result;

        self.status = status;
        self.progress = progress;
        self.message = message;
        self.result = result;

        match status {
            JobStatus::Success => Transition::Succeeded,
            JobStatus::Failed => Transition::Failed,
            _ if changed => Transition::Progressed,
            _ => Transition::Unchanged,
        }
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_finite() {
        progress.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
