use crate::{JobKind, JobStatus, RunId, WorkspaceId};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionView {
    pub active: Option<WorkspaceId>,
    /// Version of the active workspace state this view was built from.
    pub version: u64,
    pub jobs: Vec<JobRowView>,
    pub cached_read_models: Vec<JobKind>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRowView {
    pub kind: JobKind,
    pub run_id: RunId,
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub polling: bool,
}
