use crate::{JobHandle, JobKind, PollTicket, RunId, WorkspaceId};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Cancel (or release) the poller registered under this ticket.
    StopPoller(PollTicket),
    StartPoller(PollTicket),
    FetchLatestRuns {
        workspace: WorkspaceId,
        generation: u64,
    },
    SubmitJob {
        workspace: WorkspaceId,
        kind: JobKind,
    },
    /// Best-effort when `partial`; the result comes back as `Msg::ReadModelLoaded`.
    RefreshReadModel {
        workspace: WorkspaceId,
        kind: JobKind,
        run_id: Option<RunId>,
        partial: bool,
    },
    Notify(SessionEvent),
}

/// Observable outcome of the session, forwarded to the embedding UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    WorkspaceActivated {
        workspace: WorkspaceId,
    },
    WorkspaceDeleted {
        workspace: WorkspaceId,
    },
    JobUpdated {
        workspace: WorkspaceId,
        handle: JobHandle,
    },
    /// Fired exactly once per run that reaches `success`.
    JobCompleted {
        workspace: WorkspaceId,
        handle: JobHandle,
    },
    /// Fired exactly once per run that reaches `failed`.
    JobFailed {
        workspace: WorkspaceId,
        handle: JobHandle,
        message: String,
    },
    JobStartFailed {
        workspace: WorkspaceId,
        kind: JobKind,
        message: String,
    },
    LatestRunsFailed {
        workspace: WorkspaceId,
        message: String,
    },
    ReadModelUpdated {
        workspace: WorkspaceId,
        kind: JobKind,
        partial: bool,
    },
}
