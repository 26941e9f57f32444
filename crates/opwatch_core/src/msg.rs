use std::collections::BTreeMap;

use serde_json::Value;

use crate::{JobKind, PollTicket, RegistrySnapshot, RunId, RunSnapshot, WorkspaceId};

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// User switched to a workspace (or re-selected the active one).
    SelectWorkspace(WorkspaceId),
    /// Batched latest-run lookup finished for an activation.
    LatestRunsLoaded {
        workspace: WorkspaceId,
        generation: u64,
        runs: BTreeMap<JobKind, Option<RunSnapshot>>,
    },
    /// Batched latest-run lookup failed for an activation.
    LatestRunsFailed {
        workspace: WorkspaceId,
        generation: u64,
        message: String,
    },
    /// User asked to (re)start a job kind.
    StartJob { workspace: WorkspaceId, kind: JobKind },
    /// Server accepted a start request.
    JobAccepted {
        workspace: WorkspaceId,
        kind: JobKind,
        run_id: RunId,
    },
    /// Server refused a start request, or it never reached the server.
    JobRejected {
        workspace: WorkspaceId,
        kind: JobKind,
        message: String,
    },
    /// A poller observed the current status of its run.
    PollObserved {
        ticket: PollTicket,
        snapshot: RunSnapshot,
    },
    /// A read model fetch finished.
    ReadModelLoaded {
        workspace: WorkspaceId,
        kind: JobKind,
        run_id: Option<RunId>,
        partial: bool,
        value: Value,
    },
    /// The workspace was deleted on the server.
    DeleteWorkspace(WorkspaceId),
    /// Seed workspace states from a persisted snapshot.
    RestoreSnapshot(RegistrySnapshot),
    /// Fallback for placeholder wiring.
    NoOp,
}
