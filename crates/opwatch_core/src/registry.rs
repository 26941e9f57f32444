use std::collections::BTreeMap;

use crate::{JobHandle, JobKind, ReadModel, RunId, WorkspaceId, WorkspaceState};

/// Identity a poller was launched against.
///
/// `serial` is unique per launch, so two pollers tracking the same run are
/// still distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PollTicket {
    pub workspace: WorkspaceId,
    pub kind: JobKind,
    pub run_id: RunId,
    pub serial: u64,
}

/// Keyed store of workspace states plus the live poller ticket of every
/// (workspace, job kind) slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Registry {
    workspaces: BTreeMap<WorkspaceId, WorkspaceState>,
    pollers: BTreeMap<WorkspaceId, BTreeMap<JobKind, PollTicket>>,
    next_serial: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workspace(&self, id: &WorkspaceId) -> Option<&WorkspaceState> {
        self.workspaces.get(id)
    }

    pub fn poller(&self, workspace: &WorkspaceId, kind: JobKind) -> Option<&PollTicket> {
        self.pollers.get(workspace).and_then(|slots| slots.get(&kind))
    }

    pub fn pollers(&self, workspace: &WorkspaceId) -> impl Iterator<Item = &PollTicket> {
        self.pollers.get(workspace).into_iter().flat_map(|slots| slots.values())
    }

    /// True while `ticket` is the registered poller of its slot.
    pub fn is_current(&self, ticket: &PollTicket) -> bool {
        self.poller(&ticket.workspace, ticket.kind) == Some(ticket)
    }

    /// True when the slot already has a live poller for `run_id`.
    pub fn is_tracking(&self, workspace: &WorkspaceId, kind: JobKind, run_id: &RunId) -> bool {
        self.poller(workspace, kind)
            .is_some_and(|ticket| &ticket.run_id == run_id)
    }

    /// Lazily creates the workspace state on first access.
    pub(crate) fn workspace_mut(&mut self, id: &WorkspaceId) -> &mut WorkspaceState {
        self.workspaces.entry(id.clone()).or_default()
    }

    /// Registers a new poller for the slot, returning it together with the
    /// ticket it displaced.
    pub(crate) fn issue_ticket(
        &mut self,
        workspace: &WorkspaceId,
        kind: JobKind,
        run_id: RunId,
    ) -> (PollTicket, Option<PollTicket>) {
        self.next_serial += 1;
        let ticket = PollTicket {
            workspace: workspace.clone(),
            kind,
            run_id,
            serial: self.next_serial,
        };
        let displaced = self
            .pollers
            .entry(workspace.clone())
            .or_default()
            .insert(kind, ticket.clone());
        (ticket, displaced)
    }

    /// Removes `ticket` if it is still the registered one.
    pub(crate) fn retire_ticket(&mut self, ticket: &PollTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        if let Some(slots) = self.pollers.get_mut(&ticket.workspace) {
            slots.remove(&ticket.kind);
            if slots.is_empty() {
                self.pollers.remove(&ticket.workspace);
            }
        }
        true
    }

    pub(crate) fn drain_pollers(&mut self, workspace: &WorkspaceId) -> Vec<PollTicket> {
        self.pollers
            .remove(workspace)
            .map(|slots| slots.into_values().collect())
            .unwrap_or_default()
    }

    /// Drops the workspace entirely, returning the tickets that must be cancelled.
    pub(crate) fn evict(&mut self, workspace: &WorkspaceId) -> Vec<PollTicket> {
        self.workspaces.remove(workspace);
        self.drain_pollers(workspace)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            workspaces: self
                .workspaces
                .iter()
                .map(|(id, state)| {
                    let snapshot = WorkspaceSnapshot {
                        jobs: state.jobs().cloned().collect(),
                        read_models: state
                            .read_models()
                            .map(|(kind, model)| (kind, model.clone()))
                            .collect(),
                    };
                    (id.clone(), snapshot)
                })
                .collect(),
        }
    }

    /// Seeds workspaces from a snapshot. Workspaces already present in
    /// memory are newer than any snapshot and are left alone.
    pub(crate) fn restore(&mut self, snapshot: RegistrySnapshot) -> usize {
        let mut restored = 0;
        for (id, saved) in snapshot.workspaces {
            if self.workspaces.contains_key(&id) {
                continue;
            }
            let state = self.workspace_mut(&id);
            for handle in saved.jobs {
                state.replace_job(handle);
            }
            for (kind, model) in saved.read_models {
                state.store_read_model(kind, model);
            }
            restored += 1;
        }
        restored
    }
}

/// Plain-data copy of every workspace state, used for persistence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegistrySnapshot {
    pub workspaces: BTreeMap<WorkspaceId, WorkspaceSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkspaceSnapshot {
    pub jobs: Vec<JobHandle>,
    pub read_models: Vec<(JobKind, ReadModel)>,
}
