use std::collections::BTreeMap;

use crate::view_model::{JobRowView, SessionView};
use crate::{JobKind, Registry, WorkspaceId, WorkspaceState};

/// Controller state: which workspace is active plus the shared registry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    registry: Registry,
    active: Option<WorkspaceId>,
    /// Bumped on every activation; results of older activations are stale.
    generation: u64,
    /// Activation generation each slot was last started under.
    started: BTreeMap<(WorkspaceId, JobKind), u64>,
    dirty: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&WorkspaceId> {
        self.active.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn workspace(&self, id: &WorkspaceId) -> Option<&WorkspaceState> {
        self.registry.workspace(id)
    }

    pub fn view(&self) -> SessionView {
        let Some(active) = self.active.clone() else {
            return SessionView {
                dirty: self.dirty,
                ..SessionView::default()
            };
        };
        let workspace = self.registry.workspace(&active);
        let jobs = workspace
            .map(|state| {
                state
                    .jobs()
                    .map(|handle| JobRowView {
                        kind: handle.kind,
                        run_id: handle.id.clone(),
                        status: handle.status,
                        progress: handle.progress,
                        message: handle.message.clone(),
                        polling: self.registry.is_tracking(&active, handle.kind, &handle.id),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let cached_read_models: Vec<JobKind> = workspace
            .map(|state| state.read_models().map(|(kind, _)| kind).collect())
            .unwrap_or_default();

        SessionView {
            version: workspace.map(WorkspaceState::version).unwrap_or_default(),
            active: Some(active),
            jobs,
            cached_read_models,
            dirty: self.dirty,
        }
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub(crate) fn is_active(&self, workspace: &WorkspaceId) -> bool {
        self.active.as_ref() == Some(workspace)
    }

    pub(crate) fn is_current_activation(&self, workspace: &WorkspaceId, generation: u64) -> bool {
        self.is_active(workspace) && self.generation == generation
    }

    /// Makes `workspace` active and returns the new activation generation.
    pub(crate) fn activate(&mut self, workspace: WorkspaceId) -> u64 {
        self.registry.workspace_mut(&workspace);
        self.active = Some(workspace);
        self.generation += 1;
        self.generation
    }

    pub(crate) fn deactivate(&mut self) -> Option<WorkspaceId> {
        self.active.take()
    }

    pub(crate) fn record_start(&mut self, workspace: &WorkspaceId, kind: JobKind) {
        self.started
            .insert((workspace.clone(), kind), self.generation);
    }

    /// True when the slot was started after the current activation's
    /// latest-runs lookup went out.
    pub(crate) fn started_since_lookup(&self, workspace: &WorkspaceId, kind: JobKind) -> bool {
        self.started
            .get(&(workspace.clone(), kind))
            .is_some_and(|generation| *generation == self.generation)
    }

    pub(crate) fn forget_starts(&mut self, workspace: &WorkspaceId) {
        self.started.retain(|(id, _), _| id != workspace);
    }
}
