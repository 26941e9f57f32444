use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{JobHandle, JobKind, RunId, RunSnapshot, Transition};

/// Identity of a logical workspace (a project on the server).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkspaceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cached read-only data produced by a job kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadModel {
    pub value: Value,
    /// Fetched while the producing run was still in flight.
    pub partial: bool,
    pub run_id: Option<RunId>,
}

/// Job slots and cached read models of one workspace.
///
/// Every mutation bumps `version`, so readers can tell whether the copy they
/// hold is current.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkspaceState {
    jobs: BTreeMap<JobKind, JobHandle>,
    read_models: BTreeMap<JobKind, ReadModel>,
    version: u64,
}

impl WorkspaceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(&self, kind: JobKind) -> Option<&JobHandle> {
        self.jobs.get(&kind)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobHandle> {
        self.jobs.values()
    }

    pub fn read_model(&self, kind: JobKind) -> Option<&ReadModel> {
        self.read_models.get(&kind)
    }

    pub fn read_models(&self) -> impl Iterator<Item = (JobKind, &ReadModel)> {
        self.read_models.iter().map(|(kind, model)| (*kind, model))
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// True when an authoritative read model for `run_id` is cached.
    pub fn has_final_read_model(&self, kind: JobKind, run_id: &RunId) -> bool {
        self.read_models
            .get(&kind)
            .is_some_and(|model| !model.partial && model.run_id.as_ref() == Some(run_id))
    }

    /// Installs `handle` as the authoritative handle for its kind, returning
    /// the superseded one.
    pub(crate) fn replace_job(&mut self, handle: JobHandle) -> Option<JobHandle> {
        self.version += 1;
        self.jobs.insert(handle.kind, handle)
    }

    pub(crate) fn apply_run(&mut self, kind: JobKind, snapshot: &RunSnapshot) -> Transition {
        let Some(handle) = self.jobs.get_mut(&kind) else {
            return Transition::Ignored;
        };
        let transition = handle.apply(snapshot);
        if !matches!(transition, Transition::Ignored | Transition::Unchanged) {
            self.version += 1;
        }
        transition
    }

    pub(crate) fn remove_job(&mut self, kind: JobKind) -> Option<JobHandle> {
        let removed = self.jobs.remove(&kind);
        if removed.is_some() {
            self.version += 1;
        }
        removed
    }

    pub(crate) fn store_read_model(&mut self, kind: JobKind, model: ReadModel) {
        self.version += 1;
        self.read_models.insert(kind, model);
    }
}
