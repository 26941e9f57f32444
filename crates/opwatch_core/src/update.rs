use std::collections::BTreeMap;

use opwatch_logging::{op_debug, op_info, op_warn};
use serde_json::Value;

use crate::{
    Effect, JobHandle, JobKind, JobStatus, Msg, PollTicket, ReadModel, RunId, RunSnapshot,
    SessionEvent, SessionState, Transition, WorkspaceId,
};

/// Pure update function: applies a message to state and returns any effects.
///
/// Every result that arrives from IO is re-validated here against the
/// current active workspace and poller tickets before it may write.
pub fn update(mut state: SessionState, msg: Msg) -> (SessionState, Vec<Effect>) {
    let effects = match msg {
        Msg::SelectWorkspace(workspace) => select_workspace(&mut state, workspace),
        Msg::LatestRunsLoaded {
            workspace,
            generation,
            runs,
        } => apply_latest_runs(&mut state, workspace, generation, runs),
        Msg::LatestRunsFailed {
            workspace,
            generation,
            message,
        } => {
            if !state.is_current_activation(&workspace, generation) {
                op_debug!("Ignoring stale latest-runs failure for {}", workspace);
                return (state, Vec::new());
            }
            op_warn!("Could not load job status for {}: {}", workspace, message);
            clear_untracked_jobs(&mut state, &workspace);
            state.mark_dirty();
            vec![Effect::Notify(SessionEvent::LatestRunsFailed { workspace, message })]
        }
        Msg::StartJob { workspace, kind } => {
            if state.is_active(&workspace) {
                vec![Effect::SubmitJob { workspace, kind }]
            } else {
                op_debug!("Ignoring start of {} for inactive workspace {}", kind, workspace);
                Vec::new()
            }
        }
        Msg::JobAccepted {
            workspace,
            kind,
            run_id,
        } => accept_job(&mut state, workspace, kind, run_id),
        Msg::JobRejected {
            workspace,
            kind,
            message,
        } => {
            op_warn!("Starting {} in {} failed: {}", kind, workspace, message);
            vec![Effect::Notify(SessionEvent::JobStartFailed {
                workspace,
                kind,
                message,
            })]
        }
        Msg::PollObserved { ticket, snapshot } => observe_poll(&mut state, ticket, snapshot),
        Msg::ReadModelLoaded {
            workspace,
            kind,
            run_id,
            partial,
            value,
        } => store_read_model(&mut state, workspace, kind, run_id, partial, value),
        Msg::DeleteWorkspace(workspace) => delete_workspace(&mut state, workspace),
        Msg::RestoreSnapshot(snapshot) => {
            let restored = state.registry_mut().restore(snapshot);
            if restored > 0 {
                op_info!("Restored {} workspaces from snapshot", restored);
                state.mark_dirty();
            }
            Vec::new()
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

fn select_workspace(state: &mut SessionState, workspace: WorkspaceId) -> Vec<Effect> {
    let mut effects = Vec::new();
    if state.is_active(&workspace) {
        // Re-selecting keeps live pollers; the refresh below only fills gaps.
        op_debug!("Refreshing active workspace {}", workspace);
    } else {
        if let Some(previous) = state.deactivate() {
            let cancelled = state.registry_mut().drain_pollers(&previous);
            op_info!(
                "Leaving workspace {} ({} pollers cancelled)",
                previous,
                cancelled.len()
            );
            effects.extend(cancelled.into_iter().map(Effect::StopPoller));
        }
        op_info!("Activating workspace {}", workspace);
    }

    let generation = state.activate(workspace.clone());
    state.mark_dirty();
    effects.push(Effect::Notify(SessionEvent::WorkspaceActivated {
        workspace: workspace.clone(),
    }));
    effects.push(Effect::FetchLatestRuns {
        workspace,
        generation,
    });
    effects
}

fn apply_latest_runs(
    state: &mut SessionState,
    workspace: WorkspaceId,
    generation: u64,
    runs: BTreeMap<JobKind, Option<RunSnapshot>>,
) -> Vec<Effect> {
    if !state.is_current_activation(&workspace, generation) {
        op_debug!(
            "Discarding latest runs of {} from stale activation {}",
            workspace,
            generation
        );
        return Vec::new();
    }

    let mut effects = Vec::new();
    for (kind, snapshot) in runs {
        if let Some(snapshot) = snapshot {
            effects.extend(adopt_run(state, &workspace, kind, snapshot));
        }
    }
    clear_unpolled_active_jobs(state, &workspace);
    state.mark_dirty();
    effects
}

/// Brings one slot in line with the server's latest run for it.
fn adopt_run(
    state: &mut SessionState,
    workspace: &WorkspaceId,
    kind: JobKind,
    snapshot: RunSnapshot,
) -> Vec<Effect> {
    let started_since_lookup = state.started_since_lookup(workspace, kind);
    let registry = state.registry_mut();
    let run_id = snapshot.id.clone();
    let mut effects = Vec::new();

    let same_run = registry
        .workspace(workspace)
        .and_then(|ws| ws.job(kind))
        .is_some_and(|handle| handle.id == run_id);

    // The lookup may predate a run started since. Such a run, or any polled
    // run facing a finished one, is kept.
    let polled = registry.poller(workspace, kind).is_some();
    if !same_run && (started_since_lookup || (polled && snapshot.status.is_terminal())) {
        op_debug!(
            "Keeping polled {} in {} over server run {}",
            kind,
            workspace,
            run_id
        );
        return effects;
    }

    if same_run {
        let ws = registry.workspace_mut(workspace);
        let transition = ws.apply_run(kind, &snapshot);
        if let Some(handle) = ws.job(kind).cloned() {
            effects.extend(transition_effects(workspace, transition, handle));
        }
    } else {
        if let Some(superseded) = registry.poller(workspace, kind).cloned() {
            registry.retire_ticket(&superseded);
            effects.push(Effect::StopPoller(superseded));
        }
        let handle = JobHandle::from_snapshot(kind, snapshot);
        registry.workspace_mut(workspace).replace_job(handle.clone());
        effects.push(Effect::Notify(SessionEvent::JobUpdated {
            workspace: workspace.clone(),
            handle,
        }));
    }

    let status = registry
        .workspace(workspace)
        .and_then(|ws| ws.job(kind))
        .map(|handle| handle.status);
    match status {
        Some(status) if !status.is_terminal() => {
            if !registry.is_tracking(workspace, kind, &run_id) {
                let (ticket, displaced) = registry.issue_ticket(workspace, kind, run_id);
                effects.extend(displaced.map(Effect::StopPoller));
                op_info!(
                    "Resuming poller for {} in {} (run {})",
                    kind,
                    workspace,
                    ticket.run_id
                );
                effects.push(Effect::StartPoller(ticket));
            }
        }
        Some(status) => {
            if let Some(finished) = registry.poller(workspace, kind).cloned() {
                registry.retire_ticket(&finished);
                effects.push(Effect::StopPoller(finished));
            }
            let cached = registry
                .workspace(workspace)
                .is_some_and(|ws| ws.has_final_read_model(kind, &run_id));
            let refresh_queued = effects
                .iter()
                .any(|effect| matches!(effect, Effect::RefreshReadModel { .. }));
            if status == JobStatus::Success && !cached && !refresh_queued {
                effects.push(Effect::RefreshReadModel {
                    workspace: workspace.clone(),
                    kind,
                    run_id: Some(run_id),
                    partial: false,
                });
            }
        }
        None => {}
    }
    effects
}

fn accept_job(
    state: &mut SessionState,
    workspace: WorkspaceId,
    kind: JobKind,
    run_id: RunId,
) -> Vec<Effect> {
    if !state.is_active(&workspace) {
        op_debug!(
            "Run {} of {} accepted after leaving {}; it is picked up on return",
            run_id,
            kind,
            workspace
        );
        return Vec::new();
    }

    op_info!("Started {} in {} (run {})", kind, workspace, run_id);
    state.record_start(&workspace, kind);
    let registry = state.registry_mut();
    let handle = JobHandle::started(run_id.clone(), kind);
    registry.workspace_mut(&workspace).replace_job(handle.clone());
    let (ticket, displaced) = registry.issue_ticket(&workspace, kind, run_id);

    let mut effects: Vec<Effect> = displaced.map(Effect::StopPoller).into_iter().collect();
    effects.push(Effect::Notify(SessionEvent::JobUpdated { workspace, handle }));
    effects.push(Effect::StartPoller(ticket));
    state.mark_dirty();
    effects
}

fn observe_poll(state: &mut SessionState, ticket: PollTicket, snapshot: RunSnapshot) -> Vec<Effect> {
    if !state.is_active(&ticket.workspace) || !state.registry().is_current(&ticket) {
        op_debug!(
            "Discarding stale poll result for {} in {} (run {})",
            ticket.kind,
            ticket.workspace,
            ticket.run_id
        );
        return Vec::new();
    }

    let registry = state.registry_mut();
    let ws = registry.workspace_mut(&ticket.workspace);
    let transition = ws.apply_run(ticket.kind, &snapshot);
    let handle = ws.job(ticket.kind).cloned();

    let mut effects = Vec::new();
    let finished = snapshot.status.is_terminal()
        || handle.as_ref().map_or(true, JobHandle::is_terminal);
    if finished {
        registry.retire_ticket(&ticket);
        effects.push(Effect::StopPoller(ticket.clone()));
    }
    if let Some(handle) = handle {
        effects.extend(transition_effects(&ticket.workspace, transition, handle));
    }
    if !matches!(transition, Transition::Ignored | Transition::Unchanged) {
        state.mark_dirty();
    }
    effects
}

fn transition_effects(
    workspace: &WorkspaceId,
    transition: Transition,
    handle: JobHandle,
) -> Vec<Effect> {
    match transition {
        Transition::Progressed => {
            let partial_refresh =
                handle
                    .kind
                    .has_incremental_results()
                    .then(|| Effect::RefreshReadModel {
                        workspace: workspace.clone(),
                        kind: handle.kind,
                        run_id: Some(handle.id.clone()),
                        partial: true,
                    });
            let mut effects = vec![Effect::Notify(SessionEvent::JobUpdated {
                workspace: workspace.clone(),
                handle,
            })];
            effects.extend(partial_refresh);
            effects
        }
        Transition::Succeeded => {
            op_info!("{} in {} succeeded (run {})", handle.kind, workspace, handle.id);
            let refresh = Effect::RefreshReadModel {
                workspace: workspace.clone(),
                kind: handle.kind,
                run_id: Some(handle.id.clone()),
                partial: false,
            };
            vec![
                Effect::Notify(SessionEvent::JobCompleted {
                    workspace: workspace.clone(),
                    handle,
                }),
                refresh,
            ]
        }
        Transition::Failed => {
            let message = handle
                .message
                .clone()
                .unwrap_or_else(|| format!("{} failed", handle.kind));
            op_warn!("{} in {} failed: {}", handle.kind, workspace, message);
            vec![Effect::Notify(SessionEvent::JobFailed {
                workspace: workspace.clone(),
                handle,
                message,
            })]
        }
        Transition::Ignored | Transition::Unchanged => Vec::new(),
    }
}

fn store_read_model(
    state: &mut SessionState,
    workspace: WorkspaceId,
    kind: JobKind,
    run_id: Option<RunId>,
    partial: bool,
    value: Value,
) -> Vec<Effect> {
    if !state.is_active(&workspace) {
        op_debug!("Discarding {} read model for inactive {}", kind, workspace);
        return Vec::new();
    }

    let ws = state.registry_mut().workspace_mut(&workspace);
    if partial {
        // A late partial result must never overwrite the final one.
        let still_running = ws
            .job(kind)
            .is_some_and(|handle| !handle.is_terminal() && Some(&handle.id) == run_id.as_ref());
        if !still_running {
            op_debug!("Discarding late partial {} read model for {}", kind, workspace);
            return Vec::new();
        }
    }
    ws.store_read_model(
        kind,
        ReadModel {
            value,
            partial,
            run_id,
        },
    );
    state.mark_dirty();
    vec![Effect::Notify(SessionEvent::ReadModelUpdated {
        workspace,
        kind,
        partial,
    })]
}

fn clear_untracked_jobs(state: &mut SessionState, workspace: &WorkspaceId) {
    let registry = state.registry_mut();
    let tracked: Vec<JobKind> = registry.pollers(workspace).map(|ticket| ticket.kind).collect();
    let ws = registry.workspace_mut(workspace);
    for kind in JobKind::ALL {
        if !tracked.contains(&kind) {
            ws.remove_job(kind);
        }
    }
}

/// Drops pending/running handles the server lookup did not re-validate with
/// a live poller, e.g. restored runs the server no longer reports.
fn clear_unpolled_active_jobs(state: &mut SessionState, workspace: &WorkspaceId) {
    let registry = state.registry_mut();
    let stale: Vec<JobKind> = registry
        .workspace(workspace)
        .map(|ws| {
            ws.jobs()
                .filter(|handle| !handle.is_terminal())
                .filter(|handle| !registry.is_tracking(workspace, handle.kind, &handle.id))
                .map(|handle| handle.kind)
                .collect()
        })
        .unwrap_or_default();
    if stale.is_empty() {
        return;
    }
    let ws = registry.workspace_mut(workspace);
    for kind in stale {
        op_debug!("Dropping unconfirmed {} handle in {}", kind, workspace);
        ws.remove_job(kind);
    }
}

fn delete_workspace(state: &mut SessionState, workspace: WorkspaceId) -> Vec<Effect> {
    let mut effects: Vec<Effect> = state
        .registry_mut()
        .evict(&workspace)
        .into_iter()
        .map(Effect::StopPoller)
        .collect();
    if state.is_active(&workspace) {
        state.deactivate();
    }
    state.forget_starts(&workspace);
    op_info!("Deleted workspace {}", workspace);
    state.mark_dirty();
    effects.push(Effect::Notify(SessionEvent::WorkspaceDeleted { workspace }));
    effects
}
