use std::sync::Once;

use opwatch_core::{
    update, Effect, JobKind, JobStatus, Msg, PollTicket, RunId, RunSnapshot, SessionEvent,
    SessionState, WorkspaceId,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(opwatch_logging::initialize_for_tests);
}

fn ws(id: &str) -> WorkspaceId {
    WorkspaceId::from(id)
}

fn observed(id: &str, status: JobStatus, progress: Option<f64>) -> RunSnapshot {
    RunSnapshot {
        id: RunId::from(id),
        status,
        progress,
        message: None,
        result: None,
    }
}

fn active(id: &str) -> SessionState {
    update(SessionState::new(), Msg::SelectWorkspace(ws(id))).0
}

fn accept(state: SessionState, id: &str, kind: JobKind, run_id: &str) -> (SessionState, PollTicket) {
    let (state, effects) = update(
        state,
        Msg::JobAccepted {
            workspace: ws(id),
            kind,
            run_id: RunId::from(run_id),
        },
    );
    let ticket = effects
        .iter()
        .find_map(|effect| match effect {
            Effect::StartPoller(ticket) => Some(ticket.clone()),
            _ => None,
        })
        .expect("poller started");
    (state, ticket)
}

fn poll(state: SessionState, ticket: &PollTicket, snapshot: RunSnapshot) -> (SessionState, Vec<Effect>) {
    update(
        state,
        Msg::PollObserved {
            ticket: ticket.clone(),
            snapshot,
        },
    )
}

fn completions(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|effect| matches!(effect, Effect::Notify(SessionEvent::JobCompleted { .. })))
        .count()
}

#[test]
fn start_is_only_submitted_for_the_active_workspace() {
    init_logging();
    let state = active("p1");

    let (state, effects) = update(
        state,
        Msg::StartJob {
            workspace: ws("p1"),
            kind: JobKind::DirectoryGeneration,
        },
    );
    assert_eq!(
        effects,
        vec![Effect::SubmitJob {
            workspace: ws("p1"),
            kind: JobKind::DirectoryGeneration,
        }]
    );

    let (_state, effects) = update(
        state,
        Msg::StartJob {
            workspace: ws("p2"),
            kind: JobKind::DirectoryGeneration,
        },
    );
    assert!(effects.is_empty());
}

#[test]
fn accepted_job_is_running_before_the_first_poll() {
    init_logging();
    let (state, ticket) = accept(active("p1"), "p1", JobKind::DirectoryGeneration, "r1");

    let handle = state
        .workspace(&ws("p1"))
        .unwrap()
        .job(JobKind::DirectoryGeneration)
        .unwrap();
    assert_eq!(handle.status, JobStatus::Running);
    assert_eq!(handle.progress, Some(0.0));
    assert_eq!(ticket.run_id, RunId::from("r1"));
    assert!(state.registry().is_current(&ticket));
}

#[test]
fn restarting_a_kind_supersedes_the_previous_handle_and_poller() {
    init_logging();
    let (state, first) = accept(active("p1"), "p1", JobKind::ComplianceReview, "r1");

    let (state, effects) = update(
        state,
        Msg::JobAccepted {
            workspace: ws("p1"),
            kind: JobKind::ComplianceReview,
            run_id: RunId::from("r2"),
        },
    );

    assert_eq!(effects[0], Effect::StopPoller(first.clone()));
    assert!(!state.registry().is_current(&first));
    let (_state, effects) = poll(state, &first, observed("r1", JobStatus::Success, None));
    assert!(effects.is_empty());
}

#[test]
fn acceptance_after_leaving_the_workspace_is_dropped() {
    init_logging();
    let state = active("p1");
    let (state, _) = update(state, Msg::SelectWorkspace(ws("p2")));

    let (state, effects) = update(
        state,
        Msg::JobAccepted {
            workspace: ws("p1"),
            kind: JobKind::MetadataExtraction,
            run_id: RunId::from("r1"),
        },
    );
    assert!(effects.is_empty());
    assert_eq!(state.workspace(&ws("p1")).unwrap().jobs().count(), 0);
}

#[test]
fn rejected_start_is_surfaced() {
    init_logging();
    let (_state, effects) = update(
        active("p1"),
        Msg::JobRejected {
            workspace: ws("p1"),
            kind: JobKind::ResponseExtraction,
            message: "no documents uploaded".to_string(),
        },
    );
    assert_eq!(
        effects,
        vec![Effect::Notify(SessionEvent::JobStartFailed {
            workspace: ws("p1"),
            kind: JobKind::ResponseExtraction,
            message: "no documents uploaded".to_string(),
        })]
    );
}

#[test]
fn progress_triggers_partial_refresh_and_duplicates_are_quiet() {
    init_logging();
    let (state, ticket) = accept(active("p1"), "p1", JobKind::RequirementExtraction, "r1");

    let (state, effects) = poll(state, &ticket, observed("r1", JobStatus::Running, Some(0.0)));
    assert!(effects.is_empty());

    let (state, effects) = poll(state, &ticket, observed("r1", JobStatus::Running, Some(0.5)));
    assert_eq!(effects.len(), 2);
    assert!(matches!(
        effects[0],
        Effect::Notify(SessionEvent::JobUpdated { .. })
    ));
    assert_eq!(
        effects[1],
        Effect::RefreshReadModel {
            workspace: ws("p1"),
            kind: JobKind::RequirementExtraction,
            run_id: Some(RunId::from("r1")),
            partial: true,
        }
    );

    let (_state, effects) = poll(state, &ticket, observed("r1", JobStatus::Running, Some(0.5)));
    assert!(effects.is_empty());
}

#[test]
fn metadata_progress_has_no_partial_results() {
    init_logging();
    let (state, ticket) = accept(active("p1"), "p1", JobKind::MetadataExtraction, "r1");
    let (_state, effects) = poll(state, &ticket, observed("r1", JobStatus::Running, Some(0.3)));
    assert_eq!(effects.len(), 1);
}

#[test]
fn success_completes_exactly_once_and_releases_the_poller() {
    init_logging();
    let (state, ticket) = accept(active("p1"), "p1", JobKind::DirectoryGeneration, "r1");
    let mut done = observed("r1", JobStatus::Success, None);
    done.result = Some(json!({ "nodes": [{ "title": "Volume 1" }] }));

    let (state, effects) = poll(state, &ticket, done.clone());
    assert_eq!(effects[0], Effect::StopPoller(ticket.clone()));
    assert_eq!(completions(&effects), 1);
    assert_eq!(
        effects.last(),
        Some(&Effect::RefreshReadModel {
            workspace: ws("p1"),
            kind: JobKind::DirectoryGeneration,
            run_id: Some(RunId::from("r1")),
            partial: false,
        })
    );

    // A retried request delivering the same success again changes nothing.
    let (state, effects) = poll(state, &ticket, done);
    assert_eq!(completions(&effects), 0);
    assert!(effects.is_empty());

    let handle = state
        .workspace(&ws("p1"))
        .unwrap()
        .job(JobKind::DirectoryGeneration)
        .unwrap();
    assert_eq!(handle.status, JobStatus::Success);
    assert_eq!(handle.result, Some(json!({ "nodes": [{ "title": "Volume 1" }] })));
}

#[test]
fn failure_is_surfaced_and_frozen_until_restarted() {
    init_logging();
    let (state, ticket) = accept(active("p1"), "p1", JobKind::ComplianceReview, "r1");
    let mut failed = observed("r1", JobStatus::Failed, None);
    failed.message = Some("model timeout".to_string());

    let (state, effects) = poll(state, &ticket, failed);
    assert_eq!(effects[0], Effect::StopPoller(ticket.clone()));
    match &effects[1] {
        Effect::Notify(SessionEvent::JobFailed { message, handle, .. }) => {
            assert_eq!(message, "model timeout");
            assert_eq!(handle.status, JobStatus::Failed);
        }
        other => panic!("unexpected effect {other:?}"),
    }
    assert_eq!(state.registry().pollers(&ws("p1")).count(), 0);

    let (state, fresh) = accept(state, "p1", JobKind::ComplianceReview, "r2");
    let handle = state
        .workspace(&ws("p1"))
        .unwrap()
        .job(JobKind::ComplianceReview)
        .unwrap();
    assert_eq!(handle.id, RunId::from("r2"));
    assert_eq!(handle.status, JobStatus::Running);
    assert_eq!(fresh.run_id, RunId::from("r2"));
}

#[test]
fn late_partial_read_model_never_overwrites_the_final_one() {
    init_logging();
    let (state, ticket) = accept(active("p1"), "p1", JobKind::ResponseExtraction, "r1");
    let (state, _) = poll(state, &ticket, observed("r1", JobStatus::Success, None));

    let load = |state, partial, value| {
        update(
            state,
            Msg::ReadModelLoaded {
                workspace: ws("p1"),
                kind: JobKind::ResponseExtraction,
                run_id: Some(RunId::from("r1")),
                partial,
                value,
            },
        )
    };

    let (state, effects) = load(state, false, json!({ "responses": 12 }));
    assert_eq!(
        effects,
        vec![Effect::Notify(SessionEvent::ReadModelUpdated {
            workspace: ws("p1"),
            kind: JobKind::ResponseExtraction,
            partial: false,
        })]
    );
    let (state, effects) = load(state, true, json!({ "responses": 7 }));
    assert!(effects.is_empty());

    let model = state
        .workspace(&ws("p1"))
        .unwrap()
        .read_model(JobKind::ResponseExtraction)
        .unwrap()
        .clone();
    assert_eq!(model.value, json!({ "responses": 12 }));
    assert!(!model.partial);
}

#[test]
fn read_models_for_inactive_workspaces_are_discarded() {
    init_logging();
    let state = active("p1");
    let (state, effects) = update(
        state,
        Msg::ReadModelLoaded {
            workspace: ws("p2"),
            kind: JobKind::MetadataExtraction,
            run_id: None,
            partial: false,
            value: json!({ "title": "RFP" }),
        },
    );
    assert!(effects.is_empty());
    assert!(state.workspace(&ws("p2")).is_none());
}
