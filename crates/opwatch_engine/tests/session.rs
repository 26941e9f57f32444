use std::sync::{Arc, Mutex};
use std::time::Duration;

use opwatch_core::{JobKind, JobStatus, RunId, SessionEvent, WorkspaceId};
use opwatch_engine::{ClientSettings, EventSink, HttpBackend, SessionHandle};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, check: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|&event| check(event)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn ws(id: &str) -> WorkspaceId {
    WorkspaceId::from(id)
}

fn start_session(server: &MockServer) -> (SessionHandle, Arc<RecordingSink>) {
    opwatch_logging::initialize_for_tests();
    let settings = ClientSettings {
        base_url: format!("{}/api", server.uri()),
        poll_interval: Duration::from_millis(20),
        ..ClientSettings::default()
    };
    let backend = HttpBackend::new(&settings).unwrap();
    let sink = Arc::new(RecordingSink::default());
    let handle = SessionHandle::spawn(Arc::new(backend), &settings, sink.clone());
    (handle, sink)
}

async fn eventually(sink: &RecordingSink, check: impl Fn(&SessionEvent) -> bool) {
    for _ in 0..250 {
        if sink.count(&check) > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("event never arrived; saw {:?}", sink.events());
}

async fn wait_for_pollers(handle: &SessionHandle, check: impl Fn(usize) -> bool) {
    for _ in 0..250 {
        if check(handle.live_pollers().await.len()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("poller count never settled");
}

fn run_json(id: &str, status: &str, progress: f64) -> serde_json::Value {
    json!({ "id": id, "status": status, "progress": progress })
}

#[tokio::test]
async fn started_job_is_polled_until_success_and_completes_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/projects/p1/runs/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "directory_generation": null })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/projects/p1/directory/generate"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "run_id": "r1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/projects/p1/runs/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_json("r1", "running", 0.2)))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/projects/p1/runs/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "r1",
            "status": "success",
            "result_json": { "nodes": 4 },
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/projects/p1/directory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "nodes": [1, 2, 3, 4] })))
        .mount(&server)
        .await;

    let (handle, sink) = start_session(&server);
    handle.select_workspace(ws("p1"));
    handle.start_job(ws("p1"), JobKind::DirectoryGeneration);

    eventually(&sink, |event| {
        matches!(event, SessionEvent::ReadModelUpdated { partial: false, .. })
    })
    .await;
    // Give a stray extra tick a chance to show up.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        sink.count(|event| matches!(event, SessionEvent::JobCompleted { .. })),
        1
    );
    assert_eq!(
        sink.count(|event| matches!(event, SessionEvent::JobFailed { .. })),
        0
    );
    let state = handle.state().await.unwrap();
    let workspace = state.workspace(&ws("p1")).unwrap();
    let job = workspace.job(JobKind::DirectoryGeneration).unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.progress, Some(1.0));
    let model = workspace.read_model(JobKind::DirectoryGeneration).unwrap();
    assert!(!model.partial);
    assert_eq!(model.value, json!({ "nodes": [1, 2, 3, 4] }));
    assert!(handle.live_pollers().await.is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn returning_to_a_workspace_keeps_a_single_poller_per_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/projects/a/runs/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "compliance_review": run_json("r9", "running", 0.1),
            "metadata_extraction": null,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/projects/b/runs/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/projects/a/runs/r9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_json("r9", "running", 0.1)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/projects/a/compliance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "findings": [] })))
        .mount(&server)
        .await;

    let (handle, sink) = start_session(&server);
    handle.select_workspace(ws("a"));
    wait_for_pollers(&handle, |count| count == 1).await;
    let first = handle.live_pollers().await.remove(0);

    handle.select_workspace(ws("b"));
    wait_for_pollers(&handle, |count| count == 0).await;

    handle.select_workspace(ws("a"));
    for _ in 0..250 {
        let pollers = handle.live_pollers().await;
        if pollers.len() == 1 && pollers[0].serial != first.serial {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pollers = handle.live_pollers().await;
    assert_eq!(pollers.len(), 1);
    assert_eq!(pollers[0].workspace, ws("a"));
    assert_eq!(pollers[0].run_id, RunId::from("r9"));
    assert_ne!(pollers[0].serial, first.serial);
    let state = handle.state().await.unwrap();
    assert_eq!(state.active(), Some(&ws("a")));
    assert!(state
        .workspace(&ws("b"))
        .unwrap()
        .job(JobKind::ComplianceReview)
        .is_none());
    assert_eq!(
        sink.count(|event| matches!(event, SessionEvent::JobCompleted { .. })),
        0
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn failed_status_lookup_is_reported_and_workspace_stays_active() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/projects/p1/runs/latest"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "detail": "database offline" })))
        .expect(1)
        .mount(&server)
        .await;

    let (handle, sink) = start_session(&server);
    handle.select_workspace(ws("p1"));
    eventually(&sink, |event| matches!(event, SessionEvent::LatestRunsFailed { .. })).await;

    assert!(sink.events().contains(&SessionEvent::LatestRunsFailed {
        workspace: ws("p1"),
        message: "database offline".to_string(),
    }));
    let state = handle.state().await.unwrap();
    assert_eq!(state.active(), Some(&ws("p1")));
    assert_eq!(state.workspace(&ws("p1")).unwrap().jobs().count(), 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn rejected_start_surfaces_the_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/projects/p1/runs/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/projects/p1/responses/extract"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({ "detail": "no documents uploaded" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (handle, sink) = start_session(&server);
    handle.select_workspace(ws("p1"));
    handle.start_job(ws("p1"), JobKind::ResponseExtraction);
    eventually(&sink, |event| matches!(event, SessionEvent::JobStartFailed { .. })).await;

    assert!(sink.events().contains(&SessionEvent::JobStartFailed {
        workspace: ws("p1"),
        kind: JobKind::ResponseExtraction,
        message: "no documents uploaded".to_string(),
    }));
    assert!(handle.live_pollers().await.is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn deleting_a_workspace_stops_its_pollers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/projects/p1/runs/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "requirement_extraction": run_json("r5", "queued", 0.0),
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/projects/p1/runs/r5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_json("r5", "queued", 0.0)))
        .mount(&server)
        .await;

    let (handle, sink) = start_session(&server);
    handle.select_workspace(ws("p1"));
    wait_for_pollers(&handle, |count| count == 1).await;

    handle.delete_workspace(ws("p1"));
    eventually(&sink, |event| matches!(event, SessionEvent::WorkspaceDeleted { .. })).await;

    assert!(handle.live_pollers().await.is_empty());
    let state = handle.state().await.unwrap();
    assert_eq!(state.active(), None);
    assert!(state.workspace(&ws("p1")).is_none());

    handle.shutdown().await;
}
