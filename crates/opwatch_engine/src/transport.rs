use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use opwatch_core::{JobKind, RunId, RunSnapshot, WorkspaceId};
use opwatch_logging::{op_debug, op_trace};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;

use crate::http::{build_client, check_status, map_reqwest_error, Endpoints};
use crate::{ChatAnswer, ChatRequest, ClientSettings, TransportError};

/// Raw body chunks of a streaming response.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Job routes of a workspace.
#[async_trait::async_trait]
pub trait JobTransport: Send + Sync {
    async fn start_job(&self, workspace: &WorkspaceId, kind: JobKind)
        -> Result<RunId, TransportError>;

    async fn fetch_run(
        &self,
        workspace: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<RunSnapshot, TransportError>;

    /// Most recent run of every kind in one request. Kinds that never ran
    /// map to `None`; kinds the server does not report are absent.
    async fn fetch_latest_runs(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<BTreeMap<JobKind, Option<RunSnapshot>>, TransportError>;

    async fn fetch_read_model(
        &self,
        workspace: &WorkspaceId,
        kind: JobKind,
    ) -> Result<Value, TransportError>;
}

/// Chat routes of a workspace.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Opens the event stream. Non-success statuses are errors.
    async fn open_stream(
        &self,
        workspace: &WorkspaceId,
        request: &ChatRequest,
    ) -> Result<ByteStream, TransportError>;

    /// Single-shot sibling of [`ChatTransport::open_stream`].
    async fn ask(
        &self,
        workspace: &WorkspaceId,
        request: &ChatRequest,
    ) -> Result<ChatAnswer, TransportError>;
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    run_id: RunId,
}

/// reqwest-backed implementation of both transports.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoints: Endpoints,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(settings: &ClientSettings) -> Result<Self, TransportError> {
        Ok(Self {
            client: build_client(settings)?,
            endpoints: Endpoints::new(&settings.base_url)?,
            request_timeout: settings.request_timeout,
        })
    }

    async fn get_json<T>(&self, workspace: &WorkspaceId, route: &str) -> Result<T, TransportError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.endpoints.workspace_route(workspace, route)?;
        op_trace!("GET {}", url);
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response).await?;
        response.json::<T>().await.map_err(map_reqwest_error)
    }
}

#[async_trait::async_trait]
impl JobTransport for HttpBackend {
    async fn start_job(
        &self,
        workspace: &WorkspaceId,
        kind: JobKind,
    ) -> Result<RunId, TransportError> {
        let url = self.endpoints.workspace_route(workspace, kind.start_route())?;
        op_debug!("Starting {} in {}", kind, workspace);
        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response).await?;
        let started: StartResponse = response.json().await.map_err(map_reqwest_error)?;
        Ok(started.run_id)
    }

    async fn fetch_run(
        &self,
        workspace: &WorkspaceId,
        run_id: &RunId,
    ) -> Result<RunSnapshot, TransportError> {
        let route = format!("runs/{}", run_id.as_str());
        self.get_json(workspace, &route).await
    }

    async fn fetch_latest_runs(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<BTreeMap<JobKind, Option<RunSnapshot>>, TransportError> {
        let raw: BTreeMap<String, Option<RunSnapshot>> =
            self.get_json(workspace, "runs/latest").await?;
        let mut runs = BTreeMap::new();
        for (name, run) in raw {
            match JobKind::from_wire_name(&name) {
                Some(kind) => {
                    runs.insert(kind, run);
                }
                None => op_debug!("Ignoring latest run of unknown kind {:?}", name),
            }
        }
        Ok(runs)
    }

    async fn fetch_read_model(
        &self,
        workspace: &WorkspaceId,
        kind: JobKind,
    ) -> Result<Value, TransportError> {
        self.get_json(workspace, kind.read_model_route()).await
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpBackend {
    async fn open_stream(
        &self,
        workspace: &WorkspaceId,
        request: &ChatRequest,
    ) -> Result<ByteStream, TransportError> {
        let url = self.endpoints.workspace_route(workspace, "chat/stream")?;
        op_debug!("Opening answer stream for {}", workspace);
        let response = self
            .client
            .post(url)
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error))
            .boxed())
    }

    async fn ask(
        &self,
        workspace: &WorkspaceId,
        request: &ChatRequest,
    ) -> Result<ChatAnswer, TransportError> {
        let url = self.endpoints.workspace_route(workspace, "chat")?;
        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response).await?;
        response.json().await.map_err(map_reqwest_error)
    }
}
