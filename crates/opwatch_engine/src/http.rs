use opwatch_core::{extract_message, WorkspaceId};
use url::Url;

use crate::{ClientSettings, TransportError};

/// Builds workspace-scoped route URLs under `{base}/projects/{workspace}/`.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let base =
            Url::parse(base_url).map_err(|err| TransportError::InvalidUrl(err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(format!(
                "{base_url} cannot be a base url"
            )));
        }
        Ok(Self { base })
    }

    /// `route` is relative to the workspace, e.g. `runs/latest`.
    pub fn workspace_route(
        &self,
        workspace: &WorkspaceId,
        route: &str,
    ) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                TransportError::InvalidUrl(format!("{} cannot be a base url", self.base))
            })?;
            segments
                .pop_if_empty()
                .push("projects")
                .push(workspace.as_str())
                .extend(route.split('/').filter(|part| !part.is_empty()));
        }
        Ok(url)
    }
}

/// Client shared by every route. Only the connect timeout is set here so
/// streams stay open as long as the server keeps sending.
pub(crate) fn build_client(settings: &ClientSettings) -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .build()
        .map_err(|err| TransportError::Network(err.to_string()))
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout(err.to_string());
    }
    if err.is_decode() {
        return TransportError::Decode(err.to_string());
    }
    TransportError::Network(err.to_string())
}

/// Passes successful responses through; otherwise reads the body for a
/// human-readable message.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = extract_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    Err(TransportError::Status {
        status: status.as_u16(),
        message,
    })
}
