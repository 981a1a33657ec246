//! HTTP client for the control service API.

use std::time::Duration;

use hangar_control::api::{ProjectResponse, ProjectSummary, TransitionResponse};
use hangar_control::{Action, ProjectId, TransitionConfig, TransitionRecord};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{status}: {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Client for one control service.
#[derive(Debug, Clone)]
pub struct ControlClient {
    client: Client,
    base_url: String,
}

impl ControlClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_owned(),
        })
    }

    /// Run a lifecycle action.
    ///
    /// Failed transitions are returned as a response with `success: false`,
    /// not as an error.
    pub async fn execute(
        &self,
        project: &ProjectId,
        action: Action,
        config: &TransitionConfig,
    ) -> Result<TransitionResponse, ClientError> {
        let url = format!(
            "{}/projects/{project}/{}",
            self.base_url,
            action.as_str().to_lowercase()
        );
        let response = self.client.post(url).json(config).send().await?;
        let status = response.status();

        // Transition failures carry a structured body whatever the status.
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|_| ClientError::Api {
            status: status.as_u16(),
            message: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    pub async fn project(&self, project: &ProjectId) -> Result<ProjectResponse, ClientError> {
        self.get(&format!("/projects/{project}")).await
    }

    pub async fn projects(&self) -> Result<Vec<ProjectSummary>, ClientError> {
        self.get("/projects").await
    }

    pub async fn history(&self, project: &ProjectId) -> Result<Vec<TransitionRecord>, ClientError> {
        self.get(&format!("/projects/{project}/transitions")).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_owned(),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}
