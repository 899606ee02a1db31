//! REST adapter for the task service.

use crate::config::{AuthConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use ::async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use taskdeck_core::{
    BackendError, BackendResult, Deleted, Project, Task, TaskBackend, TaskFields, TaskFilters,
    TaskId, TaskPatch, User,
};

#[derive(Clone)]
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

impl RestBackend {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let auth_header = build_auth_headers(&config.auth)?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn task_url(&self, id: &TaskId) -> String {
        self.url(&format!("/api/tasks/{}", id))
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<reqwest::Response> {
        request
            .headers(self.auth_header.clone())
            .send()
            .await
            .map_err(classify_transport)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> BackendResult<T> {
        let response = self.send(request).await?;
        parse_response(response).await
    }
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TaskBackend for RestBackend {
    async fn fetch_tasks(&self, filters: &TaskFilters) -> BackendResult<Vec<Task>> {
        let request = self
            .client
            .get(self.url("/api/tasks"))
            .query(&filters.query_pairs());
        self.send_json(request).await
    }

    async fn fetch_users(&self) -> BackendResult<Vec<User>> {
        self.send_json(self.client.get(self.url("/api/users"))).await
    }

    async fn fetch_projects(&self) -> BackendResult<Vec<Project>> {
        self.send_json(self.client.get(self.url("/api/projects"))).await
    }

    async fn create_task(&self, draft: &TaskFields) -> BackendResult<Task> {
        let request = self.client.post(self.url("/api/tasks")).json(draft);
        self.send_json(request).await
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> BackendResult<Task> {
        let request = self.client.patch(self.task_url(id)).json(patch);
        self.send_json(request).await
    }

    async fn delete_task(&self, id: &TaskId) -> BackendResult<Deleted> {
        let response = self.send(self.client.delete(self.task_url(id))).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(Deleted { id: id.clone() });
        }
        Err(failure_from_status(status, response).await)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> BackendResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| BackendError::rejected(format!("Unexpected response body: {}", e)));
    }
    Err(failure_from_status(status, response).await)
}

async fn failure_from_status(status: StatusCode, response: reqwest::Response) -> BackendError {
    let text = response.text().await.unwrap_or_default();
    let message = error_message(status.as_u16(), &text);
    if is_transient_status(status.as_u16()) {
        BackendError::transient(message)
    } else {
        BackendError::rejected(message)
    }
}

fn error_message(status: u16, text: &str) -> String {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(ErrorBody {
            code: Some(code),
            message,
        }) => format!("{}: {}", code, message),
        Ok(ErrorBody { code: None, message }) => format!("HTTP {}: {}", status, message),
        Err(_) => format!("HTTP {}: {}", status, text),
    }
}

/// Server errors, timeouts and throttling may clear up on their own.
fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..=599).contains(&status)
}

fn classify_transport(err: reqwest::Error) -> BackendError {
    if err.is_decode() || err.is_builder() {
        BackendError::rejected(err.to_string())
    } else {
        BackendError::transient(err.to_string())
    }
}

fn build_auth_headers(auth: &AuthConfig) -> SyncResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(api_key) = auth.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(api_key).map_err(|e| SyncError::InvalidHeader(e.to_string()))?,
        );
    }
    if let Some(jwt) = auth.jwt.as_deref().filter(|t| !t.trim().is_empty()) {
        let value = format!("Bearer {}", jwt);
        headers.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&value).map_err(|e| SyncError::InvalidHeader(e.to_string()))?,
        );
    }
    Ok(headers)
}
