// ABOUTME: HTTP client for the compute control plane (pools, jobs, tasks)
// ABOUTME: Handles shared-key signing, conflict mapping and task state queries

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::models::{ErrorBody, JobSpec, PoolSpec, TaskSpec, TaskStatus};
use crate::auth::{http_date, CanonicalRequest, SharedKeySigner};
use crate::config::BatchAccount;
use crate::error::{Result, RunnerError, Service};
use crate::provision::Provisioned;

pub const BATCH_API_VERSION: &str = "2023-05-01.17.0";
const JSON_CONTENT_TYPE: &str = "application/json; odata=minimalmetadata";

pub const POOL_EXISTS: &str = "PoolExists";
pub const JOB_EXISTS: &str = "JobExists";

/// Operations the runner performs against the compute control plane.
#[async_trait]
pub trait ComputeService: Send + Sync {
    async fn pool_exists(&self, pool_id: &str) -> Result<bool>;

    /// A concurrent creator winning the race is reported as `AlreadyExists`.
    async fn create_pool(&self, spec: &PoolSpec) -> Result<Provisioned>;

    async fn create_job(&self, spec: &JobSpec) -> Result<Provisioned>;

    async fn add_task(&self, job_id: &str, task: &TaskSpec) -> Result<()>;

    async fn task_status(&self, job_id: &str, task_id: &str) -> Result<TaskStatus>;

    async fn delete_job(&self, job_id: &str) -> Result<()>;

    async fn delete_pool(&self, pool_id: &str) -> Result<()>;
}

pub struct BatchClient {
    client: Client,
    base_url: Url,
    signer: SharedKeySigner,
}

impl BatchClient {
    pub fn new(account: &BatchAccount) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RunnerError::transport(Service::Batch, e))?;
        let base_url = Url::parse(&account.account_url).map_err(|e| {
            RunnerError::config(format!("invalid batch account URL {}: {}", account.account_url, e))
        })?;
        let signer = SharedKeySigner::new(&account.account_name, &account.account_key)?;

        Ok(Self {
            client,
            base_url,
            signer,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RunnerError::config("batch account URL cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut()
            .append_pair("api-version", BATCH_API_VERSION);
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<Vec<u8>>) -> Result<Response> {
        let date = http_date(Utc::now());
        let content_length = body.as_ref().map(Vec::len).unwrap_or(0);
        let content_type = body.as_ref().map(|_| JSON_CONTENT_TYPE);
        let authorization = self.signer.authorization(&CanonicalRequest {
            method: method.as_str(),
            url: &url,
            content_length,
            content_type,
            headers: vec![("ocp-date".to_string(), date.clone())],
        });

        debug!(method = %method, url = %url, "batch request");
        let mut request = self
            .client
            .request(method, url)
            .header("ocp-date", date)
            .header("Authorization", authorization);
        if let Some(body) = body {
            request = request
                .header("Content-Type", JSON_CONTENT_TYPE)
                .body(body);
        }

        request
            .send()
            .await
            .map_err(|e| RunnerError::transport(Service::Batch, e))
    }

    async fn post_json<T: Serialize + Sync>(&self, url: Url, value: &T) -> Result<Response> {
        let body = serde_json::to_vec(value).map_err(|e| {
            RunnerError::remote(Service::Batch, None, None, format!("failed to encode request: {}", e))
        })?;
        self.send(Method::POST, url, Some(body)).await
    }

    async fn create(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
        exists_code: &str,
    ) -> Result<Provisioned> {
        let response = self.post_json(url, body).await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        classify_create(status, &text, exists_code)
    }
}

/// Maps a create response to its outcome. A 409 carrying `exists_code` means
/// the resource was already there; any other failure, including other 409
/// codes, is a remote error.
fn classify_create(status: StatusCode, body: &str, exists_code: &str) -> Result<Provisioned> {
    if status.is_success() {
        return Ok(Provisioned::Created);
    }
    match parse_batch_error(status, body) {
        RunnerError::Remote {
            status: Some(409),
            code: Some(code),
            ..
        } if code == exists_code => Ok(Provisioned::AlreadyExists),
        err => Err(err),
    }
}

/// `Some(exists)` for a definitive answer to a GET, `None` when the response
/// is an error to surface.
fn classify_lookup(status: StatusCode) -> Option<bool> {
    if status.is_success() {
        Some(true)
    } else if status == StatusCode::NOT_FOUND {
        Some(false)
    } else {
        None
    }
}

fn parse_batch_error(status: StatusCode, body: &str) -> RunnerError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => {
            let message = parsed
                .message
                .and_then(|m| m.value)
                .unwrap_or_else(|| body.to_string());
            RunnerError::remote(Service::Batch, Some(status.as_u16()), parsed.code, message)
        }
        Err(_) => RunnerError::remote(Service::Batch, Some(status.as_u16()), None, body),
    }
}

async fn batch_error(response: Response) -> RunnerError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    parse_batch_error(status, &body)
}

#[async_trait]
impl ComputeService for BatchClient {
    async fn pool_exists(&self, pool_id: &str) -> Result<bool> {
        let url = self.url(&["pools", pool_id])?;
        let response = self.send(Method::GET, url, None).await?;
        match classify_lookup(response.status()) {
            Some(exists) => Ok(exists),
            None => Err(batch_error(response).await),
        }
    }

    async fn create_pool(&self, spec: &PoolSpec) -> Result<Provisioned> {
        let url = self.url(&["pools"])?;
        self.create(url, spec, POOL_EXISTS).await
    }

    async fn create_job(&self, spec: &JobSpec) -> Result<Provisioned> {
        let url = self.url(&["jobs"])?;
        self.create(url, spec, JOB_EXISTS).await
    }

    async fn add_task(&self, job_id: &str, task: &TaskSpec) -> Result<()> {
        let url = self.url(&["jobs", job_id, "tasks"])?;
        let response = self.post_json(url, task).await?;
        if !response.status().is_success() {
            return Err(batch_error(response).await);
        }
        Ok(())
    }

    async fn task_status(&self, job_id: &str, task_id: &str) -> Result<TaskStatus> {
        let url = self.url(&["jobs", job_id, "tasks", task_id])?;
        let response = self.send(Method::GET, url, None).await?;
        if !response.status().is_success() {
            return Err(batch_error(response).await);
        }
        response.json().await.map_err(|e| {
            RunnerError::remote(
                Service::Batch,
                None,
                None,
                format!("failed to parse task status: {}", e),
            )
        })
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let url = self.url(&["jobs", job_id])?;
        let response = self.send(Method::DELETE, url, None).await?;
        if !response.status().is_success() {
            return Err(batch_error(response).await);
        }
        Ok(())
    }

    async fn delete_pool(&self, pool_id: &str) -> Result<()> {
        let url = self.url(&["pools", pool_id])?;
        let response = self.send(Method::DELETE, url, None).await?;
        if !response.status().is_success() {
            return Err(batch_error(response).await);
        }
        Ok(())
    }
}
