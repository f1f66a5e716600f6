// ABOUTME: HTTP client for the blob storage account holding bacpac artifacts
// ABOUTME: Container creation, blob existence probes and locally signed capabilities

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use super::sas::{self, Capability, Permissions};
use crate::auth::{http_date, CanonicalRequest, SharedKeySigner};
use crate::config::StorageAccount;
use crate::error::{Result, RunnerError, Service};
use crate::provision::Provisioned;

pub const STORAGE_API_VERSION: &str = "2021-08-06";

/// Storage operations the runner needs. Held once per run and passed by reference.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_container_if_not_exists(&self, container: &str) -> Result<Provisioned>;

    async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool>;

    /// Signs a container-scoped capability. Purely local, no request is made.
    fn container_capability(
        &self,
        container: &str,
        permissions: Permissions,
        expiry: DateTime<Utc>,
    ) -> Result<Capability>;
}

pub struct StorageClient {
    client: Client,
    endpoint: Url,
    signer: SharedKeySigner,
}

impl StorageClient {
    pub fn new(account: &StorageAccount) -> Result<Self> {
        let endpoint = Url::parse(&format!(
            "https://{}.blob.{}/",
            account.account_name, account.endpoint_suffix
        ))
        .map_err(|e| RunnerError::config(format!("invalid storage endpoint: {}", e)))?;
        Self::with_endpoint(account, endpoint)
    }

    pub fn with_endpoint(account: &StorageAccount, endpoint: Url) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RunnerError::transport(Service::Storage, e))?;
        let signer = SharedKeySigner::new(&account.account_name, &account.account_key)?;

        Ok(Self {
            client,
            endpoint,
            signer,
        })
    }

    pub fn container_url(&self, container: &str) -> Result<Url> {
        self.resource_url(&[container])
    }

    fn resource_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| RunnerError::config("storage endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url) -> Result<Response> {
        let date = http_date(Utc::now());
        let headers = vec![
            ("x-ms-date".to_string(), date),
            ("x-ms-version".to_string(), STORAGE_API_VERSION.to_string()),
        ];
        let authorization = self.signer.authorization(&CanonicalRequest {
            method: method.as_str(),
            url: &url,
            content_length: 0,
            content_type: None,
            headers: headers.clone(),
        });

        debug!(method = %method, url = %url, "storage request");
        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", authorization)
            .header("Content-Length", "0");
        for (name, value) in headers {
            request = request.header(name, value);
        }
        request
            .send()
            .await
            .map_err(|e| RunnerError::transport(Service::Storage, e))
    }
}

const CONTAINER_ALREADY_EXISTS: &str = "ContainerAlreadyExists";

fn error_code(response: &Response) -> Option<String> {
    response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn parse_storage_error(status: StatusCode, code: Option<String>, body: String) -> RunnerError {
    let message = if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body
    };
    RunnerError::remote(Service::Storage, Some(status.as_u16()), code, message)
}

async fn storage_error(response: Response) -> RunnerError {
    let status = response.status();
    let code = error_code(&response);
    let body = response.text().await.unwrap_or_default();
    parse_storage_error(status, code, body)
}

/// Outcome of a container PUT. Only `ContainerAlreadyExists` turns a 409 into
/// success; `None` means the response is an error to surface.
fn classify_container_create(status: StatusCode, code: Option<&str>) -> Option<Provisioned> {
    match status {
        StatusCode::CREATED => Some(Provisioned::Created),
        StatusCode::CONFLICT if code == Some(CONTAINER_ALREADY_EXISTS) => {
            Some(Provisioned::AlreadyExists)
        }
        _ => None,
    }
}

/// Answer to a HEAD probe, or `None` for a failure.
fn classify_head(status: StatusCode) -> Option<bool> {
    if status.is_success() {
        Some(true)
    } else if status == StatusCode::NOT_FOUND {
        Some(false)
    } else {
        None
    }
}

#[async_trait]
impl ObjectStore for StorageClient {
    async fn create_container_if_not_exists(&self, container: &str) -> Result<Provisioned> {
        let mut url = self.container_url(container)?;
        url.query_pairs_mut().append_pair("restype", "container");

        let response = self.send(Method::PUT, url).await?;
        let code = error_code(&response);
        match classify_container_create(response.status(), code.as_deref()) {
            Some(outcome) => Ok(outcome),
            None => Err(storage_error(response).await),
        }
    }

    async fn blob_exists(&self, container: &str, blob: &str) -> Result<bool> {
        let url = self.resource_url(&[container, blob])?;
        let response = self.send(Method::HEAD, url).await?;
        match classify_head(response.status()) {
            Some(exists) => Ok(exists),
            None => Err(storage_error(response).await),
        }
    }

    fn container_capability(
        &self,
        container: &str,
        permissions: Permissions,
        expiry: DateTime<Utc>,
    ) -> Result<Capability> {
        let url = self.container_url(container)?;
        Ok(sas::container_capability(
            &self.signer,
            url,
            container,
            permissions,
            expiry,
        ))
    }
}
