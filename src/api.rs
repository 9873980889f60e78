use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use tracing::debug;

use crate::domain::EntityType;
use crate::error::SubmitError;

/// A record as the ingest service sees it: its HAL self link, remote
/// UUID, and current content payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    pub url: String,
    pub uuid: Option<String>,
    pub content: Value,
}

impl RemoteEntity {
    pub fn from_hal(resource: &Value) -> Result<Self, SubmitError> {
        let url = resource
            .pointer("/_links/self/href")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SubmitError::MalformedResource("resource has no _links.self.href".to_string())
            })?
            .to_string();
        let uuid = resource
            .pointer("/uuid/uuid")
            .and_then(Value::as_str)
            .map(str::to_string);
        let content = resource.get("content").cloned().unwrap_or(Value::Null);
        Ok(Self { url, uuid, content })
    }
}

/// Natural key the service uses for file records.
pub fn file_name_of(content: &Value) -> Option<String> {
    content
        .pointer("/file_core/file_name")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Outcome of a create call. A conflict means the kind's natural key
/// already exists remotely and the caller should merge instead.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(RemoteEntity),
    Conflict,
}

pub trait IngestApi: Send + Sync {
    fn create(
        &self,
        kind: EntityType,
        content: &Value,
        submission: &RemoteEntity,
    ) -> Result<CreateOutcome, SubmitError>;
    fn get_by_uuid(&self, kind: EntityType, uuid: &str) -> Result<RemoteEntity, SubmitError>;
    fn find_file_by_name(
        &self,
        submission: &RemoteEntity,
        file_name: &str,
    ) -> Result<RemoteEntity, SubmitError>;
    fn patch(&self, remote: &RemoteEntity, content: &Value) -> Result<RemoteEntity, SubmitError>;
    fn link(
        &self,
        from: &RemoteEntity,
        to: &RemoteEntity,
        relationship: &str,
        is_collection: bool,
    ) -> Result<(), SubmitError>;
    fn create_manifest(
        &self,
        submission: &RemoteEntity,
        manifest: &Value,
    ) -> Result<RemoteEntity, SubmitError>;
    fn patch_manifest(&self, manifest: &RemoteEntity, partial: &Value) -> Result<(), SubmitError>;
}

#[derive(Clone)]
pub struct IngestHttpClient {
    client: Client,
    base_url: String,
}

impl IngestHttpClient {
    pub fn new(base_url: impl Into<String>, token: Option<&str>) -> Result<Self, SubmitError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("biosubmit/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SubmitError::ApiHttp(err.to_string()))?,
        );
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|err| SubmitError::ApiHttp(err.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SubmitError::ApiHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, SubmitError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "ingest request failed".to_string());
        Err(SubmitError::ApiStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, SubmitError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(SubmitError::ApiHttp(err.to_string()));
                }
            }
        }
    }

    fn resource_from(response: reqwest::blocking::Response) -> Result<RemoteEntity, SubmitError> {
        let resource: Value = Self::handle_status(response)?
            .json()
            .map_err(|err| SubmitError::ApiHttp(err.to_string()))?;
        RemoteEntity::from_hal(&resource)
    }
}

impl IngestApi for IngestHttpClient {
    fn create(
        &self,
        kind: EntityType,
        content: &Value,
        submission: &RemoteEntity,
    ) -> Result<CreateOutcome, SubmitError> {
        let response = match kind {
            // projects live at the service root; the envelope link is
            // established separately by the coordinator
            EntityType::Project => {
                let url = format!("{}/projects", self.base_url);
                self.send_with_retries(|| self.client.post(&url).json(content))?
            }
            EntityType::File => {
                let file_name = file_name_of(content).ok_or_else(|| {
                    SubmitError::MalformedResource(
                        "file content has no file_core.file_name".to_string(),
                    )
                })?;
                let url = format!("{}/files", submission.url);
                self.send_with_retries(|| {
                    self.client
                        .post(&url)
                        .query(&[("fileName", file_name.as_str())])
                        .json(content)
                })?
            }
            _ => {
                let url = format!("{}/{}", submission.url, kind.collection());
                self.send_with_retries(|| self.client.post(&url).json(content))?
            }
        };

        let status = response.status().as_u16();
        // the service reports a duplicate fileName as 500
        if status == 409 || (kind == EntityType::File && status == 500) {
            debug!(kind = %kind, status, "create reported an existing natural key");
            return Ok(CreateOutcome::Conflict);
        }
        Ok(CreateOutcome::Created(Self::resource_from(response)?))
    }

    fn get_by_uuid(&self, kind: EntityType, uuid: &str) -> Result<RemoteEntity, SubmitError> {
        let url = format!("{}/{}/search/findByUuid", self.base_url, kind.collection());
        let response = self.send_with_retries(|| self.client.get(&url).query(&[("uuid", uuid)]))?;
        Self::resource_from(response)
    }

    fn find_file_by_name(
        &self,
        submission: &RemoteEntity,
        file_name: &str,
    ) -> Result<RemoteEntity, SubmitError> {
        let url = format!("{}/files", submission.url);
        let response =
            self.send_with_retries(|| self.client.get(&url).query(&[("fileName", file_name)]))?;
        let body: Value = Self::handle_status(response)?
            .json()
            .map_err(|err| SubmitError::ApiHttp(err.to_string()))?;
        let resource = body.pointer("/_embedded/files/0").ok_or_else(|| {
            SubmitError::MalformedResource(format!(
                "submission has no file named '{file_name}'"
            ))
        })?;
        RemoteEntity::from_hal(resource)
    }

    fn patch(&self, remote: &RemoteEntity, content: &Value) -> Result<RemoteEntity, SubmitError> {
        let response = self.send_with_retries(|| {
            self.client
                .patch(&remote.url)
                .json(&json!({ "content": content }))
        })?;
        Self::resource_from(response)
    }

    fn link(
        &self,
        from: &RemoteEntity,
        to: &RemoteEntity,
        relationship: &str,
        is_collection: bool,
    ) -> Result<(), SubmitError> {
        let url = format!("{}/{}", from.url, relationship);
        let response = self.send_with_retries(|| {
            let request = if is_collection {
                self.client.post(&url)
            } else {
                self.client.put(&url)
            };
            request
                .header(CONTENT_TYPE, "text/uri-list")
                .body(to.url.clone())
        })?;
        Self::handle_status(response)?;
        Ok(())
    }

    fn create_manifest(
        &self,
        submission: &RemoteEntity,
        manifest: &Value,
    ) -> Result<RemoteEntity, SubmitError> {
        let url = format!("{}/submissionManifest", submission.url);
        let response = self.send_with_retries(|| self.client.post(&url).json(manifest))?;
        Self::resource_from(response)
    }

    fn patch_manifest(&self, manifest: &RemoteEntity, partial: &Value) -> Result<(), SubmitError> {
        let response =
            self.send_with_retries(|| self.client.patch(&manifest.url).json(partial))?;
        Self::handle_status(response)?;
        Ok(())
    }
}

fn is_retryable_status(status: u16) -> bool {
    // 500 is excluded: the service uses it for duplicate file keys
    matches!(status, 429 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
