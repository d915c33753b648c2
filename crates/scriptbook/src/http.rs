//! HTTP implementation of [`KernelApi`] and [`WorkspaceApi`].

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::api::{KernelApi, WorkspaceApi};
use crate::error::RemoteError;
use crate::protocol::{
    self, DirEntry, ExecuteRequest, ExecuteResponse, FileContent, KernelId, ListRequest,
    ReadFileRequest, SaveFileRequest, ShutdownKernelRequest, SourceFile, StartKernelRequest,
    StartKernelResponse, SyncSourcesRequest,
};
use crate::settings::Settings;

/// JSON-over-HTTP client for the notebook server.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    request_timeout: Duration,
    execute_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base: Url) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base,
            request_timeout: Duration::from_secs(10),
            execute_timeout: Duration::from_secs(30),
        })
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base = settings.server_url()?;
        Ok(Self::new(base)?.with_timeouts(
            settings.request_timeout(),
            settings.execute_timeout(),
        ))
    }

    /// Set the timeout for ordinary calls and the (longer) one for execute.
    pub fn with_timeouts(mut self, request: Duration, execute: Duration) -> Self {
        self.request_timeout = request;
        self.execute_timeout = execute;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `path` appended to the base URL, keeping any path prefix on it.
    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Decode(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<reqwest::Response, RemoteError> {
        let url = self.endpoint(path)?;
        debug!("[http] POST {}", url);
        let response = self
            .client
            .post(url)
            .json(body)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, RemoteError> {
        let response = self.post(path, body, timeout).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl KernelApi for HttpBackend {
    async fn start_kernel(&self, notebook_path: &str) -> Result<KernelId, RemoteError> {
        let request = StartKernelRequest {
            notebook_path: notebook_path.to_string(),
        };
        let response: StartKernelResponse = self
            .post_json(protocol::KERNEL_START_PATH, &request, self.request_timeout)
            .await?;
        info!(
            "[kernel] Started kernel {} for {}",
            response.kernel_id, notebook_path
        );
        Ok(response.kernel_id)
    }

    async fn execute(
        &self,
        code: &str,
        kernel_id: &KernelId,
        notebook_path: &str,
    ) -> Result<serde_json::Value, RemoteError> {
        let request = ExecuteRequest {
            code: code.to_string(),
            kernel_id: kernel_id.clone(),
            notebook_path: notebook_path.to_string(),
        };
        let response: ExecuteResponse = self
            .post_json(protocol::KERNEL_EXECUTE_PATH, &request, self.execute_timeout)
            .await?;
        Ok(response.result)
    }

    async fn shutdown_kernel(
        &self,
        notebook_path: &str,
        kernel_id: &KernelId,
    ) -> Result<(), RemoteError> {
        let request = ShutdownKernelRequest {
            notebook_path: notebook_path.to_string(),
            kernel_id: kernel_id.clone(),
        };
        self.post(protocol::KERNEL_SHUTDOWN_PATH, &request, self.request_timeout)
            .await?;
        info!("[kernel] Shut down kernel {}", kernel_id);
        Ok(())
    }
}

#[async_trait]
impl WorkspaceApi for HttpBackend {
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, RemoteError> {
        let request = ListRequest {
            path: path.to_string(),
        };
        self.post_json(protocol::LIST_PATH, &request, self.request_timeout)
            .await
    }

    async fn read_file(&self, path: &str) -> Result<String, RemoteError> {
        let request = ReadFileRequest {
            path: path.to_string(),
        };
        let file: FileContent = self
            .post_json(protocol::READ_FILE_PATH, &request, self.request_timeout)
            .await?;
        Ok(file.content)
    }

    async fn save_file(&self, path: &str, content: &str) -> Result<(), RemoteError> {
        let request = SaveFileRequest {
            path: path.to_string(),
            content: content.to_string(),
        };
        self.post(protocol::SAVE_FILE_PATH, &request, self.request_timeout)
            .await?;
        Ok(())
    }

    async fn sync_sources(&self, files: &[SourceFile]) -> Result<(), RemoteError> {
        let request = SyncSourcesRequest {
            files: files.to_vec(),
        };
        self.post(protocol::SYNC_SOURCES_PATH, &request, self.request_timeout)
            .await?;
        info!("[http] Uploaded {} source files", files.len());
        Ok(())
    }
}
