//! Seams to the remote services a notebook session depends on.
//!
//! [`crate::http::HttpBackend`] implements both traits against the real
//! endpoints; tests substitute scripted fakes.

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::protocol::{DirEntry, KernelId, SourceFile};

/// Kernel lifecycle and execution endpoints.
#[async_trait]
pub trait KernelApi: Send + Sync + 'static {
    /// Start a kernel bound to `notebook_path`.
    async fn start_kernel(&self, notebook_path: &str) -> Result<KernelId, RemoteError>;

    /// Run `code` on a kernel and return the raw `result` value.
    async fn execute(
        &self,
        code: &str,
        kernel_id: &KernelId,
        notebook_path: &str,
    ) -> Result<serde_json::Value, RemoteError>;

    async fn shutdown_kernel(
        &self,
        notebook_path: &str,
        kernel_id: &KernelId,
    ) -> Result<(), RemoteError>;
}

/// Directory listing and raw file storage endpoints.
#[async_trait]
pub trait WorkspaceApi: Send + Sync + 'static {
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, RemoteError>;

    async fn read_file(&self, path: &str) -> Result<String, RemoteError>;

    async fn save_file(&self, path: &str, content: &str) -> Result<(), RemoteError>;

    /// Upload local sources into the server workspace.
    async fn sync_sources(&self, files: &[SourceFile]) -> Result<(), RemoteError>;
}
