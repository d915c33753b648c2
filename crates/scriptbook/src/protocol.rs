//! Wire types for the kernel-management HTTP endpoints and the per-kernel
//! push channel.
//!
//! HTTP bodies are plain JSON objects. Channel events are JSON objects
//! tagged by their `type` field.

use serde::{Deserialize, Serialize};

/// Directory listing endpoint.
pub const LIST_PATH: &str = "/api/list";
/// Raw file read endpoint.
pub const READ_FILE_PATH: &str = "/api/file";
/// Raw file write endpoint.
pub const SAVE_FILE_PATH: &str = "/api/save";
/// Bulk upload of local sources into the server workspace.
pub const SYNC_SOURCES_PATH: &str = "/api/sync_src";
/// Kernel start endpoint.
pub const KERNEL_START_PATH: &str = "/kernels/start";
/// Code execution endpoint.
pub const KERNEL_EXECUTE_PATH: &str = "/kernels/execute";
/// Kernel shutdown endpoint.
pub const KERNEL_SHUTDOWN_PATH: &str = "/kernels/shutdown";

/// Identifier of a remote kernel session, issued by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelId(String);

impl KernelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KernelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRequest {
    pub path: String,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartKernelRequest {
    pub notebook_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartKernelResponse {
    pub kernel_id: KernelId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub kernel_id: KernelId,
    pub notebook_path: String,
}

/// Execution result. `result` is opaque: a string, an arbitrary JSON value,
/// or an object carrying the `no_output` marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    #[serde(default)]
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownKernelRequest {
    pub notebook_path: String,
    pub kernel_id: KernelId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveFileRequest {
    pub path: String,
    pub content: String,
}

/// A local source file uploaded by [`SyncSourcesRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSourcesRequest {
    pub files: Vec<SourceFile>,
}

/// Events sent by the client over a kernel channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Ask the server to load a file; answered by [`ServerEvent::FileOpened`].
    OpenFile { file_path: String },
}

/// Events pushed by the server over a kernel channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full current content of the file requested with `open_file`.
    FileOpened { content: String },
    /// Any event type this client does not understand.
    #[serde(other)]
    Other,
}
