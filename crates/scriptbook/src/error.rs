//! Error types for notebook session operations.
//!
//! Each failing remote call has its own [`NotebookError`] variant. None of
//! them is retried, and a failed operation leaves registry and session
//! state as it was.

use crate::protocol::KernelId;

/// Failure talking to a remote endpoint.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

/// Failure on a kernel push channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to connect channel for kernel {kernel_id}: {message}")]
    Connect { kernel_id: KernelId, message: String },

    #[error("no channel is open")]
    NotOpen,

    #[error("channel closed")]
    Closed,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    #[error("failed to list {path:?}: {source}")]
    List { path: String, source: RemoteError },

    #[error("failed to read {path}: {source}")]
    FileRead { path: String, source: RemoteError },

    #[error("failed to start kernel for {path}: {source}")]
    KernelStart { path: String, source: RemoteError },

    #[error("Error: {source}")]
    Execute { path: String, source: RemoteError },

    #[error("failed to shut down kernel {kernel_id}: {source}")]
    Shutdown {
        kernel_id: KernelId,
        source: RemoteError,
    },

    #[error("failed to save {path}: {source}")]
    Save { path: String, source: RemoteError },

    #[error("failed to upload sources: {source}")]
    SyncSources { source: RemoteError },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("{0} is not open")]
    DocumentNotOpen(String),

    #[error("no active document")]
    NoActiveDocument,

    #[error("cell index {index} out of range ({len} cells)")]
    CellOutOfRange { index: usize, len: usize },

    #[error("failed to mirror {path}")]
    Mirror {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot mirror {path:?}: {reason}")]
    MirrorPath { path: String, reason: &'static str },
}

pub type Result<T, E = NotebookError> = std::result::Result<T, E>;
