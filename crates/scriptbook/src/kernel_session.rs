//! Kernel lifecycle and the single live push channel.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::api::KernelApi;
use crate::channel::{ChannelConnector, KernelChannel};
use crate::error::{ChannelError, NotebookError, Result};
use crate::protocol::{ClientEvent, KernelId, ServerEvent};

const DEFAULT_FILE_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Starts and stops kernels and owns at most one open channel.
pub struct KernelSessionClient<K, C> {
    api: Arc<K>,
    connector: C,
    channel: Option<KernelChannel>,
    file_open_timeout: Duration,
}

impl<K: KernelApi, C: ChannelConnector> KernelSessionClient<K, C> {
    pub fn new(api: Arc<K>, connector: C) -> Self {
        Self {
            api,
            connector,
            channel: None,
            file_open_timeout: DEFAULT_FILE_OPEN_TIMEOUT,
        }
    }

    pub fn with_file_open_timeout(mut self, timeout: Duration) -> Self {
        self.file_open_timeout = timeout;
        self
    }

    /// Start a kernel for `path`. Nothing else changes on failure.
    pub async fn start(&self, path: &str) -> Result<KernelId> {
        self.api
            .start_kernel(path)
            .await
            .map_err(|source| NotebookError::KernelStart {
                path: path.to_string(),
                source,
            })
    }

    /// Open a channel for `kernel_id`, closing the current one first.
    pub async fn open_channel(&mut self, kernel_id: &KernelId) -> Result<()> {
        self.close_channel();
        let channel = self.connector.connect(kernel_id).await?;
        info!("[kernel] Channel open for kernel {}", kernel_id);
        self.channel = Some(channel);
        Ok(())
    }

    /// Ask the server for the content of `path` over the open channel.
    pub async fn request_file_open(&self, path: &str) -> Result<()> {
        let channel = self.channel.as_ref().ok_or(ChannelError::NotOpen)?;
        channel
            .send(ClientEvent::OpenFile {
                file_path: path.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Wait for the next `file_opened` event and return its content.
    pub async fn await_file_opened(&mut self) -> Result<String> {
        let channel = self.channel.as_mut().ok_or(ChannelError::NotOpen)?;
        let wait = async {
            loop {
                match channel.recv().await {
                    Some(ServerEvent::FileOpened { content }) => return Ok(content),
                    Some(ServerEvent::Other) => {
                        debug!("[kernel] Ignoring unrelated channel event");
                    }
                    None => return Err(ChannelError::Closed),
                }
            }
        };
        let content = tokio::time::timeout(self.file_open_timeout, wait)
            .await
            .map_err(|_| ChannelError::Timeout("file_opened"))??;
        Ok(content)
    }

    /// Stop a kernel. On success the channel is closed if it belongs to
    /// that kernel; on failure nothing changes.
    pub async fn shutdown(&mut self, path: &str, kernel_id: &KernelId) -> Result<()> {
        self.api
            .shutdown_kernel(path, kernel_id)
            .await
            .map_err(|source| NotebookError::Shutdown {
                kernel_id: kernel_id.clone(),
                source,
            })?;
        if self.channel_kernel() == Some(kernel_id) {
            self.close_channel();
        }
        Ok(())
    }

    /// Best-effort shutdown of a kernel that never got a document.
    pub async fn discard(&mut self, path: &str, kernel_id: &KernelId) {
        if let Err(e) = self.shutdown(path, kernel_id).await {
            warn!("[kernel] Could not discard kernel {}: {}", kernel_id, e);
        }
    }

    pub fn close_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    /// Kernel the live channel is bound to, if any.
    pub fn channel_kernel(&self) -> Option<&KernelId> {
        self.channel
            .as_ref()
            .filter(|c| !c.is_closed())
            .map(KernelChannel::kernel_id)
    }
}
