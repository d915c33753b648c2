//! The notebook session: open documents, their kernels, and the operations
//! a front end drives.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::Mutex;

use crate::api::{KernelApi, WorkspaceApi};
use crate::channel::{ChannelConnector, WsConnector};
use crate::document::{CellId, DocumentSnapshot};
use crate::error::{NotebookError, Result};
use crate::execution::{ExecutionCoordinator, ExecutionCounter, ExecutionOutcome};
use crate::http::HttpBackend;
use crate::kernel_session::KernelSessionClient;
use crate::mirror::{self, LocalMirror};
use crate::protocol::{DirEntry, KernelId};
use crate::registry::{OpenOutcome, SharedRegistry};
use crate::settings::Settings;

/// Session wired to the HTTP endpoints and WebSocket channel.
pub type HttpSession = NotebookSession<HttpBackend, HttpBackend, WsConnector>;

/// One user's notebook session.
///
/// Operations take `&self` so a front end can keep several in flight.
/// Opens and shutdowns are serialized on the kernel client; executions run
/// concurrently.
pub struct NotebookSession<K, W, C> {
    workspace: Arc<W>,
    registry: SharedRegistry,
    kernels: Mutex<KernelSessionClient<K, C>>,
    coordinator: ExecutionCoordinator<K>,
    mirror: Option<LocalMirror>,
}

impl HttpSession {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        settings.validate()?;
        let backend = Arc::new(HttpBackend::from_settings(settings)?);
        let connector = WsConnector::from_settings(settings)?;
        let mut session = NotebookSession::new(backend.clone(), backend, connector)
            .with_file_open_timeout(settings.file_open_timeout());
        if let Some(dir) = &settings.mirror_dir {
            session = session.with_mirror(LocalMirror::new(dir));
        }
        Ok(session)
    }
}

impl<K, W, C> NotebookSession<K, W, C>
where
    K: KernelApi,
    W: WorkspaceApi,
    C: ChannelConnector,
{
    pub fn new(kernel: Arc<K>, workspace: Arc<W>, connector: C) -> Self {
        Self::with_counter(kernel, workspace, connector, Arc::default())
    }

    /// Build a session that shares an execution counter with others.
    pub fn with_counter(
        kernel: Arc<K>,
        workspace: Arc<W>,
        connector: C,
        counter: Arc<ExecutionCounter>,
    ) -> Self {
        let registry = SharedRegistry::new();
        Self {
            workspace,
            kernels: Mutex::new(KernelSessionClient::new(kernel.clone(), connector)),
            coordinator: ExecutionCoordinator::new(kernel, registry.clone(), counter),
            registry,
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: LocalMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_file_open_timeout(self, timeout: Duration) -> Self {
        let kernels = self.kernels.into_inner().with_file_open_timeout(timeout);
        Self {
            kernels: Mutex::new(kernels),
            ..self
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn counter(&self) -> &Arc<ExecutionCounter> {
        self.coordinator.counter()
    }

    /// List a directory. Browsing away closes every open document.
    pub async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let entries = self
            .workspace
            .list_dir(path)
            .await
            .map_err(|source| NotebookError::List {
                path: path.to_string(),
                source,
            })?;
        self.clear_all().await;
        Ok(entries)
    }

    /// Raw file content, without opening a document.
    pub async fn read_file(&self, path: &str) -> Result<String> {
        self.workspace
            .read_file(path)
            .await
            .map_err(|source| NotebookError::FileRead {
                path: path.to_string(),
                source,
            })
    }

    /// Open `path` on a new kernel, or focus it if it is already open.
    ///
    /// The document is built from the content delivered by `file_opened`.
    /// If anything fails after the kernel started, that kernel is shut down
    /// again and the registry is left as it was.
    pub async fn open_file(&self, path: &str) -> Result<OpenOutcome> {
        if self.registry.lock().set_active(path) {
            return Ok(OpenOutcome::Focused);
        }
        let mut kernels = self.kernels.lock().await;
        // Another open of the same path may have finished while we waited.
        if self.registry.lock().set_active(path) {
            return Ok(OpenOutcome::Focused);
        }

        let kernel_id = kernels.start(path).await?;
        let content = match Self::load_over_channel(&mut kernels, path, &kernel_id).await {
            Ok(content) => content,
            Err(e) => {
                warn!("[session] Opening {} failed: {}", path, e);
                kernels.discard(path, &kernel_id).await;
                return Err(e);
            }
        };

        let outcome = self
            .registry
            .lock()
            .open_or_focus(path, &content, kernel_id.clone());
        info!("[session] Opened {} on kernel {}", path, kernel_id);
        Ok(outcome)
    }

    async fn load_over_channel(
        kernels: &mut KernelSessionClient<K, C>,
        path: &str,
        kernel_id: &KernelId,
    ) -> Result<String> {
        kernels.open_channel(kernel_id).await?;
        kernels.request_file_open(path).await?;
        kernels.await_file_opened().await
    }

    /// Switch the displayed document.
    pub fn focus(&self, path: &str) -> Result<()> {
        if self.registry.lock().set_active(path) {
            Ok(())
        } else {
            Err(NotebookError::DocumentNotOpen(path.to_string()))
        }
    }

    /// Append an empty cell to the active document.
    pub fn insert_cell(&self) -> Result<CellId> {
        let mut registry = self.registry.lock();
        let doc = registry.active_mut().ok_or(NotebookError::NoActiveDocument)?;
        Ok(doc.insert_cell())
    }

    /// Run cell `idx` of the active document with its visible `source`.
    pub async fn run_cell(&self, idx: usize, source: &str) -> Result<ExecutionOutcome> {
        let path = self.active_path()?;
        self.coordinator.run_one(&path, idx, source).await
    }

    /// Run all visible cell sources of the active document as one program.
    pub async fn run_all<S: AsRef<str>>(&self, sources: &[S]) -> Result<ExecutionOutcome> {
        let path = self.active_path()?;
        self.coordinator.run_all(&path, sources).await
    }

    /// Sync the active document to `sources` and persist it.
    ///
    /// The document stays dirty if the write fails. On success the local
    /// mirror, if any, receives the same text.
    pub async fn save<S: AsRef<str>>(&self, sources: &[S]) -> Result<()> {
        let (path, text) = {
            let mut registry = self.registry.lock();
            let doc = registry.active_mut().ok_or(NotebookError::NoActiveDocument)?;
            doc.sync_sources(sources);
            (doc.path().to_string(), doc.to_text())
        };

        self.workspace
            .save_file(&path, &text)
            .await
            .map_err(|source| NotebookError::Save {
                path: path.clone(),
                source,
            })?;

        if let Some(doc) = self.registry.lock().get_mut(&path) {
            // Edits made while the save was in flight keep the flag set.
            if doc.to_text() == text {
                doc.dirty = false;
            }
        }
        info!("[session] Saved {}", path);

        if let Some(mirror) = &self.mirror {
            mirror.write(&path, &text)?;
        }
        Ok(())
    }

    /// Shut down the active document's kernel and close the document.
    pub async fn shutdown_active(&self) -> Result<()> {
        let (path, kernel_id) = {
            let registry = self.registry.lock();
            let doc = registry.active().ok_or(NotebookError::NoActiveDocument)?;
            (doc.path().to_string(), doc.kernel_id().clone())
        };
        self.kernels
            .lock()
            .await
            .shutdown(&path, &kernel_id)
            .await?;
        self.registry.lock().remove(&path);
        info!("[session] Closed {}", path);
        Ok(())
    }

    /// Close the channel and forget every open document.
    ///
    /// Kernels are left running on the server.
    pub async fn clear_all(&self) {
        self.kernels.lock().await.close_channel();
        self.registry.lock().clear();
    }

    pub fn active_path(&self) -> Result<String> {
        self.registry
            .lock()
            .active_path()
            .map(str::to_string)
            .ok_or(NotebookError::NoActiveDocument)
    }

    pub fn active_snapshot(&self) -> Option<DocumentSnapshot> {
        self.registry.lock().active().map(|doc| doc.snapshot())
    }

    /// Open paths in tab order.
    pub fn tabs(&self) -> Vec<String> {
        self.registry.lock().paths()
    }

    /// Cells of the active document with an execution in flight.
    pub fn executing(&self) -> Vec<CellId> {
        let doc_id = self.registry.lock().active().map(|doc| doc.id());
        doc_id
            .map(|id| self.coordinator.executing(id))
            .unwrap_or_default()
    }

    /// Upload every `*.py` file under `dir` into the server workspace.
    pub async fn push_sources(&self, dir: &Path) -> Result<usize> {
        let files = mirror::collect_sources(dir)?;
        self.workspace
            .sync_sources(&files)
            .await
            .map_err(|source| NotebookError::SyncSources { source })?;
        info!("[session] Pushed {} files from {}", files.len(), dir.display());
        Ok(files.len())
    }
}
