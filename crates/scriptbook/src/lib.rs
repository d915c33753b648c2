//! Client core for notebooks stored as plain scripts.
//!
//! A script is divided into cells by `# %%` marker lines. Opening a file
//! starts a kernel on the server, asks for the file over that kernel's push
//! channel, and keeps the resulting [`Document`] in a [`TabRegistry`].
//! Cells run through the [`ExecutionCoordinator`], which numbers results
//! from one process-wide counter.

pub mod api;
pub mod browse;
pub mod cells;
pub mod channel;
pub mod document;
pub mod error;
pub mod execution;
pub mod http;
pub mod kernel_session;
pub mod mirror;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod settings;

pub use document::{Cell, CellId, CellOutput, Document, DocumentId, DocumentSnapshot};
pub use error::{ChannelError, NotebookError, RemoteError, Result};
pub use execution::{ExecutionCoordinator, ExecutionCounter, ExecutionOutcome, ExecutionTarget};
pub use protocol::{DirEntry, KernelId};
pub use registry::{OpenOutcome, SharedRegistry, TabRegistry};
pub use session::{HttpSession, NotebookSession};
pub use settings::Settings;
