//! In-memory model of one open script file.
//!
//! A [`Document`] is an ordered list of [`Cell`]s bound to one kernel. Each
//! cell carries its own last output and execution count, so outputs follow
//! cell identity rather than array position: inserting or dropping cells
//! never shifts an output onto a different cell.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cells;
use crate::protocol::KernelId;

/// Stable handle for a cell, assigned when the cell is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(Uuid);

impl CellId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one document instance. Reopening a path yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Last output of a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", content = "value", rename_all = "snake_case")]
pub enum CellOutput {
    Text(String),
    Structured(serde_json::Value),
    Empty,
}

impl CellOutput {
    /// Interpret a raw execute `result`.
    ///
    /// Strings become text, `null` and objects flagged with a truthy
    /// `no_output` field become [`CellOutput::Empty`], and any other value
    /// is kept as structured data.
    pub fn from_result(result: serde_json::Value) -> Self {
        match result {
            serde_json::Value::String(text) => CellOutput::Text(text),
            serde_json::Value::Null => CellOutput::Empty,
            value if is_no_output(&value) => CellOutput::Empty,
            value => CellOutput::Structured(value),
        }
    }

    /// Text to show under the cell.
    pub fn render(&self) -> String {
        match self {
            CellOutput::Text(text) => text.clone(),
            CellOutput::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            CellOutput::Empty => String::new(),
        }
    }
}

fn is_no_output(value: &serde_json::Value) -> bool {
    match value.get("no_output") {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Bool(flag)) => *flag,
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub id: CellId,
    pub source: String,
    /// `None` until the cell has been run.
    pub output: Option<CellOutput>,
    /// `None` means "never run".
    pub execution_count: Option<u64>,
}

impl Cell {
    fn new(source: String) -> Self {
        Self {
            id: CellId::new(),
            source,
            output: None,
            execution_count: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    path: String,
    kernel_id: KernelId,
    cells: Vec<Cell>,
    /// Set by edits and inserts, cleared on save.
    pub dirty: bool,
}

impl Document {
    /// Build a document from raw file content received for `path`.
    pub fn from_content(path: impl Into<String>, kernel_id: KernelId, content: &str) -> Self {
        Self {
            id: DocumentId::new(),
            path: path.into(),
            kernel_id,
            cells: cells::split(content).into_iter().map(Cell::new).collect(),
            dirty: false,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The kernel this document was opened with. Never changes.
    pub fn kernel_id(&self) -> &KernelId {
        &self.kernel_id
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, idx: usize) -> Option<&Cell> {
        self.cells.get(idx)
    }

    pub fn cell_by_id(&self, cell_id: CellId) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id == cell_id)
    }

    pub fn cell_id_at(&self, idx: usize) -> Option<CellId> {
        self.cells.get(idx).map(|c| c.id)
    }

    pub fn position(&self, cell_id: CellId) -> Option<usize> {
        self.cells.iter().position(|c| c.id == cell_id)
    }

    pub fn sources(&self) -> Vec<String> {
        self.cells.iter().map(|c| c.source.clone()).collect()
    }

    /// Append an empty, never-run cell and return its id.
    pub fn insert_cell(&mut self) -> CellId {
        let cell = Cell::new(String::new());
        let id = cell.id;
        self.cells.push(cell);
        self.dirty = true;
        id
    }

    /// Overwrite cell sources with what the user currently sees.
    ///
    /// Cells at surviving positions keep their id and last output. Extra
    /// sources become new never-run cells; missing trailing positions are
    /// dropped together with their outputs.
    pub fn sync_sources<S: AsRef<str>>(&mut self, sources: &[S]) {
        self.cells.truncate(sources.len());
        for (idx, source) in sources.iter().enumerate() {
            let source = source.as_ref();
            match self.cells.get_mut(idx) {
                Some(cell) if cell.source != source => {
                    cell.source = source.to_string();
                    self.dirty = true;
                }
                Some(_) => {}
                None => {
                    self.cells.push(Cell::new(source.to_string()));
                    self.dirty = true;
                }
            }
        }
    }

    /// Serialized file text for persistence.
    pub fn to_text(&self) -> String {
        let sources: Vec<&str> = self.cells.iter().map(|c| c.source.as_str()).collect();
        cells::join(&sources)
    }

    /// Attach an execution result to a cell. Returns false if the cell no
    /// longer exists.
    pub fn record_execution(&mut self, cell_id: CellId, count: u64, output: CellOutput) -> bool {
        match self.cells.iter_mut().find(|c| c.id == cell_id) {
            Some(cell) => {
                cell.execution_count = Some(count);
                cell.output = Some(output);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            id: self.id,
            path: self.path.clone(),
            kernel_id: self.kernel_id.clone(),
            dirty: self.dirty,
            cells: self
                .cells
                .iter()
                .map(|cell| CellSnapshot {
                    id: cell.id,
                    source: cell.source.clone(),
                    execution_count: cell.execution_count,
                    output: cell.output.as_ref().map(CellOutput::render),
                })
                .collect(),
        }
    }
}

/// Serializable view of a document for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: DocumentId,
    pub path: String,
    pub kernel_id: KernelId,
    pub dirty: bool,
    pub cells: Vec<CellSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub id: CellId,
    pub source: String,
    pub execution_count: Option<u64>,
    /// Rendered output; `None` if the cell has never produced one.
    pub output: Option<String>,
}
