//! The set of open documents, one tab per path.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::document::{Document, DocumentId};
use crate::protocol::KernelId;

/// Result of [`TabRegistry::open_or_focus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new document was built from the received content.
    Created,
    /// The path was already open; it was only activated.
    Focused,
}

/// Open documents in tab order, at most one per path.
#[derive(Debug, Default)]
pub struct TabRegistry {
    documents: Vec<Document>,
    active: Option<String>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` as a new document, or activate the existing one.
    ///
    /// An already-open document is never rebuilt, so unsaved edits and
    /// outputs survive a second open. `content` and `kernel_id` are ignored
    /// in that case.
    pub fn open_or_focus(&mut self, path: &str, content: &str, kernel_id: KernelId) -> OpenOutcome {
        let outcome = if self.contains(path) {
            OpenOutcome::Focused
        } else {
            self.documents.push(Document::from_content(path, kernel_id, content));
            OpenOutcome::Created
        };
        self.active = Some(path.to_string());
        outcome
    }

    /// Make `path` the displayed document. Returns false if it is not open.
    pub fn set_active(&mut self, path: &str) -> bool {
        if self.contains(path) {
            self.active = Some(path.to_string());
            true
        } else {
            false
        }
    }

    pub fn active_path(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&Document> {
        self.active.as_deref().and_then(|path| self.get(path))
    }

    pub fn active_mut(&mut self) -> Option<&mut Document> {
        let path = self.active.clone()?;
        self.get_mut(&path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.path() == path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Document> {
        self.documents.iter_mut().find(|d| d.path() == path)
    }

    pub fn get_by_id(&self, id: DocumentId) -> Option<&Document> {
        self.documents.iter().find(|d| d.id() == id)
    }

    pub fn get_by_id_mut(&mut self, id: DocumentId) -> Option<&mut Document> {
        self.documents.iter_mut().find(|d| d.id() == id)
    }

    /// Close a document. Clears the active pointer if it pointed there.
    pub fn remove(&mut self, path: &str) -> Option<Document> {
        let idx = self.documents.iter().position(|d| d.path() == path)?;
        if self.active.as_deref() == Some(path) {
            self.active = None;
        }
        Some(self.documents.remove(idx))
    }

    /// Close every document and clear the active pointer.
    pub fn clear(&mut self) {
        self.documents.clear();
        self.active = None;
    }

    /// Paths in tab order.
    pub fn paths(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.path().to_string()).collect()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Registry shared between the session and in-flight executions.
///
/// Lock only for short, synchronous sections; never hold the guard across
/// an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry(Arc<Mutex<TabRegistry>>);

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, TabRegistry> {
        // A panic while holding the lock leaves the registry structurally
        // intact; keep serving it.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::CellOutput;

    fn kernel(id: &str) -> KernelId {
        KernelId::new(id)
    }

    #[test]
    fn test_open_creates_and_activates() {
        let mut reg = TabRegistry::new();
        let outcome = reg.open_or_focus("a.py", "x=1\n# %%\ny=2", kernel("k1"));

        assert_eq!(outcome, OpenOutcome::Created);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.active_path(), Some("a.py"));
        assert_eq!(reg.active().unwrap().len(), 2);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let mut reg = TabRegistry::new();
        reg.open_or_focus("a.py", "x=1\n# %%\ny=2", kernel("k1"));
        {
            let doc = reg.get_mut("a.py").unwrap();
            let id = doc.cell_id_at(0).unwrap();
            doc.record_execution(id, 1, CellOutput::Text("1".into()));
            doc.insert_cell();
        }
        let before = reg.get("a.py").unwrap().cells().to_vec();
        let doc_id = reg.get("a.py").unwrap().id();

        reg.open_or_focus("b.py", "z", kernel("k2"));
        let outcome = reg.open_or_focus("a.py", "totally different", kernel("k3"));

        assert_eq!(outcome, OpenOutcome::Focused);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.active_path(), Some("a.py"));
        let doc = reg.get("a.py").unwrap();
        assert_eq!(doc.id(), doc_id);
        assert_eq!(doc.cells(), &before[..]);
        assert_eq!(doc.kernel_id(), &kernel("k1"));
    }

    #[test]
    fn test_set_active_only_for_open_paths() {
        let mut reg = TabRegistry::new();
        reg.open_or_focus("a.py", "1", kernel("k1"));
        reg.open_or_focus("b.py", "2", kernel("k2"));

        assert!(reg.set_active("a.py"));
        assert_eq!(reg.active_path(), Some("a.py"));
        assert!(!reg.set_active("missing.py"));
        assert_eq!(reg.active_path(), Some("a.py"));
    }

    #[test]
    fn test_set_active_does_not_touch_cells() {
        let mut reg = TabRegistry::new();
        reg.open_or_focus("a.py", "1\n# %%\n2", kernel("k1"));
        reg.open_or_focus("b.py", "3", kernel("k2"));
        let before = reg.get("a.py").unwrap().cells().to_vec();

        reg.set_active("a.py");

        assert_eq!(reg.get("a.py").unwrap().cells(), &before[..]);
    }

    #[test]
    fn test_remove_clears_active_when_matching() {
        let mut reg = TabRegistry::new();
        reg.open_or_focus("a.py", "1", kernel("k1"));
        reg.open_or_focus("b.py", "2", kernel("k2"));

        assert!(reg.remove("a.py").is_some());
        assert_eq!(reg.active_path(), Some("b.py"));

        assert!(reg.remove("b.py").is_some());
        assert_eq!(reg.active_path(), None);
        assert!(reg.remove("b.py").is_none());
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut reg = TabRegistry::new();
        reg.open_or_focus("a.py", "1", kernel("k1"));
        reg.open_or_focus("b.py", "2", kernel("k2"));

        reg.clear();

        assert!(reg.is_empty());
        assert!(reg.active().is_none());
    }

    #[test]
    fn test_paths_in_tab_order() {
        let mut reg = TabRegistry::new();
        reg.open_or_focus("b.py", "1", kernel("k1"));
        reg.open_or_focus("a.py", "2", kernel("k2"));
        reg.open_or_focus("b.py", "3", kernel("k3"));
        assert_eq!(reg.paths(), vec!["b.py", "a.py"]);
    }

    #[test]
    fn test_get_by_id_distinguishes_reopened_documents() {
        let mut reg = TabRegistry::new();
        reg.open_or_focus("a.py", "1", kernel("k1"));
        let old_id = reg.get("a.py").unwrap().id();
        reg.remove("a.py");
        reg.open_or_focus("a.py", "1", kernel("k2"));

        assert!(reg.get_by_id(old_id).is_none());
        let new_id = reg.get("a.py").unwrap().id();
        assert_ne!(old_id, new_id);
        assert!(reg.get_by_id(new_id).is_some());
    }

    #[test]
    fn test_shared_registry_clones_share_state() {
        let shared = SharedRegistry::new();
        let other = shared.clone();
        shared.lock().open_or_focus("a.py", "1", kernel("k1"));
        assert!(other.lock().contains("a.py"));
    }
}
