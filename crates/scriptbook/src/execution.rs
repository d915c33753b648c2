//! Running cells against a document's kernel.
//!
//! Requests capture an [`ExecutionTarget`] up front. The result is applied
//! only if that document instance and cell still exist when it arrives;
//! execution numbers come from one process-wide [`ExecutionCounter`] and
//! are handed out in arrival order, so two racing cells may be numbered in
//! the opposite order to the one they were submitted in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde::Serialize;

use crate::api::KernelApi;
use crate::cells;
use crate::document::{CellId, CellOutput, DocumentId};
use crate::error::{NotebookError, Result};
use crate::protocol::KernelId;
use crate::registry::SharedRegistry;

/// Process-wide execution sequence shared by every document and kernel.
#[derive(Debug)]
pub struct ExecutionCounter(AtomicU64);

impl ExecutionCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Take the next number.
    pub fn allocate(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// The number the next successful execution will get.
    pub fn peek(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for ExecutionCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a result must land, captured when the request is issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionTarget {
    pub document_id: DocumentId,
    pub path: String,
    pub cell_id: CellId,
    pub kernel_id: KernelId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The result was attached to `cell_id`.
    Executed {
        cell_id: CellId,
        execution_count: u64,
        output: CellOutput,
    },
    /// The document was closed or the cell removed while the request ran.
    /// Nothing was written and no number was allocated.
    Stale { target: ExecutionTarget },
    /// There was nothing to run.
    Skipped,
}

type InFlightMap = Arc<Mutex<HashMap<DocumentId, Vec<CellId>>>>;

/// Marks a cell as running until dropped.
struct InFlightGuard {
    map: InFlightMap,
    document_id: DocumentId,
    cell_id: CellId,
}

impl InFlightGuard {
    fn register(map: &InFlightMap, target: &ExecutionTarget) -> Self {
        lock_in_flight(map)
            .entry(target.document_id)
            .or_default()
            .push(target.cell_id);
        Self {
            map: map.clone(),
            document_id: target.document_id,
            cell_id: target.cell_id,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut map = lock_in_flight(&self.map);
        if let Some(cells) = map.get_mut(&self.document_id) {
            if let Some(pos) = cells.iter().position(|c| *c == self.cell_id) {
                cells.remove(pos);
            }
            if cells.is_empty() {
                map.remove(&self.document_id);
            }
        }
    }
}

fn lock_in_flight(
    map: &InFlightMap,
) -> std::sync::MutexGuard<'_, HashMap<DocumentId, Vec<CellId>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sends cell code to kernels and writes results back into the registry.
pub struct ExecutionCoordinator<K> {
    api: Arc<K>,
    registry: SharedRegistry,
    counter: Arc<ExecutionCounter>,
    in_flight: InFlightMap,
}

impl<K> Clone for ExecutionCoordinator<K> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            registry: self.registry.clone(),
            counter: self.counter.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<K: KernelApi> ExecutionCoordinator<K> {
    pub fn new(api: Arc<K>, registry: SharedRegistry, counter: Arc<ExecutionCounter>) -> Self {
        Self {
            api,
            registry,
            counter,
            in_flight: Arc::default(),
        }
    }

    pub fn counter(&self) -> &Arc<ExecutionCounter> {
        &self.counter
    }

    /// Resolve cell `idx` of the open document at `path`.
    pub fn target_at(&self, path: &str, idx: usize) -> Result<ExecutionTarget> {
        let registry = self.registry.lock();
        let doc = registry
            .get(path)
            .ok_or_else(|| NotebookError::DocumentNotOpen(path.to_string()))?;
        let cell_id = doc.cell_id_at(idx).ok_or(NotebookError::CellOutOfRange {
            index: idx,
            len: doc.len(),
        })?;
        Ok(ExecutionTarget {
            document_id: doc.id(),
            path: doc.path().to_string(),
            cell_id,
            kernel_id: doc.kernel_id().clone(),
        })
    }

    /// Run `source`, the currently visible text of cell `idx`.
    ///
    /// The stored cell source is not touched. On failure no number is
    /// allocated and the cell keeps its previous output.
    pub async fn run_one(&self, path: &str, idx: usize, source: &str) -> Result<ExecutionOutcome> {
        let target = self.target_at(path, idx)?;
        debug!("[exec] Running cell {} of {}", idx, path);
        self.execute(target, source).await
    }

    /// Run every visible cell as one program.
    ///
    /// The result is attached to the last cell only; the other cells keep
    /// whatever they showed before. An empty document or an empty source
    /// list is a no-op.
    pub async fn run_all<S: AsRef<str>>(
        &self,
        path: &str,
        sources: &[S],
    ) -> Result<ExecutionOutcome> {
        let last = {
            let registry = self.registry.lock();
            let doc = registry
                .get(path)
                .ok_or_else(|| NotebookError::DocumentNotOpen(path.to_string()))?;
            if doc.is_empty() || sources.is_empty() {
                return Ok(ExecutionOutcome::Skipped);
            }
            doc.len() - 1
        };
        let target = self.target_at(path, last)?;
        let program = cells::join(sources);
        debug!("[exec] Running {} cells of {} as one program", sources.len(), path);
        self.execute(target, &program).await
    }

    /// Cells of `document_id` with a request in flight.
    pub fn executing(&self, document_id: DocumentId) -> Vec<CellId> {
        lock_in_flight(&self.in_flight)
            .get(&document_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn execute(&self, target: ExecutionTarget, code: &str) -> Result<ExecutionOutcome> {
        let _running = InFlightGuard::register(&self.in_flight, &target);
        let result = self
            .api
            .execute(code, &target.kernel_id, &target.path)
            .await
            .map_err(|source| {
                warn!("[exec] Execute failed for {}: {}", target.path, source);
                NotebookError::Execute {
                    path: target.path.clone(),
                    source,
                }
            })?;
        Ok(self.apply(target, CellOutput::from_result(result)))
    }

    fn apply(&self, target: ExecutionTarget, output: CellOutput) -> ExecutionOutcome {
        let mut registry = self.registry.lock();
        let live = registry
            .get_by_id_mut(target.document_id)
            .filter(|doc| doc.cell_by_id(target.cell_id).is_some());
        let Some(doc) = live else {
            warn!(
                "[exec] Discarding stale result for {} (cell {})",
                target.path, target.cell_id
            );
            return ExecutionOutcome::Stale { target };
        };

        let execution_count = self.counter.allocate();
        doc.record_execution(target.cell_id, execution_count, output.clone());
        info!(
            "[exec] {} cell {} finished as [{}]",
            target.path, target.cell_id, execution_count
        );
        ExecutionOutcome::Executed {
            cell_id: target.cell_id,
            execution_count,
            output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeKernel;
    use serde_json::json;

    const PATH: &str = "nb/main.py";

    fn setup(content: &str) -> (Arc<FakeKernel>, SharedRegistry, ExecutionCoordinator<FakeKernel>) {
        let kernel = Arc::new(FakeKernel::new());
        let registry = SharedRegistry::new();
        registry
            .lock()
            .open_or_focus(PATH, content, KernelId::new("k1"));
        let coordinator = ExecutionCoordinator::new(
            kernel.clone(),
            registry.clone(),
            Arc::new(ExecutionCounter::new()),
        );
        (kernel, registry, coordinator)
    }

    fn count_of(outcome: &ExecutionOutcome) -> u64 {
        match outcome {
            ExecutionOutcome::Executed {
                execution_count, ..
            } => *execution_count,
            other => panic!("expected an executed outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_counter_starts_at_one_and_increments() {
        let counter = ExecutionCounter::new();
        assert_eq!(counter.peek(), 1);
        assert_eq!(counter.allocate(), 1);
        assert_eq!(counter.allocate(), 2);
        assert_eq!(counter.peek(), 3);
    }

    #[tokio::test]
    async fn test_run_cells_in_order_numbers_consecutively() {
        let (kernel, registry, coordinator) = setup("a=1\n# %%\nb=2");

        let first = coordinator.run_one(PATH, 0, "a=1").await.unwrap();
        let second = coordinator.run_one(PATH, 1, "b=2").await.unwrap();

        assert_eq!(count_of(&first), 1);
        assert_eq!(count_of(&second), 2);
        assert_eq!(kernel.executed(), vec!["a=1", "b=2"]);

        let registry = registry.lock();
        let doc = registry.get(PATH).unwrap();
        assert_eq!(doc.cell(0).unwrap().execution_count, Some(1));
        assert_eq!(doc.cell(1).unwrap().execution_count, Some(2));
    }

    #[tokio::test]
    async fn test_run_one_sends_visible_source_without_syncing() {
        let (kernel, registry, coordinator) = setup("a=1");
        kernel.push_result(Ok(json!("3")));

        let outcome = coordinator.run_one(PATH, 0, "a=3\na").await.unwrap();

        assert_eq!(kernel.executed(), vec!["a=3\na"]);
        match outcome {
            ExecutionOutcome::Executed { output, .. } => {
                assert_eq!(output, CellOutput::Text("3".into()))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(registry.lock().get(PATH).unwrap().cell(0).unwrap().source, "a=1");
    }

    #[tokio::test]
    async fn test_failure_leaves_counter_and_output_untouched() {
        let (kernel, registry, coordinator) = setup("a=1");
        kernel.push_result(Ok(json!("first")));
        coordinator.run_one(PATH, 0, "a=1").await.unwrap();

        kernel.push_result(Err("NameError: name 'x' is not defined".into()));
        let err = coordinator.run_one(PATH, 0, "x").await.unwrap_err();

        assert!(matches!(err, NotebookError::Execute { .. }));
        assert!(err.to_string().starts_with("Error: "));
        assert_eq!(coordinator.counter().peek(), 2);
        let registry = registry.lock();
        let cell = registry.get(PATH).unwrap().cell(0).unwrap();
        assert_eq!(cell.execution_count, Some(1));
        assert_eq!(cell.output, Some(CellOutput::Text("first".into())));
    }

    #[tokio::test]
    async fn test_no_output_marker_renders_empty() {
        let (kernel, _registry, coordinator) = setup("a=1");
        kernel.push_result(Ok(json!({"no_output": true})));

        let outcome = coordinator.run_one(PATH, 0, "a=1").await.unwrap();

        match outcome {
            ExecutionOutcome::Executed { output, .. } => {
                assert_eq!(output, CellOutput::Empty);
                assert_eq!(output.render(), "");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_all_writes_last_cell_only() {
        let (kernel, registry, coordinator) = setup("x=1\n# %%\nprint(x)");
        kernel.push_result(Ok(json!("1")));

        let outcome = coordinator
            .run_all(PATH, &["x=1", "print(x)"])
            .await
            .unwrap();

        assert_eq!(count_of(&outcome), 1);
        assert_eq!(kernel.executed(), vec!["x=1\n\n# %%\n\nprint(x)"]);
        let registry = registry.lock();
        let doc = registry.get(PATH).unwrap();
        assert_eq!(doc.cell(0).unwrap().output, None);
        assert_eq!(doc.cell(0).unwrap().execution_count, None);
        assert_eq!(
            doc.cell(1).unwrap().output,
            Some(CellOutput::Text("1".into()))
        );
    }

    #[tokio::test]
    async fn test_run_all_on_empty_document_is_skipped() {
        let (kernel, _registry, coordinator) = setup("   ");
        let sources: [&str; 0] = [];

        let outcome = coordinator.run_all(PATH, &sources).await.unwrap();

        assert_eq!(outcome, ExecutionOutcome::Skipped);
        assert!(kernel.executed().is_empty());
        assert_eq!(coordinator.counter().peek(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_and_unknown_document() {
        let (_kernel, _registry, coordinator) = setup("a=1");
        assert!(matches!(
            coordinator.run_one(PATH, 5, "a").await,
            Err(NotebookError::CellOutOfRange { index: 5, len: 1 })
        ));
        assert!(matches!(
            coordinator.run_one("other.py", 0, "a").await,
            Err(NotebookError::DocumentNotOpen(_))
        ));
    }

    #[tokio::test]
    async fn test_result_for_closed_document_is_stale() {
        let (kernel, registry, coordinator) = setup("a=1");
        let gate = kernel.gate("a=1");

        let runner = coordinator.clone();
        let pending = tokio::spawn(async move { runner.run_one(PATH, 0, "a=1").await });
        while kernel.executed().is_empty() {
            tokio::task::yield_now().await;
        }

        // Close and reopen the same path; the result must not land on the
        // new document.
        registry.lock().remove(PATH);
        registry
            .lock()
            .open_or_focus(PATH, "a=1", KernelId::new("k2"));
        gate.send(json!("late")).unwrap();

        let outcome = pending.await.unwrap().unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Stale { .. }));
        assert_eq!(coordinator.counter().peek(), 1);
        let registry = registry.lock();
        assert_eq!(registry.get(PATH).unwrap().cell(0).unwrap().output, None);
    }

    #[tokio::test]
    async fn test_numbers_follow_arrival_order() {
        let (kernel, registry, coordinator) = setup("a=1\n# %%\nb=2");
        let doc_id = registry.lock().get(PATH).unwrap().id();
        let gate_a = kernel.gate("a=1");
        let gate_b = kernel.gate("b=2");

        let runner = coordinator.clone();
        let first = tokio::spawn(async move { runner.run_one(PATH, 0, "a=1").await });
        let runner = coordinator.clone();
        let second = tokio::spawn(async move { runner.run_one(PATH, 1, "b=2").await });
        while coordinator.executing(doc_id).len() < 2 {
            tokio::task::yield_now().await;
        }

        gate_b.send(json!("B")).unwrap();
        let second = second.await.unwrap().unwrap();
        gate_a.send(json!("A")).unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(count_of(&second), 1);
        assert_eq!(count_of(&first), 2);
        assert!(coordinator.executing(doc_id).is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_cleared_after_failure() {
        let (kernel, registry, coordinator) = setup("a=1");
        let doc_id = registry.lock().get(PATH).unwrap().id();
        kernel.push_result(Err("boom".into()));

        assert!(coordinator.run_one(PATH, 0, "a=1").await.is_err());
        assert!(coordinator.executing(doc_id).is_empty());
    }
}
