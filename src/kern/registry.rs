//! Global task registry
//!
//! Every live task is linked here, keyed by thread id. The registry owns the
//! authoritative count of live tasks; a TCB's `registered` bit mirrors its
//! membership so that double adds and stray removes are caught.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use crate::bug_on;
use crate::kern::tcb::Tcb;
use crate::types::ThreadId;

/// All live tasks
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<ThreadId, Arc<Tcb>>,
    total: usize,
}

impl TaskRegistry {
    pub const fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            total: 0,
        }
    }

    /// Link a task
    ///
    /// The task must not be linked already and its tid must be unique.
    pub fn add(&mut self, task: &Arc<Tcb>) {
        let tid = task.tid();
        bug_on!(
            task.set_registered(true),
            "task {} added to the registry twice",
            tid.0
        );
        bug_on!(
            self.tasks.contains_key(&tid),
            "duplicate tid {} in the registry",
            tid.0
        );
        self.tasks.insert(tid, Arc::clone(task));
        self.total += 1;
        self.check_count();
    }

    /// Unlink a task that is currently linked
    pub fn remove(&mut self, task: &Tcb) {
        let tid = task.tid();
        bug_on!(
            !task.set_registered(false),
            "task {} removed but not registered",
            tid.0
        );
        bug_on!(self.total == 0, "task count went negative removing {}", tid.0);
        let removed = self.tasks.remove(&tid);
        bug_on!(
            !removed.is_some_and(|t| core::ptr::eq(Arc::as_ptr(&t), task)),
            "registry entry for tid {} is another task",
            tid.0
        );
        self.total -= 1;
        self.check_count();
    }

    fn check_count(&self) {
        bug_on!(
            self.total != self.tasks.len(),
            "registry count {} but {} tasks linked",
            self.total,
            self.tasks.len()
        );
    }

    /// Look up a live task by tid
    pub fn find(&self, tid: ThreadId) -> Option<Arc<Tcb>> {
        self.tasks.get(&tid).cloned()
    }

    /// Number of live tasks
    pub fn count(&self) -> usize {
        self.total
    }
}
