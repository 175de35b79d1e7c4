//! Scheduler interface for tcb_core
//!
//! The task core does not pick what runs next. It calls into a [`Scheduler`]
//! to take the current task off the CPU before it sleeps, to hand woken tasks
//! back, and to yield. The per-task [`SchedInfo`] and the [`RunQueue`] list
//! are the bookkeeping a scheduler keeps on each task.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::bug_on;
use crate::kern::tcb::Tcb;

/// Default priority for new tasks
pub const DEFAULT_PRIORITY: i32 = 16;

/// Identifies a run queue a task is linked on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunQueueId(pub u32);

/// Scheduling fields of a task, owned by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedInfo {
    /// Task's fixed, default priority
    pub priority: i32,
    /// Timeslice ticks left before a reschedule
    pub ticks_left: u32,
    /// Ticks assigned for the current period
    pub ticks_assigned: u32,
    /// Run queue the task is linked on, if any
    pub rq: Option<RunQueueId>,
}

impl SchedInfo {
    pub const fn new() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            ticks_left: 0,
            ticks_assigned: 0,
            rq: None,
        }
    }
}

impl Default for SchedInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Hooks the task core needs from the scheduler
///
/// The task core sets [`TaskState`](crate::kern::tcb::TaskState) itself;
/// these hooks only move tasks on and off run queues and the CPU.
pub trait Scheduler: Sync {
    /// The current task is about to sleep: take it off its run queue
    fn prepare_sleep(&self, task: &Arc<Tcb>);

    /// A task became Runnable: put it on a run queue
    fn enqueue_runnable(&self, task: &Arc<Tcb>);

    /// Give up the CPU until the current task is picked again
    fn yield_now(&self);

    /// Pick the next task right away (used for synchronous wakeups)
    fn reschedule_now(&self);
}

/// FIFO list of runnable tasks
///
/// A task is on at most one run queue; its [`SchedInfo::rq`] records which.
#[derive(Debug)]
pub struct RunQueue {
    id: RunQueueId,
    tasks: VecDeque<Arc<Tcb>>,
}

impl RunQueue {
    /// Create a run queue with a fresh id
    pub fn new() -> Self {
        static NEXT_ID: AtomicU32 = AtomicU32::new(0);
        RunQueue {
            id: RunQueueId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            tasks: VecDeque::new(),
        }
    }

    pub fn id(&self) -> RunQueueId {
        self.id
    }

    /// Link a task at the tail
    pub fn enqueue(&mut self, task: &Arc<Tcb>) {
        let mut info = task.sched_info();
        bug_on!(
            info.rq.is_some(),
            "task {} enqueued while on run queue {:?}",
            task.tid().0,
            info.rq
        );
        info.rq = Some(self.id);
        self.tasks.push_back(Arc::clone(task));
    }

    /// Unlink a task if it is on this queue
    pub fn remove(&mut self, task: &Tcb) -> bool {
        let mut info = task.sched_info();
        if info.rq != Some(self.id) {
            return false;
        }
        info.rq = None;
        self.tasks.retain(|t| !core::ptr::eq(Arc::as_ptr(t), task));
        true
    }

    pub fn contains(&self, task: &Tcb) -> bool {
        task.sched_info().rq == Some(self.id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}
