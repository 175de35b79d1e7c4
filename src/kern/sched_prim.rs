//! Scheduling Primitives - Waitqueues and Wakeup
//!
//! A [`WaitQueueHead`] is a spin-protected FIFO of sleeping tasks plus a
//! sleeper count. Tasks block with [`WaitQueueHead::wait_on`], which re-tests
//! a caller condition under the head lock before every sleep, and are woken
//! with [`wake_up`](WaitQueueHead::wake_up),
//! [`wake_up_all`](WaitQueueHead::wake_up_all) or the targeted [`wake_up_task`].
//!
//! Lock order is always the head's lock first, then the task's wait lock.
//! Neither is held while calling into the scheduler to resume a task, and
//! the head lock is dropped before the sleeping task yields.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::fmt;
use spin::Mutex;

use crate::bug_on;
use crate::error::{TaskError, TaskResult};
use crate::kern::tcb::{TaskFlags, TaskState, Tcb, WaitLink};
use crate::scheduler::Scheduler;

// ============================================================================
// Wakeup Flags
// ============================================================================

/// How a wakeup is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakeupFlags(pub u32);

impl WakeupFlags {
    /// Mark the task runnable and let the scheduler pick it later
    pub const ASYNC: Self = Self(0);
    /// Make the woken wait return Interrupted
    pub const INTERRUPT: Self = Self(1 << 0);
    /// Ask the scheduler to switch right away
    pub const SYNC: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for WakeupFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ============================================================================
// Wait Nodes
// ============================================================================

/// Names one wait attempt on one head
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WaitNodeId(pub u64);

/// Links a task to a head for the duration of one wait
struct WaitNode {
    id: WaitNodeId,
    task: Arc<Tcb>,
}

struct WaitQueueInner {
    sleepers: usize,
    list: VecDeque<WaitNode>,
    next_node: u64,
}

impl WaitQueueInner {
    /// Unlink a node by id and clear its task's back-reference
    fn unlink(&mut self, id: WaitNodeId) -> Option<Arc<Tcb>> {
        let pos = self.list.iter().position(|n| n.id == id)?;
        let node = self.list.remove(pos)?;
        self.sleepers -= 1;
        Some(node.task)
    }
}

// ============================================================================
// Waitqueue Head
// ============================================================================

/// A list of tasks blocked on one condition or event source
pub struct WaitQueueHead {
    inner: Mutex<WaitQueueInner>,
}

impl WaitQueueHead {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(WaitQueueInner {
                sleepers: 0,
                list: VecDeque::new(),
                next_node: 0,
            }),
        }
    }

    /// Number of tasks sleeping here
    pub fn sleepers(&self) -> usize {
        self.inner.lock().sleepers
    }

    /// Is `task` queued on this head?
    pub fn is_queued(&self, task: &Tcb) -> bool {
        self.inner
            .lock()
            .list
            .iter()
            .any(|n| core::ptr::eq(Arc::as_ptr(&n.task), task))
    }

    /// Block `current` until `condition` holds
    ///
    /// The condition is evaluated with the head locked, and the task is
    /// queued and marked Sleeping under that same lock, so a wakeup issued
    /// after the condition was found false cannot be missed. A wakeup is only
    /// a hint: the condition is re-tested every time the task resumes.
    ///
    /// Returns `Err(Interrupted)` if the task was woken with
    /// [`WakeupFlags::INTERRUPT`]. Blocks forever if the condition never
    /// becomes true and nobody wakes the task.
    pub fn wait_on<F>(
        self: &Arc<Self>,
        current: &Arc<Tcb>,
        sched: &dyn Scheduler,
        mut condition: F,
    ) -> TaskResult<()>
    where
        F: FnMut() -> bool,
    {
        loop {
            let mut inner = self.inner.lock();
            if condition() {
                return Ok(());
            }

            let id = WaitNodeId(inner.next_node);
            inner.next_node += 1;
            {
                let mut link = current.waitlock();
                bug_on!(
                    link.is_some(),
                    "task {} waits on two waitqueues",
                    current.tid().0
                );
                *link = Some(WaitLink {
                    head: Arc::downgrade(self),
                    node: id,
                });
            }
            inner.sleepers += 1;
            inner.list.push_back(WaitNode {
                id,
                task: Arc::clone(current),
            });
            log::trace!("({}) waiting...", current.tid().0);

            current.set_state(TaskState::Sleeping);
            sched.prepare_sleep(current);
            drop(inner);

            sched.yield_now();

            // The waker normally unlinks us; cover a resume that did not
            self.finish_wait(current, id);

            if current.take_flags(TaskFlags::INTERRUPTED) {
                log::trace!("({}) wait interrupted", current.tid().0);
                return Err(TaskError::Interrupted);
            }
        }
    }

    /// Drop `current`'s node if it is still linked after a resume
    fn finish_wait(&self, current: &Arc<Tcb>, id: WaitNodeId) {
        let mut inner = self.inner.lock();
        let mut link = current.waitlock();
        let still_linked = link
            .as_ref()
            .is_some_and(|l| l.node == id && core::ptr::eq(l.head.as_ptr(), self));
        if still_linked {
            *link = None;
            inner.unlink(id);
        }
    }

    /// Wake the task that has waited longest, if any
    ///
    /// Returns true if a task was woken.
    pub fn wake_up(&self, flags: WakeupFlags, sched: &dyn Scheduler) -> bool {
        let mut inner = self.inner.lock();
        let Some(node) = inner.list.pop_front() else {
            return false;
        };
        bug_on!(
            inner.sleepers == 0,
            "waitqueue lists task {} with no sleepers",
            node.task.tid().0
        );
        inner.sleepers -= 1;

        let sleeper = node.task;
        *sleeper.waitlock() = None;
        if flags.contains(WakeupFlags::INTERRUPT) {
            sleeper.set_flags(TaskFlags::INTERRUPTED);
        }
        drop(inner);

        log::trace!("waking up ({})", sleeper.tid().0);
        resume_task(&sleeper, flags, sched);
        true
    }

    /// Wake every task queued at the time of the call, oldest first
    ///
    /// Returns the number of tasks woken.
    pub fn wake_up_all(&self, flags: WakeupFlags, sched: &dyn Scheduler) -> usize {
        let queued = self.sleepers();
        (0..queued)
            .take_while(|_| self.wake_up(flags, sched))
            .count()
    }
}

impl Default for WaitQueueHead {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitQueueHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Some(inner) => f
                .debug_struct("WaitQueueHead")
                .field("sleepers", &inner.sleepers)
                .finish(),
            None => f.debug_struct("WaitQueueHead").finish_non_exhaustive(),
        }
    }
}

impl Drop for WaitQueueHead {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        bug_on!(
            inner.sleepers != 0,
            "waitqueue freed with {} sleepers",
            inner.sleepers
        );
    }
}

// ============================================================================
// Targeted Wakeup
// ============================================================================

/// Wake `task` wherever it is queued
///
/// Returns false if the task was not sleeping on any waitqueue (or was woken
/// by someone else first). With [`WakeupFlags::INTERRUPT`] the task's wait
/// returns Interrupted instead of re-testing its condition.
pub fn wake_up_task(task: &Arc<Tcb>, flags: WakeupFlags, sched: &dyn Scheduler) -> bool {
    // Find the head without holding the task lock across taking the head lock
    let (weak_head, node) = match task.waitlock().as_ref() {
        Some(link) => (link.head.clone(), link.node),
        None => return false,
    };

    // -- the task can be woken by someone else here --

    let Some(head) = weak_head.upgrade() else {
        // The head is gone, so its waiter was unlinked before it dropped
        return false;
    };

    let mut inner = head.inner.lock();
    {
        let mut link = task.waitlock();
        let same_wait = link
            .as_ref()
            .is_some_and(|l| l.node == node && l.head.ptr_eq(&weak_head));
        if !same_wait {
            return false;
        }
        *link = None;
    }
    let unlinked = inner.unlink(node);
    bug_on!(
        unlinked.is_none(),
        "task {} points at a waitqueue that does not list it",
        task.tid().0
    );
    if flags.contains(WakeupFlags::INTERRUPT) {
        task.set_flags(TaskFlags::INTERRUPTED);
    }
    drop(inner);

    log::trace!("waking up ({}) directly", task.tid().0);
    resume_task(task, flags, sched);
    true
}

/// Make a task that left its waitqueue runnable again
fn resume_task(task: &Arc<Tcb>, flags: WakeupFlags, sched: &dyn Scheduler) {
    task.set_state(TaskState::Runnable);
    sched.enqueue_runnable(task);
    if flags.contains(WakeupFlags::SYNC) {
        sched.reschedule_now();
    }
}
