//! Task Control - creating, destroying and suspending tasks
//!
//! [`TaskCore`] owns everything a task needs to exist: the registry, the
//! thread and space id pools, and the zones TCBs and UTCB heads come from.
//! One instance is built at kernel start (see [`crate::kern::init`]).
//!
//! Creation acquires resources in a fixed order (tid, TCB, space, UTCB slot)
//! and only links the task into the registry once all of them succeeded, so
//! a failed create leaves no trace.

use alloc::sync::Arc;
use spin::Mutex;

use crate::bug_on;
use crate::config::KernelConfig;
use crate::error::{TaskError, TaskResult};
use crate::kern::idpool::IdPool;
use crate::kern::registry::TaskRegistry;
use crate::kern::sched_prim::{wake_up_task, WakeupFlags};
use crate::kern::space::AddressSpace;
use crate::kern::tcb::{CreateFlags, SpaceMode, TaskFlags, TaskState, Tcb};
use crate::kern::utcb::UtcbHead;
use crate::kern::zalloc::Zone;
use crate::scheduler::Scheduler;
use crate::types::{SpaceId, TaskIds, ThreadId};

/// Owner of all live tasks and the resources they are built from
pub struct TaskCore {
    config: KernelConfig,
    registry: Mutex<TaskRegistry>,
    thread_ids: Mutex<IdPool>,
    space_ids: Mutex<IdPool>,
    tcb_zone: Arc<Zone>,
    utcb_zone: Arc<Zone>,
}

impl TaskCore {
    pub fn new(config: KernelConfig) -> Self {
        log::debug!(
            "task core: {} tids, {} spids, {} tasks",
            config.thread_ids_max,
            config.space_ids_max,
            config.tasks_max
        );
        Self {
            config,
            registry: Mutex::new(TaskRegistry::new()),
            thread_ids: Mutex::new(IdPool::new("thread id", config.thread_ids_max)),
            space_ids: Mutex::new(IdPool::new("space id", config.space_ids_max)),
            tcb_zone: Zone::new("tcb", config.tasks_max),
            utcb_zone: Zone::new("utcb head", config.tasks_max),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // ========================================================================
    // TCB allocation and registry
    // ========================================================================

    /// Allocate a zeroed, unregistered TCB
    ///
    /// With [`SpaceMode::Share`] the new TCB holds another reference to the
    /// parent's UTCB head, otherwise it gets a fresh one.
    pub fn tcb_alloc_init(
        &self,
        parent: Option<&Tcb>,
        flags: CreateFlags,
    ) -> TaskResult<Arc<Tcb>> {
        let mem = self.tcb_zone.zalloc()?;

        let utcb_head = if flags.shares_space() {
            let parent = parent.ok_or(TaskError::InvalidArgument)?;
            Arc::clone(parent.utcb_head())
        } else {
            // On failure `mem` drops here and goes back to the TCB zone
            let head_mem = self.utcb_zone.zalloc()?;
            Arc::new(UtcbHead::new(self.config.utcb_area_start, head_mem))
        };

        Ok(Arc::new(Tcb::new(mem, utcb_head)))
    }

    pub fn tcb_add(&self, task: &Arc<Tcb>) {
        self.registry.lock().add(task);
        log::debug!("registry: added task {}", task.tid().0);
    }

    pub fn tcb_remove(&self, task: &Tcb) {
        self.registry.lock().remove(task);
        log::debug!("registry: removed task {}", task.tid().0);
    }

    pub fn tcb_find(&self, tid: ThreadId) -> Option<Arc<Tcb>> {
        self.registry.lock().find(tid)
    }

    /// Release a TCB that has left the registry and every waitqueue
    ///
    /// Detaches the task from its address space and releases the space id
    /// if this was the last task in it. The UTCB head is freed along with
    /// the last TCB that shares it.
    pub fn tcb_delete(&self, task: Arc<Tcb>) {
        let tid = task.tid();
        bug_on!(task.is_registered(), "deleting registered task {}", tid.0);
        bug_on!(
            task.state() == TaskState::Sleeping || task.is_waiting(),
            "deleting sleeping task {}",
            tid.0
        );
        bug_on!(
            task.sched_info().rq.is_some(),
            "deleting task {} still on a run queue",
            tid.0
        );

        if let Some(space) = task.detach_space() {
            self.space_ids.lock().release(space.spid().0);
            log::debug!("space {} released with task {}", space.spid().0, tid.0);
        }

        let shared_utcb = Arc::strong_count(task.utcb_head()) > 1;
        log::debug!(
            "deleting task {} ({} utcb head)",
            tid.0,
            if shared_utcb { "shared" } else { "own" }
        );
    }

    // ========================================================================
    // Thread control
    // ========================================================================

    /// Create a task and link it into the registry
    ///
    /// The new task is Inactive until [`thread_start`](Self::thread_start).
    pub fn thread_create(
        &self,
        parent: Option<&Arc<Tcb>>,
        flags: CreateFlags,
    ) -> TaskResult<Arc<Tcb>> {
        let tid = ThreadId(self.thread_ids.lock().alloc()?);

        let task = match self.tcb_alloc_init(parent.map(|p| &**p), flags) {
            Ok(task) => task,
            Err(err) => {
                self.thread_ids.lock().release(tid.0);
                return Err(err);
            }
        };

        if let Err(err) = self.setup_task(&task, tid, parent, flags) {
            log::warn!("thread_create: task {} failed: {:?}", tid.0, err);
            self.thread_ids.lock().release(tid.0);
            self.tcb_delete(task);
            return Err(err);
        }

        self.tcb_add(&task);
        log::debug!(
            "created task {} (tgid {}, space {}, pager {})",
            tid.0,
            task.tgid().0,
            task.spid().0,
            task.pagerid().0
        );
        Ok(task)
    }

    /// Give a fresh TCB its space, ids, pager and UTCB slot
    fn setup_task(
        &self,
        task: &Tcb,
        tid: ThreadId,
        parent: Option<&Arc<Tcb>>,
        flags: CreateFlags,
    ) -> TaskResult<()> {
        let space = match (flags.space, parent) {
            (SpaceMode::Share, Some(parent)) => {
                parent.space().ok_or(TaskError::InvalidArgument)?
            }
            (SpaceMode::Share, None) => return Err(TaskError::InvalidArgument),
            // Page table contents are the VM layer's business; a copy
            // starts as a new space id like any other
            (SpaceMode::Copy | SpaceMode::New, _) => {
                AddressSpace::new(SpaceId(self.space_ids.lock().alloc()?))
            }
        };
        let spid = space.spid();
        task.attach_space(space);

        let tgid = match parent {
            Some(parent) if flags.share_group => parent.tgid(),
            _ => tid,
        };
        task.set_task_ids(&TaskIds { tid, spid, tgid });

        let pager = match parent {
            Some(parent) if flags.as_pager => parent.tid(),
            Some(parent) => parent.pagerid(),
            None => ThreadId::INVALID,
        };
        task.set_pager(pager);

        let utcb = task.utcb_head().new_utcb()?;
        task.set_utcb_address(utcb);
        Ok(())
    }

    /// Unlink a task and release everything it holds
    ///
    /// The task must not be sleeping or queued to run: `Busy` otherwise.
    /// `NotFound` if it is not registered.
    pub fn thread_destroy(&self, task: &Arc<Tcb>) -> TaskResult<()> {
        let tid = task.tid();
        {
            let _ctl = task.lock_control();
            if !task.is_registered() {
                return Err(TaskError::NotFound);
            }
            if task.state() == TaskState::Sleeping
                || task.is_waiting()
                || task.sched_info().rq.is_some()
            {
                return Err(TaskError::Busy);
            }
            self.tcb_remove(task);
        }

        let freed = task.utcb_head().delete_utcb(task.utcb_address());
        bug_on!(
            freed.is_err(),
            "task {} lost its utcb slot {:#x}",
            tid.0,
            task.utcb_address()
        );
        self.thread_ids.lock().release(tid.0);
        self.tcb_delete(Arc::clone(task));
        Ok(())
    }

    /// Make a newly created task runnable
    ///
    /// A suspended task is released with [`thread_resume`](Self::thread_resume)
    /// instead.
    pub fn thread_start(&self, task: &Arc<Tcb>, sched: &dyn Scheduler) -> TaskResult<()> {
        let _ctl = task.lock_control();
        if task.state() != TaskState::Inactive {
            return Err(TaskError::Busy);
        }
        if task.flags().contains(TaskFlags::SUSPENDED) {
            return Err(TaskError::InvalidArgument);
        }
        task.set_state(TaskState::Runnable);
        sched.enqueue_runnable(task);
        log::debug!("started task {}", task.tid().0);
        Ok(())
    }

    /// Stop `target` and wait, as `pager`, until it is Inactive
    ///
    /// The target is asked to suspend and woken out of any wait it is in;
    /// it parks itself the next time it runs
    /// [`handle_pending`](Self::handle_pending). Returns `Err(Interrupted)`
    /// if the pager's own wait is interrupted.
    pub fn thread_suspend(
        &self,
        target: &Arc<Tcb>,
        pager: &Arc<Tcb>,
        sched: &dyn Scheduler,
    ) -> TaskResult<()> {
        {
            let _ctl = target.lock_control();
            if target.state() == TaskState::Inactive {
                return Ok(());
            }
            target.set_flags(TaskFlags::SUSPENDING);
            wake_up_task(target, WakeupFlags::INTERRUPT, sched);
        }

        log::debug!("({}) waiting for task {} to suspend", pager.tid().0, target.tid().0);
        target
            .wqh_pager()
            .wait_on(pager, sched, || target.state() == TaskState::Inactive)
    }

    /// Act on transitional flags raised against the current task
    ///
    /// On a pending suspension the task goes Inactive, tells everyone
    /// waiting on its pager queue, and gives up the CPU until it is resumed.
    /// Returns true if the task was suspended.
    pub fn handle_pending(&self, current: &Arc<Tcb>, sched: &dyn Scheduler) -> bool {
        {
            // A resume must not land between going Inactive and leaving the
            // run queue
            let _ctl = current.lock_control();
            if !current.take_flags(TaskFlags::SUSPENDING) {
                return false;
            }
            log::debug!("({}) suspended", current.tid().0);
            current.set_flags(TaskFlags::SUSPENDED);
            current.set_state(TaskState::Inactive);
            sched.prepare_sleep(current);
        }

        // Every pager waiting here waits for the same state
        current.wqh_pager().wake_up_all(WakeupFlags::SYNC, sched);
        sched.yield_now();

        if current.take_flags(TaskFlags::RESUMING) {
            log::debug!("({}) resumed", current.tid().0);
        }
        true
    }

    /// Let a suspended task run again
    ///
    /// `InvalidArgument` if the task is Inactive but was never suspended.
    pub fn thread_resume(&self, target: &Arc<Tcb>, sched: &dyn Scheduler) -> TaskResult<()> {
        let _ctl = target.lock_control();
        if target.state() != TaskState::Inactive {
            return Err(TaskError::Busy);
        }
        if !target.take_flags(TaskFlags::SUSPENDED) {
            return Err(TaskError::InvalidArgument);
        }
        target.set_flags(TaskFlags::RESUMING);
        target.set_state(TaskState::Runnable);
        sched.enqueue_runnable(target);
        Ok(())
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Number of registered tasks
    pub fn task_count(&self) -> usize {
        self.registry.lock().count()
    }

    pub fn thread_ids_in_use(&self) -> usize {
        self.thread_ids.lock().in_use()
    }

    pub fn space_ids_in_use(&self) -> usize {
        self.space_ids.lock().in_use()
    }

    pub fn tcb_zone(&self) -> &Arc<Zone> {
        &self.tcb_zone
    }

    pub fn utcb_zone(&self) -> &Arc<Zone> {
        &self.utcb_zone
    }
}
