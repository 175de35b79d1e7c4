//! Task Control Blocks
//!
//! One [`Tcb`] per schedulable thread. It carries the thread's identity, its
//! scheduling state, the transitional flags other tasks use to get its
//! attention, its IPC flag word, and the waitqueue anchors that IPC
//! rendezvous and pager synchronization block on.
//!
//! TCBs are shared as `Arc<Tcb>`. The registry, waitqueues, runqueues and
//! other tasks hold references, but only the registry decides when a task is
//! live: a TCB must leave the registry and every waitqueue before
//! [`TaskCore::tcb_delete`](crate::kern::task_ctl::TaskCore::tcb_delete)
//! accepts it.

use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use spin::{Mutex, MutexGuard};

use crate::bug_on;
use crate::config::EXTENDED_IPC_MAX;
use crate::error::TaskResult;
use crate::kern::ipc_flags::{IpcFlags, IpcType};
use crate::kern::sched_prim::{WaitNodeId, WaitQueueHead};
use crate::kern::space::AddressSpace;
use crate::kern::utcb::{check_range, UtcbHead};
use crate::kern::zalloc::ZoneElement;
use crate::scheduler::SchedInfo;
use crate::types::{SpaceId, TaskIds, ThreadId};

// ============================================================================
// Task State
// ============================================================================

/// Scheduling state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TaskState {
    /// Allocated or suspended, not eligible to run
    #[default]
    Inactive = 0,
    /// Blocked on a waitqueue
    Sleeping = 1,
    /// Eligible for the scheduler to pick
    Runnable = 2,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Sleeping,
            2 => Self::Runnable,
            _ => Self::Inactive,
        }
    }
}

// ============================================================================
// Transitional Flags
// ============================================================================

/// Transitional status set by other tasks or asynchronous sources
///
/// These sit beside [`TaskState`] and are consumed by the owning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskFlags(pub u32);

impl TaskFlags {
    pub const NONE: Self = Self(0);
    /// A wait was cut short; the next wait loop iteration returns Interrupted
    pub const INTERRUPTED: Self = Self(1 << 0);
    /// Someone asked the task to stop at its next check point
    pub const SUSPENDING: Self = Self(1 << 1);
    /// The task was resumed after a suspension
    pub const RESUMING: Self = Self(1 << 2);
    /// Parked by its own suspension; cleared by the resume that releases it
    pub const SUSPENDED: Self = Self(1 << 3);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for TaskFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ============================================================================
// Space Sharing Mode
// ============================================================================

/// How a new task gets its address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpaceMode {
    /// Run in the parent's space and share its UTCB area
    Share,
    /// Start from a copy of the parent's space
    Copy,
    /// Start from an empty space
    #[default]
    New,
}

/// Creation flags for a new task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreateFlags {
    pub space: SpaceMode,
    /// Join the parent's thread group instead of leading a new one
    pub share_group: bool,
    /// The parent becomes the new task's pager
    pub as_pager: bool,
}

impl CreateFlags {
    pub const fn new_space() -> Self {
        Self {
            space: SpaceMode::New,
            share_group: false,
            as_pager: false,
        }
    }

    /// A sibling thread: same space, same group, same pager
    pub const fn thread() -> Self {
        Self {
            space: SpaceMode::Share,
            share_group: true,
            as_pager: false,
        }
    }

    pub const fn with_space(mut self, space: SpaceMode) -> Self {
        self.space = space;
        self
    }

    pub const fn as_pager(mut self) -> Self {
        self.as_pager = true;
        self
    }

    pub fn shares_space(&self) -> bool {
        self.space == SpaceMode::Share
    }
}

// ============================================================================
// Wait Linkage
// ============================================================================

/// Where a sleeping task is queued
#[derive(Debug, Clone)]
pub(crate) struct WaitLink {
    pub(crate) head: Weak<WaitQueueHead>,
    pub(crate) node: WaitNodeId,
}

// ============================================================================
// Task Control Block
// ============================================================================

/// Kernel record of one thread
#[derive(Debug)]
pub struct Tcb {
    /// Global thread id
    tid: AtomicU32,
    /// Thread group id, the tid of the group leader
    tgid: AtomicU32,
    /// Task that handles this task's faults
    pagerid: AtomicU32,

    state: AtomicU8,
    flags: AtomicU32,
    ipc_flags: AtomicU32,

    /// Serializes state-changing system calls aimed at this task
    thread_control_lock: Mutex<()>,

    /// Runqueue linkage, owned by the scheduler
    sched: Mutex<SchedInfo>,

    /// Set while the task is linked in the task registry
    registered: AtomicBool,

    space: Mutex<Option<Arc<AddressSpace>>>,

    /// UTCB area, shared with the parent when the space is shared
    utcb_head: Arc<UtcbHead>,
    utcb_address: AtomicUsize,

    /// Rendezvous points for blocking IPC
    wqh_recv: Arc<WaitQueueHead>,
    wqh_send: Arc<WaitQueueHead>,
    expected_sender: AtomicU32,

    /// Pagers wait here for this task to change state
    wqh_pager: Arc<WaitQueueHead>,

    /// Waitqueue this task sleeps on; lock order is head first, then this
    waitlock: Mutex<Option<WaitLink>>,

    extended_ipc: Mutex<heapless::Vec<u8, EXTENDED_IPC_MAX>>,

    _mem: ZoneElement,
}

impl Tcb {
    /// Build a zeroed TCB around its zone element and UTCB head
    pub(crate) fn new(mem: ZoneElement, utcb_head: Arc<UtcbHead>) -> Self {
        Self {
            tid: AtomicU32::new(ThreadId::INVALID.0),
            tgid: AtomicU32::new(ThreadId::INVALID.0),
            pagerid: AtomicU32::new(ThreadId::INVALID.0),
            state: AtomicU8::new(TaskState::Inactive as u8),
            flags: AtomicU32::new(0),
            ipc_flags: AtomicU32::new(0),
            thread_control_lock: Mutex::new(()),
            sched: Mutex::new(SchedInfo::new()),
            registered: AtomicBool::new(false),
            space: Mutex::new(None),
            utcb_head,
            utcb_address: AtomicUsize::new(0),
            wqh_recv: Arc::new(WaitQueueHead::new()),
            wqh_send: Arc::new(WaitQueueHead::new()),
            expected_sender: AtomicU32::new(ThreadId::INVALID.0),
            wqh_pager: Arc::new(WaitQueueHead::new()),
            waitlock: Mutex::new(None),
            extended_ipc: Mutex::new(heapless::Vec::new()),
            _mem: mem,
        }
    }

    // === Identity ===

    pub fn tid(&self) -> ThreadId {
        ThreadId(self.tid.load(Ordering::Acquire))
    }

    pub fn tgid(&self) -> ThreadId {
        ThreadId(self.tgid.load(Ordering::Acquire))
    }

    pub fn spid(&self) -> SpaceId {
        self.space
            .lock()
            .as_ref()
            .map(|space| space.spid())
            .unwrap_or(SpaceId::INVALID)
    }

    /// Assign tid and tgid; the space id travels with the space handle
    pub fn set_task_ids(&self, ids: &TaskIds) {
        bug_on!(
            self.is_registered(),
            "set_task_ids on registered task {}",
            self.tid().0
        );
        self.tid.store(ids.tid.0, Ordering::Release);
        self.tgid.store(ids.tgid.0, Ordering::Release);
    }

    pub fn pagerid(&self) -> ThreadId {
        ThreadId(self.pagerid.load(Ordering::Acquire))
    }

    pub fn set_pager(&self, pager: ThreadId) {
        self.pagerid.store(pager.0, Ordering::Release);
    }

    // === State ===

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    // === Transitional flags ===

    pub fn flags(&self) -> TaskFlags {
        TaskFlags(self.flags.load(Ordering::Acquire))
    }

    /// Raise flags; safe from any task or asynchronous context
    pub fn set_flags(&self, flags: TaskFlags) {
        self.flags.fetch_or(flags.0, Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: TaskFlags) {
        self.flags.fetch_and(!flags.0, Ordering::AcqRel);
    }

    /// Read-then-clear: true if any of `flags` was set
    pub fn take_flags(&self, flags: TaskFlags) -> bool {
        self.flags.fetch_and(!flags.0, Ordering::AcqRel) & flags.0 != 0
    }

    // === IPC flags ===

    pub fn ipc_flags(&self) -> IpcFlags {
        IpcFlags(self.ipc_flags.load(Ordering::Acquire))
    }

    pub fn set_ipc_flags(&self, flags: IpcFlags) {
        self.ipc_flags.store(flags.0, Ordering::Release);
    }

    pub fn ipc_type(&self) -> TaskResult<IpcType> {
        self.ipc_flags().get_type()
    }

    pub fn set_ipc_type(&self, ty: IpcType) {
        let updated = self
            .ipc_flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(IpcFlags(raw).set_type(ty).0)
            });
        bug_on!(
            updated.is_err(),
            "ipc flags update refused for task {}",
            self.tid().0
        );
    }

    pub fn expected_sender(&self) -> ThreadId {
        ThreadId(self.expected_sender.load(Ordering::Acquire))
    }

    pub fn set_expected_sender(&self, sender: ThreadId) {
        self.expected_sender.store(sender.0, Ordering::Release);
    }

    // === Extended IPC buffer ===

    /// Bytes staged for an extended IPC
    pub fn extended_ipc_size(&self) -> usize {
        self.extended_ipc.lock().len()
    }

    /// Stage `data` at `offset`; the buffer grows up to `EXTENDED_IPC_MAX`
    pub fn write_extended(&self, offset: usize, data: &[u8]) -> TaskResult<()> {
        check_range(offset, data.len(), EXTENDED_IPC_MAX)?;
        let mut buf = self.extended_ipc.lock();
        let end = offset + data.len();
        if buf.len() < end {
            bug_on!(
                buf.resize(end, 0).is_err(),
                "task {}: extended buffer cannot grow to {}",
                self.tid().0,
                end
            );
        }
        buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Read staged bytes; reading past what was staged is out of range
    pub fn read_extended(&self, offset: usize, out: &mut [u8]) -> TaskResult<()> {
        let buf = self.extended_ipc.lock();
        check_range(offset, out.len(), buf.len())?;
        out.copy_from_slice(&buf[offset..offset + out.len()]);
        Ok(())
    }

    pub fn clear_extended(&self) {
        self.extended_ipc.lock().clear();
    }

    // === Address space and UTCB ===

    pub fn space(&self) -> Option<Arc<AddressSpace>> {
        self.space.lock().clone()
    }

    /// Attach to `space`; a task runs in at most one space
    pub fn attach_space(&self, space: Arc<AddressSpace>) {
        let mut slot = self.space.lock();
        bug_on!(
            slot.is_some(),
            "task {} attached to a second space",
            self.tid().0
        );
        space.attach();
        *slot = Some(space);
    }

    /// Detach from the current space, returning it if this was its last user
    pub fn detach_space(&self) -> Option<Arc<AddressSpace>> {
        let space = self.space.lock().take()?;
        space.detach().then_some(space)
    }

    pub fn utcb_head(&self) -> &Arc<UtcbHead> {
        &self.utcb_head
    }

    pub fn utcb_address(&self) -> usize {
        self.utcb_address.load(Ordering::Acquire)
    }

    pub fn set_utcb_address(&self, addr: usize) {
        self.utcb_address.store(addr, Ordering::Release);
    }

    // === Locks and scheduler linkage ===

    /// Take the lock that serializes thread-control operations on this task
    ///
    /// Never hold the guard across a blocking wait.
    pub fn lock_control(&self) -> MutexGuard<'_, ()> {
        self.thread_control_lock.lock()
    }

    pub fn sched_info(&self) -> MutexGuard<'_, SchedInfo> {
        self.sched.lock()
    }

    // === Registry linkage ===

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Flip the registry link state; returns the previous value
    pub(crate) fn set_registered(&self, linked: bool) -> bool {
        self.registered.swap(linked, Ordering::AcqRel)
    }

    // === Waitqueues ===

    pub fn wqh_recv(&self) -> &Arc<WaitQueueHead> {
        &self.wqh_recv
    }

    pub fn wqh_send(&self) -> &Arc<WaitQueueHead> {
        &self.wqh_send
    }

    pub fn wqh_pager(&self) -> &Arc<WaitQueueHead> {
        &self.wqh_pager
    }

    /// The waitqueue this task is sleeping on, if any
    pub fn waiting_on(&self) -> Option<Arc<WaitQueueHead>> {
        self.waitlock.lock().as_ref().and_then(|link| link.head.upgrade())
    }

    pub fn is_waiting(&self) -> bool {
        self.waitlock.lock().is_some()
    }

    pub(crate) fn waitlock(&self) -> MutexGuard<'_, Option<WaitLink>> {
        self.waitlock.lock()
    }
}
