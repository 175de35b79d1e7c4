//! Kern subsystem - Task core primitives
//!
//! Task control blocks, the task registry, waitqueues and the identifier
//! pools and zones tasks are built from.

pub mod idpool;
pub mod ipc_flags;
pub mod registry;
pub mod sched_prim;
pub mod space;
pub mod task_ctl;
pub mod tcb;
pub mod utcb;
pub mod zalloc;

pub use idpool::IdPool;
pub use ipc_flags::{IpcFlags, IpcType};
pub use registry::TaskRegistry;
pub use sched_prim::{wake_up_task, WaitNodeId, WaitQueueHead, WakeupFlags};
pub use space::AddressSpace;
pub use task_ctl::TaskCore;
pub use tcb::{CreateFlags, SpaceMode, TaskFlags, TaskState, Tcb};
pub use utcb::{Utcb, UtcbHead, UtcbPage};
pub use zalloc::{Zone, ZoneElement, ZoneStats};

use crate::config::KernelConfig;

// ============================================================================
// Global State
// ============================================================================

static TASK_CORE: spin::Once<TaskCore> = spin::Once::new();

/// Build the kernel's task core; later calls return the first instance
pub fn init(config: KernelConfig) -> &'static TaskCore {
    TASK_CORE.call_once(|| {
        log::info!("kern: task core initialized");
        TaskCore::new(config)
    })
}

/// The kernel's task core, once [`init`] has run
pub fn task_core() -> Option<&'static TaskCore> {
    TASK_CORE.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_once() {
        let first = init(KernelConfig::new().with_tasks(8));
        let second = init(KernelConfig::new());
        assert!(core::ptr::eq(first, second));
        assert_eq!(second.config().tasks_max, 8);
        assert!(task_core().is_some_and(|tc| core::ptr::eq(tc, first)));
    }
}
