//! tcb_core - Task control blocks and waitqueues for a microkernel
//!
//! This crate provides the task core of the kernel: task control blocks,
//! the registry of live tasks, and the waitqueue protocol that IPC
//! rendezvous and pager notification block on. Scheduling policy and
//! address space internals live outside and are reached through narrow
//! interfaces ([`scheduler::Scheduler`], [`kern::AddressSpace`]).

#![no_std]
// Kernel-appropriate clippy configuration
// Many kernel types have specialized initialization that doesn't fit Default
#![allow(clippy::new_without_default)]
// Bit-field accessors keep explicit zero shifts next to their masks
#![allow(clippy::identity_op)]

// Standard library replacement for no_std
extern crate alloc;

#[cfg(test)]
extern crate std;

// Core types
pub mod config;
pub mod error;
pub mod types;

pub mod kern;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

#[doc(hidden)]
pub use log as __log;

pub use config::KernelConfig;
pub use error::{TaskError, TaskResult};
pub use kern::{TaskCore, Tcb, WaitQueueHead};
pub use types::{SpaceId, TaskIds, ThreadId};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = "tcb_core";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(NAME, "tcb_core");
        assert!(!VERSION.is_empty());
    }
}
