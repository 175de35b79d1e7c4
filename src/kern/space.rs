//! Address space handles
//!
//! The page tables behind an address space belong to the VM subsystem. The
//! task core only carries a shared handle per task and counts how many TCBs
//! use it, so the space id can be released with the last one.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::bug_on;
use crate::types::SpaceId;

/// Opaque, shared address space handle
#[derive(Debug)]
pub struct AddressSpace {
    spid: SpaceId,
    ktcb_refs: AtomicU32,
}

impl AddressSpace {
    pub fn new(spid: SpaceId) -> Arc<Self> {
        Arc::new(Self {
            spid,
            ktcb_refs: AtomicU32::new(0),
        })
    }

    pub fn spid(&self) -> SpaceId {
        self.spid
    }

    /// Number of TCBs running in this space
    pub fn users(&self) -> u32 {
        self.ktcb_refs.load(Ordering::Acquire)
    }

    /// A TCB starts using the space
    pub fn attach(&self) {
        self.ktcb_refs.fetch_add(1, Ordering::AcqRel);
    }

    /// A TCB stops using the space; returns true for the last user
    pub fn detach(&self) -> bool {
        let prev = self.ktcb_refs.fetch_sub(1, Ordering::AcqRel);
        bug_on!(prev == 0, "space {}: detach without users", self.spid.0);
        prev == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_detach() {
        let space = AddressSpace::new(SpaceId(3));
        space.attach();
        space.attach();
        assert_eq!(space.users(), 2);
        assert!(!space.detach());
        assert!(space.detach());
        assert_eq!(space.spid(), SpaceId(3));
    }

    #[test]
    #[should_panic(expected = "detach without users")]
    fn test_detach_underflow() {
        AddressSpace::new(SpaceId(0)).detach();
    }
}
