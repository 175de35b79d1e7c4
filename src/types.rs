//! Common types used across tcb_core
//!
//! This module defines shared identifiers to avoid circular dependencies.

/// Global thread identifier
///
/// Thread ids are small integers handed out by the thread id pool. A thread
/// group is named by the tid of its leader, so group ids share this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ThreadId(pub u32);

impl ThreadId {
    /// Marker for "no task" in id fields that are not set yet
    pub const INVALID: Self = Self(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Address space identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SpaceId(pub u32);

impl SpaceId {
    pub const INVALID: Self = Self(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// The identity triple assigned to a task when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskIds {
    pub tid: ThreadId,
    pub spid: SpaceId,
    pub tgid: ThreadId,
}

impl TaskIds {
    /// Ids for a group leader: the group is named after the thread itself
    pub fn leader(tid: ThreadId, spid: SpaceId) -> Self {
        Self {
            tid,
            spid,
            tgid: tid,
        }
    }
}
