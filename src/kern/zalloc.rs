//! Zone-based Memory Accounting
//!
//! A zone is a fixed-capacity pool for one kind of kernel object. TCBs and
//! UTCB heads each come from their own zone, so running out of kernel memory
//! is an ordinary, observable error instead of an allocator abort.
//!
//! Every allocation is a [`ZoneElement`] that hands its slot back to the zone
//! when dropped. An object that embeds its element is "freed" exactly when its
//! last reference goes away.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::error::{TaskError, TaskResult};

// ============================================================================
// Zone Statistics
// ============================================================================

/// Zone statistics for debugging and monitoring
#[derive(Debug, Default)]
pub struct ZoneStats {
    /// Total allocations from this zone
    pub alloc_count: AtomicU64,
    /// Total deallocations to this zone
    pub free_count: AtomicU64,
    /// Maximum elements ever in use
    pub max_in_use: AtomicUsize,
    /// Failed allocation attempts
    pub failures: AtomicU32,
}

impl ZoneStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_alloc(&self, in_use: usize) {
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
        self.max_in_use.fetch_max(in_use, Ordering::Relaxed);
    }

    fn record_free(&self) {
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Zone
// ============================================================================

/// A fixed-capacity pool of kernel objects
#[derive(Debug)]
pub struct Zone {
    /// Zone name (for debugging)
    pub name: &'static str,

    /// Maximum number of elements
    max_elems: usize,

    /// Elements currently handed out
    in_use: AtomicUsize,

    /// Zone statistics
    pub stats: ZoneStats,
}

impl Zone {
    /// Create a new zone holding at most `max_elems` elements
    pub fn new(name: &'static str, max_elems: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            max_elems,
            in_use: AtomicUsize::new(0),
            stats: ZoneStats::new(),
        })
    }

    /// Elements currently allocated
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Capacity of the zone
    pub fn capacity(&self) -> usize {
        self.max_elems
    }

    /// Take one element from the zone
    pub fn zalloc(self: &Arc<Self>) -> TaskResult<ZoneElement> {
        let claimed = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_elems).then_some(n + 1)
            });

        match claimed {
            Ok(prev) => {
                self.stats.record_alloc(prev + 1);
                Ok(ZoneElement {
                    zone: Arc::clone(self),
                })
            }
            Err(_) => {
                self.stats.record_failure();
                log::warn!("zone {}: exhausted ({} elements)", self.name, self.max_elems);
                Err(TaskError::NoMemory)
            }
        }
    }

    fn zfree(&self) {
        let prev = self.in_use.fetch_sub(1, Ordering::AcqRel);
        crate::bug_on!(prev == 0, "zone {}: free with nothing allocated", self.name);
        self.stats.record_free();
    }
}

/// One allocated element of a [`Zone`]
///
/// Dropping the element returns its slot to the zone.
#[derive(Debug)]
pub struct ZoneElement {
    zone: Arc<Zone>,
}

impl Drop for ZoneElement {
    fn drop(&mut self) {
        self.zone.zfree();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_exhaustion() {
        let zone = Zone::new("test", 2);

        let a = zone.zalloc().unwrap();
        let _b = zone.zalloc().unwrap();
        assert_eq!(zone.in_use(), 2);
        assert_eq!(zone.zalloc().unwrap_err(), TaskError::NoMemory);
        assert_eq!(zone.stats.failures.load(Ordering::Relaxed), 1);

        // Freeing one element makes room again
        drop(a);
        assert_eq!(zone.in_use(), 1);
        assert!(zone.zalloc().is_ok());
    }

    #[test]
    fn test_zone_stats() {
        let zone = Zone::new("stats", 4);
        {
            let _a = zone.zalloc().unwrap();
            let _b = zone.zalloc().unwrap();
        }
        assert_eq!(zone.in_use(), 0);
        assert_eq!(zone.stats.alloc_count.load(Ordering::Relaxed), 2);
        assert_eq!(zone.stats.free_count.load(Ordering::Relaxed), 2);
        assert_eq!(zone.stats.max_in_use.load(Ordering::Relaxed), 2);
    }
}
