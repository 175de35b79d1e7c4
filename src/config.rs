//! Kernel configuration
//!
//! Compile-time limits plus the runtime [`KernelConfig`] handed to
//! [`TaskCore::new`](crate::kern::task_ctl::TaskCore::new).

/// Size of a page, and the bound for UTCB buffer copies
pub const PAGE_SIZE: usize = 4096;

/// Capacity of the thread id pool
pub const THREAD_IDS_MAX: usize = 1024;

/// Capacity of the address space id pool
pub const SPACE_IDS_MAX: usize = 1024;

/// Maximum number of live TCBs (and UTCB heads)
pub const TASKS_MAX: usize = 1024;

/// Number of message registers staged in a UTCB
pub const MR_TOTAL: usize = 6;

/// Bytes reserved per thread in the UTCB area
pub const UTCB_SIZE: usize = 64;

/// UTCB slots carved out of one page of the UTCB area
pub const UTCB_SLOTS_PER_PAGE: usize = PAGE_SIZE / UTCB_SIZE;

/// Pages of UTCB area a single UTCB head can manage
pub const UTCB_DESCS_MAX: usize = 16;

/// Default start of the per-space UTCB area
pub const UTCB_AREA_START: usize = 0xF800_0000;

/// Largest payload carried by an extended IPC
pub const EXTENDED_IPC_MAX: usize = 2048;

/// Runtime configuration for a [`TaskCore`](crate::kern::task_ctl::TaskCore)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Capacity of the thread id pool
    pub thread_ids_max: usize,
    /// Capacity of the space id pool
    pub space_ids_max: usize,
    /// Capacity of the TCB and UTCB-head zones
    pub tasks_max: usize,
    /// Where new UTCB heads start handing out slots
    pub utcb_area_start: usize,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            thread_ids_max: THREAD_IDS_MAX,
            space_ids_max: SPACE_IDS_MAX,
            tasks_max: TASKS_MAX,
            utcb_area_start: UTCB_AREA_START,
        }
    }

    pub const fn with_thread_ids(mut self, max: usize) -> Self {
        self.thread_ids_max = max;
        self
    }

    pub const fn with_space_ids(mut self, max: usize) -> Self {
        self.space_ids_max = max;
        self
    }

    pub const fn with_tasks(mut self, max: usize) -> Self {
        self.tasks_max = max;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utcb_layout_fits_page() {
        assert_eq!(UTCB_SLOTS_PER_PAGE * UTCB_SIZE, PAGE_SIZE);
        assert!(core::mem::size_of::<crate::kern::utcb::Utcb>() <= UTCB_SIZE);
    }

    #[test]
    fn test_config_builders() {
        let config = KernelConfig::new().with_thread_ids(4).with_tasks(2);
        assert_eq!(config.thread_ids_max, 4);
        assert_eq!(config.tasks_max, 2);
        assert_eq!(config.space_ids_max, SPACE_IDS_MAX);
        assert_eq!(KernelConfig::default(), KernelConfig::new());
    }
}
