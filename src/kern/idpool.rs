//! Identifier Pools
//!
//! Fixed-capacity bitmap allocators for the small integers used as thread
//! ids, space ids and UTCB slot numbers. The pool knows nothing about tasks:
//! callers must only release ids they own.

use alloc::vec;
use alloc::vec::Vec;

use crate::bug_on;
use crate::error::{TaskError, TaskResult};

const BITS_PER_WORD: usize = u64::BITS as usize;

/// A bitmap of handed-out ids in `0..capacity`
#[derive(Debug, Clone)]
pub struct IdPool {
    name: &'static str,
    bitmap: Vec<u64>,
    capacity: usize,
    in_use: usize,
}

impl IdPool {
    /// Create an empty pool of `capacity` ids
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            bitmap: vec![0; capacity.div_ceil(BITS_PER_WORD)],
            capacity,
            in_use: 0,
        }
    }

    /// Hand out the lowest free id
    pub fn alloc(&mut self) -> TaskResult<u32> {
        let free = self
            .bitmap
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)
            .map(|(i, word)| i * BITS_PER_WORD + (!*word).trailing_zeros() as usize)
            .filter(|&id| id < self.capacity);

        match free {
            Some(id) => {
                self.set(id);
                Ok(id as u32)
            }
            None => {
                log::warn!("{} pool: all {} ids in use", self.name, self.capacity);
                Err(TaskError::NoIds)
            }
        }
    }

    /// Hand out a specific id
    pub fn alloc_specific(&mut self, id: u32) -> TaskResult<u32> {
        let idx = id as usize;
        if idx >= self.capacity {
            return Err(TaskError::InvalidArgument);
        }
        if self.is_allocated(id) {
            return Err(TaskError::Busy);
        }
        self.set(idx);
        Ok(id)
    }

    /// Return an id to the pool
    pub fn release(&mut self, id: u32) {
        let idx = id as usize;
        bug_on!(
            idx >= self.capacity,
            "{} pool: release of id {} beyond capacity {}",
            self.name,
            id,
            self.capacity
        );
        bug_on!(
            !self.is_allocated(id),
            "{} pool: release of free id {}",
            self.name,
            id
        );
        self.bitmap[idx / BITS_PER_WORD] &= !(1 << (idx % BITS_PER_WORD));
        self.in_use -= 1;
    }

    /// Is `id` currently handed out?
    pub fn is_allocated(&self, id: u32) -> bool {
        let idx = id as usize;
        idx < self.capacity && self.bitmap[idx / BITS_PER_WORD] & (1 << (idx % BITS_PER_WORD)) != 0
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    fn set(&mut self, idx: usize) {
        self.bitmap[idx / BITS_PER_WORD] |= 1 << (idx % BITS_PER_WORD);
        self.in_use += 1;
    }
}
