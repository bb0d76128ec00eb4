//! Slot allocator for the thread table
//!
//! Hands out table indices. Freed indices go on a LIFO stack so a
//! reclaimed slot is the next one reused; the table pairs each reuse with a
//! generation bump.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{MemoryError, StackResult};
use crate::spinlock::SpinLock;

pub struct SlotAllocator {
    /// LIFO stack of freed indices
    free_stack: SpinLock<Vec<u32>>,

    /// Next never-used index
    next_fresh: AtomicU32,

    max_slots: u32,

    allocated_count: AtomicU32,
}

impl SlotAllocator {
    pub fn new(max_slots: usize) -> Self {
        let max_slots = max_slots.min(u32::MAX as usize) as u32;
        Self {
            free_stack: SpinLock::new(Vec::with_capacity(max_slots as usize)),
            next_fresh: AtomicU32::new(0),
            max_slots,
            allocated_count: AtomicU32::new(0),
        }
    }

    /// Allocate an index, preferring the most recently freed one
    pub fn allocate(&self) -> StackResult<u32> {
        if let Some(index) = self.free_stack.lock().pop() {
            self.allocated_count.fetch_add(1, Ordering::Relaxed);
            return Ok(index);
        }

        loop {
            let current = self.next_fresh.load(Ordering::Acquire);
            if current >= self.max_slots {
                return Err(MemoryError::TooManyThreads.into());
            }
            if self
                .next_fresh
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.allocated_count.fetch_add(1, Ordering::Relaxed);
                return Ok(current);
            }
        }
    }

    /// Return an index for reuse
    pub fn release(&self, index: u32) {
        debug_assert!(index < self.max_slots);
        self.free_stack.lock().push(index);
        self.allocated_count.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.allocated_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    /// Number of indices ever handed out (upper bound for table scans)
    #[inline]
    pub fn high_water(&self) -> u32 {
        self.next_fresh.load(Ordering::Acquire).min(self.max_slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackError;

    #[test]
    fn test_allocate_sequential() {
        let alloc = SlotAllocator::new(100);
        assert_eq!(alloc.allocate().unwrap(), 0);
        assert_eq!(alloc.allocate().unwrap(), 1);
        assert_eq!(alloc.allocate().unwrap(), 2);
        assert_eq!(alloc.allocated_count(), 3);
        assert_eq!(alloc.high_water(), 3);
    }

    #[test]
    fn test_release_reuses_lifo() {
        let alloc = SlotAllocator::new(100);
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        alloc.release(a);
        alloc.release(b);
        assert_eq!(alloc.allocate().unwrap(), b);
        assert_eq!(alloc.allocate().unwrap(), a);
        assert_eq!(alloc.high_water(), 2);
    }

    #[test]
    fn test_exhaustion() {
        let alloc = SlotAllocator::new(2);
        alloc.allocate().unwrap();
        alloc.allocate().unwrap();
        assert!(matches!(
            alloc.allocate(),
            Err(StackError::ResourceExhausted(MemoryError::TooManyThreads))
        ));
    }

    #[test]
    fn test_concurrent_allocation() {
        use std::sync::Arc;
        use std::thread;

        let alloc = Arc::new(SlotAllocator::new(4000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || (0..1000).map(|_| alloc.allocate().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000);
    }
}
