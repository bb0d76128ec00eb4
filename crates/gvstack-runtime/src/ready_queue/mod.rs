//! Run queue implementations
//!
//! The scheduler proper lives outside this crate and plugs in through
//! [`RunQueue`]. `FifoRunQueue` is the default used by the engine pool.

use crossbeam_queue::SegQueue;

use gvstack_core::id::ThreadId;
use gvstack_core::traits::RunQueue;

/// Unbounded lock-free FIFO shared by all engines
#[derive(Default)]
pub struct FifoRunQueue {
    queue: SegQueue<ThreadId>,
}

impl FifoRunQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunQueue for FifoRunQueue {
    #[inline]
    fn push(&self, id: ThreadId) {
        self.queue.push(id);
    }

    #[inline]
    fn pop(&self) -> Option<ThreadId> {
        self.queue.pop()
    }

    #[inline]
    fn len(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for FifoRunQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoRunQueue").field("len", &self.queue.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let q = FifoRunQueue::new();
        assert!(q.is_empty());
        q.push(ThreadId::new(1, 0));
        q.push(ThreadId::new(2, 0));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(ThreadId::new(1, 0)));
        assert_eq!(q.pop(), Some(ThreadId::new(2, 0)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_concurrent_push_pop() {
        use std::sync::Arc;

        let q = Arc::new(FifoRunQueue::new());
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let q = q.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        q.push(ThreadId::new(p * 1000 + i, 0));
                    }
                })
            })
            .collect();
        for h in producers {
            h.join().unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        while let Some(id) = q.pop() {
            assert!(seen.insert(id));
        }
        assert_eq!(seen.len(), 4000);
    }
}
