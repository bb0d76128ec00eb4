//! Thread table
//!
//! Fixed array of slots indexed by `ThreadId::index`. A slot's status byte
//! is the possession flag: the engine that moves it from Runnable to
//! Running owns the thread's stack until it publishes the next status.
//! The generation counter tells live handles from stale ones.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use gvstack_core::error::{StackError, StackResult};
use gvstack_core::frame::Word;
use gvstack_core::id::ThreadId;
use gvstack_core::slot::SlotAllocator;
use gvstack_core::spinlock::SpinLock;
use gvstack_core::state::{BlockReason, ThreadStatus};

use crate::stack::Stack;

/// Per-thread data that travels with possession
#[derive(Default)]
pub(crate) struct SlotInner {
    /// `None` while an engine has the stack out for a resume or growth
    pub(crate) stack: Option<Stack>,
    pub(crate) result: Option<Word>,
    pub(crate) overflowed: bool,
    pub(crate) faulted: bool,
    pub(crate) blocked_on: Option<BlockReason>,
    /// Free words asked for by the last `GrowRequested`
    pub(crate) pending_growth: usize,
}

pub(crate) struct ThreadSlot {
    generation: AtomicU32,
    status: AtomicU8,
    pub(crate) preempt: AtomicBool,
    pub(crate) inner: SpinLock<SlotInner>,
}

impl ThreadSlot {
    fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
            status: AtomicU8::new(ThreadStatus::VACANT),
            preempt: AtomicBool::new(false),
            inner: SpinLock::new(SlotInner::default()),
        }
    }

    #[inline]
    pub(crate) fn status(&self) -> Option<ThreadStatus> {
        ThreadStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn publish(&self, status: ThreadStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    #[inline]
    fn matches(&self, id: ThreadId) -> bool {
        self.generation.load(Ordering::Acquire) == id.generation()
    }

    /// Move `from` to `to` for the thread `id`
    ///
    /// Fails with `UseAfterReclaim` if the slot no longer holds `id` or the
    /// thread has finished, `InvalidState` for any other status.
    pub(crate) fn transition(
        &self,
        id: ThreadId,
        from: ThreadStatus,
        to: ThreadStatus,
    ) -> StackResult<()> {
        self.exchange(id, from, to as u8)
    }

    fn exchange(&self, id: ThreadId, from: ThreadStatus, to: u8) -> StackResult<()> {
        match self
            .status
            .compare_exchange(from as u8, to, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                // The slot may have been reclaimed and reissued between the
                // caller's lookup and the exchange.
                if !self.matches(id) {
                    self.status.store(from as u8, Ordering::Release);
                    return Err(StackError::UseAfterReclaim(id));
                }
                Ok(())
            }
            Err(current) => match ThreadStatus::from_u8(current) {
                Some(ThreadStatus::Finished) | None => Err(StackError::UseAfterReclaim(id)),
                Some(status) => Err(StackError::InvalidState { id, status }),
            },
        }
    }
}

pub(crate) struct ThreadTable {
    slots: Box<[ThreadSlot]>,
    allocator: SlotAllocator,
}

impl ThreadTable {
    pub(crate) fn new(max_threads: usize) -> Self {
        Self {
            slots: (0..max_threads).map(|_| ThreadSlot::new()).collect(),
            allocator: SlotAllocator::new(max_threads),
        }
    }

    /// Slot of a live (not reclaimed) thread
    pub(crate) fn get(&self, id: ThreadId) -> StackResult<&ThreadSlot> {
        let slot = self
            .slots
            .get(id.index() as usize)
            .ok_or(StackError::UseAfterReclaim(id))?;
        if !slot.matches(id) || slot.status().is_none() {
            return Err(StackError::UseAfterReclaim(id));
        }
        Ok(slot)
    }

    /// Place a new Runnable thread owning `stack`
    pub(crate) fn insert(&self, stack: Stack) -> StackResult<ThreadId> {
        let index = self.allocator.allocate()?;
        let slot = &self.slots[index as usize];
        {
            let mut inner = slot.inner.lock();
            *inner = SlotInner { stack: Some(stack), ..SlotInner::default() };
        }
        slot.preempt.store(false, Ordering::Relaxed);
        let id = ThreadId::new(index, slot.generation.load(Ordering::Acquire));
        slot.publish(ThreadStatus::Runnable);
        Ok(id)
    }

    /// Vacate the slot of a finished thread, returning its stack
    ///
    /// Fails with `InvalidState` unless the thread has finished.
    pub(crate) fn remove(&self, id: ThreadId) -> StackResult<Option<Stack>> {
        let slot = self.get(id)?;
        match slot.exchange(id, ThreadStatus::Finished, ThreadStatus::VACANT) {
            Ok(()) => {}
            Err(StackError::InvalidState { status, .. }) => {
                return Err(StackError::InvalidState { id, status });
            }
            Err(e) => return Err(e),
        }
        let stack = {
            let mut inner = slot.inner.lock();
            let stack = inner.stack.take();
            *inner = SlotInner::default();
            stack
        };
        slot.generation.fetch_add(1, Ordering::AcqRel);
        self.allocator.release(id.index());
        Ok(stack)
    }

    pub(crate) fn live_count(&self) -> usize {
        self.allocator.allocated_count() as usize
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Ids of every occupied slot
    pub(crate) fn live_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.status()?;
            Some(ThreadId::new(i as u32, slot.generation.load(Ordering::Acquire)))
        })
    }
}
