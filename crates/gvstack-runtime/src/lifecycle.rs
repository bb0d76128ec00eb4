//! Thread lifecycle controller
//!
//! Owns the thread table and implements create, resume, grow and reclaim.
//!
//! ```text
//!            create
//!              │
//!              ▼        resume          Yielded / Returned / GrowRequested
//!          Runnable ──────────▶ Running ─────────────────────────┐
//!              ▲                   │  │                           │
//!              │ wake     Blocked  │  │ Finished / fault          │
//!           Blocked ◀──────────────┘  ▼                           │
//!                                  Finished ──reclaim──▶ (vacant) │
//!              ▲                                                  │
//!              └──────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one engine possesses a thread while it is Running; every other
//! engine sees the status and backs off.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use gvstack_core::error::{StackError, StackResult};
use gvstack_core::frame::{DescriptorId, FrameKind, Word, FRAME_HEADER_WORDS};
use gvstack_core::id::ThreadId;
use gvstack_core::outcome::TransferOutcome;
use gvstack_core::state::{BlockReason, ThreadStatus};
use gvstack_core::{kdebug, kerror, ktrace, kwarn};

use crate::boundary::BoundaryState;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::stack::Stack;
use crate::switch::{self, Machine};
use crate::thread::{ThreadSlot, ThreadTable};
use crate::tls::RunningGuard;

/// Finishes a thread whose frame step panicked
///
/// The stack is lost with the unwinding frame, so the slot is left without
/// one. Other engines see Finished instead of a slot stuck in Running.
struct FaultOnUnwind<'a> {
    threads: &'a ThreadController,
    slot: &'a ThreadSlot,
    id: ThreadId,
    boundary: Option<&'a BoundaryState>,
}

impl FaultOnUnwind<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for FaultOnUnwind<'_> {
    fn drop(&mut self) {
        kerror!("thread {} panicked in a frame step", self.id);
        if let Some(b) = self.boundary {
            b.leave(0);
        }
        self.threads.finish(self.slot, |marks| marks.faulted = true);
    }
}

/// What a finished thread left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Value set by the thread before reaching its stop frame
    pub result: Option<Word>,
    /// Growth hit the configured maximum
    pub overflowed: bool,
    /// A frame step failed with an internal error
    pub faulted: bool,
}

pub struct ThreadController {
    pub(crate) table: ThreadTable,
    /// Threads made runnable from inside running threads
    ready: SegQueue<ThreadId>,
    /// Runnable plus running threads
    active: AtomicUsize,
    /// Slots whose thread was woken while still running
    pending_wake: Box<[AtomicBool]>,
}

impl ThreadController {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_capacity(config.max_threads)
    }

    pub fn with_capacity(max_threads: usize) -> Self {
        Self {
            table: ThreadTable::new(max_threads),
            ready: SegQueue::new(),
            active: AtomicUsize::new(0),
            pending_wake: (0..max_threads).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Create a runnable thread whose stack holds the stop frame and the
    /// entry frame `entry` with payload `args`
    ///
    /// `stack_hint` is the initial capacity in words; 0 takes the
    /// configured default. The thread is not queued anywhere.
    pub fn create(
        &self,
        engine: &Engine,
        entry: DescriptorId,
        args: &[Word],
        stack_hint: usize,
    ) -> StackResult<ThreadId> {
        if !engine.is_initialized() {
            return Err(StackError::NotInitialized);
        }
        let desc = engine
            .descriptors()
            .get(entry)
            .ok_or(StackError::UnknownDescriptor(entry))?;
        if desc.kind() != FrameKind::Application {
            return Err(StackError::NotEntryFrame(entry));
        }
        let layout = desc.layout();
        if args.len() != layout.slots() {
            return Err(StackError::PayloadMismatch {
                descriptor: entry,
                expected: layout.slots(),
                got: args.len(),
            });
        }

        let config = engine.config();
        let need = FRAME_HEADER_WORDS + layout.frame_words();
        let words = config.stack_words_for(stack_hint).max(need);
        if words > config.max_stack_words {
            return Err(StackError::StackOverflow {
                requested: words,
                limit: config.max_stack_words,
            });
        }

        let mut stack = Stack::new(words, config.guard_pages)?;
        stack
            .push(DescriptorId::STOP, &[])
            .and_then(|_| stack.push(entry, args))
            .map_err(|s| StackError::StackOverflow {
                requested: words + s.words,
                limit: config.max_stack_words,
            })?;

        let id = self.table.insert(stack)?;
        self.pending_wake[id.index() as usize].store(false, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::AcqRel);
        kdebug!("created thread {} at {} with {} words", id, desc.name(), words);
        Ok(id)
    }

    /// Run a runnable thread until it hands control back
    ///
    /// The thread continues at its top frame. A fault inside a frame step
    /// finishes the thread and is returned as the error.
    pub fn resume(&self, engine: &Engine, id: ThreadId) -> StackResult<TransferOutcome> {
        if !engine.is_initialized() {
            return Err(StackError::NotInitialized);
        }
        let slot = self.table.get(id)?;
        let running = RunningGuard::enter(id)?;
        slot.transition(id, ThreadStatus::Runnable, ThreadStatus::Running)?;

        let (stack, result) = {
            let mut inner = slot.inner.lock();
            (inner.stack.take(), inner.result)
        };
        let Some(mut stack) = stack else {
            self.finish(slot, |_| {});
            return Err(StackError::CorruptStack { id, at: 0 });
        };

        let boundary = engine.boundary();
        if let Some(b) = boundary {
            b.enter(id);
        }
        let unwind = FaultOnUnwind { threads: self, slot, id, boundary };
        let (res, result, steps) = {
            let mut machine = Machine::new(engine, self, id, &mut stack, &slot.preempt, result);
            let res = switch::enter_stack_top(&mut machine);
            (res, machine.result(), machine.steps())
        };
        unwind.disarm();
        if let Some(b) = boundary {
            b.leave(steps);
        }
        drop(running);

        {
            let mut inner = slot.inner.lock();
            inner.stack = Some(stack);
            inner.result = result;
            inner.blocked_on = None;
            match &res {
                Ok(TransferOutcome::Blocked(reason)) => inner.blocked_on = Some(*reason),
                Ok(TransferOutcome::GrowRequested { words }) => inner.pending_growth = *words,
                _ => {}
            }
        }

        match res {
            Ok(outcome) => {
                ktrace!("thread {} {} after {} steps", id, outcome, steps);
                match outcome.next_status() {
                    ThreadStatus::Runnable => slot.publish(ThreadStatus::Runnable),
                    ThreadStatus::Blocked => self.park(slot, id),
                    status => {
                        self.active.fetch_sub(1, Ordering::AcqRel);
                        slot.publish(status);
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                kerror!("thread {} faulted: {}", id, e);
                self.finish(slot, |marks| marks.faulted = true);
                Err(e)
            }
        }
    }

    /// Publish Blocked, honouring a wake that arrived while running
    ///
    /// The pending flag is only consumed here, so a wake acknowledged
    /// during an earlier turn still applies to the next block.
    fn park(&self, slot: &ThreadSlot, id: ThreadId) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        slot.publish(ThreadStatus::Blocked);
        if self.pending_wake[id.index() as usize].swap(false, Ordering::AcqRel) {
            let _ = self.make_runnable(slot, id);
        }
    }

    fn finish(&self, slot: &ThreadSlot, mark: impl FnOnce(&mut ExitMarks)) {
        let mut marks = ExitMarks::default();
        mark(&mut marks);
        {
            let mut inner = slot.inner.lock();
            inner.overflowed |= marks.overflowed;
            inner.faulted |= marks.faulted;
        }
        self.active.fetch_sub(1, Ordering::AcqRel);
        slot.publish(ThreadStatus::Finished);
    }

    /// Enlarge the stack of a runnable thread
    ///
    /// The new capacity is the current one times the growth factor, or
    /// enough for the pending request if that is more, capped at the
    /// configured maximum. Frames are copied verbatim, the old storage is
    /// released. At the cap the thread is finished with the overflow mark
    /// and `StackOverflow` is returned.
    pub fn grow(&self, engine: &Engine, id: ThreadId) -> StackResult<usize> {
        let slot = self.table.get(id)?;
        slot.transition(id, ThreadStatus::Runnable, ThreadStatus::Running)?;

        let (stack, pending) = {
            let mut inner = slot.inner.lock();
            (inner.stack.take(), inner.pending_growth)
        };
        let Some(stack) = stack else {
            self.finish(slot, |_| {});
            return Err(StackError::CorruptStack { id, at: 0 });
        };

        let config = engine.config();
        let max = config.max_stack_words;
        let capacity = stack.capacity();
        let needed = stack.used().saturating_add(pending);

        if capacity >= max || needed > max {
            slot.inner.lock().stack = Some(stack);
            self.finish(slot, |marks| marks.overflowed = true);
            kwarn!("thread {} overflowed its stack ({} words, limit {})", id, capacity, max);
            return Err(StackError::StackOverflow {
                requested: needed.max(capacity.saturating_mul(config.growth_factor)),
                limit: max,
            });
        }

        let new_capacity = capacity
            .saturating_mul(config.growth_factor)
            .max(needed)
            .min(max);
        let grown = Stack::new(new_capacity, config.guard_pages).and_then(|mut bigger| {
            stack
                .copy_into(&mut bigger)
                .map_err(|_| StackError::CorruptStack { id, at: stack.sp() })?;
            Ok(bigger)
        });

        let mut inner = slot.inner.lock();
        match grown {
            Ok(bigger) => {
                inner.stack = Some(bigger);
                inner.pending_growth = 0;
                drop(inner);
                drop(stack);
                slot.publish(ThreadStatus::Runnable);
                kdebug!("thread {} stack grew {} -> {} words", id, capacity, new_capacity);
                Ok(new_capacity)
            }
            Err(e) => {
                inner.stack = Some(stack);
                drop(inner);
                slot.publish(ThreadStatus::Runnable);
                Err(e)
            }
        }
    }

    /// Release a finished thread's stack and table slot
    ///
    /// The handle is dead afterwards: every operation on it, including a
    /// second reclaim, fails with `UseAfterReclaim`.
    pub fn reclaim(&self, id: ThreadId) -> StackResult<()> {
        let stack = self.table.remove(id)?;
        drop(stack);
        kdebug!("reclaimed thread {}", id);
        Ok(())
    }

    /// Make a blocked thread runnable and queue it as ready
    ///
    /// Waking a running thread is remembered: its next block returns
    /// immediately. Returns `false` if there was nothing to wake.
    pub fn wake(&self, id: ThreadId) -> StackResult<bool> {
        let slot = self.table.get(id)?;
        match slot.status() {
            Some(ThreadStatus::Blocked) => self.make_runnable(slot, id),
            Some(ThreadStatus::Running) => {
                self.pending_wake[id.index() as usize].store(true, Ordering::Release);
                // It may have parked between the status read and the store.
                if slot.status() == Some(ThreadStatus::Blocked)
                    && self.pending_wake[id.index() as usize].swap(false, Ordering::AcqRel)
                {
                    return self.make_runnable(slot, id);
                }
                Ok(true)
            }
            Some(ThreadStatus::Runnable) => Ok(false),
            Some(ThreadStatus::Finished) | None => Err(StackError::UseAfterReclaim(id)),
        }
    }

    fn make_runnable(&self, slot: &ThreadSlot, id: ThreadId) -> StackResult<bool> {
        match slot.transition(id, ThreadStatus::Blocked, ThreadStatus::Runnable) {
            Ok(()) => {
                slot.inner.lock().blocked_on = None;
                self.active.fetch_add(1, Ordering::AcqRel);
                self.notify_ready(id);
                ktrace!("woke thread {}", id);
                Ok(true)
            }
            Err(StackError::InvalidState { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Ask a thread to yield at its next step boundary
    pub fn request_preempt(&self, id: ThreadId) -> StackResult<()> {
        let slot = self.table.get(id)?;
        if slot.status() == Some(ThreadStatus::Finished) {
            return Err(StackError::UseAfterReclaim(id));
        }
        slot.preempt.store(true, Ordering::Release);
        Ok(())
    }

    pub fn status(&self, id: ThreadId) -> StackResult<ThreadStatus> {
        self.table.get(id)?.status().ok_or(StackError::UseAfterReclaim(id))
    }

    /// What a blocked thread is waiting on
    pub fn block_reason(&self, id: ThreadId) -> StackResult<Option<BlockReason>> {
        Ok(self.table.get(id)?.inner.lock().blocked_on)
    }

    /// Result and exit marks of a finished, not yet reclaimed thread
    pub fn exit_info(&self, id: ThreadId) -> StackResult<ExitInfo> {
        let slot = self.table.get(id)?;
        match slot.status() {
            Some(ThreadStatus::Finished) => {}
            Some(status) => return Err(StackError::InvalidState { id, status }),
            None => return Err(StackError::UseAfterReclaim(id)),
        }
        let inner = slot.inner.lock();
        Ok(ExitInfo { result: inner.result, overflowed: inner.overflowed, faulted: inner.faulted })
    }

    /// (used, capacity) of a thread's stack, in words
    pub fn stack_usage(&self, id: ThreadId) -> StackResult<(usize, usize)> {
        let slot = self.table.get(id)?;
        let inner = slot.inner.lock();
        match inner.stack.as_ref() {
            Some(stack) => Ok((stack.used(), stack.capacity())),
            None => Err(StackError::InvalidState { id, status: ThreadStatus::Running }),
        }
    }

    /// Queue a thread made runnable from inside the engine
    pub fn notify_ready(&self, id: ThreadId) {
        self.ready.push(id);
    }

    /// Next thread spawned or woken since the last call
    pub fn take_ready(&self) -> Option<ThreadId> {
        self.ready.pop()
    }

    /// Runnable plus running threads
    #[inline]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Threads not yet reclaimed
    #[inline]
    pub fn live_count(&self) -> usize {
        self.table.live_count()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn live_threads(&self) -> Vec<ThreadId> {
        self.table.live_ids().collect()
    }
}

#[derive(Default)]
struct ExitMarks {
    overflowed: bool,
    faulted: bool,
}

impl std::fmt::Debug for ThreadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadController")
            .field("live", &self.live_count())
            .field("active", &self.active_count())
            .field("capacity", &self.capacity())
            .finish()
    }
}
