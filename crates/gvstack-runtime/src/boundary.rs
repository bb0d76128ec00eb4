//! Scheduler boundary
//!
//! The boundary is the engine-side end of a `resume`. Each engine owns one
//! [`BoundaryState`] recording what it is running; [`route`] turns a
//! thread's [`TransferOutcome`] into the scheduler action it calls for.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use gvstack_core::error::StackError;
use gvstack_core::frame::Word;
use gvstack_core::id::ThreadId;
use gvstack_core::outcome::TransferOutcome;
use gvstack_core::traits::RunQueue;
use gvstack_core::{kdebug, kwarn};

use crate::engine::Engine;
use crate::lifecycle::ThreadController;

/// Per-engine boundary state
///
/// Layout (64 bytes, cache-line aligned):
/// ```text
/// 0x00: current    (u64) - Thread being run (raw ThreadId, NONE if idle)
/// 0x08: resumes    (u64) - Resumes entered through this boundary
/// 0x10: steps      (u64) - Frame steps run through this boundary
/// 0x18: index      (u64) - Engine index
/// 0x20: is_parked  (u8)  - Engine is idle waiting for work
/// ```
#[repr(C, align(64))]
pub struct BoundaryState {
    current: AtomicU64,
    resumes: AtomicU64,
    steps: AtomicU64,
    index: usize,
    is_parked: AtomicBool,
}

impl BoundaryState {
    pub fn new(index: usize) -> Self {
        Self {
            current: AtomicU64::new(ThreadId::NONE.as_u64()),
            resumes: AtomicU64::new(0),
            steps: AtomicU64::new(0),
            index,
            is_parked: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Record that `id` is entering its stack
    #[inline]
    pub fn enter(&self, id: ThreadId) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
        self.current.store(id.as_u64(), Ordering::Release);
        self.is_parked.store(false, Ordering::Relaxed);
    }

    /// Record that control came back after `steps` frame steps
    #[inline]
    pub fn leave(&self, steps: u64) {
        self.steps.fetch_add(steps, Ordering::Relaxed);
        self.current.store(ThreadId::NONE.as_u64(), Ordering::Release);
    }

    #[inline]
    pub fn current(&self) -> Option<ThreadId> {
        ThreadId::from_u64(self.current.load(Ordering::Acquire)).to_option()
    }

    #[inline]
    pub fn resumes(&self) -> u64 {
        self.resumes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_parked(&self, parked: bool) {
        self.is_parked.store(parked, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_parked(&self) -> bool {
        self.is_parked.load(Ordering::Relaxed)
    }
}

/// What the boundary did with a thread after it came back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Back on the run queue
    Requeued,
    /// Blocked; a wake will make it ready again
    Parked,
    /// Finished and reclaimed
    Reclaimed { result: Option<Word>, overflowed: bool },
    /// Left alone after an error (already logged)
    Dropped,
}

/// Act on the outcome of resuming `id`
///
/// Yielded and Returned threads are requeued. Growth requests are served
/// here and the thread requeued; overflow finishes and reclaims it.
/// Finished threads are reclaimed.
pub fn route(
    engine: &Engine,
    threads: &ThreadController,
    queue: &dyn RunQueue,
    id: ThreadId,
    outcome: TransferOutcome,
) -> Disposition {
    match outcome {
        TransferOutcome::Yielded | TransferOutcome::Returned => {
            queue.push(id);
            Disposition::Requeued
        }
        TransferOutcome::Blocked(_) => Disposition::Parked,
        TransferOutcome::GrowRequested { .. } => match threads.grow(engine, id) {
            Ok(_) => {
                queue.push(id);
                Disposition::Requeued
            }
            Err(StackError::StackOverflow { requested, limit }) => {
                kwarn!("thread {} overflow: wanted {} words, limit {}", id, requested, limit);
                finish(threads, id)
            }
            Err(StackError::ResourceExhausted(e)) => {
                kwarn!("thread {} growth deferred: {}", id, e);
                queue.push(id);
                Disposition::Requeued
            }
            Err(e) => {
                kdebug!("thread {} not grown: {}", id, e);
                Disposition::Dropped
            }
        },
        TransferOutcome::Finished { .. } => finish(threads, id),
    }
}

fn finish(threads: &ThreadController, id: ThreadId) -> Disposition {
    let info = match threads.exit_info(id) {
        Ok(info) => info,
        Err(e) => {
            kdebug!("thread {} exit info unavailable: {}", id, e);
            return Disposition::Dropped;
        }
    };
    match threads.reclaim(id) {
        Ok(()) => Disposition::Reclaimed { result: info.result, overflowed: info.overflowed },
        Err(e) => {
            kdebug!("thread {} not reclaimed: {}", id, e);
            Disposition::Dropped
        }
    }
}

/// Move threads spawned or woken inside the engine onto the run queue
pub fn drain_ready(threads: &ThreadController, queue: &dyn RunQueue) -> usize {
    let mut moved = 0;
    while let Some(id) = threads.take_ready() {
        queue.push(id);
        moved += 1;
    }
    moved
}
