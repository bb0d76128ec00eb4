//! Thread-local storage for engine context
//!
//! Records which engine this OS thread is and which gvstack thread it is
//! currently running, so a resume from inside a running thread is caught.

use gvstack_core::constants::ENGINE_NONE;
use gvstack_core::error::{StackError, StackResult};
use gvstack_core::id::ThreadId;
use std::cell::Cell;

thread_local! {
    /// Current engine index for this OS thread
    static ENGINE_ID: Cell<usize> = const { Cell::new(ENGINE_NONE) };

    /// Thread running on this engine (raw `ThreadId`)
    static CURRENT_THREAD: Cell<u64> = const { Cell::new(ThreadId::NONE.as_u64()) };
}

/// Set the current engine index
#[inline]
pub fn set_engine_id(id: usize) {
    ENGINE_ID.with(|cell| cell.set(id));
}

/// Engine index, `None` off the engine pool (bootstrap, tests)
#[inline]
pub fn try_engine_id() -> Option<usize> {
    let id = ENGINE_ID.with(|cell| cell.get());
    if id == ENGINE_NONE {
        None
    } else {
        Some(id)
    }
}

/// Thread currently running on this OS thread
#[inline]
pub fn current_thread() -> Option<ThreadId> {
    ThreadId::from_u64(CURRENT_THREAD.with(|cell| cell.get())).to_option()
}

#[inline]
pub fn is_in_thread() -> bool {
    current_thread().is_some()
}

/// Marks `id` as running here until dropped
pub(crate) struct RunningGuard(());

impl RunningGuard {
    pub(crate) fn enter(id: ThreadId) -> StackResult<Self> {
        CURRENT_THREAD.with(|cell| {
            if !ThreadId::from_u64(cell.get()).is_none() {
                return Err(StackError::NestedResume);
            }
            cell.set(id.as_u64());
            Ok(RunningGuard(()))
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        CURRENT_THREAD.with(|cell| cell.set(ThreadId::NONE.as_u64()));
    }
}
