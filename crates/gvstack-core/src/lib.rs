//! # gvstack-core
//!
//! Core types for the gvstack thread-stack runtime.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Stacks, the context-switch primitives and bootstrap live in
//! `gvstack-runtime`.
//!
//! ## Modules
//!
//! - `id` - thread and module identifiers
//! - `state` - thread status, block and suspend reasons
//! - `outcome` - transfer outcomes returned to the scheduler boundary
//! - `frame` - stack frame convention (descriptor ids, kinds, slot layouts)
//! - `slot` - thread table index allocator
//! - `spinlock` - internal spinlock
//! - `error` - error types
//! - `traits` - collector and scheduler interfaces
//! - `kprint` - kernel-style debug printing macros
//! - `env` - environment variable utilities

pub mod id;
pub mod state;
pub mod outcome;
pub mod frame;
pub mod slot;
pub mod spinlock;
pub mod error;
pub mod traits;
pub mod kprint;
pub mod env;

pub use id::{ModuleId, ThreadId};
pub use state::{BlockReason, SuspendReason, ThreadStatus};
pub use outcome::TransferOutcome;
pub use frame::{DescriptorId, FrameInfo, FrameKind, SlotLayout, Word, MAX_FRAME_SLOTS};
pub use slot::SlotAllocator;
pub use spinlock::SpinLock;
pub use error::{BootError, BootResult, MemoryError, StackError, StackResult, WorkerError};
pub use traits::{RootVisitor, RunQueue};
pub use env::{env_get, env_get_bool, env_get_opt};

/// Constants for stack layout
pub mod constants {
    cfg_if::cfg_if! {
        if #[cfg(target_pointer_width = "64")] {
            /// Bytes per stack word
            pub const WORD_BYTES: usize = 8;
        } else {
            /// Bytes per stack word
            pub const WORD_BYTES: usize = 4;
        }
    }

    /// Guard page size below each stack
    pub const GUARD_SIZE: usize = 4096;

    /// Smallest stack handed to a thread (words)
    pub const MIN_STACK_WORDS: usize = 64;

    /// Maximum engines (execution engines / CPUs)
    pub const MAX_ENGINES: usize = 64;

    /// No engine sentinel
    pub const ENGINE_NONE: usize = usize::MAX;

    /// Cache line size for alignment
    pub const CACHE_LINE_SIZE: usize = 64;
}
