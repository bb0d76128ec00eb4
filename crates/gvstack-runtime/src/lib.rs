//! # gvstack-runtime
//!
//! Platform-specific runtime for gvstack threads.
//!
//! This crate provides:
//! - Stack memory (mmap with a guard page, heap fallback elsewhere)
//! - The frame convention and descriptor table
//! - Context-switch primitives (enter stack top, return to stack top,
//!   stop thread, init and init-return)
//! - The thread lifecycle controller (create, resume, suspend, grow, reclaim)
//! - The bootstrap sequencer for module initializers
//! - Collector stack walking and the scheduler boundary
//! - An engine thread pool driving a run queue

pub mod config;
pub mod memory;
pub mod stack;
pub mod descriptor;
pub mod switch;
mod thread;
pub mod lifecycle;
pub mod gc;
pub mod engine;
pub mod bootstrap;
pub mod tls;
pub mod ready_queue;
pub mod boundary;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::{ConfigError, EngineConfig};
pub use stack::{FrameRef, Stack};
pub use descriptor::{Behaviour, DescriptorTable, FrameCode, FrameDescriptor};
pub use switch::{init, init_return, Exit, Machine, Step};
pub use lifecycle::{ExitInfo, ThreadController};
pub use engine::Engine;
pub use bootstrap::{
    exit_on_boot_error, BootReport, Bootstrap, InitContext, InitProc, InitRegistry, PRIM_MODULE,
};
pub use ready_queue::FifoRunQueue;
pub use boundary::{drain_ready, route, BoundaryState, Disposition};
pub use worker::{RunStats, WorkerPool};
