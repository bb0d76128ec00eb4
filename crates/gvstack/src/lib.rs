//! # gvstack - green threads on explicit frame stacks
//!
//! Every thread owns a word stack of self-describing frames. Execution is
//! driven by the frame on top: entering the stack top runs it, and control
//! comes back to the scheduler only by returning to the stack top with an
//! outcome. Stacks grow by copying when a frame asks for more room, up to
//! a configured cap.
//!
//! Before any thread runs, every module initializer is executed in
//! dependency order; one of them designates the starting thread, which
//! `init_return` then enters.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gvstack::{EngineConfig, FrameDescriptor, Runtime, SlotLayout};
//!
//! let mut rt = Runtime::new(EngineConfig::from_env())?;
//! rt.register_initializer("main", &[], |ctx| {
//!     let hello = ctx.register_descriptor(FrameDescriptor::new(
//!         "hello",
//!         SlotLayout::EMPTY,
//!         |m| {
//!             println!("hello from {}", m.id());
//!             m.pop();
//!             Ok(())
//!         },
//!     ))?;
//!     ctx.spawn_entry(hello, &[], 0)?;
//!     Ok(())
//! })?;
//! let booted = rt.boot_or_exit();
//! booted.run()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Module initializers / frame code                │
//! │        register_initializer, push, pop, yield, block        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     gvstack-runtime                         │
//! │  Bootstrap │ ThreadController │ switch │ gc walk │ engines  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      gvstack-core                           │
//! │    ids │ status │ outcomes │ frame layout │ errors │ kprint │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

// Re-export core types
pub use gvstack_core::{
    BlockReason, BootError, BootResult, DescriptorId, FrameInfo, FrameKind, MemoryError,
    ModuleId, RootVisitor, RunQueue, SlotLayout, StackError, StackResult, SuspendReason,
    ThreadId, ThreadStatus, TransferOutcome, Word, WorkerError,
};

// Re-export kprint macros for debug logging
pub use gvstack_core::{kdebug, kerror, kinfo, kprintln, ktrace, kwarn};
pub use gvstack_core::kprint::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};

// Re-export env utilities
pub use gvstack_core::{env_get, env_get_bool, env_get_opt};

// Re-export runtime types
pub use gvstack_runtime::{
    exit_on_boot_error, BootReport, Bootstrap, ConfigError, Disposition, Engine, EngineConfig,
    ExitInfo, FifoRunQueue, FrameDescriptor, InitContext, InitRegistry, Machine, RunStats, Step,
    ThreadController, WorkerPool, PRIM_MODULE,
};

/// Engine, thread table and initializer registry before boot
pub struct Runtime {
    engine: Engine,
    threads: ThreadController,
    registry: InitRegistry,
}

impl Runtime {
    /// Validate `config` and set up an engine that has not run `init` yet
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        gvstack_core::kprint::init();
        let engine = Engine::new(config)?;
        let threads = ThreadController::new(engine.config());
        Ok(Self { engine, threads, registry: InitRegistry::new() })
    }

    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }

    /// Register a module initializer; see [`InitRegistry::register_initializer`]
    pub fn register_initializer<F>(
        &mut self,
        id: impl Into<ModuleId>,
        depends_on: &[&str],
        init: F,
    ) -> BootResult<()>
    where
        F: FnOnce(&mut InitContext<'_>) -> BootResult<()> + Send + 'static,
    {
        self.registry.register_initializer(id, depends_on, init)
    }

    /// Run init, every initializer, and the starting thread's first turn
    ///
    /// The starting thread's outcome is routed like any other, and threads
    /// queued during bootstrap are moved onto the run queue.
    pub fn boot(self) -> BootResult<Booted> {
        let Runtime { mut engine, threads, registry } = self;
        let report = Bootstrap::run(&mut engine, &threads, registry)?;

        let queue = FifoRunQueue::new();
        let entry = gvstack_runtime::route(&engine, &threads, &queue, report.entry, report.outcome);
        gvstack_runtime::drain_ready(&threads, &queue);

        Ok(Booted {
            engine: Arc::new(engine),
            threads: Arc::new(threads),
            queue: Arc::new(queue),
            report,
            entry,
        })
    }

    /// [`Runtime::boot`], exiting the process on failure
    pub fn boot_or_exit(self) -> Booted {
        exit_on_boot_error(self.boot())
    }
}

/// A booted engine ready to run its threads
pub struct Booted {
    engine: Arc<Engine>,
    threads: Arc<ThreadController>,
    queue: Arc<FifoRunQueue>,
    report: BootReport,
    entry: Disposition,
}

impl Booted {
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn threads(&self) -> &Arc<ThreadController> {
        &self.threads
    }

    pub fn queue(&self) -> &Arc<FifoRunQueue> {
        &self.queue
    }

    pub fn report(&self) -> &BootReport {
        &self.report
    }

    /// What became of the starting thread after its first turn
    pub fn entry_disposition(&self) -> Disposition {
        self.entry
    }

    /// Drive every runnable thread to completion on the engine pool
    pub fn run(&self) -> Result<RunStats, WorkerError> {
        let pool = WorkerPool::new(self.engine.config());
        pool.run(self.engine.clone(), self.threads.clone(), self.queue.clone())
    }
}
