//! Engine thread pool
//!
//! Each engine is an OS thread looping over the shared run queue: take a
//! thread, `resume` it, route the outcome. Threads spawned or woken while
//! running are moved from the controller's ready list onto the queue
//! before every pop. The pool returns once no thread is runnable or
//! running, or a stop is requested.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use gvstack_core::error::{StackError, WorkerError};
use gvstack_core::id::ThreadId;
use gvstack_core::state::ThreadStatus;
use gvstack_core::traits::RunQueue;
use gvstack_core::{kdebug, kerror, kinfo, kprint, ktrace};

use crate::boundary::{self, Disposition};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::lifecycle::ThreadController;
use crate::tls;

/// Counters for one `run`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub resumes: u64,
    pub reclaimed: u64,
    pub overflowed: u64,
    pub faulted: u64,
    pub parked: u64,
    /// Threads still blocked when the pool stopped
    pub stranded: usize,
}

#[derive(Default)]
struct Counters {
    resumes: AtomicU64,
    reclaimed: AtomicU64,
    overflowed: AtomicU64,
    faulted: AtomicU64,
    parked: AtomicU64,
}

impl Counters {
    fn record(&self, disposition: Disposition) {
        match disposition {
            Disposition::Reclaimed { overflowed, .. } => {
                self.reclaimed.fetch_add(1, Ordering::Relaxed);
                if overflowed {
                    self.overflowed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Disposition::Parked => {
                self.parked.fetch_add(1, Ordering::Relaxed);
            }
            Disposition::Requeued | Disposition::Dropped => {}
        }
    }

    fn snapshot(&self, stranded: usize) -> RunStats {
        RunStats {
            resumes: self.resumes.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
            parked: self.parked.load(Ordering::Relaxed),
            stranded,
        }
    }
}

/// Stops the other engines when an engine thread unwinds
struct StopOnPanic<'a>(&'a WorkerPool);

impl Drop for StopOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            kerror!("engine panicked, stopping the pool");
            self.0.request_stop();
        }
    }
}

/// Pool of engine threads
pub struct WorkerPool {
    num_engines: usize,
    idle_spins: u32,
    park_timeout: std::time::Duration,
    stop: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            num_engines: config.num_engines.max(1),
            idle_spins: config.idle_spins,
            park_timeout: config.park_timeout,
            stop: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn num_engines(&self) -> usize {
        self.num_engines
    }

    /// Ask every engine to return after its current resume
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Run engines until no thread is runnable or running
    ///
    /// Blocked threads nobody can wake are left in place and counted in
    /// [`RunStats::stranded`].
    pub fn run(
        &self,
        engine: Arc<Engine>,
        threads: Arc<ThreadController>,
        queue: Arc<dyn RunQueue>,
    ) -> Result<RunStats, WorkerError> {
        let counters = Counters::default();
        kinfo!("starting {} engines", self.num_engines);

        let joined = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.num_engines);
            for index in 0..self.num_engines {
                let engine = &engine;
                let threads = &threads;
                let queue = &queue;
                let counters = &counters;
                let handle = thread::Builder::new()
                    .name(format!("gvs-engine-{}", index))
                    .spawn_scoped(scope, move || {
                        let _stop = StopOnPanic(self);
                        tls::set_engine_id(index);
                        kprint::set_engine_id(index as u32);
                        self.engine_loop(engine, threads, &**queue, counters);
                    })
                    .map_err(|e| {
                        kerror!("engine {} spawn failed: {}", index, e);
                        WorkerError::SpawnFailed
                    });
                match handle {
                    Ok(h) => handles.push(h),
                    Err(e) => {
                        self.request_stop();
                        return Err(e);
                    }
                }
            }

            let mut result = Ok(());
            for handle in handles {
                if handle.join().is_err() {
                    self.request_stop();
                    result = Err(WorkerError::Panicked);
                }
            }
            result
        });
        joined?;

        let stranded = threads
            .live_threads()
            .into_iter()
            .filter(|&id| threads.status(id) == Ok(ThreadStatus::Blocked))
            .count();
        let stats = counters.snapshot(stranded);
        kinfo!(
            "engines done: {} resumes, {} reclaimed, {} stranded",
            stats.resumes,
            stats.reclaimed,
            stats.stranded
        );
        Ok(stats)
    }

    fn engine_loop(
        &self,
        engine: &Engine,
        threads: &ThreadController,
        queue: &dyn RunQueue,
        counters: &Counters,
    ) {
        let b = engine.boundary();
        let mut idle = 0u32;

        while !self.is_stopping() {
            boundary::drain_ready(threads, queue);
            let Some(id) = queue.pop() else {
                if threads.active_count() == 0 && queue.is_empty() {
                    break;
                }
                idle += 1;
                if idle <= self.idle_spins {
                    std::hint::spin_loop();
                } else {
                    if let Some(b) = b {
                        b.set_parked(true);
                    }
                    thread::sleep(self.park_timeout);
                }
                continue;
            };
            idle = 0;

            counters.resumes.fetch_add(1, Ordering::Relaxed);
            match threads.resume(engine, id) {
                Ok(outcome) => {
                    let d = boundary::route(engine, threads, queue, id, outcome);
                    ktrace!("thread {} routed: {:?}", id, d);
                    counters.record(d);
                }
                Err(e) => self.on_fault(threads, counters, id, e),
            }
        }
        if let Some(b) = b {
            b.set_parked(true);
        }
        kdebug!("engine loop exiting");
    }

    fn on_fault(
        &self,
        threads: &ThreadController,
        counters: &Counters,
        id: ThreadId,
        e: StackError,
    ) {
        if threads.status(id) != Ok(ThreadStatus::Finished) {
            kdebug!("thread {} skipped: {}", id, e);
            return;
        }
        counters.faulted.fetch_add(1, Ordering::Relaxed);
        match threads.reclaim(id) {
            Ok(()) => {
                counters.reclaimed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => kdebug!("faulted thread {} not reclaimed: {}", id, e),
        }
    }
}
