//! Bootstrap sequencer
//!
//! Runs engine `init`, then every registered module initializer in
//! dependency order (a module's initializer runs after all of its
//! dependencies'), then enters the starting thread via `init_return`.
//!
//! Ordering is Kahn's algorithm; among modules ready at the same time the
//! one registered first goes first, so a given registry always boots the
//! same way. Every failure here is fatal to the process: see
//! [`exit_on_boot_error`].
//!
//! A fresh registry already holds the built-in [`PRIM_MODULE`], which owns
//! the engine's builtin frames. User modules may name it as a dependency.

use std::collections::{BTreeSet, HashMap};

use gvstack_core::error::{BootError, BootResult, StackResult};
use gvstack_core::frame::{DescriptorId, Word};
use gvstack_core::id::{ModuleId, ThreadId};
use gvstack_core::outcome::TransferOutcome;
use gvstack_core::{kdebug, kerror, kinfo};

use crate::descriptor::FrameDescriptor;
use crate::engine::Engine;
use crate::lifecycle::ThreadController;
use crate::switch;

/// Module initializer
pub type InitProc = Box<dyn FnOnce(&mut InitContext<'_>) -> BootResult<()> + Send>;

struct InitEntry {
    id: ModuleId,
    depends_on: Vec<ModuleId>,
    init: Option<InitProc>,
}

/// Built-in module registered ahead of every user module
pub const PRIM_MODULE: &str = "prim";

/// Registered initializers, consumed by [`Bootstrap::run`]
pub struct InitRegistry {
    entries: Vec<InitEntry>,
    index: HashMap<ModuleId, usize>,
}

impl Default for InitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InitRegistry {
    pub fn new() -> Self {
        let mut registry = Self { entries: Vec::new(), index: HashMap::new() };
        registry.entries.push(InitEntry {
            id: ModuleId::from(PRIM_MODULE),
            depends_on: Vec::new(),
            init: Some(Box::new(init_prim)),
        });
        registry.index.insert(ModuleId::from(PRIM_MODULE), 0);
        registry
    }

    /// Register `init` for module `id`, to run after every module in
    /// `depends_on`
    pub fn register_initializer<F>(
        &mut self,
        id: impl Into<ModuleId>,
        depends_on: &[&str],
        init: F,
    ) -> BootResult<()>
    where
        F: FnOnce(&mut InitContext<'_>) -> BootResult<()> + Send + 'static,
    {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(BootError::DuplicateInitializer(id));
        }
        let mut deps: Vec<ModuleId> = Vec::with_capacity(depends_on.len());
        for dep in depends_on {
            let dep = ModuleId::from(*dep);
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        self.index.insert(id.clone(), self.entries.len());
        self.entries.push(InitEntry { id, depends_on: deps, init: Some(Box::new(init)) });
        Ok(())
    }

    /// Registered modules, [`PRIM_MODULE`] included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing beyond [`PRIM_MODULE`] is registered
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(&ModuleId::from(id))
    }

    /// Initialization order as registry indices
    ///
    /// Fails with `UnknownDependency` for a dependency nobody registered
    /// and `InitCycleDetected` (naming every module left unordered) for a
    /// cycle, self-dependencies included.
    pub fn order(&self) -> BootResult<Vec<usize>> {
        let n = self.entries.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, entry) in self.entries.iter().enumerate() {
            for dep in &entry.depends_on {
                let Some(&d) = self.index.get(dep) else {
                    return Err(BootError::UnknownDependency {
                        module: entry.id.clone(),
                        missing: dep.clone(),
                    });
                };
                indegree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &next in &dependents[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < n {
            let stuck = (0..n)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.entries[i].id.clone())
                .collect();
            return Err(BootError::InitCycleDetected(stuck));
        }
        Ok(order)
    }
}

/// The builtin frames are in the descriptor table from `init` on; this
/// only checks they resolve.
fn init_prim(ctx: &mut InitContext<'_>) -> BootResult<()> {
    for builtin in [DescriptorId::STOP, DescriptorId::STACK_TOP_RETURN] {
        if ctx.engine().descriptors().get(builtin).is_none() {
            return Err(ctx.fail(format!("builtin frame {} missing", builtin)));
        }
    }
    kdebug!("builtin frames ready");
    Ok(())
}

impl std::fmt::Debug for InitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|e| &e.id)).finish()
    }
}

/// What an initializer can touch
pub struct InitContext<'a> {
    engine: &'a mut Engine,
    threads: &'a ThreadController,
    module: &'a ModuleId,
}

impl<'a> InitContext<'a> {
    /// Module being initialized
    pub fn module(&self) -> &ModuleId {
        self.module
    }

    pub fn engine(&self) -> &Engine {
        &*self.engine
    }

    pub fn threads(&self) -> &ThreadController {
        self.threads
    }

    pub fn register_descriptor(&mut self, desc: FrameDescriptor) -> StackResult<DescriptorId> {
        self.engine.register_descriptor(desc)
    }

    pub fn lookup(&self, name: &str) -> Option<DescriptorId> {
        self.engine.lookup(name)
    }

    /// Create a thread and queue it as ready for the engine pool
    pub fn spawn(
        &mut self,
        entry: DescriptorId,
        args: &[Word],
        stack_hint: usize,
    ) -> StackResult<ThreadId> {
        let id = self.threads.create(self.engine, entry, args, stack_hint)?;
        self.threads.notify_ready(id);
        Ok(id)
    }

    /// Create the starting thread and designate it
    ///
    /// It is entered directly by `init_return`, not queued.
    pub fn spawn_entry(
        &mut self,
        entry: DescriptorId,
        args: &[Word],
        stack_hint: usize,
    ) -> StackResult<ThreadId> {
        let id = self.threads.create(self.engine, entry, args, stack_hint)?;
        self.set_entry_point(id)?;
        Ok(id)
    }

    /// Designate an existing runnable thread as the starting thread
    ///
    /// A later designation replaces an earlier one.
    pub fn set_entry_point(&mut self, id: ThreadId) -> StackResult<()> {
        self.threads.status(id)?;
        if let Some(previous) = self.engine.entry_point() {
            kdebug!("module {} replaces starting thread {} with {}", self.module, previous, id);
        }
        self.engine.set_entry_point(id);
        Ok(())
    }

    /// Error for an initializer that cannot complete
    pub fn fail(&self, reason: impl Into<String>) -> BootError {
        BootError::InitializerFailed { module: self.module.clone(), reason: reason.into() }
    }
}

/// Result of a successful boot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    /// Modules in the order their initializers ran
    pub order: Vec<ModuleId>,
    /// The starting thread
    pub entry: ThreadId,
    /// How the starting thread first handed control back
    pub outcome: TransferOutcome,
}

pub struct Bootstrap;

impl Bootstrap {
    /// init, initializers in dependency order, then `init_return`
    pub fn run(
        engine: &mut Engine,
        threads: &ThreadController,
        mut registry: InitRegistry,
    ) -> BootResult<BootReport> {
        switch::init(engine)?;
        let order = registry.order()?;

        let mut ran = Vec::with_capacity(order.len());
        for i in order {
            let entry = &mut registry.entries[i];
            let Some(init) = entry.init.take() else {
                continue;
            };
            kinfo!("initializing module {}", entry.id);
            let mut ctx = InitContext { engine: &mut *engine, threads, module: &entry.id };
            init(&mut ctx).map_err(|e| match e {
                e @ BootError::InitializerFailed { .. } => e,
                other => BootError::InitializerFailed {
                    module: entry.id.clone(),
                    reason: other.to_string(),
                },
            })?;
            ran.push(entry.id.clone());
        }

        let (entry, outcome) = switch::init_return(engine, threads)?;
        Ok(BootReport { order: ran, entry, outcome })
    }
}

/// Unwrap a boot result, or log the error and exit the process
///
/// No execution context exists to recover in, so boot errors end the
/// process with [`BootError::exit_code`].
pub fn exit_on_boot_error<T>(result: BootResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            kerror!("boot failed: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use gvstack_core::error::StackError;
    use gvstack_core::frame::SlotLayout;
    use gvstack_core::state::ThreadStatus;
    use std::sync::{Arc, Mutex};

    fn fresh() -> (Engine, ThreadController) {
        let engine = Engine::new(EngineConfig::new().max_threads(64)).unwrap();
        let threads = ThreadController::new(engine.config());
        (engine, threads)
    }

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        name: &str,
    ) -> impl FnOnce(&mut InitContext<'_>) -> BootResult<()> + Send + 'static {
        let log = log.clone();
        let name = name.to_string();
        move |_ctx| {
            log.lock().unwrap().push(name);
            Ok(())
        }
    }

    fn entry_module(ctx: &mut InitContext<'_>) -> BootResult<()> {
        let main = ctx.register_descriptor(FrameDescriptor::new(
            "main",
            SlotLayout::words(1).unwrap(),
            |m| {
                let v = m.slot(0)?;
                m.set_result(v);
                m.pop();
                Ok(())
            },
        ))?;
        ctx.spawn_entry(main, &[99], 0)?;
        Ok(())
    }

    #[test]
    fn test_dependencies_run_first() {
        let (mut engine, threads) = fresh();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = InitRegistry::new();
        registry.register_initializer("A", &["B"], recorder(&log, "A")).unwrap();
        registry.register_initializer("B", &[], recorder(&log, "B")).unwrap();
        registry.register_initializer("main", &["A"], entry_module).unwrap();

        let report = Bootstrap::run(&mut engine, &threads, registry).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["B", "A"]);
        assert_eq!(
            report.order,
            vec![ModuleId::from(PRIM_MODULE), "B".into(), "A".into(), "main".into()]
        );
        assert_eq!(report.outcome, TransferOutcome::Finished { result: Some(99) });
        assert!(engine.is_booted());
    }

    #[test]
    fn test_independent_modules_keep_registration_order() {
        let registry = {
            let mut r = InitRegistry::new();
            for name in ["x", "y", "z"] {
                r.register_initializer(name, &[], |_ctx| Ok(())).unwrap();
            }
            r.register_initializer("w", &["z", "x"], |_ctx| Ok(())).unwrap();
            r
        };
        assert_eq!(registry.order().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_chain_registered_out_of_order_runs_in_dependency_order() {
        let (mut engine, threads) = fresh();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = InitRegistry::new();
        registry.register_initializer("C", &["B"], recorder(&log, "C")).unwrap();
        registry.register_initializer("A", &[], recorder(&log, "A")).unwrap();
        registry.register_initializer("B", &["A"], recorder(&log, "B")).unwrap();
        registry.register_initializer("main", &["C"], entry_module).unwrap();

        let report = Bootstrap::run(&mut engine, &threads, registry).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(
            report.order,
            vec![ModuleId::from(PRIM_MODULE), "A".into(), "B".into(), "C".into(), "main".into()]
        );
    }

    #[test]
    fn test_prim_module_is_preregistered() {
        let mut registry = InitRegistry::new();
        assert!(registry.contains(PRIM_MODULE));
        assert!(registry.is_empty());
        assert_eq!(
            registry.register_initializer(PRIM_MODULE, &[], |_ctx| Ok(())),
            Err(BootError::DuplicateInitializer(PRIM_MODULE.into()))
        );

        let (mut engine, threads) = fresh();
        registry.register_initializer("main", &[PRIM_MODULE], entry_module).unwrap();
        assert!(!registry.is_empty());
        let report = Bootstrap::run(&mut engine, &threads, registry).unwrap();
        assert_eq!(report.order, vec![ModuleId::from(PRIM_MODULE), "main".into()]);
    }

    #[test]
    fn test_cycle_detected_before_any_initializer_runs() {
        let (mut engine, threads) = fresh();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = InitRegistry::new();
        registry.register_initializer("free", &[], recorder(&log, "free")).unwrap();
        registry.register_initializer("A", &["B"], recorder(&log, "A")).unwrap();
        registry.register_initializer("B", &["A"], recorder(&log, "B")).unwrap();

        let err = Bootstrap::run(&mut engine, &threads, registry).unwrap_err();
        assert_eq!(err, BootError::InitCycleDetected(vec!["A".into(), "B".into()]));
        assert!(log.lock().unwrap().is_empty());
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut registry = InitRegistry::new();
        registry.register_initializer("loop", &["loop"], |_ctx| Ok(())).unwrap();
        assert!(matches!(registry.order(), Err(BootError::InitCycleDetected(_))));
    }

    #[test]
    fn test_unknown_dependency_and_duplicates() {
        let mut registry = InitRegistry::new();
        registry.register_initializer("A", &["ghost"], |_ctx| Ok(())).unwrap();
        assert_eq!(
            registry.register_initializer("A", &[], |_ctx| Ok(())),
            Err(BootError::DuplicateInitializer("A".into()))
        );
        assert_eq!(
            registry.order(),
            Err(BootError::UnknownDependency { module: "A".into(), missing: "ghost".into() })
        );
    }

    #[test]
    fn test_missing_entry_point_is_fatal() {
        let (mut engine, threads) = fresh();
        let mut registry = InitRegistry::new();
        registry.register_initializer("lib", &[], |_ctx| Ok(())).unwrap();
        let err = Bootstrap::run(&mut engine, &threads, registry).unwrap_err();
        assert_eq!(err, BootError::NoEntryPoint);
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_initializer_failure_names_module() {
        let (mut engine, threads) = fresh();
        let mut registry = InitRegistry::new();
        registry
            .register_initializer("net", &[], |ctx| Err(ctx.fail("no sockets")))
            .unwrap();
        registry.register_initializer("later", &["net"], |_ctx| Ok(())).unwrap();

        let err = Bootstrap::run(&mut engine, &threads, registry).unwrap_err();
        assert_eq!(
            err,
            BootError::InitializerFailed { module: "net".into(), reason: "no sockets".into() }
        );
    }

    #[test]
    fn test_stack_error_in_initializer_is_wrapped() {
        let (mut engine, threads) = fresh();
        let mut registry = InitRegistry::new();
        registry
            .register_initializer("bad-thread", &[], |ctx| {
                ctx.spawn(DescriptorId::new(500), &[], 0)?;
                Ok(())
            })
            .unwrap();
        let err = Bootstrap::run(&mut engine, &threads, registry).unwrap_err();
        let expected = BootError::from(StackError::UnknownDescriptor(DescriptorId::new(500)));
        assert_eq!(
            err,
            BootError::InitializerFailed {
                module: "bad-thread".into(),
                reason: expected.to_string()
            }
        );
    }

    #[test]
    fn test_start_thread_grows_during_boot() {
        let mut engine =
            Engine::new(EngineConfig::new().stack_words(64).max_stack_words(1024)).unwrap();
        let threads = ThreadController::new(engine.config());
        let mut registry = InitRegistry::new();
        registry
            .register_initializer("main", &[], |ctx| {
                let big = ctx.register_descriptor(FrameDescriptor::new(
                    "big",
                    SlotLayout::words(60).unwrap(),
                    |m| {
                        m.pop();
                        Ok(())
                    },
                ))?;
                let main = ctx.register_descriptor(FrameDescriptor::new(
                    "pusher",
                    SlotLayout::EMPTY,
                    move |m| {
                        m.replace(big, &[0; 60])?;
                        Ok(())
                    },
                ))?;
                let spacer = ctx.register_descriptor(FrameDescriptor::new(
                    "spacer",
                    SlotLayout::words(10).unwrap(),
                    move |m| {
                        m.reserve(61)?;
                        m.pop();
                        m.push(main, &[])
                    },
                ))?;
                ctx.spawn_entry(spacer, &[0; 10], 0)?;
                Ok(())
            })
            .unwrap();

        let report = Bootstrap::run(&mut engine, &threads, registry).unwrap();
        assert_eq!(report.outcome, TransferOutcome::Finished { result: None });
        assert_eq!(threads.status(report.entry).unwrap(), ThreadStatus::Finished);
    }

    #[test]
    fn test_start_thread_overflow_is_fatal() {
        let mut engine =
            Engine::new(EngineConfig::new().stack_words(64).max_stack_words(64)).unwrap();
        let threads = ThreadController::new(engine.config());
        let mut registry = InitRegistry::new();
        registry
            .register_initializer("main", &[], |ctx| {
                let hog = ctx.register_descriptor(FrameDescriptor::new(
                    "hog",
                    SlotLayout::EMPTY,
                    |m| m.reserve(1 << 20),
                ))?;
                ctx.spawn_entry(hog, &[], 0)?;
                Ok(())
            })
            .unwrap();

        let err = Bootstrap::run(&mut engine, &threads, registry).unwrap_err();
        assert!(matches!(err, BootError::StartThreadOverflow(_)));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_boot_twice_rejected() {
        let (mut engine, threads) = fresh();
        switch::init(&mut engine).unwrap();
        let mut registry = InitRegistry::new();
        registry.register_initializer("main", &[], entry_module).unwrap();
        assert_eq!(
            Bootstrap::run(&mut engine, &threads, registry).unwrap_err(),
            BootError::AlreadyInitialized
        );
    }
}
