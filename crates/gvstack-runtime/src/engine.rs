//! Engine context
//!
//! The `Engine` is passed explicitly to every operation. It owns the
//! configuration, the descriptor table and the per-engine boundary states.
//! It is mutated only during bootstrap, while the caller holds it by
//! `&mut`; afterwards it is shared read-only (typically in an `Arc`).

use std::sync::atomic::{AtomicBool, Ordering};

use gvstack_core::error::{BootError, BootResult, StackError, StackResult};
use gvstack_core::frame::DescriptorId;
use gvstack_core::id::ThreadId;
use gvstack_core::kprint::{self, LogLevel};

use crate::boundary::BoundaryState;
use crate::config::{ConfigError, EngineConfig};
use crate::descriptor::{DescriptorTable, FrameDescriptor};
use crate::tls;

pub struct Engine {
    config: EngineConfig,
    descriptors: DescriptorTable,
    boundaries: Vec<BoundaryState>,
    initialized: bool,
    entry_point: Option<ThreadId>,
    booted: AtomicBool,
}

impl Engine {
    /// Uninitialized engine; run [`crate::switch::init`] before use
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.debug_logging && !kprint::level_enabled(LogLevel::Debug) {
            kprint::set_log_level(LogLevel::Debug);
        }
        Ok(Self {
            config,
            descriptors: DescriptorTable::new(),
            boundaries: Vec::new(),
            initialized: false,
            entry_point: None,
            booted: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn descriptors(&self) -> &DescriptorTable {
        &self.descriptors
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Set up built-in descriptors and boundary states, once
    pub(crate) fn initialize(&mut self) -> BootResult<()> {
        if self.initialized {
            return Err(BootError::AlreadyInitialized);
        }
        self.descriptors.install_builtins();
        self.boundaries = (0..self.config.num_engines).map(BoundaryState::new).collect();
        self.initialized = true;
        Ok(())
    }

    /// Add a frame descriptor (bootstrap only)
    pub fn register_descriptor(&mut self, desc: FrameDescriptor) -> StackResult<DescriptorId> {
        if !self.initialized {
            return Err(StackError::NotInitialized);
        }
        Ok(self.descriptors.register(desc))
    }

    #[inline]
    pub fn lookup(&self, name: &str) -> Option<DescriptorId> {
        self.descriptors.lookup(name)
    }

    pub fn boundaries(&self) -> &[BoundaryState] {
        &self.boundaries
    }

    /// Boundary of the engine this OS thread runs as
    ///
    /// Threads outside the pool (bootstrap, tests) share engine 0.
    pub fn boundary(&self) -> Option<&BoundaryState> {
        if self.boundaries.is_empty() {
            return None;
        }
        let index = tls::try_engine_id().unwrap_or(0) % self.boundaries.len();
        self.boundaries.get(index)
    }

    #[inline]
    pub fn entry_point(&self) -> Option<ThreadId> {
        self.entry_point
    }

    pub(crate) fn set_entry_point(&mut self, id: ThreadId) {
        self.entry_point = Some(id);
    }

    /// True once the starting thread has been entered
    #[inline]
    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_booted(&self) {
        self.booted.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("initialized", &self.initialized)
            .field("descriptors", &self.descriptors.len())
            .field("engines", &self.boundaries.len())
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gvstack_core::frame::SlotLayout;

    #[test]
    fn test_rejects_invalid_config() {
        assert!(Engine::new(EngineConfig::new().num_engines(0)).is_err());
    }

    #[test]
    fn test_initialize_once() {
        let mut engine = Engine::new(EngineConfig::new().num_engines(3)).unwrap();
        assert!(!engine.is_initialized());
        assert!(engine.boundary().is_none());

        engine.initialize().unwrap();
        assert!(engine.is_initialized());
        assert_eq!(engine.boundaries().len(), 3);
        assert_eq!(engine.descriptors().len(), 2);
        assert_eq!(engine.initialize(), Err(BootError::AlreadyInitialized));
    }

    #[test]
    fn test_register_requires_init() {
        let mut engine = Engine::new(EngineConfig::new()).unwrap();
        let desc = FrameDescriptor::new("early", SlotLayout::EMPTY, |_m| Ok(()));
        assert_eq!(
            engine.register_descriptor(desc.clone()).unwrap_err(),
            StackError::NotInitialized
        );

        engine.initialize().unwrap();
        let id = engine.register_descriptor(desc).unwrap();
        assert_eq!(engine.lookup("early"), Some(id));
    }
}
