//! Frame descriptors
//!
//! A descriptor gives a frame its name, payload layout and behaviour.
//! Ids index the engine's table; the two built-ins always hold ids 0 and 1.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use gvstack_core::frame::{DescriptorId, FrameInfo, FrameKind, SlotLayout};
use gvstack_core::kwarn;

use crate::switch::{Machine, Step};

/// Code run when an application frame is on top of the stack
///
/// The code reads and rewrites its payload through the [`Machine`], pops
/// itself when done, pushes callee frames, and either returns `Ok(())` to
/// dispatch the new top frame or exits the thread through a suspend.
pub type FrameCode = Arc<dyn Fn(&mut Machine<'_>) -> Step + Send + Sync>;

#[derive(Clone)]
pub enum Behaviour {
    Stop,
    StackTopReturn,
    Apply(FrameCode),
}

#[derive(Clone)]
pub struct FrameDescriptor {
    name: String,
    layout: SlotLayout,
    behaviour: Behaviour,
}

impl FrameDescriptor {
    /// Application frame running `code`
    pub fn new<F>(name: impl Into<String>, layout: SlotLayout, code: F) -> Self
    where
        F: Fn(&mut Machine<'_>) -> Step + Send + Sync + 'static,
    {
        Self { name: name.into(), layout, behaviour: Behaviour::Apply(Arc::new(code)) }
    }

    fn builtin(name: &str, behaviour: Behaviour) -> Self {
        Self { name: name.to_string(), layout: SlotLayout::EMPTY, behaviour }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    #[inline]
    pub fn behaviour(&self) -> &Behaviour {
        &self.behaviour
    }

    pub fn kind(&self) -> FrameKind {
        match self.behaviour {
            Behaviour::Stop => FrameKind::Stop,
            Behaviour::StackTopReturn => FrameKind::StackTopReturn,
            Behaviour::Apply(_) => FrameKind::Application,
        }
    }

    pub fn info(&self, id: DescriptorId, depth: usize) -> FrameInfo<'_> {
        FrameInfo {
            depth,
            descriptor: id,
            kind: self.kind(),
            name: &self.name,
            layout: self.layout,
        }
    }
}

impl fmt::Debug for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("layout", &self.layout)
            .finish()
    }
}

/// Descriptor table, written during bootstrap and read-only afterwards
#[derive(Default)]
pub struct DescriptorTable {
    entries: Vec<FrameDescriptor>,
    by_name: HashMap<String, DescriptorId>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding just the stop and stack-top-return descriptors
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table.install_builtins();
        table
    }

    /// Returns false if the built-ins were already present
    pub(crate) fn install_builtins(&mut self) -> bool {
        if !self.entries.is_empty() {
            return false;
        }
        self.insert(FrameDescriptor::builtin("stop", Behaviour::Stop));
        self.insert(FrameDescriptor::builtin("stack-top-return", Behaviour::StackTopReturn));
        debug_assert_eq!(self.entries.len(), DescriptorId::FIRST_USER as usize);
        true
    }

    fn insert(&mut self, desc: FrameDescriptor) -> DescriptorId {
        let id = DescriptorId::new(self.entries.len() as u32);
        if self.by_name.contains_key(desc.name()) {
            kwarn!("descriptor name '{}' registered twice; lookup keeps the first", desc.name());
        } else {
            self.by_name.insert(desc.name.clone(), id);
        }
        self.entries.push(desc);
        id
    }

    /// Add a descriptor and return its id
    pub fn register(&mut self, desc: FrameDescriptor) -> DescriptorId {
        self.install_builtins();
        self.insert(desc)
    }

    #[inline]
    pub fn get(&self, id: DescriptorId) -> Option<&FrameDescriptor> {
        self.entries.get(id.as_usize())
    }

    pub fn lookup(&self, name: &str) -> Option<DescriptorId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DescriptorId, &FrameDescriptor)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, d)| (DescriptorId::new(i as u32), d))
    }
}

impl fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|d| d.name())).finish()
    }
}
