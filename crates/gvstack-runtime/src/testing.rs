//! Shared fixtures for unit tests

use gvstack_core::frame::{DescriptorId, SlotLayout, Word};

use crate::config::EngineConfig;
use crate::descriptor::FrameDescriptor;
use crate::engine::Engine;
use crate::lifecycle::ThreadController;
use crate::switch;

/// Initialized engine with the stock test descriptors, plus `setup`
pub(crate) fn engine_with_config(
    config: EngineConfig,
    setup: impl FnOnce(&mut Engine),
) -> (Engine, ThreadController) {
    let mut engine = Engine::new(config).unwrap();
    switch::init(&mut engine).unwrap();
    register_stock(&mut engine);
    setup(&mut engine);
    let threads = ThreadController::new(engine.config());
    (engine, threads)
}

pub(crate) fn engine_with(setup: impl FnOnce(&mut Engine)) -> (Engine, ThreadController) {
    engine_with_config(EngineConfig::new().max_threads(256), setup)
}

pub(crate) fn entry_of(engine: &Engine, name: &str) -> DescriptorId {
    engine.lookup(name).unwrap()
}

pub(crate) fn countdown(engine: &Engine) -> DescriptorId {
    entry_of(engine, "countdown")
}

/// - `noop`: pops itself
/// - `countdown [n]`: one step per decrement, result counts the steps
/// - `deep [n]`: recurses n levels, leaving an `add [k]` frame per level;
///   the unwinding adds give a result of 1 + 2 + ... + n
fn register_stock(engine: &mut Engine) {
    engine
        .register_descriptor(FrameDescriptor::new("noop", SlotLayout::EMPTY, |m| {
            m.pop();
            Ok(())
        }))
        .unwrap();

    engine
        .register_descriptor(FrameDescriptor::new(
            "countdown",
            SlotLayout::words(1).unwrap(),
            |m| {
                let n = m.slot(0)?;
                if n == 0 {
                    m.pop();
                    return Ok(());
                }
                m.set_slot(0, n - 1)?;
                let count: Word = m.result().unwrap_or(0) + 1;
                m.set_result(count);
                Ok(())
            },
        ))
        .unwrap();

    engine
        .register_descriptor(FrameDescriptor::new("add", SlotLayout::words(1).unwrap(), |m| {
            let k = m.slot(0)?;
            let sum = m.result().unwrap_or(0) + k;
            m.set_result(sum);
            m.pop();
            Ok(())
        }))
        .unwrap();

    engine
        .register_descriptor(FrameDescriptor::new("deep", SlotLayout::words(1).unwrap(), |m| {
            let n = m.slot(0)?;
            if n == 0 {
                m.pop();
                return Ok(());
            }
            let add = m.lookup("add").unwrap_or(DescriptorId::STOP);
            let deep = m.current_descriptor();
            m.reserve(4)?;
            m.replace(add, &[n])?;
            m.push(deep, &[n - 1])
        }))
        .unwrap();
}
