//! Collector interface to suspended stacks
//!
//! A thread's stack may only be walked while no engine possesses it:
//! Runnable or Blocked. The walk visits frames top to bottom and hands
//! every live-reference slot to the visitor, which may rewrite it in place
//! (a moving collector updating roots). The stack shape is never exposed.

use gvstack_core::error::{StackError, StackResult};
use gvstack_core::frame::{DescriptorId, FrameInfo, Word, FRAME_HEADER_WORDS};
use gvstack_core::id::ThreadId;
use gvstack_core::state::ThreadStatus;
use gvstack_core::traits::RootVisitor;

use crate::engine::Engine;
use crate::lifecycle::ThreadController;
use crate::stack::Stack;

impl ThreadController {
    /// Visit every frame and reference slot of a suspended thread
    ///
    /// Returns the number of frames walked.
    pub fn walk_stack(
        &self,
        engine: &Engine,
        id: ThreadId,
        visitor: &mut dyn RootVisitor,
    ) -> StackResult<usize> {
        let slot = self.table.get(id)?;
        match slot.status() {
            Some(ThreadStatus::Runnable) | Some(ThreadStatus::Blocked) => {}
            Some(ThreadStatus::Finished) | None => return Err(StackError::UseAfterReclaim(id)),
            Some(status) => return Err(StackError::InvalidState { id, status }),
        }

        let mut inner = slot.inner.lock();
        let stack = inner
            .stack
            .as_mut()
            .ok_or(StackError::InvalidState { id, status: ThreadStatus::Running })?;
        walk(engine, id, stack, visitor)
    }

    /// Frame names from top to bottom
    pub fn backtrace(&self, engine: &Engine, id: ThreadId) -> StackResult<Vec<String>> {
        let mut names = FrameNames::default();
        self.walk_stack(engine, id, &mut names)?;
        Ok(names.0)
    }

    /// Walk every suspended thread; running ones are skipped
    ///
    /// Returns the number of threads walked.
    pub fn walk_all(&self, engine: &Engine, visitor: &mut dyn RootVisitor) -> usize {
        self.live_threads()
            .into_iter()
            .filter(|&id| self.walk_stack(engine, id, visitor).is_ok())
            .count()
    }
}

fn walk(
    engine: &Engine,
    id: ThreadId,
    stack: &mut Stack,
    visitor: &mut dyn RootVisitor,
) -> StackResult<usize> {
    let table = engine.descriptors();
    let mut at = stack.sp();
    let mut depth = 0;

    while at < stack.capacity() {
        let desc = stack
            .word(at)
            .and_then(DescriptorId::from_word)
            .and_then(|d| table.get(d).map(|desc| (d, desc)));
        let Some((descriptor, desc)) = desc else {
            return Err(StackError::CorruptStack { id, at });
        };
        let layout = desc.layout();
        if at + layout.frame_words() > stack.capacity() {
            return Err(StackError::CorruptStack { id, at });
        }

        let info: FrameInfo<'_> = desc.info(descriptor, depth);
        visitor.visit_frame(&info);
        for slot in layout.ref_slots() {
            if let Some(value) = stack.word_mut(at + FRAME_HEADER_WORDS + slot) {
                visitor.visit_root(&info, slot, value);
            }
        }

        at += layout.frame_words();
        depth += 1;
    }
    Ok(depth)
}

#[derive(Default)]
struct FrameNames(Vec<String>);

impl RootVisitor for FrameNames {
    fn visit_frame(&mut self, frame: &FrameInfo<'_>) {
        self.0.push(frame.name.to_string());
    }

    fn visit_root(&mut self, _frame: &FrameInfo<'_>, _slot: usize, _value: &mut Word) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FrameDescriptor;
    use crate::testing::{engine_with, entry_of};
    use gvstack_core::frame::SlotLayout;
    use gvstack_core::outcome::TransferOutcome;

    /// Moves every root by a fixed offset and records what it saw
    struct Mover {
        offset: Word,
        seen: Vec<(usize, usize, Word)>,
    }

    impl RootVisitor for Mover {
        fn visit_root(&mut self, frame: &FrameInfo<'_>, slot: usize, value: &mut Word) {
            self.seen.push((frame.depth, slot, *value));
            *value += self.offset;
        }
    }

    fn engine_with_holder() -> (Engine, ThreadController) {
        engine_with(|e| {
            // [ref, plain, ref]; first step yields, second reports ref0 + ref2
            e.register_descriptor(FrameDescriptor::new(
                "holder",
                SlotLayout::new(3, 0b101).unwrap(),
                |m| {
                    if m.slot(1)? == 0 {
                        m.set_slot(1, 1)?;
                        return m.yield_now();
                    }
                    let sum = m.slot(0)? + m.slot(2)?;
                    m.set_result(sum);
                    m.pop();
                    Ok(())
                },
            ))
            .unwrap();
        })
    }

    #[test]
    fn test_walk_visits_refs_and_rewrites_roots() {
        let (engine, threads) = engine_with_holder();
        let id = threads.create(&engine, entry_of(&engine, "holder"), &[100, 0, 200], 0).unwrap();
        assert_eq!(threads.resume(&engine, id).unwrap(), TransferOutcome::Yielded);

        let mut mover = Mover { offset: 1000, seen: Vec::new() };
        let frames = threads.walk_stack(&engine, id, &mut mover).unwrap();
        assert_eq!(frames, 2);
        assert_eq!(mover.seen, vec![(0, 0, 100), (0, 2, 200)]);

        // The resumed thread sees the rewritten roots.
        assert_eq!(
            threads.resume(&engine, id).unwrap(),
            TransferOutcome::Finished { result: Some(2300) }
        );
    }

    #[test]
    fn test_backtrace_lists_frames_top_down() {
        let (engine, threads) = engine_with_holder();
        let id = threads.create(&engine, entry_of(&engine, "holder"), &[1, 0, 2], 0).unwrap();
        assert_eq!(threads.backtrace(&engine, id).unwrap(), vec!["holder", "stop"]);
    }

    #[test]
    fn test_walk_rejects_finished_thread() {
        let (engine, threads) = engine_with_holder();
        let id = threads.create(&engine, entry_of(&engine, "noop"), &[], 0).unwrap();
        threads.resume(&engine, id).unwrap();

        let mut mover = Mover { offset: 0, seen: Vec::new() };
        assert_eq!(
            threads.walk_stack(&engine, id, &mut mover),
            Err(StackError::UseAfterReclaim(id))
        );
        assert_eq!(threads.walk_all(&engine, &mut mover), 0);
    }
}
