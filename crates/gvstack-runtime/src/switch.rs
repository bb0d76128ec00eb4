//! Context-switch primitives
//!
//! Control enters a thread by dispatching whatever frame is on top of its
//! stack and leaves it through exactly one exit: `return_to_stack_top`,
//! carrying a [`TransferOutcome`] back to the boundary that entered it.
//!
//! Dispatch is a loop over frame steps. A step runs the top frame's
//! behaviour, which may pop the frame, push callees, rewrite slots, then
//! either returns `Ok(())` (dispatch the new top) or exits:
//!
//! ```text
//!   resume ─▶ enter_stack_top ─▶ step ─▶ step ─▶ ... ─▶ Exit(outcome)
//!                                                          │
//!   boundary ◀──────────── TransferOutcome ◀───────────────┘
//! ```
//!
//! Nothing here is re-entrant: an exit never resumes the Rust code that
//! raised it. A suspended thread continues at its new top frame.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use gvstack_core::error::{BootError, BootResult, StackError, StackResult};
use gvstack_core::frame::{DescriptorId, SlotLayout, Word, FRAME_HEADER_WORDS};
use gvstack_core::id::ThreadId;
use gvstack_core::outcome::TransferOutcome;
use gvstack_core::state::{BlockReason, SuspendReason};
use gvstack_core::{kdebug, kinfo, ktrace};

use crate::descriptor::Behaviour;
use crate::engine::Engine;
use crate::lifecycle::ThreadController;
use crate::stack::Stack;

/// One-way transfer out of a running thread
pub struct Exit(ExitKind);

#[derive(Debug)]
enum ExitKind {
    Transfer(TransferOutcome),
    Fault(StackError),
}

impl Exit {
    fn transfer(outcome: TransferOutcome) -> Self {
        Exit(ExitKind::Transfer(outcome))
    }

    /// Outcome carried by a normal exit
    pub fn outcome(&self) -> Option<TransferOutcome> {
        match self.0 {
            ExitKind::Transfer(o) => Some(o),
            ExitKind::Fault(_) => None,
        }
    }
}

impl From<StackError> for Exit {
    fn from(e: StackError) -> Self {
        Exit(ExitKind::Fault(e))
    }
}

impl fmt::Debug for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

/// Result of one frame step
pub type Step = Result<(), Exit>;

/// View of a running thread handed to frame code
///
/// Payload accessors address the frame currently on top of the stack.
/// A step that pushes must make room first (`reserve`, or a push that
/// comes before any other change): if it runs short after it has already
/// changed the stack, the thread faults instead of growing.
pub struct Machine<'a> {
    engine: &'a Engine,
    threads: &'a ThreadController,
    id: ThreadId,
    stack: &'a mut Stack,
    preempt: &'a AtomicBool,
    current: DescriptorId,
    step_sp: usize,
    mutated: bool,
    result: Option<Word>,
    steps: u64,
}

impl<'a> Machine<'a> {
    pub(crate) fn new(
        engine: &'a Engine,
        threads: &'a ThreadController,
        id: ThreadId,
        stack: &'a mut Stack,
        preempt: &'a AtomicBool,
        result: Option<Word>,
    ) -> Self {
        let step_sp = stack.sp();
        Self {
            engine,
            threads,
            id,
            stack,
            preempt,
            current: DescriptorId::STOP,
            step_sp,
            mutated: false,
            result,
            steps: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    /// Controller this thread belongs to
    #[inline]
    pub fn threads(&self) -> &'a ThreadController {
        self.threads
    }

    /// Descriptor whose step is running
    #[inline]
    pub fn current_descriptor(&self) -> DescriptorId {
        self.current
    }

    #[inline]
    pub fn lookup(&self, name: &str) -> Option<DescriptorId> {
        self.engine.lookup(name)
    }

    /// Frame steps taken since this resume began
    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    #[inline]
    pub fn stack_used(&self) -> usize {
        self.stack.used()
    }

    #[inline]
    pub fn stack_capacity(&self) -> usize {
        self.stack.capacity()
    }

    /// Frames on the stack, stop frame included
    pub fn depth(&self) -> usize {
        self.stack.frames(self.engine.descriptors()).count()
    }

    fn top_layout(&self) -> Option<SlotLayout> {
        let id = DescriptorId::from_word(self.stack.top()?)?;
        self.engine.descriptors().get(id).map(|d| d.layout())
    }

    /// Payload of the top frame
    pub fn args(&self) -> &[Word] {
        let len = self.top_layout().map(|l| l.slots()).unwrap_or(0);
        self.stack.payload(self.stack.sp(), len).unwrap_or(&[])
    }

    /// Slot `index` of the top frame
    ///
    /// An index outside the payload is a `SlotOutOfRange` fault.
    #[inline]
    pub fn slot(&self, index: usize) -> StackResult<Word> {
        self.args().get(index).copied().ok_or_else(|| self.out_of_range(index))
    }

    /// Overwrite slot `index` of the top frame
    pub fn set_slot(&mut self, index: usize, value: Word) -> StackResult<()> {
        let len = self.top_layout().map(|l| l.slots()).unwrap_or(0);
        let sp = self.stack.sp();
        let Some(slot) = self.stack.payload_mut(sp, len).and_then(|p| p.get_mut(index)) else {
            return Err(self.out_of_range(index));
        };
        *slot = value;
        self.mutated = true;
        Ok(())
    }

    fn out_of_range(&self, index: usize) -> StackError {
        let descriptor = self
            .stack
            .top()
            .and_then(DescriptorId::from_word)
            .unwrap_or(self.current);
        StackError::SlotOutOfRange { id: self.id, descriptor, index }
    }

    /// Pop the top frame and hand back its payload
    ///
    /// The stop frame is never popped: `None` when it is on top.
    pub fn pop(&mut self) -> Option<Vec<Word>> {
        let top = DescriptorId::from_word(self.stack.top()?)?;
        if top == DescriptorId::STOP {
            return None;
        }
        let layout = self.engine.descriptors().get(top)?.layout();
        let payload = self.stack.payload(self.stack.sp(), layout.slots())?.to_vec();
        self.stack.release(layout.frame_words());
        self.mutated = true;
        Some(payload)
    }

    fn check_frame(&self, descriptor: DescriptorId, payload: &[Word]) -> StackResult<()> {
        let desc = self
            .engine
            .descriptors()
            .get(descriptor)
            .ok_or(StackError::UnknownDescriptor(descriptor))?;
        let expected = desc.layout().slots();
        if expected != payload.len() {
            return Err(StackError::PayloadMismatch { descriptor, expected, got: payload.len() });
        }
        Ok(())
    }

    /// Ensure `words` free words, or exit asking for growth
    pub fn reserve(&mut self, words: usize) -> Step {
        if self.stack.free() >= words {
            return Ok(());
        }
        self.grow_exit(words)
    }

    /// Push a frame
    ///
    /// Runs the guard check before writing; on shortfall the thread exits
    /// with `GrowRequested` and this frame's step is re-run after growth.
    pub fn push(&mut self, descriptor: DescriptorId, payload: &[Word]) -> Step {
        self.check_frame(descriptor, payload)?;
        match self.stack.push(descriptor, payload) {
            Ok(()) => {
                self.mutated = true;
                Ok(())
            }
            Err(_) => self.grow_exit(FRAME_HEADER_WORDS + payload.len()),
        }
    }

    /// Replace the top frame with a new one (tail call)
    pub fn replace(&mut self, descriptor: DescriptorId, payload: &[Word]) -> Step {
        self.check_frame(descriptor, payload)?;
        let old = self.top_layout().map(|l| l.frame_words()).unwrap_or(0);
        let new = FRAME_HEADER_WORDS + payload.len();
        if new > old {
            self.reserve(new - old)?;
        }
        if self.pop().is_none() {
            return Err(StackError::CorruptStack { id: self.id, at: self.stack.sp() }.into());
        }
        self.push(descriptor, payload)
    }

    /// Push a stack-top return frame
    ///
    /// When it is dispatched the thread leaves with `Returned`.
    pub fn push_return_barrier(&mut self) -> Step {
        self.push(DescriptorId::STACK_TOP_RETURN, &[])
    }

    /// Value reported in `Finished` when the stop frame is reached
    pub fn set_result(&mut self, value: Word) {
        self.result = Some(value);
    }

    #[inline]
    pub fn result(&self) -> Option<Word> {
        self.result
    }

    /// Hand control back to the boundary
    ///
    /// The frame now on top is the continuation: resuming the thread
    /// dispatches it with the slots it holds at this point.
    pub fn suspend_self(&mut self, reason: SuspendReason) -> Step {
        let outcome = match reason {
            SuspendReason::Yield => TransferOutcome::Yielded,
            SuspendReason::Block(r) => TransferOutcome::Blocked(r),
        };
        return_to_stack_top(outcome)
    }

    #[inline]
    pub fn yield_now(&mut self) -> Step {
        self.suspend_self(SuspendReason::Yield)
    }

    #[inline]
    pub fn block(&mut self, reason: BlockReason) -> Step {
        self.suspend_self(SuspendReason::Block(reason))
    }

    /// Create a runnable thread and queue it for the scheduler
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

    /// Wake a blocked thread, or arm the next block of a running one
    pub fn wake(&mut self, id: ThreadId) -> StackResult<bool> {
        self.threads.wake(id)
    }

    fn begin_step(&mut self, descriptor: DescriptorId) {
        self.current = descriptor;
        self.step_sp = self.stack.sp();
        self.mutated = false;
    }

    fn grow_exit(&mut self, words: usize) -> Step {
        if self.mutated {
            return Err(StackError::TornFrame { id: self.id, descriptor: self.current }.into());
        }
        debug_assert_eq!(self.stack.sp(), self.step_sp);
        ktrace!("thread {} needs {} words in {}", self.id, words, self.current);
        return_to_stack_top(TransferOutcome::GrowRequested { words })
    }

    fn should_yield(&self) -> bool {
        let budget = self.engine.config().step_budget;
        if budget != 0 && self.steps >= budget {
            return true;
        }
        self.preempt.swap(false, Ordering::AcqRel)
    }
}

/// Dispatch frames from the top of the stack until the thread exits
///
/// A thread that has run out of step budget, or had a preempt request
/// posted, yields between two steps; at least one step always runs.
pub(crate) fn enter_stack_top(m: &mut Machine<'_>) -> StackResult<TransferOutcome> {
    let table = m.engine.descriptors();
    loop {
        let at = m.stack.sp();
        let Some(top) = m.stack.top() else {
            return Err(StackError::CorruptStack { id: m.id, at });
        };
        let Some((id, desc)) = DescriptorId::from_word(top).and_then(|id| table.get(id).map(|d| (id, d)))
        else {
            return Err(StackError::CorruptStack { id: m.id, at });
        };

        m.begin_step(id);
        let step = match desc.behaviour() {
            Behaviour::Stop => stop_thread(m),
            Behaviour::StackTopReturn => stack_top_return(m),
            Behaviour::Apply(code) => code(m),
        };
        m.steps += 1;

        match step {
            Ok(()) if m.should_yield() => return Ok(TransferOutcome::Yielded),
            Ok(()) => continue,
            Err(Exit(ExitKind::Transfer(outcome))) => return Ok(outcome),
            Err(Exit(ExitKind::Fault(e))) => return Err(e),
        }
    }
}

/// The single exit from a running thread
pub(crate) fn return_to_stack_top(outcome: TransferOutcome) -> Step {
    Err(Exit::transfer(outcome))
}

/// Behaviour of the stop frame: the thread is done
///
/// The frame stays in place; a finished thread is only ever reclaimed.
pub(crate) fn stop_thread(m: &mut Machine<'_>) -> Step {
    kdebug!("thread {} reached its stop frame after {} steps", m.id, m.steps);
    return_to_stack_top(TransferOutcome::Finished { result: m.result })
}

/// Behaviour of a stack-top return frame: pop it and leave
fn stack_top_return(m: &mut Machine<'_>) -> Step {
    m.stack.release(FRAME_HEADER_WORDS);
    return_to_stack_top(TransferOutcome::Returned)
}

/// One-time engine setup
///
/// Installs the built-in stop and stack-top-return descriptors and
/// allocates one boundary state per engine. Fails on a second call.
pub fn init(engine: &mut Engine) -> BootResult<()> {
    engine.initialize()?;
    kinfo!(
        "engine initialized: {} engines, {}-word stacks",
        engine.config().num_engines,
        engine.config().stack_words
    );
    Ok(())
}

/// Enter the starting thread for the first time
///
/// Growth requests are served in place; overflowing the configured
/// maximum here is fatal since no other context exists to recover in.
pub fn init_return(
    engine: &Engine,
    threads: &ThreadController,
) -> BootResult<(ThreadId, TransferOutcome)> {
    let entry = engine.entry_point().ok_or(BootError::NoEntryPoint)?;
    engine.mark_booted();
    loop {
        match threads.resume(engine, entry)? {
            TransferOutcome::GrowRequested { words } => {
                kdebug!("starting thread {} asked for {} words", entry, words);
                match threads.grow(engine, entry) {
                    Ok(_) => continue,
                    Err(StackError::StackOverflow { .. }) => {
                        return Err(BootError::StartThreadOverflow(entry));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            outcome => {
                kinfo!("starting thread {} {}", entry, outcome);
                return Ok((entry, outcome));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FrameDescriptor;
    use crate::testing::{countdown, engine_with, entry_of};
    use gvstack_core::frame::SlotLayout;
    use gvstack_core::state::ThreadStatus;

    #[test]
    fn test_stop_only_thread_finishes_immediately() {
        let (engine, threads) = engine_with(|_e| {});
        let noop = engine.lookup("noop").unwrap();
        let id = threads.create(&engine, noop, &[], 0).unwrap();
        assert_eq!(
            threads.resume(&engine, id).unwrap(),
            TransferOutcome::Finished { result: None }
        );
    }

    #[test]
    fn test_return_barrier_yields_returned() {
        let (engine, threads) = engine_with(|e| {
            e.register_descriptor(FrameDescriptor::new("barrier", SlotLayout::EMPTY, |m| {
                m.pop();
                m.push_return_barrier()
            }))
            .unwrap();
        });
        let id = threads.create(&engine, engine.lookup("barrier").unwrap(), &[], 0).unwrap();
        assert_eq!(threads.resume(&engine, id).unwrap(), TransferOutcome::Returned);
        assert_eq!(threads.status(id).unwrap(), ThreadStatus::Runnable);
        assert_eq!(
            threads.resume(&engine, id).unwrap(),
            TransferOutcome::Finished { result: None }
        );
    }

    #[test]
    fn test_step_budget_forces_yield() {
        let (engine, threads) = crate::testing::engine_with_config(
            crate::config::EngineConfig::new().step_budget(3),
            |_e| {},
        );
        let id = threads.create(&engine, countdown(&engine), &[10], 0).unwrap();
        let mut yields = 0;
        loop {
            match threads.resume(&engine, id).unwrap() {
                TransferOutcome::Yielded => yields += 1,
                TransferOutcome::Finished { result } => {
                    assert_eq!(result, Some(10));
                    break;
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(yields >= 3);
    }

    #[test]
    fn test_push_validates_descriptor_and_payload() {
        let (engine, threads) = engine_with(|e| {
            e.register_descriptor(FrameDescriptor::new("bad-push", SlotLayout::EMPTY, |m| {
                let target = m.lookup("countdown").unwrap();
                m.push(target, &[1, 2, 3])
            }))
            .unwrap();
        });
        let id = threads.create(&engine, entry_of(&engine, "bad-push"), &[], 0).unwrap();
        assert!(matches!(
            threads.resume(&engine, id),
            Err(StackError::PayloadMismatch { expected: 1, got: 3, .. })
        ));
        assert_eq!(threads.status(id).unwrap(), ThreadStatus::Finished);
    }

    #[test]
    fn test_slot_outside_payload_faults_thread() {
        let (engine, threads) = engine_with(|e| {
            e.register_descriptor(FrameDescriptor::new("reach", SlotLayout::words(1).unwrap(), |m| {
                let past = m.slot(0)? as usize;
                m.set_slot(past, 7)?;
                m.pop();
                Ok(())
            }))
            .unwrap();
        });
        let reach = entry_of(&engine, "reach");
        let id = threads.create(&engine, reach, &[1], 0).unwrap();
        assert_eq!(
            threads.resume(&engine, id),
            Err(StackError::SlotOutOfRange { id, descriptor: reach, index: 1 })
        );
        assert_eq!(threads.status(id).unwrap(), ThreadStatus::Finished);
        assert!(threads.exit_info(id).unwrap().faulted);

        // other threads keep running
        let other = threads.create(&engine, countdown(&engine), &[2], 0).unwrap();
        assert!(threads.resume(&engine, other).is_ok());
    }

    #[test]
    fn test_push_after_mutation_without_room_faults() {
        let (engine, threads) = crate::testing::engine_with_config(
            crate::config::EngineConfig::new().stack_words(64).max_stack_words(1024),
            |e| {
                e.register_descriptor(FrameDescriptor::new("greedy", SlotLayout::words(1).unwrap(), |m| {
                    m.set_slot(0, 1)?;
                    let filler = m.lookup("filler").unwrap();
                    let payload = [0; 63];
                    m.push(filler, &payload)
                }))
                .unwrap();
                e.register_descriptor(FrameDescriptor::new(
                    "filler",
                    SlotLayout::words(63).unwrap(),
                    |m| {
                        m.pop();
                        Ok(())
                    },
                ))
                .unwrap();
            },
        );
        let id = threads.create(&engine, entry_of(&engine, "greedy"), &[0], 0).unwrap();
        assert!(matches!(threads.resume(&engine, id), Err(StackError::TornFrame { .. })));
    }

    #[test]
    fn test_init_return_requires_entry_point() {
        let (engine, threads) = engine_with(|_e| {});
        assert_eq!(init_return(&engine, &threads).unwrap_err(), BootError::NoEntryPoint);
    }

    #[test]
    fn test_exit_reports_outcome() {
        let exit = return_to_stack_top(TransferOutcome::Returned).unwrap_err();
        assert_eq!(exit.outcome(), Some(TransferOutcome::Returned));
        let fault: Exit = StackError::NotInitialized.into();
        assert_eq!(fault.outcome(), None);
    }
}
