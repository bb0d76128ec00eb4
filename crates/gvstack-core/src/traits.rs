//! Interfaces to the collaborators outside the stack core
//!
//! The garbage collector and the scheduler live elsewhere. These traits are
//! the only surface they see.

use crate::frame::{FrameInfo, Word};
use crate::id::ThreadId;

/// Garbage collector view of a suspended stack
///
/// The walker calls `visit_frame` once per frame from top to bottom, then
/// `visit_root` for each live-reference slot of that frame. A moving
/// collector may overwrite `value`; the stack shape itself is never
/// exposed for mutation.
pub trait RootVisitor {
    fn visit_frame(&mut self, _frame: &FrameInfo<'_>) {}

    fn visit_root(&mut self, frame: &FrameInfo<'_>, slot: usize, value: &mut Word);
}

/// Run queue owned by the scheduler
///
/// The core never pushes on its own; the boundary routes each
/// `TransferOutcome` and decides what goes back in.
pub trait RunQueue: Send + Sync {
    fn push(&self, id: ThreadId);

    fn pop(&self) -> Option<ThreadId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DescriptorId, FrameKind, SlotLayout};

    struct Doubler(usize);

    impl RootVisitor for Doubler {
        fn visit_root(&mut self, _frame: &FrameInfo<'_>, _slot: usize, value: &mut Word) {
            *value *= 2;
            self.0 += 1;
        }
    }

    #[test]
    fn test_visitor_rewrites_root() {
        let info = FrameInfo {
            depth: 0,
            descriptor: DescriptorId::new(5),
            kind: FrameKind::Application,
            name: "test",
            layout: SlotLayout::new(1, 1).unwrap(),
        };
        let mut v = Doubler(0);
        let mut word: Word = 21;
        v.visit_frame(&info);
        v.visit_root(&info, 0, &mut word);
        assert_eq!(word, 42);
        assert_eq!(v.0, 1);
    }
}
