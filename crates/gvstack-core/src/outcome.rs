//! Transfer outcomes carried back to the scheduler boundary

use core::fmt;

use crate::frame::Word;
use crate::state::{BlockReason, ThreadStatus};

/// Result of one `resume`: why control left the thread's stack
///
/// This is the only channel between a thread and the boundary that entered
/// it. The scheduler routes the thread on it: requeue, park until woken,
/// grow the stack, or reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Gave up the engine (voluntarily, by preempt request, or at the end
    /// of its step budget); still runnable
    Yielded,

    /// Waiting for an external wake
    Blocked(BlockReason),

    /// Control unwound into a stack-top return frame; still runnable
    Returned,

    /// A frame needed `words` free words the stack lacks; call `grow`
    /// then resume, which re-dispatches the frame that asked for them
    GrowRequested { words: usize },

    /// Reached the stop frame
    Finished { result: Option<Word> },
}

impl TransferOutcome {
    /// Status the thread holds after leaving with this outcome
    #[inline]
    pub const fn next_status(&self) -> ThreadStatus {
        match self {
            TransferOutcome::Yielded
            | TransferOutcome::Returned
            | TransferOutcome::GrowRequested { .. } => ThreadStatus::Runnable,
            TransferOutcome::Blocked(_) => ThreadStatus::Blocked,
            TransferOutcome::Finished { .. } => ThreadStatus::Finished,
        }
    }

    #[inline]
    pub const fn is_finished(&self) -> bool {
        matches!(self, TransferOutcome::Finished { .. })
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Yielded => write!(f, "yielded"),
            TransferOutcome::Blocked(reason) => write!(f, "blocked on {}", reason),
            TransferOutcome::Returned => write!(f, "returned to stack top"),
            TransferOutcome::GrowRequested { words } => {
                write!(f, "grow requested ({} words)", words)
            }
            TransferOutcome::Finished { result: Some(w) } => write!(f, "finished ({:#x})", w),
            TransferOutcome::Finished { result: None } => write!(f, "finished"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_status() {
        assert_eq!(TransferOutcome::Yielded.next_status(), ThreadStatus::Runnable);
        assert_eq!(TransferOutcome::Returned.next_status(), ThreadStatus::Runnable);
        assert_eq!(
            TransferOutcome::GrowRequested { words: 8 }.next_status(),
            ThreadStatus::Runnable
        );
        assert_eq!(
            TransferOutcome::Blocked(BlockReason::Io).next_status(),
            ThreadStatus::Blocked
        );
        assert_eq!(
            TransferOutcome::Finished { result: None }.next_status(),
            ThreadStatus::Finished
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", TransferOutcome::Blocked(BlockReason::Lock)), "blocked on lock");
        assert_eq!(
            format!("{}", TransferOutcome::Finished { result: Some(255) }),
            "finished (0xff)"
        );
    }
}
