//! Thread status and suspension reasons

use core::fmt;

/// Status of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadStatus {
    /// Ready to be entered by `resume`
    Runnable = 0,

    /// Possessed by an engine, executing on its stack
    Running = 1,

    /// Waiting for an external wake (I/O, lock, message)
    Blocked = 2,

    /// Reached its stop frame or overflowed; only `reclaim` remains valid
    Finished = 3,
}

impl ThreadStatus {
    /// Status byte of a table slot that holds no thread
    pub const VACANT: u8 = u8::MAX;

    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, ThreadStatus::Runnable)
    }

    #[inline]
    pub const fn is_finished(&self) -> bool {
        matches!(self, ThreadStatus::Finished)
    }

    /// Decode a status byte; `None` for a vacant slot or garbage
    #[inline]
    pub const fn from_u8(v: u8) -> Option<ThreadStatus> {
        match v {
            0 => Some(ThreadStatus::Runnable),
            1 => Some(ThreadStatus::Running),
            2 => Some(ThreadStatus::Blocked),
            3 => Some(ThreadStatus::Finished),
            _ => None,
        }
    }
}

impl From<ThreadStatus> for u8 {
    fn from(status: ThreadStatus) -> u8 {
        status as u8
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadStatus::Runnable => write!(f, "runnable"),
            ThreadStatus::Running => write!(f, "running"),
            ThreadStatus::Blocked => write!(f, "blocked"),
            ThreadStatus::Finished => write!(f, "finished"),
        }
    }
}

/// What a blocked thread is waiting on
///
/// Carried to the scheduler boundary so it can decide between
/// wake-on-event bookkeeping paths. The core never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockReason {
    Io,
    Lock,
    Message,
    Join,
    Other(u32),
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Io => write!(f, "io"),
            BlockReason::Lock => write!(f, "lock"),
            BlockReason::Message => write!(f, "message"),
            BlockReason::Join => write!(f, "join"),
            BlockReason::Other(code) => write!(f, "other({})", code),
        }
    }
}

/// Why a running thread hands control back voluntarily
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// Give up the engine for fairness; stays runnable
    Yield,
    /// Wait for an external wake
    Block(BlockReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ThreadStatus::Runnable,
            ThreadStatus::Running,
            ThreadStatus::Blocked,
            ThreadStatus::Finished,
        ] {
            assert_eq!(ThreadStatus::from_u8(u8::from(status)), Some(status));
        }
        assert_eq!(ThreadStatus::from_u8(ThreadStatus::VACANT), None);
    }

    #[test]
    fn test_status_predicates() {
        assert!(ThreadStatus::Runnable.is_runnable());
        assert!(!ThreadStatus::Blocked.is_runnable());
        assert!(ThreadStatus::Finished.is_finished());
        assert!(!ThreadStatus::Running.is_finished());
    }
}
