//! Error types for the stack lifecycle and bootstrap

use core::fmt;

use crate::frame::DescriptorId;
use crate::id::{ModuleId, ThreadId};
use crate::state::ThreadStatus;

/// Result type for thread lifecycle operations
pub type StackResult<T> = Result<T, StackError>;

/// Result type for bootstrap operations
pub type BootResult<T> = Result<T, BootError>;

/// Errors raised by the thread lifecycle controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    /// Stack memory or a thread table slot could not be reserved
    ResourceExhausted(MemoryError),

    /// Growth would pass the configured maximum stack size
    StackOverflow { requested: usize, limit: usize },

    /// The thread was reclaimed, or has finished and only reclaim remains
    UseAfterReclaim(ThreadId),

    /// Operation not valid in the thread's current status
    InvalidState { id: ThreadId, status: ThreadStatus },

    /// Engine `init` has not run yet
    NotInitialized,

    /// Frame pushed with a descriptor id missing from the table
    UnknownDescriptor(DescriptorId),

    /// Payload length differs from the descriptor's layout
    PayloadMismatch { descriptor: DescriptorId, expected: usize, got: usize },

    /// Walking the stack met a header word that is not a descriptor
    CorruptStack { id: ThreadId, at: usize },

    /// `resume` called from inside a running thread on the same engine
    NestedResume,

    /// Threads must start in an application frame
    NotEntryFrame(DescriptorId),

    /// Frame code ran out of stack after it had already changed the stack
    /// in the same step; the thread cannot be re-dispatched
    TornFrame { id: ThreadId, descriptor: DescriptorId },

    /// Frame code addressed a slot past the top frame's payload
    SlotOutOfRange { id: ThreadId, descriptor: DescriptorId, index: usize },
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::ResourceExhausted(e) => write!(f, "resource exhausted: {}", e),
            StackError::StackOverflow { requested, limit } => {
                write!(f, "stack overflow: {} words requested, limit {}", requested, limit)
            }
            StackError::UseAfterReclaim(id) => write!(f, "thread {} used after reclaim", id),
            StackError::InvalidState { id, status } => {
                write!(f, "thread {} is {}", id, status)
            }
            StackError::NotInitialized => write!(f, "engine not initialized"),
            StackError::UnknownDescriptor(d) => write!(f, "unknown frame descriptor {}", d),
            StackError::PayloadMismatch { descriptor, expected, got } => write!(
                f,
                "descriptor {} takes {} payload words, got {}",
                descriptor, expected, got
            ),
            StackError::CorruptStack { id, at } => {
                write!(f, "corrupt stack in thread {} at word {}", id, at)
            }
            StackError::NestedResume => write!(f, "resume called from inside a running thread"),
            StackError::NotEntryFrame(d) => write!(f, "descriptor {} is not an application frame", d),
            StackError::TornFrame { id, descriptor } => write!(
                f,
                "thread {} ran out of stack in frame {} after mutating it; reserve first",
                id, descriptor
            ),
            StackError::SlotOutOfRange { id, descriptor, index } => write!(
                f,
                "thread {} addressed slot {} outside frame {}",
                id, index, descriptor
            ),
        }
    }
}

impl std::error::Error for StackError {}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap or heap reservation failed
    AllocationFailed,

    /// mprotect on the guard page failed
    ProtectionFailed,

    /// Requested size overflows the address space
    SizeOverflow,

    /// Thread table is full
    TooManyThreads,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "stack allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "guard page protection failed"),
            MemoryError::SizeOverflow => write!(f, "stack size overflows address space"),
            MemoryError::TooManyThreads => write!(f, "thread table full"),
        }
    }
}

impl From<MemoryError> for StackError {
    fn from(e: MemoryError) -> Self {
        StackError::ResourceExhausted(e)
    }
}

/// Engine thread pool errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Failed to spawn an engine thread
    SpawnFailed,

    /// An engine thread panicked
    Panicked,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::SpawnFailed => write!(f, "failed to spawn engine thread"),
            WorkerError::Panicked => write!(f, "engine thread panicked"),
        }
    }
}

impl std::error::Error for WorkerError {}

/// Errors raised while bootstrapping the engine
///
/// All of these are fatal: no valid execution context exists yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootError {
    /// `init` ran twice
    AlreadyInitialized,

    /// Same module registered twice
    DuplicateInitializer(ModuleId),

    /// A module depends on one nobody registered
    UnknownDependency { module: ModuleId, missing: ModuleId },

    /// Dependency cycle among the listed modules
    InitCycleDetected(Vec<ModuleId>),

    /// No initializer designated a starting thread
    NoEntryPoint,

    /// A module initializer reported failure
    InitializerFailed { module: ModuleId, reason: String },

    /// The starting thread overflowed its stack during bootstrap
    StartThreadOverflow(ThreadId),

    /// Lifecycle error while entering the starting thread
    Thread(StackError),
}

impl BootError {
    /// Process exit code used when this error aborts the process
    pub const fn exit_code(&self) -> i32 {
        match self {
            BootError::InitCycleDetected(_) => 3,
            BootError::NoEntryPoint => 4,
            BootError::StartThreadOverflow(_) => 5,
            BootError::DuplicateInitializer(_) | BootError::UnknownDependency { .. } => 6,
            BootError::InitializerFailed { .. } => 7,
            BootError::AlreadyInitialized | BootError::Thread(_) => 1,
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::AlreadyInitialized => write!(f, "engine already initialized"),
            BootError::DuplicateInitializer(m) => {
                write!(f, "initializer for module {} registered twice", m)
            }
            BootError::UnknownDependency { module, missing } => {
                write!(f, "module {} depends on unregistered module {}", module, missing)
            }
            BootError::InitCycleDetected(modules) => {
                write!(f, "initializer dependency cycle among:")?;
                for m in modules {
                    write!(f, " {}", m)?;
                }
                Ok(())
            }
            BootError::NoEntryPoint => write!(f, "no starting thread designated"),
            BootError::InitializerFailed { module, reason } => {
                write!(f, "initializer for module {} failed: {}", module, reason)
            }
            BootError::StartThreadOverflow(id) => {
                write!(f, "starting thread {} overflowed its stack", id)
            }
            BootError::Thread(e) => write!(f, "starting thread: {}", e),
        }
    }
}

impl std::error::Error for BootError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BootError::Thread(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StackError> for BootError {
    fn from(e: StackError) -> Self {
        BootError::Thread(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = StackError::ResourceExhausted(MemoryError::AllocationFailed);
        assert_eq!(format!("{}", e), "resource exhausted: stack allocation failed");

        let e = StackError::UseAfterReclaim(ThreadId::new(4, 1));
        assert_eq!(format!("{}", e), "thread t4.1 used after reclaim");

        let e = BootError::InitCycleDetected(vec!["A".into(), "B".into()]);
        assert_eq!(format!("{}", e), "initializer dependency cycle among: A B");
    }

    #[test]
    fn test_error_conversion() {
        let stack_err: StackError = MemoryError::TooManyThreads.into();
        assert!(matches!(
            stack_err,
            StackError::ResourceExhausted(MemoryError::TooManyThreads)
        ));

        let boot_err: BootError = StackError::NotInitialized.into();
        assert!(matches!(boot_err, BootError::Thread(StackError::NotInitialized)));
    }

    #[test]
    fn test_exit_codes_non_zero() {
        let errors = [
            BootError::InitCycleDetected(vec![]),
            BootError::NoEntryPoint,
            BootError::StartThreadOverflow(ThreadId::new(0, 0)),
            BootError::AlreadyInitialized,
        ];
        for e in &errors {
            assert_ne!(e.exit_code(), 0);
        }
    }
}
