//! Error types
//!
//! Recoverable failures are [`TaskError`] values that surface as system-call
//! error codes. Kernel-internal corruption is not an error value: it goes
//! through [`bug_on!`](crate::bug_on) and halts.

/// Errors returned by task and waitqueue operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TaskError {
    /// A zone or bounded list is full
    NoMemory = -12,
    /// A wait was cut short by an interrupt wakeup
    Interrupted = -4,
    /// An identifier pool has no free ids left
    NoIds = -28,
    /// Offset and size reach past the end of a buffer
    OutOfRange = -34,
    /// Malformed request (unknown address, reserved code, missing parent)
    InvalidArgument = -22,
    /// The id is taken, or the task is sleeping or queued to run
    Busy = -16,
    /// No live task has this id
    NotFound = -3,
}

impl TaskError {
    /// Convert to the negative errno value returned to user space
    pub fn to_errno(self) -> i32 {
        self as i32
    }
}

/// Result type for task operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Halt on a broken kernel invariant
///
/// Logs the diagnostic at error level, then panics with it.
#[macro_export]
macro_rules! bug_on {
    ($cond:expr, $($arg:tt)+) => {
        if $cond {
            $crate::__log::error!("BUG: {}", format_args!($($arg)+));
            panic!("BUG: {}", format_args!($($arg)+));
        }
    };
}
