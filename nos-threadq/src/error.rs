//! Error types for the thread queue subsystem

use core::fmt;

use crate::types::Tid;

/// Recoverable errors surfaced to the synchronization object embedding
/// a thread queue.
///
/// Caller contract violations (wrong dispatch-disable level, a thread
/// without its spare queue heads) are not represented here; they are
/// fatal and abort via `panic!`. How a completed wait ended (timeout,
/// flush) is reported through `WaitOutcome`, not as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A cycle was found in the ownership graph while enqueueing the
    /// given thread. The thread was not blocked.
    Deadlock(Tid),
    /// The thread is not known to the thread table.
    UnknownThread(Tid),
    /// The thread is already enqueued on some queue.
    AlreadyWaiting(Tid),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Deadlock(tid) => write!(f, "deadlock detected while enqueueing thread {}", tid),
            Error::UnknownThread(tid) => write!(f, "unknown thread {}", tid),
            Error::AlreadyWaiting(tid) => write!(f, "thread {} is already waiting on a queue", tid),
        }
    }
}

/// Result type used throughout the crate
pub type Result<T> = core::result::Result<T, Error>;
