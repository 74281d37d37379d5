//! Thread registry errors

use crate::thread::ThreadId;
use thiserror::Error;

/// Recoverable thread registry errors.
///
/// Invalid state transitions are not represented here: a corrupted thread
/// state cannot be continued from and panics instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadError {
    /// The calling OS thread already has a managed thread attached
    #[error("current thread is already attached to a thread manager")]
    AlreadyAttached,

    /// The calling OS thread is not attached to this manager
    #[error("current thread is not attached to this thread manager")]
    NotAttached,

    /// The manager no longer accepts new threads
    #[error("thread manager has been shut down")]
    ManagerShutDown,

    /// Shutdown was requested while other threads are still attached
    #[error("{0} managed thread(s) still attached")]
    ThreadsStillAttached(usize),

    /// No registered thread has this id
    #[error("unknown managed thread {0}")]
    UnknownThread(ThreadId),

    /// A thread asked to suspend itself through the registry
    #[error("managed thread {0} cannot suspend itself")]
    SelfSuspension(ThreadId),

    /// Resume requested for a thread without a targeted suspension
    #[error("managed thread {0} has no pending targeted suspension")]
    NotSuspended(ThreadId),
}
