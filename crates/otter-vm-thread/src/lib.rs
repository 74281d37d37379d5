//! # Otter VM Threads
//!
//! Managed thread states and cooperative safepoints.
//!
//! ## Design
//!
//! - **Thread states**: every attached OS thread owns a [`ManagedThread`] whose
//!   state word is only written by that thread
//! - **Suspension is cooperative**: a coordinator raises a suspend request,
//!   the owning thread parks itself at its next [`ManagedThread::check_safepoint`]
//! - **Native and wait states are safe**: a thread outside managed code never
//!   blocks a pause, and cannot re-enter managed code while one is pending
//! - **Scoped guards**: state transitions and whole-VM pauses are RAII guards,
//!   so every exit path restores or resumes

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod manager;
pub mod safepoint;
pub mod scope;
pub mod state;
pub mod thread;

pub use error::ThreadError;
pub use manager::{ThreadManager, ThreadManagerConfig};
pub use safepoint::{SafepointStats, SuspendAllScope};
pub use scope::ThreadStateTransition;
pub use state::ThreadState;
pub use thread::{ManagedThread, ThreadId};
