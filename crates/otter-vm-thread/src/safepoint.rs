//! Suspend-all coordination
//!
//! ## Protocol
//!
//! 1. The initiator takes the pause lock (sitting in `WAIT` meanwhile if it is
//!    a running managed thread, so competing initiators never wait on each
//!    other while `RUNNING`)
//! 2. Under the registry lock, every other thread gets a suspend request and
//!    the pending-pause counter is bumped for threads attaching later
//! 3. The initiator waits until no target is `RUNNING`: parked threads report
//!    `IS_SUSPENDED`, native/waiting threads are already safe
//! 4. Dropping the [`SuspendAllScope`] withdraws the requests and wakes the
//!    parked threads, which return to `RUNNING` on their own

use crate::manager::ThreadManager;
use crate::state::ThreadState;
use crate::thread::ManagedThread;
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Safepoint statistics
#[derive(Debug, Default, Clone)]
pub struct SafepointStats {
    /// Completed suspend-all pauses
    pub suspend_all_count: u64,
    /// Targets that parked in `IS_SUSPENDED` across all pauses
    pub threads_parked: u64,
    /// Targets that were already native, waiting or not yet running
    pub threads_already_safe: u64,
    /// Time the last pause took to reach the safepoint
    pub last_time_to_safepoint: Duration,
    /// Duration of the last pause, request to resume
    pub last_pause_time: Duration,
    /// Accumulated pause time
    pub total_pause_time: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct SafepointCounters {
    suspend_all_count: AtomicU64,
    threads_parked: AtomicU64,
    threads_already_safe: AtomicU64,
    last_time_to_safepoint_nanos: AtomicU64,
    last_pause_nanos: AtomicU64,
    total_pause_nanos: AtomicU64,
}

impl SafepointCounters {
    fn record_reached(&self, targets: usize, parked: usize, elapsed: Duration) {
        self.threads_parked
            .fetch_add(parked as u64, Ordering::Relaxed);
        self.threads_already_safe
            .fetch_add((targets - parked) as u64, Ordering::Relaxed);
        self.last_time_to_safepoint_nanos
            .store(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    fn record_pause(&self, pause: Duration) {
        let nanos = pause.as_nanos() as u64;
        self.suspend_all_count.fetch_add(1, Ordering::Relaxed);
        self.last_pause_nanos.store(nanos, Ordering::Relaxed);
        self.total_pause_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SafepointStats {
        SafepointStats {
            suspend_all_count: self.suspend_all_count.load(Ordering::Relaxed),
            threads_parked: self.threads_parked.load(Ordering::Relaxed),
            threads_already_safe: self.threads_already_safe.load(Ordering::Relaxed),
            last_time_to_safepoint: Duration::from_nanos(
                self.last_time_to_safepoint_nanos.load(Ordering::Relaxed),
            ),
            last_pause_time: Duration::from_nanos(self.last_pause_nanos.load(Ordering::Relaxed)),
            total_pause_time: Duration::from_nanos(self.total_pause_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Every managed thread except the initiator is stopped while this guard
/// lives. Dropping it resumes them, including during unwinding.
#[must_use = "dropping the scope immediately resumes all threads"]
pub struct SuspendAllScope<'a> {
    manager: &'a ThreadManager,
    initiator: Option<Arc<ManagedThread>>,
    target_count: usize,
    started: Instant,
    /// Released after `Drop::drop` has resumed every thread
    _pause: MutexGuard<'a, ()>,
}

impl SuspendAllScope<'_> {
    /// Managed thread that requested the pause, if the caller is attached
    pub fn initiator(&self) -> Option<&Arc<ManagedThread>> {
        self.initiator.as_ref()
    }

    /// Threads that received the suspend request at the start of the pause
    pub fn target_count(&self) -> usize {
        self.target_count
    }

    /// Time since the pause was requested
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn is_initiator(&self, thread: &Arc<ManagedThread>) -> bool {
        self.initiator
            .as_ref()
            .is_some_and(|initiator| Arc::ptr_eq(initiator, thread))
    }
}

impl Drop for SuspendAllScope<'_> {
    fn drop(&mut self) {
        let shared = &self.manager.shared;
        let mut resumed = 0usize;
        {
            let mut registry = shared.threads.lock();
            registry.pending_suspend_all -= 1;
            for thread in registry.threads.iter() {
                if !self.is_initiator(thread) {
                    thread.resume();
                    resumed += 1;
                }
            }
        }

        if let Some(initiator) = &self.initiator {
            initiator.set_launched_suspend_all(false);
        }

        let pause = self.started.elapsed();
        shared.counters.record_pause(pause);
        tracing::debug!(
            target: "otter::safepoint",
            resumed,
            pause_us = pause.as_micros() as u64,
            "resumed all threads"
        );
    }
}

impl ThreadManager {
    /// Stop every other managed thread until the returned scope is dropped.
    ///
    /// Blocks until each target is `IS_SUSPENDED` or otherwise outside
    /// `RUNNING`. There is no timeout: a running thread that never polls
    /// [`ManagedThread::check_safepoint`] blocks this call forever.
    ///
    /// A running initiator is in `WAIT` only while it queues for the pause
    /// lock. It waits for the targets in `RUNNING`, so a targeted request
    /// raised against it in the meantime cannot hold it outside managed code.
    pub fn suspend_all(&self) -> SuspendAllScope<'_> {
        let shared = &self.shared;
        let initiator = self.current_thread();

        let pause = match initiator.as_deref() {
            Some(thread) if thread.is_in_running_state() => {
                let _wait = thread.enter_wait();
                shared.pause_lock.lock()
            }
            _ => shared.pause_lock.lock(),
        };

        let started = Instant::now();
        if let Some(thread) = &initiator {
            thread.set_launched_suspend_all(true);
        }

        let targets: Vec<Arc<ManagedThread>> = {
            let mut registry = shared.threads.lock();
            registry.pending_suspend_all += 1;
            registry
                .threads
                .iter()
                .filter(|thread| {
                    !initiator
                        .as_ref()
                        .is_some_and(|initiator| Arc::ptr_eq(initiator, thread))
                })
                .inspect(|thread| thread.request_suspend())
                .cloned()
                .collect()
        };

        tracing::debug!(
            target: "otter::safepoint",
            initiator = initiator.as_ref().map(|thread| thread.id()),
            targets = targets.len(),
            "suspend all requested"
        );

        shared.wait_until_safe(&targets, started);

        let time_to_safepoint = started.elapsed();
        let parked = targets
            .iter()
            .filter(|thread| thread.state() == ThreadState::IsSuspended)
            .count();
        shared
            .counters
            .record_reached(targets.len(), parked, time_to_safepoint);

        tracing::debug!(
            target: "otter::safepoint",
            targets = targets.len(),
            parked,
            time_to_safepoint_us = time_to_safepoint.as_micros() as u64,
            "all threads suspended"
        );

        SuspendAllScope {
            manager: self,
            initiator,
            target_count: targets.len(),
            started,
            _pause: pause,
        }
    }

    /// Get statistics
    pub fn stats(&self) -> SafepointStats {
        self.shared.counters.snapshot()
    }
}
