//! Thread registry
//!
//! The [`ThreadManager`] owns every attached [`ManagedThread`]. It is the
//! VM-level registry the safepoint coordinator iterates; see
//! [`crate::safepoint`] for the pause protocol itself.

use crate::error::ThreadError;
use crate::safepoint::SafepointCounters;
use crate::state::ThreadState;
use crate::thread::{ManagedThread, ThreadId};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Thread manager configuration
#[derive(Debug, Clone)]
pub struct ThreadManagerConfig {
    /// How long a coordinator sleeps between re-checks while waiting for
    /// threads to reach a safe state (default: 1ms)
    pub suspend_poll_interval: Duration,
    /// Waiting longer than this for a pause logs the threads still running
    /// (default: 100ms)
    pub slow_suspend_threshold: Duration,
}

impl Default for ThreadManagerConfig {
    fn default() -> Self {
        Self {
            suspend_poll_interval: Duration::from_millis(1),
            slow_suspend_threshold: Duration::from_millis(100),
        }
    }
}

/// Registered threads, guarded by `ManagerShared::threads`
pub(crate) struct Registry {
    pub(crate) threads: Vec<Arc<ManagedThread>>,
    next_id: ThreadId,
    /// Suspend-alls currently holding their request on every thread.
    /// Threads attaching meanwhile start with this many requests.
    pub(crate) pending_suspend_all: u32,
    shut_down: bool,
}

/// State shared between the manager and its threads
pub(crate) struct ManagerShared {
    pub(crate) config: ThreadManagerConfig,
    pub(crate) threads: Mutex<Registry>,
    /// Serializes suspend-all initiators
    pub(crate) pause_lock: Mutex<()>,
    /// Coordinator parks here while waiting for threads to become safe
    safepoint_lock: Mutex<()>,
    safepoint_cond: Condvar,
    pub(crate) counters: SafepointCounters,
}

impl ManagerShared {
    /// Wake a coordinator waiting in `wait_until_safe`
    pub(crate) fn notify_state_change(&self) {
        let _guard = self.safepoint_lock.lock();
        self.safepoint_cond.notify_all();
    }

    /// Block until no thread in `targets` is `RUNNING`.
    ///
    /// Every target must already carry a suspend request, so a thread seen
    /// outside `RUNNING` stays there.
    pub(crate) fn wait_until_safe(&self, targets: &[Arc<ManagedThread>], started: Instant) {
        let all_safe = || targets.iter().all(|thread| thread.state().is_safe());

        let backoff = crossbeam_utils::Backoff::new();
        while !backoff.is_completed() {
            if all_safe() {
                return;
            }
            backoff.snooze();
        }

        let mut warned = false;
        let mut guard = self.safepoint_lock.lock();
        while !all_safe() {
            self.safepoint_cond
                .wait_for(&mut guard, self.config.suspend_poll_interval);

            if !warned && started.elapsed() >= self.config.slow_suspend_threshold {
                warned = true;
                let running: Vec<ThreadId> = targets
                    .iter()
                    .filter(|thread| !thread.state().is_safe())
                    .map(|thread| thread.id())
                    .collect();
                tracing::warn!(
                    target: "otter::safepoint",
                    waited_ms = started.elapsed().as_millis() as u64,
                    ?running,
                    "threads slow to reach safepoint"
                );
            }
        }
    }
}

/// VM-level registry of managed threads and safepoint coordinator.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ThreadManager {
    pub(crate) shared: Arc<ManagerShared>,
}

impl ThreadManager {
    /// Create a manager with default config
    pub fn new() -> Self {
        Self::with_config(ThreadManagerConfig::default())
    }

    /// Create a manager with custom config
    pub fn with_config(config: ThreadManagerConfig) -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                config,
                threads: Mutex::new(Registry {
                    threads: Vec::new(),
                    next_id: 1,
                    pending_suspend_all: 0,
                    shut_down: false,
                }),
                pause_lock: Mutex::new(()),
                safepoint_lock: Mutex::new(()),
                safepoint_cond: Condvar::new(),
                counters: SafepointCounters::default(),
            }),
        }
    }

    /// Get config
    pub fn config(&self) -> &ThreadManagerConfig {
        &self.shared.config
    }

    /// Attach the calling OS thread.
    ///
    /// The new thread starts in `CREATED`. If a suspend-all is in flight it
    /// starts with the pause's suspend request already raised, so it cannot
    /// enter `RUNNING` until the pause ends.
    pub fn attach_current_thread(&self, name: Option<&str>) -> Result<Arc<ManagedThread>, ThreadError> {
        if ManagedThread::current().is_some() {
            return Err(ThreadError::AlreadyAttached);
        }

        let thread = {
            let mut registry = self.shared.threads.lock();
            if registry.shut_down {
                return Err(ThreadError::ManagerShutDown);
            }

            let id = registry.next_id;
            registry.next_id += 1;

            let thread = Arc::new(ManagedThread::new(
                id,
                name.map(str::to_owned),
                Arc::downgrade(&self.shared),
            ));
            for _ in 0..registry.pending_suspend_all {
                thread.request_suspend();
            }
            registry.threads.push(thread.clone());
            thread
        };

        ManagedThread::set_current(Some(thread.clone()));
        tracing::debug!(
            target: "otter::thread",
            thread = thread.id(),
            name = thread.name().unwrap_or(""),
            suspended = thread.has_suspend_request(),
            "thread attached"
        );
        Ok(thread)
    }

    /// Detach the calling OS thread: `TERMINATED`, then removed from the
    /// registry.
    pub fn detach_current_thread(&self) -> Result<(), ThreadError> {
        let thread = self.current_thread().ok_or(ThreadError::NotAttached)?;
        thread.terminate();
        thread.set_launched_suspend_all(false);

        self.shared
            .threads
            .lock()
            .threads
            .retain(|t| !Arc::ptr_eq(t, &thread));
        ManagedThread::set_current(None);

        tracing::debug!(target: "otter::thread", thread = thread.id(), "thread detached");
        Ok(())
    }

    /// Managed thread of the calling OS thread, if attached to this manager
    pub fn current_thread(&self) -> Option<Arc<ManagedThread>> {
        ManagedThread::current().filter(|thread| thread.belongs_to(&self.shared))
    }

    /// Number of attached threads
    pub fn thread_count(&self) -> usize {
        self.shared.threads.lock().threads.len()
    }

    /// Snapshot of attached threads
    pub fn threads(&self) -> Vec<Arc<ManagedThread>> {
        self.shared.threads.lock().threads.clone()
    }

    /// Find an attached thread by id
    pub fn find_thread(&self, id: ThreadId) -> Option<Arc<ManagedThread>> {
        self.shared
            .threads
            .lock()
            .threads
            .iter()
            .find(|thread| thread.id() == id)
            .cloned()
    }

    /// Visit every attached thread while holding the registry lock
    pub fn for_each_thread(&self, mut f: impl FnMut(&ManagedThread)) {
        for thread in self.shared.threads.lock().threads.iter() {
            f(thread);
        }
    }

    /// Whether every attached thread other than the caller is in `state`
    pub fn check_all_threads_state(&self, state: ThreadState) -> bool {
        self.others_all(|thread| thread.state() == state)
    }

    /// Whether every attached thread other than the caller has a pending
    /// suspend request and is outside `RUNNING`
    pub fn check_all_threads_suspended(&self) -> bool {
        self.others_all(|thread| thread.has_suspend_request() && thread.state().is_safe())
    }

    fn others_all(&self, predicate: impl Fn(&ManagedThread) -> bool) -> bool {
        let current = self.current_thread();
        self.shared
            .threads
            .lock()
            .threads
            .iter()
            .filter(|thread| !current.as_ref().is_some_and(|c| Arc::ptr_eq(c, thread)))
            .all(|thread| predicate(&**thread))
    }

    /// Suspend a single thread and wait until it is outside `RUNNING`.
    ///
    /// Targeted suspensions nest with each other and with suspend-all; each
    /// must be paired with [`resume_thread`](Self::resume_thread).
    ///
    /// A running caller waits in `WAIT`, so a suspend-all that targets it
    /// meanwhile is not held up. Returning to `RUNNING` afterwards blocks
    /// while the caller itself has a pending request.
    pub fn suspend_thread(&self, id: ThreadId) -> Result<(), ThreadError> {
        let thread = self.find_thread(id).ok_or(ThreadError::UnknownThread(id))?;
        if thread.is_current() {
            return Err(ThreadError::SelfSuspension(id));
        }

        let started = Instant::now();
        thread.request_targeted_suspend();
        {
            let caller = self.current_thread();
            let _wait = caller
                .as_deref()
                .filter(|caller| caller.is_in_running_state())
                .map(ManagedThread::enter_wait);
            self.shared.wait_until_safe(std::slice::from_ref(&thread), started);
        }

        tracing::debug!(
            target: "otter::safepoint",
            thread = id,
            state = %thread.state(),
            "thread suspended"
        );
        Ok(())
    }

    /// Withdraw a suspension raised by [`suspend_thread`](Self::suspend_thread)
    pub fn resume_thread(&self, id: ThreadId) -> Result<(), ThreadError> {
        let thread = self.find_thread(id).ok_or(ThreadError::UnknownThread(id))?;
        if !thread.resume_targeted() {
            return Err(ThreadError::NotSuspended(id));
        }
        tracing::debug!(target: "otter::safepoint", thread = id, "thread resumed");
        Ok(())
    }

    /// Close the registry.
    ///
    /// Fails while threads other than the caller are attached. On success the
    /// caller (if attached) is detached and later attaches fail.
    pub fn shutdown(&self) -> Result<(), ThreadError> {
        let current = self.current_thread();
        {
            let mut registry = self.shared.threads.lock();
            let others = registry
                .threads
                .iter()
                .filter(|thread| !current.as_ref().is_some_and(|c| Arc::ptr_eq(c, thread)))
                .count();
            if others > 0 {
                return Err(ThreadError::ThreadsStillAttached(others));
            }
            registry.shut_down = true;
        }

        if current.is_some() {
            self.detach_current_thread()?;
        }
        tracing::debug!(target: "otter::thread", "thread manager shut down");
        Ok(())
    }
}

impl Default for ThreadManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ThreadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadManager")
            .field("threads", &self.threads())
            .finish()
    }
}
