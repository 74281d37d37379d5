//! Per-thread state machine
//!
//! A [`ManagedThread`] is created when an OS thread attaches to a
//! [`ThreadManager`](crate::ThreadManager). Its state word is written only by
//! the owning OS thread; other threads may only raise or clear its suspend
//! request.

use crate::manager::ManagerShared;
use crate::scope::ThreadStateTransition;
use crate::state::{StateAndFlags, SUSPEND_REQUEST, ThreadState};
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Registry-unique id of a managed thread
pub type ThreadId = u32;

thread_local! {
    /// Managed thread attached to the current OS thread, if any
    static CURRENT_THREAD: RefCell<Option<Arc<ManagedThread>>> = const { RefCell::new(None) };
}

/// Outstanding suspend requests for one thread
#[derive(Debug, Default)]
struct SuspendCounts {
    /// All requests: whole-VM pauses plus targeted suspends
    total: u32,
    /// Requests raised through `ThreadManager::suspend_thread`
    targeted: u32,
}

/// A managed thread handle
pub struct ManagedThread {
    id: ThreadId,
    name: Option<String>,
    /// Owning OS thread
    owner: std::thread::ThreadId,
    /// State in the low byte, suspend request flag above it
    state_and_flags: CachePadded<AtomicU32>,
    /// Suspend counts; the request flag mirrors `total > 0`
    suspend: Mutex<SuspendCounts>,
    /// Signalled when `total` drops to zero
    resume_cond: Condvar,
    /// Set while this thread is the initiator of a suspend-all
    launched_suspend_all: AtomicBool,
    /// Back-reference to the registry that owns this handle
    manager: Weak<ManagerShared>,
}

impl ManagedThread {
    pub(crate) fn new(id: ThreadId, name: Option<String>, manager: Weak<ManagerShared>) -> Self {
        Self {
            id,
            name,
            owner: std::thread::current().id(),
            state_and_flags: CachePadded::new(AtomicU32::new(
                StateAndFlags::new(ThreadState::Created).0,
            )),
            suspend: Mutex::new(SuspendCounts::default()),
            resume_cond: Condvar::new(),
            launched_suspend_all: AtomicBool::new(false),
            manager,
        }
    }

    /// Managed thread attached to the calling OS thread
    pub fn current() -> Option<Arc<ManagedThread>> {
        CURRENT_THREAD.with(|current| current.borrow().clone())
    }

    pub(crate) fn set_current(thread: Option<Arc<ManagedThread>>) {
        CURRENT_THREAD.with(|current| *current.borrow_mut() = thread);
    }

    /// Thread id
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Thread name given at attach time
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> ThreadState {
        self.load().state()
    }

    /// Whether the thread may currently touch the GC heap
    #[inline]
    pub fn is_in_running_state(&self) -> bool {
        self.state() == ThreadState::Running
    }

    /// Whether at least one suspend request is outstanding
    #[inline]
    pub fn has_suspend_request(&self) -> bool {
        self.load().has_suspend_request()
    }

    /// Number of outstanding suspend requests
    pub fn suspend_count(&self) -> u32 {
        self.suspend.lock().total
    }

    /// Whether this thread is currently the initiator of a suspend-all
    pub fn has_launched_suspend_all(&self) -> bool {
        self.launched_suspend_all.load(Ordering::Acquire)
    }

    pub(crate) fn set_launched_suspend_all(&self, launched: bool) {
        self.launched_suspend_all.store(launched, Ordering::Release);
    }

    /// Whether the calling OS thread owns this handle
    pub fn is_current(&self) -> bool {
        self.owner == std::thread::current().id()
    }

    pub(crate) fn belongs_to(&self, manager: &Arc<ManagerShared>) -> bool {
        std::ptr::eq(self.manager.as_ptr(), Arc::as_ptr(manager))
    }

    #[inline]
    fn load(&self) -> StateAndFlags {
        StateAndFlags(self.state_and_flags.load(Ordering::Acquire))
    }

    /// Enter `new_state` for the lifetime of the returned guard.
    ///
    /// See [`ThreadStateTransition`] for the restore rules.
    pub fn enter_state(&self, new_state: ThreadState) -> ThreadStateTransition<'_> {
        ThreadStateTransition::new(self, new_state)
    }

    /// Enter managed code (`RUNNING`) for the lifetime of the guard
    pub fn enter_managed(&self) -> ThreadStateTransition<'_> {
        self.enter_state(ThreadState::Running)
    }

    /// Enter native code (`NATIVE`) for the lifetime of the guard
    pub fn enter_native(&self) -> ThreadStateTransition<'_> {
        self.enter_state(ThreadState::Native)
    }

    /// Block on synchronization (`WAIT`) for the lifetime of the guard
    pub fn enter_wait(&self) -> ThreadStateTransition<'_> {
        self.enter_state(ThreadState::Wait)
    }

    /// Transition the calling thread to `new_state`.
    ///
    /// Entering `RUNNING` blocks while a suspend request is pending. Leaving
    /// `RUNNING` for `NATIVE` or `WAIT` satisfies a pending request.
    ///
    /// # Panics
    ///
    /// On an edge the state machine does not allow, on `IS_SUSPENDED` or
    /// `TERMINATED` (reached only through [`check_safepoint`](Self::check_safepoint)
    /// and detach), or when called from a thread that does not own the handle.
    pub fn update_state(&self, new_state: ThreadState) {
        if !self.is_current() {
            tracing::error!(target: "otter::thread", thread = self.id, "foreign state update");
            panic!("managed thread {} updated from a foreign OS thread", self.id);
        }
        let old_state = self.state();
        if matches!(new_state, ThreadState::IsSuspended | ThreadState::Terminated)
            || !old_state.can_transition_to(new_state)
        {
            invalid_transition(self, old_state, new_state);
        }
        if old_state == new_state {
            return;
        }

        if new_state == ThreadState::Running {
            self.transfer_to_running();
        } else {
            self.store_state(new_state);
        }
    }

    /// Cooperative safepoint poll.
    ///
    /// Returns `true` if the thread parked.
    ///
    /// # Panics
    ///
    /// When the thread is not `RUNNING`, whether or not a request is pending.
    #[inline]
    pub fn check_safepoint(&self) -> bool {
        let current = self.load();
        if current.state() != ThreadState::Running {
            invalid_transition(self, current.state(), ThreadState::IsSuspended);
        }
        if !current.has_suspend_request() {
            return false;
        }
        self.park_at_safepoint()
    }

    #[cold]
    fn park_at_safepoint(&self) -> bool {
        self.store_state(ThreadState::IsSuspended);
        tracing::trace!(target: "otter::safepoint", thread = self.id, "parked at safepoint");

        self.wait_suspension();
        self.transfer_to_running();
        tracing::trace!(target: "otter::safepoint", thread = self.id, "left safepoint");
        true
    }

    /// Spin on the state word until no suspend request is pending, then
    /// swap in `RUNNING`.
    fn transfer_to_running(&self) {
        loop {
            let current = self.load();
            if current.has_suspend_request() {
                self.wait_suspension();
                continue;
            }

            let next = current.with_state(ThreadState::Running);
            if self
                .state_and_flags
                .compare_exchange_weak(current.0, next.0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Replace the state while keeping flags; wakes a waiting coordinator if a
    /// request was pending.
    fn store_state(&self, new_state: ThreadState) {
        let previous = self
            .state_and_flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                Some(StateAndFlags(word).with_state(new_state).0)
            })
            .unwrap_or_else(|word| word);

        if StateAndFlags(previous).has_suspend_request() {
            if let Some(manager) = self.manager.upgrade() {
                manager.notify_state_change();
            }
        }
    }

    /// Block until every suspend request has been withdrawn
    fn wait_suspension(&self) {
        let mut counts = self.suspend.lock();
        while counts.total > 0 {
            self.resume_cond.wait(&mut counts);
        }
    }

    /// Mark the thread terminated. Any state may terminate.
    pub(crate) fn terminate(&self) {
        if self.state() != ThreadState::Terminated {
            self.store_state(ThreadState::Terminated);
        }
    }

    /// Raise one suspend request
    pub(crate) fn request_suspend(&self) {
        let mut counts = self.suspend.lock();
        counts.total += 1;
        if counts.total == 1 {
            self.state_and_flags.fetch_or(SUSPEND_REQUEST, Ordering::AcqRel);
        }
    }

    /// Raise one targeted suspend request
    pub(crate) fn request_targeted_suspend(&self) {
        self.suspend.lock().targeted += 1;
        self.request_suspend();
    }

    /// Withdraw one suspend request, waking the thread on the last one
    pub(crate) fn resume(&self) {
        let mut counts = self.suspend.lock();
        if counts.total == 0 {
            tracing::error!(target: "otter::thread", thread = self.id, "resume without suspend request");
            panic!("managed thread {} resumed without a pending suspend request", self.id);
        }
        counts.total -= 1;
        if counts.total == 0 {
            self.state_and_flags.fetch_and(!SUSPEND_REQUEST, Ordering::AcqRel);
            self.resume_cond.notify_all();
        }
    }

    /// Withdraw one targeted suspend request; `false` if none is pending
    pub(crate) fn resume_targeted(&self) -> bool {
        {
            let mut counts = self.suspend.lock();
            if counts.targeted == 0 {
                return false;
            }
            counts.targeted -= 1;
        }
        self.resume();
        true
    }
}

impl fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("suspend_request", &self.has_suspend_request())
            .finish()
    }
}

/// Abort on a corrupted or illegal state transition
#[cold]
#[track_caller]
pub(crate) fn invalid_transition(thread: &ManagedThread, from: ThreadState, to: ThreadState) -> ! {
    tracing::error!(
        target: "otter::thread",
        thread = thread.id,
        %from,
        %to,
        "invalid thread state transition"
    );
    panic!(
        "managed thread {} cannot transition from {from} to {to}",
        thread.id
    );
}
