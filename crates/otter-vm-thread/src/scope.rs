//! Scoped thread state transitions

use crate::state::ThreadState;
use crate::thread::{ManagedThread, invalid_transition};

/// RAII guard for a temporary thread state.
///
/// Remembers the state current at construction and restores exactly that
/// state on drop, so nested guards unwind like a stack. A guard whose target
/// equals the current state performs no transition and restores nothing.
///
/// Both edges (`previous -> new` and back) must be legal; a guard that could
/// never restore its previous state panics at construction.
#[must_use = "dropping the guard immediately restores the previous state"]
pub struct ThreadStateTransition<'a> {
    thread: &'a ManagedThread,
    previous: ThreadState,
    changed: bool,
}

impl<'a> ThreadStateTransition<'a> {
    /// Transition `thread` to `new_state` until the guard is dropped
    pub fn new(thread: &'a ManagedThread, new_state: ThreadState) -> Self {
        let previous = thread.state();
        let changed = previous != new_state;
        if changed {
            if !new_state.can_transition_to(previous) {
                invalid_transition(thread, new_state, previous);
            }
            thread.update_state(new_state);
        }
        Self {
            thread,
            previous,
            changed,
        }
    }

    /// State that will be restored on drop
    pub fn previous_state(&self) -> ThreadState {
        self.previous
    }

    /// Whether construction actually changed the state
    pub fn changed(&self) -> bool {
        self.changed
    }
}

impl Drop for ThreadStateTransition<'_> {
    fn drop(&mut self) {
        if !self.changed {
            return;
        }
        // A thread detached inside the scope has nothing left to restore
        let current = self.thread.state();
        if current != self.previous && current != ThreadState::Terminated {
            self.thread.update_state(self.previous);
        }
    }
}
