//! Thread execution states

use std::fmt;

/// Execution state of a managed thread
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// Attached but has not entered managed code yet
    Created = 0,
    /// Executing managed code, may touch the GC heap
    Running = 1,
    /// Executing foreign or blocking code, must not touch the GC heap
    Native = 2,
    /// Blocked on a synchronization primitive
    Wait = 3,
    /// Parked at a safepoint in response to a suspend request
    IsSuspended = 4,
    /// Detached, terminal
    Terminated = 5,
}

impl From<u8> for ThreadState {
    fn from(v: u8) -> Self {
        match v {
            0 => ThreadState::Created,
            1 => ThreadState::Running,
            2 => ThreadState::Native,
            3 => ThreadState::Wait,
            4 => ThreadState::IsSuspended,
            5 => ThreadState::Terminated,
            _ => panic!("corrupted thread state word: {v:#x}"),
        }
    }
}

impl ThreadState {
    /// Whether a thread in this state may be treated as stopped by a pause.
    ///
    /// Everything except `Running` qualifies: a suspended, native or waiting
    /// thread cannot return to `Running` while its suspend request is set.
    #[inline]
    pub fn is_safe(self) -> bool {
        self != ThreadState::Running
    }

    /// Whether `self -> next` is a legal edge of the state machine.
    ///
    /// `Native -> Native` and `Wait -> Wait` are accepted so nested scopes of
    /// the same kind stay legal; `Running -> Running` is not.
    pub fn can_transition_to(self, next: ThreadState) -> bool {
        use ThreadState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Created, Running) => true,
            (Running, Native | Wait | IsSuspended) => true,
            (Native | Wait | IsSuspended, Running) => true,
            (Native, Native) | (Wait, Wait) => true,
            _ => false,
        }
    }

    /// Upper-case name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            ThreadState::Created => "CREATED",
            ThreadState::Running => "RUNNING",
            ThreadState::Native => "NATIVE",
            ThreadState::Wait => "WAIT",
            ThreadState::IsSuspended => "IS_SUSPENDED",
            ThreadState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Low byte of the state word
pub(crate) const STATE_MASK: u32 = 0xFF;
/// Set while the thread has at least one outstanding suspend request
pub(crate) const SUSPEND_REQUEST: u32 = 1 << 8;

/// A decoded state word: state in the low byte, flags above it.
///
/// State and flags share one atomic so a transition to `Running` fails its
/// compare-exchange whenever a suspend request lands concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StateAndFlags(pub(crate) u32);

impl StateAndFlags {
    pub(crate) const fn new(state: ThreadState) -> Self {
        Self(state as u32)
    }

    #[inline]
    pub(crate) fn state(self) -> ThreadState {
        ThreadState::from((self.0 & STATE_MASK) as u8)
    }

    #[inline]
    pub(crate) fn has_suspend_request(self) -> bool {
        self.0 & SUSPEND_REQUEST != 0
    }

    #[inline]
    pub(crate) fn with_state(self, state: ThreadState) -> Self {
        Self((self.0 & !STATE_MASK) | state as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ThreadState::*;

    const ALL: [ThreadState; 6] = [Created, Running, Native, Wait, IsSuspended, Terminated];

    #[test]
    fn test_state_from_u8() {
        for state in ALL {
            assert_eq!(ThreadState::from(state as u8), state);
        }
    }

    #[test]
    #[should_panic(expected = "corrupted thread state")]
    fn test_state_from_invalid_u8() {
        let _ = ThreadState::from(42);
    }

    #[test]
    fn test_transition_table() {
        assert!(Created.can_transition_to(Running));
        assert!(!Created.can_transition_to(Native));
        assert!(Running.can_transition_to(Native));
        assert!(Native.can_transition_to(Running));
        assert!(Running.can_transition_to(Wait));
        assert!(Wait.can_transition_to(Running));
        assert!(Running.can_transition_to(IsSuspended));
        assert!(IsSuspended.can_transition_to(Running));
        assert!(Native.can_transition_to(Native));

        assert!(!Running.can_transition_to(Running));
        assert!(!Native.can_transition_to(Wait));
        assert!(!Wait.can_transition_to(IsSuspended));
    }

    #[test]
    fn test_terminated_is_terminal() {
        for state in ALL {
            assert!(state.can_transition_to(Terminated) || state == Terminated);
            assert!(!Terminated.can_transition_to(state));
        }
    }

    #[test]
    fn test_only_running_is_unsafe() {
        let unsafe_states: Vec<_> = ALL.into_iter().filter(|s| !s.is_safe()).collect();
        assert_eq!(unsafe_states, vec![Running]);
    }

    #[test]
    fn test_state_word_keeps_flags() {
        let word = StateAndFlags(StateAndFlags::new(Running).0 | SUSPEND_REQUEST);
        assert_eq!(word.state(), Running);
        assert!(word.has_suspend_request());

        let parked = word.with_state(IsSuspended);
        assert_eq!(parked.state(), IsSuspended);
        assert!(parked.has_suspend_request());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(IsSuspended.to_string(), "IS_SUSPENDED");
        assert_eq!(Native.to_string(), "NATIVE");
    }
}
