use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`CompletionCell`](super::CompletionCell).
///
/// Legal paths:
///
/// ```text
/// New -> Completing -> Normal
/// New -> Completing -> Exceptional
/// New -> Cancelled
/// New -> Interrupting -> Interrupted
/// ```
///
/// The discriminant order matters: everything above `Completing` has an outcome, and
/// everything from `Cancelled` on counts as cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum State {
    New = 0,
    Completing = 1,
    Normal = 2,
    Exceptional = 3,
    Cancelled = 4,
    Interrupting = 5,
    Interrupted = 6,
}

impl State {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => State::New,
            1 => State::Completing,
            2 => State::Normal,
            3 => State::Exceptional,
            4 => State::Cancelled,
            5 => State::Interrupting,
            6 => State::Interrupted,
            _ => unreachable!("invalid cell state {}", raw),
        }
    }

    /// No further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            State::Normal | State::Exceptional | State::Cancelled | State::Interrupted
        )
    }

    /// Retrievers may report this state without waiting.
    pub fn is_settled(self) -> bool {
        self > State::Completing
    }

    pub fn is_cancelled(self) -> bool {
        self >= State::Cancelled
    }
}

#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) const fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self, order: Ordering) -> State {
        State::from_u8(self.0.load(order))
    }

    /// Final-state publication; only the thread that won the preceding CAS calls this.
    pub(crate) fn store(&self, state: State, order: Ordering) {
        self.0.store(state as u8, order);
    }

    pub(crate) fn transition(&self, from: State, to: State, order: Ordering) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, order, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(!State::New.is_settled());
        assert!(!State::Completing.is_settled());
        assert!(State::Interrupting.is_settled());
        assert!(!State::Interrupting.is_terminal());
        assert!(State::Interrupted.is_terminal());
        assert!(State::Cancelled.is_cancelled());
        assert!(!State::Exceptional.is_cancelled());
    }

    #[test]
    fn test_transition_guarded_by_current() {
        let state = AtomicState::new(State::New);
        assert!(state.transition(State::New, State::Cancelled, Ordering::AcqRel));
        assert!(!state.transition(State::New, State::Completing, Ordering::AcqRel));
        assert_eq!(state.load(Ordering::Acquire), State::Cancelled);
    }
}
