use crate::types::ClientState;
use crate::{ConductorError, Result};

/// Idle/Running bookkeeping. Lives inside the coordinator's lock together
/// with the active request slot, so the two never disagree.
#[derive(Debug, Default)]
pub(crate) struct StateMachine {
    state: ClientState,
}

impl StateMachine {
    pub(crate) fn current(&self) -> ClientState {
        self.state
    }

    pub(crate) fn begin(&mut self) -> Result<()> {
        match self.state {
            ClientState::Idle => {
                self.state = ClientState::Running;
                Ok(())
            }
            ClientState::Running => Err(ConductorError::Busy),
        }
    }

    /// Returns whether a transition happened.
    pub(crate) fn finish(&mut self) -> bool {
        match self.state {
            ClientState::Running => {
                self.state = ClientState::Idle;
                true
            }
            ClientState::Idle => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_rejects_double_begin() {
        let mut machine = StateMachine::default();
        assert_eq!(machine.current(), ClientState::Idle);

        machine.begin().expect("idle -> running");
        assert_eq!(machine.current(), ClientState::Running);
        assert!(matches!(machine.begin(), Err(ConductorError::Busy)));
        assert_eq!(machine.current(), ClientState::Running);
    }

    #[test]
    fn finish_transitions_once() {
        let mut machine = StateMachine::default();
        assert!(!machine.finish());

        machine.begin().expect("idle -> running");
        assert!(machine.finish());
        assert!(!machine.finish());
        assert_eq!(machine.current(), ClientState::Idle);
    }
}
