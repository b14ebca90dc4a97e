#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RequestState {
    #[default]
    Initialized,
    Resumed,
    Suspended,
    Cancelled,
    Finished,
}

impl RequestState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initialized, Self::Resumed)
                | (Self::Initialized, Self::Cancelled)
                | (Self::Resumed, Self::Suspended)
                | (Self::Resumed, Self::Cancelled)
                | (Self::Resumed, Self::Finished)
                | (Self::Suspended, Self::Resumed)
                | (Self::Suspended, Self::Cancelled)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Resumed => "resumed",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::Finished => "finished",
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::RequestState;

    const ALL: [RequestState; 5] = [
        RequestState::Initialized,
        RequestState::Resumed,
        RequestState::Suspended,
        RequestState::Cancelled,
        RequestState::Finished,
    ];

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [RequestState::Cancelled, RequestState::Finished] {
            assert!(terminal.is_terminal());
            for next in ALL {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} must not move to {next}"
                );
            }
        }
    }

    #[test]
    fn resumed_and_suspended_cycle() {
        assert!(RequestState::Resumed.can_transition_to(RequestState::Suspended));
        assert!(RequestState::Suspended.can_transition_to(RequestState::Resumed));
        assert!(!RequestState::Suspended.can_transition_to(RequestState::Finished));
        assert!(!RequestState::Initialized.can_transition_to(RequestState::Suspended));
        assert!(!RequestState::Initialized.can_transition_to(RequestState::Finished));
    }

    #[test]
    fn no_state_transitions_back_to_initialized() {
        for state in ALL {
            assert!(!state.can_transition_to(RequestState::Initialized));
            assert!(!state.can_transition_to(state));
        }
    }
}
