//! Property-Based Tests for the HA transition table
//!
//! These verify invariants that must hold for every (state, event) pair,
//! not just the handful exercised by the scenario tests.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::domain::state_machine::{HaEvent, HaState, HaStateMachine};

    fn arb_state() -> impl Strategy<Value = HaState> {
        prop_oneof![
            Just(HaState::Disabled),
            Just(HaState::Ineligible),
            Just(HaState::Available),
            Just(HaState::Suspect),
            Just(HaState::Checking),
            Just(HaState::Degraded),
            Just(HaState::Recovering),
            Just(HaState::Recovered),
            Just(HaState::Fencing),
            Just(HaState::Fenced),
        ]
    }

    fn arb_event() -> impl Strategy<Value = HaEvent> {
        prop_oneof![
            Just(HaEvent::Enabled),
            Just(HaEvent::Disabled),
            Just(HaEvent::Eligible),
            Just(HaEvent::Ineligible),
            Just(HaEvent::HealthCheckPassed),
            Just(HaEvent::HealthCheckFailed),
            Just(HaEvent::PerformActivityCheck),
            Just(HaEvent::ActivityDetected),
            Just(HaEvent::NoActivityDetected),
            Just(HaEvent::PeriodicRecheckResourceActivity),
            Just(HaEvent::ActivityCheckFailureRatioExceeded),
            Just(HaEvent::RetryRecovery),
            Just(HaEvent::RecoverySucceeded),
            Just(HaEvent::RecoveryOperationThresholdExceeded),
            Just(HaEvent::RecoveryWaitPeriodTimeout),
            Just(HaEvent::RetryFencing),
            Just(HaEvent::FenceSucceeded),
            Just(HaEvent::FenceOperationThresholdExceeded),
        ]
    }

    proptest! {
        /// The table is a function: the same inputs always produce the same
        /// output, so two controllers evaluating the same transition cannot
        /// disagree about the target state.
        #[test]
        fn transitions_are_deterministic(state in arb_state(), event in arb_event()) {
            let a = HaStateMachine::next_state(state, event);
            let b = HaStateMachine::next_state(state, event);
            prop_assert_eq!(a, b);
        }

        /// Disabled is reachable from every state: an operator can always
        /// pull a resource out of the HA loop, even mid-fencing.
        #[test]
        fn disabled_is_always_reachable(state in arb_state()) {
            prop_assert_eq!(
                HaStateMachine::next_state(state, HaEvent::Disabled),
                Ok(HaState::Disabled)
            );
        }

        /// A disabled resource only ever moves by being re-enabled (or by a
        /// redundant disable). Nothing else may resurrect it.
        #[test]
        fn disabled_moves_only_on_enable(event in arb_event()) {
            match HaStateMachine::next_state(HaState::Disabled, event) {
                Ok(next) => prop_assert!(
                    (event == HaEvent::Enabled && next == HaState::Available)
                        || (event == HaEvent::Disabled && next == HaState::Disabled)
                ),
                Err(_) => {}
            }
        }

        /// Fencing is only entered from Recovering (threshold exhaustion) or
        /// by its own retry/threshold self-loops. No state short-circuits
        /// into a destructive action.
        #[test]
        fn fencing_has_no_shortcut(state in arb_state(), event in arb_event()) {
            if let Ok(HaState::Fencing) = HaStateMachine::next_state(state, event) {
                let legal = (state == HaState::Recovering
                    && event == HaEvent::RecoveryOperationThresholdExceeded)
                    || (state == HaState::Fencing
                        && matches!(
                            event,
                            HaEvent::RetryFencing | HaEvent::FenceOperationThresholdExceeded
                        ));
                prop_assert!(legal, "illegal path into Fencing: {:?} + {:?}", state, event);
            }
        }

        /// Fenced is only entered by a successful fence, and only from
        /// Fencing.
        #[test]
        fn fenced_requires_a_successful_fence(state in arb_state(), event in arb_event()) {
            if let Ok(HaState::Fenced) = HaStateMachine::next_state(state, event) {
                prop_assert_eq!(state, HaState::Fencing);
                prop_assert_eq!(event, HaEvent::FenceSucceeded);
            }
        }

        /// Every state maps to a host status; escalated-but-unfenced states
        /// never read as hard Down.
        #[test]
        fn host_status_is_total_and_down_means_fenced(state in arb_state()) {
            let status = state.host_status();
            if status == crate::domain::types::HostStatus::Down {
                prop_assert_eq!(state, HaState::Fenced);
            }
        }
    }
}
