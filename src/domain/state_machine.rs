//! HA State Machine - Domain Business Rules
//!
//! Pure state transition logic for per-resource HA configurations. This
//! module decides which (state, event) pairs are legal; it performs no I/O
//! and takes no locks. Applying a transition (the compare-and-swap against
//! the stored state) and dispatching its side effects belong to the manager.
//!
//! State Machine:
//! ```text
//!   Available ──HealthCheckFailed──> Suspect ──PerformActivityCheck──> Checking
//!       ^                               ^                                 │
//!       │                               │          ActivityDetected       │
//!       ├───────────────────────────────┼─────────────────────────────────┤
//!       │                               │        NoActivityDetected       │
//!       │                        HealthCheckFailed                        v
//!       │                               └───────────────────────────── Degraded
//!       │                                                                 │
//!       │        RecoveryWaitPeriodTimeout         ActivityCheckFailureRatioExceeded
//!       └────────────── Recovered <──RecoverySucceeded── Recovering <─────┘
//!                                                            │
//!                                        RecoveryOperationThresholdExceeded
//!                                                            v
//!                                     Fenced <──FenceSucceeded── Fencing
//! ```
//!
//! `Disabled` and `Ineligible` are reachable from (almost) anywhere and are
//! stable until an external event re-enables the resource. `Fenced` is
//! stable but not terminal: a healthy probe after the host was powered back
//! on returns it to `Available`.

use serde::{Deserialize, Serialize};

use crate::domain::types::HostStatus;

/// Per-resource HA state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaState {
    Disabled,
    Ineligible,
    Available,
    Suspect,
    Checking,
    Degraded,
    Recovering,
    Recovered,
    Fencing,
    Fenced,
}

/// Named transition events.
///
/// Health, activity, recovery and fence results arrive as events raised by
/// the bounded task pools; the rest are raised by the poll loop or by the
/// external API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaEvent {
    Enabled,
    Disabled,
    Eligible,
    Ineligible,
    HealthCheckPassed,
    HealthCheckFailed,
    PerformActivityCheck,
    ActivityDetected,
    NoActivityDetected,
    PeriodicRecheckResourceActivity,
    ActivityCheckFailureRatioExceeded,
    RetryRecovery,
    RecoverySucceeded,
    RecoveryOperationThresholdExceeded,
    RecoveryWaitPeriodTimeout,
    RetryFencing,
    FenceSucceeded,
    FenceOperationThresholdExceeded,
}

/// Error for an (state, event) pair with no table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: HaState,
    pub event: HaEvent,
}

/// Result type for transition lookups
pub type TransitionResult = Result<HaState, InvalidTransition>;

/// Pure transition table over (HaState, HaEvent).
///
/// Stateless; all methods are pure functions. The caller is responsible for
/// applying the returned state with compare-and-swap semantics against the
/// stored from-state.
pub struct HaStateMachine;

impl HaStateMachine {
    /// Look up the next state for an event.
    ///
    /// `Disabled` can be entered from any state. `Ineligible` can be entered
    /// from any state except `Disabled`: the enabled flag is checked before
    /// eligibility, so a disabled resource never reports eligibility; this
    /// keeps "state is Disabled iff the enabled flag is false" intact.
    pub fn next_state(from: HaState, event: HaEvent) -> TransitionResult {
        use HaEvent as E;
        use HaState as S;

        match (from, event) {
            (_, E::Disabled) => Ok(S::Disabled),
            (S::Disabled, E::Enabled) => Ok(S::Available),
            (S::Disabled, _) => Err(InvalidTransition { from, event }),
            (_, E::Ineligible) => Ok(S::Ineligible),
            (S::Ineligible, E::Eligible) => Ok(S::Available),
            (S::Ineligible, _) => Err(InvalidTransition { from, event }),

            (S::Available | S::Suspect | S::Degraded | S::Fenced, E::HealthCheckFailed) => {
                Ok(S::Suspect)
            }
            (S::Suspect | S::Degraded | S::Fenced, E::HealthCheckPassed) => Ok(S::Available),
            (S::Available, E::HealthCheckPassed) => Ok(S::Available),

            (S::Suspect, E::PerformActivityCheck) => Ok(S::Checking),
            (S::Checking, E::ActivityDetected) => Ok(S::Available),
            (S::Checking, E::NoActivityDetected) => Ok(S::Degraded),
            (S::Degraded, E::PeriodicRecheckResourceActivity) => Ok(S::Checking),
            (S::Degraded, E::ActivityCheckFailureRatioExceeded) => Ok(S::Recovering),

            (S::Recovering, E::RecoverySucceeded) => Ok(S::Recovered),
            (S::Recovering, E::RetryRecovery) => Ok(S::Recovering),
            (S::Recovering, E::RecoveryOperationThresholdExceeded) => Ok(S::Fencing),
            (S::Recovered, E::RecoveryWaitPeriodTimeout) => Ok(S::Available),

            (S::Fencing, E::FenceSucceeded) => Ok(S::Fenced),
            (S::Fencing, E::RetryFencing) => Ok(S::Fencing),
            (S::Fencing, E::FenceOperationThresholdExceeded) => Ok(S::Fencing),

            _ => Err(InvalidTransition { from, event }),
        }
    }

    /// Whether the state is stable: nothing further happens without an
    /// external event or a failed health probe.
    pub fn is_stable(state: HaState) -> bool {
        matches!(
            state,
            HaState::Available | HaState::Disabled | HaState::Ineligible | HaState::Fenced
        )
    }

    /// States in which the periodic poll dispatches a health-check task.
    pub fn polls_health(state: HaState) -> bool {
        matches!(
            state,
            HaState::Available | HaState::Suspect | HaState::Degraded | HaState::Fenced
        )
    }

    /// States that represent an escalation in flight (destructive actions
    /// may be pending).
    pub fn is_escalated(state: HaState) -> bool {
        matches!(
            state,
            HaState::Recovering | HaState::Recovered | HaState::Fencing | HaState::Fenced
        )
    }
}

impl HaState {
    /// Host status for external health reporting, derived purely from the
    /// HA state.
    pub fn host_status(&self) -> HostStatus {
        match self {
            HaState::Fenced => HostStatus::Down,
            HaState::Degraded | HaState::Recovering | HaState::Fencing => {
                HostStatus::Disconnected
            }
            _ => HostStatus::Up,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_path_is_reachable() {
        // The full path from healthy to fenced.
        let mut state = HaState::Available;
        for event in [
            HaEvent::HealthCheckFailed,
            HaEvent::PerformActivityCheck,
            HaEvent::NoActivityDetected,
            HaEvent::ActivityCheckFailureRatioExceeded,
            HaEvent::RecoveryOperationThresholdExceeded,
            HaEvent::FenceSucceeded,
        ] {
            state = HaStateMachine::next_state(state, event).unwrap();
        }
        assert_eq!(state, HaState::Fenced);
    }

    #[test]
    fn activity_detected_returns_to_available() {
        let state = HaStateMachine::next_state(HaState::Checking, HaEvent::ActivityDetected);
        assert_eq!(state, Ok(HaState::Available));
    }

    #[test]
    fn recovery_path_returns_to_available() {
        let state =
            HaStateMachine::next_state(HaState::Recovering, HaEvent::RecoverySucceeded).unwrap();
        assert_eq!(state, HaState::Recovered);
        let state =
            HaStateMachine::next_state(state, HaEvent::RecoveryWaitPeriodTimeout).unwrap();
        assert_eq!(state, HaState::Available);
    }

    #[test]
    fn disabled_from_every_state() {
        for from in [
            HaState::Disabled,
            HaState::Ineligible,
            HaState::Available,
            HaState::Suspect,
            HaState::Checking,
            HaState::Degraded,
            HaState::Recovering,
            HaState::Recovered,
            HaState::Fencing,
            HaState::Fenced,
        ] {
            assert_eq!(
                HaStateMachine::next_state(from, HaEvent::Disabled),
                Ok(HaState::Disabled)
            );
        }
    }

    #[test]
    fn disabled_resource_cannot_become_ineligible() {
        assert!(HaStateMachine::next_state(HaState::Disabled, HaEvent::Ineligible).is_err());
    }

    #[test]
    fn fenced_host_that_comes_back_healthy_is_available_again() {
        assert_eq!(
            HaStateMachine::next_state(HaState::Fenced, HaEvent::HealthCheckPassed),
            Ok(HaState::Available)
        );
    }

    #[test]
    fn retry_events_self_loop() {
        assert_eq!(
            HaStateMachine::next_state(HaState::Recovering, HaEvent::RetryRecovery),
            Ok(HaState::Recovering)
        );
        assert_eq!(
            HaStateMachine::next_state(HaState::Fencing, HaEvent::RetryFencing),
            Ok(HaState::Fencing)
        );
        assert_eq!(
            HaStateMachine::next_state(HaState::Fencing, HaEvent::FenceOperationThresholdExceeded),
            Ok(HaState::Fencing)
        );
    }

    #[test]
    fn no_shortcut_from_available_to_fencing() {
        assert!(HaStateMachine::next_state(HaState::Available, HaEvent::RetryFencing).is_err());
        assert!(
            HaStateMachine::next_state(HaState::Available, HaEvent::RecoverySucceeded).is_err()
        );
        assert!(HaStateMachine::next_state(HaState::Suspect, HaEvent::FenceSucceeded).is_err());
    }

    #[test]
    fn host_status_mapping() {
        assert_eq!(HaState::Fenced.host_status(), HostStatus::Down);
        assert_eq!(HaState::Degraded.host_status(), HostStatus::Disconnected);
        assert_eq!(HaState::Recovering.host_status(), HostStatus::Disconnected);
        assert_eq!(HaState::Fencing.host_status(), HostStatus::Disconnected);
        assert_eq!(HaState::Available.host_status(), HostStatus::Up);
        assert_eq!(HaState::Suspect.host_status(), HostStatus::Up);
    }

    #[test]
    fn poll_health_states() {
        assert!(HaStateMachine::polls_health(HaState::Available));
        assert!(HaStateMachine::polls_health(HaState::Suspect));
        assert!(HaStateMachine::polls_health(HaState::Degraded));
        assert!(HaStateMachine::polls_health(HaState::Fenced));
        assert!(!HaStateMachine::polls_health(HaState::Checking));
        assert!(!HaStateMachine::polls_health(HaState::Recovering));
        assert!(!HaStateMachine::polls_health(HaState::Disabled));
    }
}
