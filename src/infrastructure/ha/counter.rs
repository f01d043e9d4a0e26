//! Per-resource HA bookkeeping
//!
//! Ephemeral, in-memory only: a controller restart resets attempt counters,
//! which is safe (recovery and fencing are idempotent) but may slow the
//! path to fencing right after a crash. Counters are created lazily on
//! first access and purged when the resource is disabled or removed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::types::ResourceType;
use crate::infrastructure::task_pool::TaskTicket;

#[derive(Debug, Default)]
struct CounterInner {
    suspect_since: Option<DateTime<Utc>>,
    activity_checks: u32,
    activity_check_failures: u32,
    last_activity_check: Option<DateTime<Utc>>,
    degraded_recheck_marker: Option<DateTime<Utc>>,
    recovery_attempts: u32,
    fence_attempts: u32,
    recovery_exit_marker: Option<DateTime<Utc>>,
    threshold_alerted: bool,
    recovery_ticket: Option<TaskTicket>,
    fence_ticket: Option<TaskTicket>,
}

/// Mutable bookkeeping for one (resource, type).
///
/// All methods take `&self`; the interior mutex is held only for the field
/// update, never across I/O.
#[derive(Debug, Default)]
pub struct HaResourceCounter {
    inner: Mutex<CounterInner>,
}

impl HaResourceCounter {
    /// Record the first moment the resource became suspect. Later calls
    /// keep the original timestamp until the counter is reset.
    pub fn mark_suspect(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        if inner.suspect_since.is_none() {
            inner.suspect_since = Some(now);
        }
    }

    pub fn suspect_since(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().suspect_since
    }

    /// Whether enough time has passed since the last activity check to
    /// dispatch another one.
    pub fn can_perform_activity_check(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        let inner = self.inner.lock();
        match inner.last_activity_check {
            Some(last) => age_at_least(last, now, interval),
            None => true,
        }
    }

    /// Record one activity-check sample.
    pub fn record_activity_check(&self, now: DateTime<Utc>, activity_detected: bool) {
        let mut inner = self.inner.lock();
        inner.activity_checks += 1;
        if !activity_detected {
            inner.activity_check_failures += 1;
        }
        inner.last_activity_check = Some(now);
    }

    pub fn activity_samples(&self) -> (u32, u32) {
        let inner = self.inner.lock();
        (inner.activity_checks, inner.activity_check_failures)
    }

    /// The escalation decision: enough samples, and enough of them failed.
    pub fn failure_ratio_exceeded(&self, max_checks: u32, ratio: f64) -> bool {
        let (samples, failures) = self.activity_samples();
        ratio_exceeded(samples, failures, max_checks, ratio)
    }

    /// Degraded-state recheck gate. The first call arms the marker and
    /// returns false; later calls return true once `wait` has elapsed,
    /// re-arming the marker for the next cycle.
    pub fn should_recheck_activity(&self, now: DateTime<Utc>, wait: Duration) -> bool {
        let mut inner = self.inner.lock();
        match inner.degraded_recheck_marker {
            Some(marker) if age_at_least(marker, now, wait) => {
                inner.degraded_recheck_marker = Some(now);
                true
            }
            Some(_) => false,
            None => {
                inner.degraded_recheck_marker = Some(now);
                false
            }
        }
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.inner.lock().recovery_attempts
    }

    pub fn incr_recovery_attempts(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.recovery_attempts += 1;
        inner.recovery_attempts
    }

    pub fn fence_attempts(&self) -> u32 {
        self.inner.lock().fence_attempts
    }

    pub fn incr_fence_attempts(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.fence_attempts += 1;
        inner.fence_attempts
    }

    /// Arm the recovered-wait clock on first observation of `Recovered`.
    pub fn mark_recovery_started(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        if inner.recovery_exit_marker.is_none() {
            inner.recovery_exit_marker = Some(now);
        }
    }

    pub fn can_exit_recovery(&self, now: DateTime<Utc>, wait: Duration) -> bool {
        let inner = self.inner.lock();
        match inner.recovery_exit_marker {
            Some(marker) => age_at_least(marker, now, wait),
            None => false,
        }
    }

    /// Clear the wait clock and the attempt count once the resource has
    /// ridden out the recovery wait period.
    pub fn mark_recovery_completed(&self) {
        let mut inner = self.inner.lock();
        inner.recovery_exit_marker = None;
        inner.recovery_attempts = 0;
    }

    /// One-shot gate for the threshold-exhaustion alert: true on the first
    /// call only, until the counter is reset.
    pub fn mark_threshold_alerted(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.threshold_alerted {
            false
        } else {
            inner.threshold_alerted = true;
            true
        }
    }

    /// Claim the recovery-task slot. Fails while a previous recovery task
    /// for this resource is still outstanding.
    pub fn try_claim_recovery(&self, ticket: TaskTicket) -> bool {
        let mut inner = self.inner.lock();
        match &inner.recovery_ticket {
            Some(existing) if !existing.is_finished() => false,
            _ => {
                inner.recovery_ticket = Some(ticket);
                true
            }
        }
    }

    /// Claim the fence-task slot, same discipline as recovery.
    pub fn try_claim_fence(&self, ticket: TaskTicket) -> bool {
        let mut inner = self.inner.lock();
        match &inner.fence_ticket {
            Some(existing) if !existing.is_finished() => false,
            _ => {
                inner.fence_ticket = Some(ticket);
                true
            }
        }
    }

    pub fn can_attempt_fencing(&self) -> bool {
        let inner = self.inner.lock();
        match &inner.fence_ticket {
            Some(existing) => existing.is_finished(),
            None => true,
        }
    }

    /// Full reset, used when the resource returns to `Available`.
    pub fn reset(&self) {
        *self.inner.lock() = CounterInner::default();
    }
}

/// Pure form of the escalation decision, shared with the property tests.
pub fn ratio_exceeded(samples: u32, failures: u32, max_checks: u32, ratio: f64) -> bool {
    if samples < max_checks || samples == 0 {
        return false;
    }
    failures as f64 / samples as f64 >= ratio
}

fn age_at_least(since: DateTime<Utc>, now: DateTime<Utc>, min_age: Duration) -> bool {
    match (now - since).to_std() {
        Ok(age) => age >= min_age,
        Err(_) => false,
    }
}

/// Registry of counters keyed by (resource id, resource type).
///
/// Owned by the manager; explicit lazy-create and purge lifecycle tied to
/// resource enable/disable.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: DashMap<(Uuid, ResourceType), Arc<HaResourceCounter>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        resource_id: Uuid,
        resource_type: ResourceType,
    ) -> Arc<HaResourceCounter> {
        self.counters
            .entry((resource_id, resource_type))
            .or_default()
            .clone()
    }

    pub fn purge(&self, resource_id: Uuid, resource_type: ResourceType) {
        self.counters.remove(&(resource_id, resource_type));
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn suspect_timestamp_keeps_first_observation() {
        let counter = HaResourceCounter::default();
        let t0 = Utc::now();
        counter.mark_suspect(t0);
        counter.mark_suspect(t0 + chrono::Duration::seconds(30));
        assert_eq!(counter.suspect_since(), Some(t0));

        counter.reset();
        assert_eq!(counter.suspect_since(), None);
    }

    #[test]
    fn activity_check_gating_by_interval() {
        let counter = HaResourceCounter::default();
        let interval = Duration::from_secs(60);
        let t0 = Utc::now();

        assert!(counter.can_perform_activity_check(t0, interval));
        counter.record_activity_check(t0, false);
        assert!(!counter.can_perform_activity_check(t0 + chrono::Duration::seconds(30), interval));
        assert!(counter.can_perform_activity_check(t0 + chrono::Duration::seconds(61), interval));
    }

    #[test]
    fn ratio_needs_enough_samples() {
        assert!(!ratio_exceeded(2, 2, 3, 0.7));
        assert!(ratio_exceeded(3, 3, 3, 0.7));
        assert!(ratio_exceeded(3, 3, 3, 1.0));
        assert!(!ratio_exceeded(3, 2, 3, 0.7));
        assert!(ratio_exceeded(4, 3, 3, 0.7));
        assert!(!ratio_exceeded(0, 0, 0, 0.7));
    }

    #[test]
    fn degraded_recheck_arms_then_fires() {
        let counter = HaResourceCounter::default();
        let wait = Duration::from_secs(300);
        let t0 = Utc::now();

        // First observation arms the marker.
        assert!(!counter.should_recheck_activity(t0, wait));
        assert!(!counter.should_recheck_activity(t0 + chrono::Duration::seconds(100), wait));
        assert!(counter.should_recheck_activity(t0 + chrono::Duration::seconds(301), wait));
        // Marker re-armed at the fire time.
        assert!(!counter.should_recheck_activity(t0 + chrono::Duration::seconds(400), wait));
    }

    #[test]
    fn recovery_wait_period() {
        let counter = HaResourceCounter::default();
        let wait = Duration::from_secs(600);
        let t0 = Utc::now();

        assert!(!counter.can_exit_recovery(t0, wait));
        counter.mark_recovery_started(t0);
        counter.incr_recovery_attempts();
        assert!(!counter.can_exit_recovery(t0 + chrono::Duration::seconds(300), wait));
        assert!(counter.can_exit_recovery(t0 + chrono::Duration::seconds(601), wait));

        counter.mark_recovery_completed();
        assert_eq!(counter.recovery_attempts(), 0);
        assert!(!counter.can_exit_recovery(t0 + chrono::Duration::seconds(700), wait));
    }

    #[test]
    fn task_slots_are_exclusive_until_finished() {
        let counter = HaResourceCounter::default();
        let first = TaskTicket::new();
        assert!(counter.try_claim_recovery(first.clone()));
        assert!(!counter.try_claim_recovery(TaskTicket::new()));

        first.finish();
        assert!(counter.try_claim_recovery(TaskTicket::new()));

        let fence = TaskTicket::new();
        assert!(counter.can_attempt_fencing());
        assert!(counter.try_claim_fence(fence.clone()));
        assert!(!counter.can_attempt_fencing());
        fence.finish();
        assert!(counter.can_attempt_fencing());
    }

    #[test]
    fn threshold_alert_fires_once() {
        let counter = HaResourceCounter::default();
        assert!(counter.mark_threshold_alerted());
        assert!(!counter.mark_threshold_alerted());
        counter.reset();
        assert!(counter.mark_threshold_alerted());
    }

    #[test]
    fn registry_lazy_create_and_purge() {
        let registry = CounterRegistry::new();
        let id = Uuid::new_v4();

        let a = registry.get_or_create(id, ResourceType::Host);
        a.incr_recovery_attempts();
        let b = registry.get_or_create(id, ResourceType::Host);
        assert_eq!(b.recovery_attempts(), 1, "same counter instance");

        registry.purge(id, ResourceType::Host);
        let c = registry.get_or_create(id, ResourceType::Host);
        assert_eq!(c.recovery_attempts(), 0, "purge discards state");
    }

    proptest! {
        /// More failures never flips the decision from exceeded to not
        /// exceeded; more max_checks never flips it the other way.
        #[test]
        fn ratio_policy_is_monotone(
            samples in 0u32..50,
            failures in 0u32..50,
            max_checks in 1u32..20,
            ratio in 0.0f64..=1.0,
        ) {
            let failures = failures.min(samples);
            if ratio_exceeded(samples, failures, max_checks, ratio) {
                prop_assert!(ratio_exceeded(samples, samples, max_checks, ratio));
            }
            if !ratio_exceeded(samples, failures, max_checks, ratio) && failures > 0 {
                prop_assert!(!ratio_exceeded(samples, failures - 1, max_checks, ratio));
            }
        }

        /// Below the sample floor the policy never fires, regardless of how
        /// bad the failures look.
        #[test]
        fn ratio_policy_needs_sample_floor(
            samples in 0u32..20,
            max_checks in 1u32..20,
            ratio in 0.0f64..=1.0,
        ) {
            if samples < max_checks {
                prop_assert!(!ratio_exceeded(samples, samples, max_checks, ratio));
            }
        }
    }
}
