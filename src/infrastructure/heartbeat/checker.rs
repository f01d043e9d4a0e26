//! Liveness and activity checkers
//!
//! Both read heartbeats back from a snapshot of the target host's pools and
//! never mutate them. The asymmetry in their verdicts is the point of the
//! design: with no storage evidence at all, the answer is `Undetermined`,
//! never `Dead`. Fencing without evidence is not permitted.

use std::time::Duration;

use chrono::{DateTime, Utc};

use std::sync::Arc;

use crate::domain::types::LivenessVerdict;
use crate::infrastructure::heartbeat::pool::{HeartbeatPool, PoolKind, PoolSnapshot};

/// Per-kind outcome while scanning a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KindReading {
    Fresh,
    Stale,
    /// Every pool of the kind errored; no evidence either way.
    Unreadable,
}

/// Answers "is this host alive" from heartbeat freshness across pool kinds.
#[derive(Debug, Default, Clone)]
pub struct LivenessChecker;

impl LivenessChecker {
    pub fn new() -> Self {
        Self
    }

    /// Render a liveness verdict for `host` over `pools`.
    ///
    /// `require_all` selects the policy: when set, every pool kind with
    /// registered pools must report a fresh heartbeat (the fencing-decision
    /// mode: a single definitely-stale kind certifies death, but unreadable
    /// kinds leave the verdict undetermined, favoring "assume alive"). When
    /// unset, one fresh kind is enough (the fast health-poll mode).
    ///
    /// A heartbeat is fresh when it is no older than `staleness` now. Kinds
    /// with no pools are skipped; a snapshot with zero pools overall yields
    /// `Undetermined`.
    pub async fn check(
        &self,
        host: &str,
        pools: &PoolSnapshot,
        require_all: bool,
        staleness: Duration,
    ) -> LivenessVerdict {
        let now = Utc::now();
        let mut readings = Vec::new();

        for kind in PoolKind::ALL {
            let Some(kind_pools) = pools.get(&kind) else {
                continue;
            };
            if kind_pools.is_empty() {
                continue;
            }
            let reading = self.read_kind(host, kind, kind_pools, staleness, now).await;
            tracing::debug!(host = %host, kind = %kind, reading = ?reading, "liveness reading");
            readings.push(reading);
        }

        if readings.is_empty() {
            tracing::warn!(
                host = %host,
                "no heartbeat pools registered, refusing to certify liveness"
            );
            return LivenessVerdict::Undetermined;
        }

        let any_fresh = readings.iter().any(|r| *r == KindReading::Fresh);
        let any_stale = readings.iter().any(|r| *r == KindReading::Stale);
        let any_unreadable = readings.iter().any(|r| *r == KindReading::Unreadable);

        let verdict = if require_all {
            if any_stale {
                LivenessVerdict::Dead
            } else if any_unreadable {
                LivenessVerdict::Undetermined
            } else {
                LivenessVerdict::Alive
            }
        } else if any_fresh {
            LivenessVerdict::Alive
        } else if any_unreadable {
            LivenessVerdict::Undetermined
        } else {
            LivenessVerdict::Dead
        };

        if verdict == LivenessVerdict::Dead {
            tracing::warn!(host = %host, require_all, "all heartbeat evidence reads host as dead");
        }
        verdict
    }

    async fn read_kind(
        &self,
        host: &str,
        kind: PoolKind,
        pools: &[Arc<dyn HeartbeatPool>],
        staleness: Duration,
        now: DateTime<Utc>,
    ) -> KindReading {
        let mut readable = false;
        for pool in pools {
            match pool.read_heartbeat(host).await {
                Ok(Some(ts)) => {
                    readable = true;
                    if is_fresh(ts, now, staleness) {
                        return KindReading::Fresh;
                    }
                }
                Ok(None) => {
                    // A missing record on a readable pool counts as stale
                    // evidence: the host never wrote here, or its record was
                    // cleared.
                    readable = true;
                }
                Err(e) => {
                    tracing::warn!(
                        host = %host,
                        kind = %kind,
                        pool_id = %pool.id(),
                        error = %e,
                        "heartbeat read failed"
                    );
                }
            }
        }
        if readable {
            KindReading::Stale
        } else {
            KindReading::Unreadable
        }
    }
}

/// Answers "did this host write anything after T", the stronger,
/// time-windowed check run immediately before a destructive action.
#[derive(Debug, Default, Clone)]
pub struct ActivityChecker;

impl ActivityChecker {
    pub fn new() -> Self {
        Self
    }

    /// Scan every registered pool for write activity from `host` after
    /// `since`. Any single pool showing activity is proof of life. With
    /// zero pools, or with nothing but read errors, the verdict is
    /// `Undetermined`.
    pub async fn check(
        &self,
        host: &str,
        pools: &PoolSnapshot,
        since: DateTime<Utc>,
    ) -> LivenessVerdict {
        let mut saw_pool = false;
        let mut readable = false;

        for kind_pools in pools.values() {
            for pool in kind_pools {
                saw_pool = true;
                match pool.activity_since(host, since).await {
                    Ok(true) => {
                        tracing::debug!(
                            host = %host,
                            pool_id = %pool.id(),
                            since = %since,
                            "disk activity detected"
                        );
                        return LivenessVerdict::Alive;
                    }
                    Ok(false) => readable = true,
                    Err(e) => {
                        tracing::warn!(
                            host = %host,
                            pool_id = %pool.id(),
                            error = %e,
                            "activity read failed"
                        );
                    }
                }
            }
        }

        if !saw_pool {
            tracing::warn!(
                host = %host,
                "no heartbeat pools registered, refusing to certify inactivity"
            );
            return LivenessVerdict::Undetermined;
        }
        if !readable {
            return LivenessVerdict::Undetermined;
        }
        LivenessVerdict::Dead
    }
}

fn is_fresh(ts: DateTime<Utc>, now: DateTime<Utc>, staleness: Duration) -> bool {
    match (now - ts).to_std() {
        Ok(age) => age <= staleness,
        // A timestamp from the future is not stale.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::heartbeat::pool::{HeartbeatPool, MemoryHeartbeatPool};
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(60);

    fn snapshot_of(pools: Vec<Arc<MemoryHeartbeatPool>>) -> PoolSnapshot {
        let mut snapshot = PoolSnapshot::new();
        for pool in pools {
            snapshot
                .entry(pool.kind())
                .or_default()
                .push(pool as Arc<dyn HeartbeatPool>);
        }
        snapshot
    }

    #[tokio::test]
    async fn zero_pools_never_reads_dead() {
        let checker = LivenessChecker::new();
        let empty = PoolSnapshot::new();
        assert_eq!(
            checker.check("10.0.0.1", &empty, true, WINDOW).await,
            LivenessVerdict::Undetermined
        );
        assert_eq!(
            checker.check("10.0.0.1", &empty, false, WINDOW).await,
            LivenessVerdict::Undetermined
        );
    }

    #[tokio::test]
    async fn fresh_heartbeat_reads_alive_in_both_modes() {
        let pool = MemoryHeartbeatPool::new(PoolKind::NetworkFilesystem, "nfs://a");
        pool.write_heartbeat("10.0.0.1", Utc::now()).await.unwrap();
        let snapshot = snapshot_of(vec![pool]);

        let checker = LivenessChecker::new();
        assert_eq!(
            checker.check("10.0.0.1", &snapshot, true, WINDOW).await,
            LivenessVerdict::Alive
        );
        assert_eq!(
            checker.check("10.0.0.1", &snapshot, false, WINDOW).await,
            LivenessVerdict::Alive
        );
    }

    #[tokio::test]
    async fn stale_heartbeat_reads_dead() {
        let pool = MemoryHeartbeatPool::new(PoolKind::NetworkFilesystem, "nfs://a");
        pool.write_heartbeat("10.0.0.1", Utc::now() - ChronoDuration::seconds(600))
            .await
            .unwrap();
        let snapshot = snapshot_of(vec![pool]);

        let checker = LivenessChecker::new();
        assert_eq!(
            checker.check("10.0.0.1", &snapshot, true, WINDOW).await,
            LivenessVerdict::Dead
        );
    }

    #[tokio::test]
    async fn require_all_needs_every_kind_fresh() {
        let nfs = MemoryHeartbeatPool::new(PoolKind::NetworkFilesystem, "nfs://a");
        let rbd = MemoryHeartbeatPool::new(PoolKind::BlockStore, "rbd://b");
        nfs.write_heartbeat("10.0.0.1", Utc::now()).await.unwrap();
        rbd.write_heartbeat("10.0.0.1", Utc::now() - ChronoDuration::seconds(600))
            .await
            .unwrap();
        let snapshot = snapshot_of(vec![nfs, rbd]);

        let checker = LivenessChecker::new();
        // One stale kind: require-all reads dead, any-mode reads alive.
        assert_eq!(
            checker.check("10.0.0.1", &snapshot, true, WINDOW).await,
            LivenessVerdict::Dead
        );
        assert_eq!(
            checker.check("10.0.0.1", &snapshot, false, WINDOW).await,
            LivenessVerdict::Alive
        );
    }

    #[tokio::test]
    async fn unreadable_pools_leave_verdict_undetermined() {
        let pool = MemoryHeartbeatPool::new(PoolKind::BlockStore, "rbd://a");
        pool.write_heartbeat("10.0.0.1", Utc::now()).await.unwrap();
        pool.set_available(false);
        let snapshot = snapshot_of(vec![pool]);

        let checker = LivenessChecker::new();
        assert_eq!(
            checker.check("10.0.0.1", &snapshot, true, WINDOW).await,
            LivenessVerdict::Undetermined
        );
        assert_eq!(
            checker.check("10.0.0.1", &snapshot, false, WINDOW).await,
            LivenessVerdict::Undetermined
        );
    }

    #[tokio::test]
    async fn activity_after_suspicion_is_proof_of_life() {
        let pool = MemoryHeartbeatPool::new(PoolKind::NetworkFilesystem, "nfs://a");
        let now = Utc::now();
        pool.write_heartbeat("10.0.0.1", now).await.unwrap();
        let snapshot = snapshot_of(vec![pool]);

        let checker = ActivityChecker::new();
        assert_eq!(
            checker
                .check("10.0.0.1", &snapshot, now - ChronoDuration::seconds(30))
                .await,
            LivenessVerdict::Alive
        );
        assert_eq!(
            checker
                .check("10.0.0.1", &snapshot, now + ChronoDuration::seconds(30))
                .await,
            LivenessVerdict::Dead
        );
    }

    #[tokio::test]
    async fn activity_with_zero_pools_is_undetermined() {
        let checker = ActivityChecker::new();
        assert_eq!(
            checker
                .check("10.0.0.1", &PoolSnapshot::new(), Utc::now())
                .await,
            LivenessVerdict::Undetermined
        );
    }
}
