use crate::analysis::AnalysisEntry;
use crate::exception::RegentResult;
use crate::instance::InstanceKey;
use crate::recovery_store::{RecoveryStore, TopologyRecovery};
use crate::topology::ClockSource;
use chrono::Duration;
use regent_util::RngUtils;
use std::sync::Arc;
use tracing::debug;

/// Claims exclusive ownership of recoveries across the fleet of peers.
///
/// Each process carries a random token; together with the node hostname it
/// identifies who is driving a given recovery in the shared registry.
pub struct RecoveryRegistrar {
    store: Arc<dyn RecoveryStore>,
    clock: Arc<dyn ClockSource>,
    node_hostname: String,
    node_token: String,
    cooldown: Duration,
}

impl RecoveryRegistrar {
    pub fn new(
        store: Arc<dyn RecoveryStore>,
        clock: Arc<dyn ClockSource>,
        node_hostname: String,
        cooldown: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            node_hostname,
            node_token: RngUtils::random_token(),
            cooldown,
        }
    }

    /// The token identifying this process in recovery records
    pub fn node_token(&self) -> &str {
        &self.node_token
    }

    /// Attempt to claim the recovery for the entry's analyzed instance.
    ///
    /// Returns `Ok(None)` when another peer holds the claim or the cluster
    /// is inside its cooldown window. `force` bypasses the cooldown, never
    /// the per-instance uniqueness.
    pub async fn attempt_registration(
        &self,
        entry: &AnalysisEntry,
        force: bool,
    ) -> RegentResult<Option<TopologyRecovery>> {
        let cooldown = if force { None } else { Some(self.cooldown) };
        let claimed = self
            .store
            .claim_recovery(
                entry,
                &self.node_hostname,
                &self.node_token,
                self.clock.now(),
                cooldown,
            )
            .await?;

        match &claimed {
            Some(recovery) => {
                debug!(instance = %entry.analyzed_key, recovery_id = recovery.recovery_id,
                       "registered recovery");
            }
            None => {
                debug!(instance = %entry.analyzed_key,
                       "will not recover: claim declined or cluster in cooldown");
            }
        }
        Ok(claimed)
    }

    /// Mark the active recovery for `failed_key` done, recording the
    /// successor
    pub async fn resolve(
        &self,
        failed_key: &InstanceKey,
        successor_key: Option<&InstanceKey>,
    ) -> RegentResult<()> {
        self.store
            .resolve_recovery(failed_key, successor_key, self.clock.now())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisVerdict;
    use crate::recovery_store::InMemoryRecoveryStore;
    use crate::topology::SystemClock;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    struct MockClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl MockClock {
        fn new(now: DateTime<Utc>) -> Self {
            Self { now: Mutex::new(now) }
        }

        fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl ClockSource for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    fn entry(host: &str) -> AnalysisEntry {
        let mut entry =
            AnalysisEntry::new(AnalysisVerdict::DeadMaster, InstanceKey::new(host, 3306));
        entry.cluster_name = "c1".to_string();
        entry
    }

    fn registrar_with_clock(clock: Arc<MockClock>) -> RecoveryRegistrar {
        RecoveryRegistrar::new(
            Arc::new(InMemoryRecoveryStore::new()),
            clock,
            "test-node".to_string(),
            Duration::minutes(60),
        )
    }

    #[tokio::test]
    async fn test_claim_then_decline_then_resolve() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let registrar = registrar_with_clock(Arc::clone(&clock));

        let first = registrar.attempt_registration(&entry("p"), false).await.unwrap();
        assert!(first.is_some());

        let second = registrar.attempt_registration(&entry("p"), false).await.unwrap();
        assert!(second.is_none());

        registrar
            .resolve(&InstanceKey::new("p", 3306), Some(&InstanceKey::new("r", 3306)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cooldown_window_expires() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let registrar = registrar_with_clock(Arc::clone(&clock));

        registrar.attempt_registration(&entry("p"), false).await.unwrap().unwrap();
        registrar.resolve(&InstanceKey::new("p", 3306), None).await.unwrap();

        // Inside the window: declined
        clock.advance(Duration::minutes(10));
        assert!(registrar
            .attempt_registration(&entry("p"), false)
            .await
            .unwrap()
            .is_none());

        // Past the window: admitted
        clock.advance(Duration::minutes(51));
        assert!(registrar
            .attempt_registration(&entry("p"), false)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_force_bypasses_cooldown_not_uniqueness() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let registrar = registrar_with_clock(Arc::clone(&clock));

        registrar.attempt_registration(&entry("p"), false).await.unwrap().unwrap();
        registrar.resolve(&InstanceKey::new("p", 3306), None).await.unwrap();
        clock.advance(Duration::minutes(1));

        // Cooldown active, force pushes through
        let forced = registrar.attempt_registration(&entry("p"), true).await.unwrap();
        assert!(forced.is_some());

        // But a second force for the same still-active key is declined
        let forced_again = registrar.attempt_registration(&entry("p"), true).await.unwrap();
        assert!(forced_again.is_none());
    }

    #[tokio::test]
    async fn test_tokens_are_per_process() {
        let a = RecoveryRegistrar::new(
            Arc::new(InMemoryRecoveryStore::new()),
            Arc::new(SystemClock),
            "node".to_string(),
            Duration::minutes(60),
        );
        let b = RecoveryRegistrar::new(
            Arc::new(InMemoryRecoveryStore::new()),
            Arc::new(SystemClock),
            "node".to_string(),
            Duration::minutes(60),
        );
        assert_ne!(a.node_token(), b.node_token());
    }
}
