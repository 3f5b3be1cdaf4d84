use crate::analysis::AnalysisVerdict;
use crate::audit::AuditSink;
use crate::instance::InstanceKey;
use crate::topology::TopologyStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error};

/// Issues urgent out-of-band re-reads of instance state when an analysis
/// suggests a failure may be unfolding, to sharpen the next analysis.
///
/// Reads are deduplicated per instance for a TTL window and executed on the
/// topology pool, so a burst of suspicious analyses does not stampede the
/// fleet.
pub struct EmergentRefresher {
    store: Arc<dyn TopologyStore>,
    audit: Arc<dyn AuditSink>,
    dedup: Arc<DashMap<InstanceKey, Instant>>,
    pool: Arc<Semaphore>,
    ttl: Duration,
}

impl EmergentRefresher {
    pub fn new(
        store: Arc<dyn TopologyStore>,
        audit: Arc<dyn AuditSink>,
        pool_size: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            audit,
            dedup: Arc::new(DashMap::new()),
            pool: Arc::new(Semaphore::new(pool_size)),
            ttl,
        }
    }

    /// Schedule an urgent read of one instance. Returns whether a read was
    /// actually scheduled; an instance already read within the TTL window
    /// is skipped.
    pub fn schedule_instance_read(&self, key: &InstanceKey, verdict: AnalysisVerdict) -> bool {
        if !self.mark_for_read(key) {
            debug!(instance = %key, "emergent read already pending");
            return false;
        }

        let store = Arc::clone(&self.store);
        let audit = Arc::clone(&self.audit);
        let pool = Arc::clone(&self.pool);
        let key = key.clone();
        tokio::spawn(async move {
            let _permit = match pool.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            if let Err(err) = store.read_instance(&key).await {
                error!(instance = %key, %err, "emergent instance read failed");
            }
            audit
                .audit(
                    "emergently-read-topology-instance",
                    Some(&key),
                    verdict.as_str(),
                )
                .await;
        });
        true
    }

    /// Schedule urgent reads of every replica of the given instance. Used
    /// when the instance itself is suspected dead and its replicas hold the
    /// evidence.
    pub fn schedule_replica_reads(&self, key: &InstanceKey, verdict: AnalysisVerdict) {
        let refresher = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let replicas = match refresher.store.read_replica_instances(&key).await {
                Ok(replicas) => replicas,
                Err(err) => {
                    debug!(instance = %key, %err, "cannot enumerate replicas for emergent read");
                    return;
                }
            };
            for replica in replicas {
                refresher.schedule_instance_read(&replica.key, verdict);
            }
        });
    }

    /// Record the intent to read `key`; false when a fresh entry exists.
    /// Expired entries are replaced.
    fn mark_for_read(&self, key: &InstanceKey) -> bool {
        let now = Instant::now();
        match self.dedup.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if now.duration_since(*occupied.get()) >= self.ttl {
                    occupied.insert(now);
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    /// Drop dedup entries older than the TTL
    pub fn expire_stale_entries(&self) {
        let ttl = self.ttl;
        let now = Instant::now();
        self.dedup
            .retain(|_, stamp| now.duration_since(*stamp) < ttl);
    }
}

impl Clone for EmergentRefresher {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            audit: Arc::clone(&self.audit),
            dedup: Arc::clone(&self.dedup),
            pool: Arc::clone(&self.pool),
            ttl: self.ttl,
        }
    }
}
