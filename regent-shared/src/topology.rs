use crate::analysis::AnalysisEntry;
use crate::exception::RegentResult;
use crate::instance::{Instance, InstanceKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result of regrouping the direct replicas of a failed instance under the
/// most advanced one of them.
#[derive(Debug, Clone, Default)]
pub struct RegroupOutcome {
    /// Replicas that could not be repositioned and were left behind
    pub lost: Vec<Instance>,
    /// Replicas that shared coordinates with the promoted one
    pub equal: Vec<Instance>,
    /// Replicas that were ahead and had to be aligned
    pub ahead: Vec<Instance>,
    /// The replica that became the new local parent, if any
    pub promoted: Option<Instance>,
    /// Per-replica errors encountered along the way
    pub errors: Vec<String>,
}

/// Result of re-parenting a set of replicas onto some target.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// Replicas successfully re-parented
    pub matched: Vec<Instance>,
    /// The instance the replicas now replicate from, if any
    pub successor: Option<Instance>,
    /// Per-replica errors encountered along the way
    pub errors: Vec<String>,
}

/// Read and re-parenting operations against the authoritative topology.
///
/// The core never probes replication state itself; every SQL round-trip
/// happens behind this trait. Instances returned here are snapshots, valid
/// for one recovery decision.
#[async_trait]
pub trait TopologyStore: Send + Sync {
    /// Read a single instance, `None` when unknown
    async fn read_instance(&self, key: &InstanceKey) -> RegentResult<Option<Instance>>;

    /// Read the direct replicas of the given instance
    async fn read_replica_instances(&self, key: &InstanceKey) -> RegentResult<Vec<Instance>>;

    /// Read the instances registered as promotion candidates for a cluster
    async fn read_cluster_candidate_instances(
        &self,
        cluster_name: &str,
    ) -> RegentResult<Vec<Instance>>;

    /// Rearrange the direct replicas of `failed_key` so that the most
    /// advanced one becomes the parent of the others. The promoted replica
    /// itself is left nominally attached to the failed instance; moving it
    /// further up is the caller's decision (`match_up_replicas`)
    async fn regroup_replicas(&self, failed_key: &InstanceKey) -> RegentResult<RegroupOutcome>;

    /// Re-parent every replica of `failed_key` onto `target_key`; `pattern`
    /// optionally restricts which replicas are considered
    async fn multi_match_replicas(
        &self,
        failed_key: &InstanceKey,
        target_key: &InstanceKey,
        pattern: &str,
    ) -> RegentResult<MatchOutcome>;

    /// Re-parent every replica of `failed_key` onto `failed_key`'s own
    /// upstream
    async fn match_up_replicas(
        &self,
        failed_key: &InstanceKey,
        pattern: &str,
    ) -> RegentResult<MatchOutcome>;

    /// Swap parent/child between the given instance and its current
    /// upstream; returns the refreshed instance
    async fn enslave_upstream(&self, key: &InstanceKey) -> RegentResult<Instance>;
}

/// Produces the analysis entries the dispatcher iterates over.
#[async_trait]
pub trait ReplicationAnalyzer: Send + Sync {
    async fn get_replication_analysis(
        &self,
        include_downtimed: bool,
    ) -> RegentResult<Vec<AnalysisEntry>>;
}

/// Source of truth for wall-clock time, mockable in tests
pub trait ClockSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
