use crate::analysis::AnalysisEntry;
use crate::audit::AuditSink;
use crate::config::RegentConfig;
use crate::exception::{RegentError, RegentResult};
use crate::filters::filters_match;
use crate::hooks::{execute_processes, ProcessRunner};
use crate::instance::{Instance, InstanceKey};
use crate::registrar::RecoveryRegistrar;
use crate::topology::TopologyStore;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Result of one recovery attempt.
///
/// `action_taken` with a populated `error` means the topology was changed
/// but some replicas hit per-replica errors along the way; those are
/// audited, and post-failover hooks still run.
#[derive(Debug, Clone, Default)]
pub struct RecoveryOutcome {
    pub action_taken: bool,
    pub successor: Option<Instance>,
    pub error: Option<String>,
}

impl RecoveryOutcome {
    pub fn no_action() -> Self {
        Self::default()
    }
}

/// Chooses successors and executes the re-parenting plans for failed
/// primaries and intermediate primaries.
pub struct PromotionPlanner {
    store: Arc<dyn TopologyStore>,
    registrar: Arc<RecoveryRegistrar>,
    runner: Arc<dyn ProcessRunner>,
    audit: Arc<dyn AuditSink>,
    config: Arc<RegentConfig>,
}

impl PromotionPlanner {
    pub fn new(
        store: Arc<dyn TopologyStore>,
        registrar: Arc<RecoveryRegistrar>,
        runner: Arc<dyn ProcessRunner>,
        audit: Arc<dyn AuditSink>,
        config: Arc<RegentConfig>,
    ) -> Self {
        Self {
            store,
            registrar,
            runner,
            audit,
            config,
        }
    }

    /// Gate a dead-primary analysis through the cluster filters and, if
    /// admitted, recover it. Post-master-failover hooks run best-effort
    /// when action was taken.
    pub async fn check_and_recover_dead_primary(
        &self,
        entry: &AnalysisEntry,
        candidate_key: Option<&InstanceKey>,
        skip_filters: bool,
    ) -> RegentResult<RecoveryOutcome> {
        if !filters_match(
            entry,
            &self.config.recover_master_cluster_filters,
            skip_filters,
        ) {
            return Ok(RecoveryOutcome::no_action());
        }

        debug!(cluster = %entry.cluster_name, "handling dead primary event");
        let mut outcome = self.recover_dead_primary(entry, skip_filters).await?;

        if outcome.action_taken {
            if let Some(promoted) = outcome.successor.take() {
                let successor = self
                    .replace_promoted_with_candidate(&entry.analyzed_key, promoted, candidate_key)
                    .await;
                // Best effort: a failing post hook never undoes the recovery
                let _ = execute_processes(
                    self.runner.as_ref(),
                    &self.config.post_master_failover_processes,
                    "PostMasterFailoverProcesses",
                    entry,
                    Some(&successor),
                    false,
                )
                .await;
                outcome.successor = Some(successor);
            }
        }

        Ok(outcome)
    }

    /// Recover a dead primary: claim the recovery, run pre-failover hooks,
    /// regroup the replicas under the most advanced one.
    async fn recover_dead_primary(
        &self,
        entry: &AnalysisEntry,
        force: bool,
    ) -> RegentResult<RecoveryOutcome> {
        let failed_key = &entry.analyzed_key;
        if self
            .registrar
            .attempt_registration(entry, force)
            .await?
            .is_none()
        {
            debug!(instance = %failed_key, "will not recover dead primary");
            return Ok(RecoveryOutcome::no_action());
        }

        self.audit
            .audit("recover-dead-master", Some(failed_key), "problem found; will recover")
            .await;

        execute_processes(
            self.runner.as_ref(),
            &self.config.pre_failover_processes,
            "PreFailoverProcesses",
            entry,
            None,
            true,
        )
        .await?;

        debug!(instance = %failed_key, "regrouping replicas of dead primary");
        let regroup = self.store.regroup_replicas(failed_key).await?;

        let Some(promoted) = regroup.promoted else {
            return Err(RegentError::promotion(
                failed_key.to_string(),
                format!("regroup promoted no replica: {}", regroup.errors.join("; ")),
            ));
        };

        self.registrar
            .resolve(failed_key, Some(&promoted.key))
            .await?;

        debug!(candidate = %promoted.key, "dead primary regroup complete");
        self.audit
            .audit(
                "recover-dead-master",
                Some(failed_key),
                &format!("promoted: {}", promoted.key),
            )
            .await;

        let error = if regroup.errors.is_empty() {
            None
        } else {
            let joined = regroup.errors.join("; ");
            self.audit
                .audit(
                    "recover-dead-master",
                    Some(failed_key),
                    &format!("{} errors during regroup: {}", regroup.errors.len(), joined),
                )
                .await;
            Some(joined)
        };

        Ok(RecoveryOutcome {
            action_taken: true,
            successor: Some(promoted),
            error,
        })
    }

    /// Possibly swap the instance regroup promoted for a registered
    /// promotion candidate.
    ///
    /// Preference order when the caller offered no candidate: a registered
    /// candidate already promoted; a candidate replica of the promoted
    /// instance in the failed instance's data center and environment; one in
    /// the promoted instance's data center and environment. Any error along
    /// the way keeps the originally promoted instance.
    async fn replace_promoted_with_candidate(
        &self,
        dead_key: &InstanceKey,
        promoted: Instance,
        candidate_key: Option<&InstanceKey>,
    ) -> Instance {
        let mut candidate_key = candidate_key.cloned();
        let mut candidates: Vec<Instance> = Vec::new();

        if candidate_key.is_none() {
            candidates = self
                .store
                .read_cluster_candidate_instances(&promoted.cluster_name)
                .await
                .unwrap_or_default();
            if candidates.iter().any(|c| c.key == promoted.key) {
                // We promoted a registered candidate; nothing to improve on
                return promoted;
            }
        }

        if candidate_key.is_none() {
            // A candidate in the same data center and environment as the
            // failed instance makes the best replacement
            if let Ok(Some(dead_instance)) = self.store.read_instance(dead_key).await {
                for candidate in &candidates {
                    if dead_instance.data_center == candidate.data_center
                        && dead_instance.physical_environment == candidate.physical_environment
                        && candidate.replicates_from(&promoted.key)
                    {
                        candidate_key = Some(candidate.key.clone());
                        debug!(candidate = %candidate.key,
                               "picked candidate replacement in failed instance's data center and environment");
                    }
                }
            }
        }

        if candidate_key.is_none() {
            // Fall back to one sharing the promoted instance's location
            for candidate in &candidates {
                if promoted.data_center == candidate.data_center
                    && promoted.physical_environment == candidate.physical_environment
                    && candidate.replicates_from(&promoted.key)
                {
                    candidate_key = Some(candidate.key.clone());
                    debug!(candidate = %candidate.key,
                           "picked candidate replacement in promoted instance's data center and environment");
                }
            }
        }

        let Some(candidate_key) = candidate_key else {
            return promoted;
        };
        if promoted.key == candidate_key {
            return promoted;
        }

        debug!(promoted = %promoted.key, candidate = %candidate_key,
               "promoted instance is not the suggested candidate; will see what can be done");

        let candidate = match self.store.read_instance(&candidate_key).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                warn!(candidate = %candidate_key, "suggested candidate not found");
                return promoted;
            }
            Err(err) => {
                error!(candidate = %candidate_key, %err, "failed reading suggested candidate");
                return promoted;
            }
        };

        if candidate.replicates_from(&promoted.key) {
            debug!(candidate = %candidate.key, promoted = %promoted.key,
                   "candidate replicates from promoted instance; swapping the two");
            match self.store.enslave_upstream(&candidate.key).await {
                Ok(swapped) => return swapped,
                Err(err) => {
                    error!(candidate = %candidate.key, %err, "failed swapping candidate with promoted instance");
                    return promoted;
                }
            }
        }

        debug!(candidate = %candidate_key, "could not promote suggested candidate");
        promoted
    }

    /// Gate a dead-intermediate-primary analysis through the cluster
    /// filters and, if admitted, recover it. Also serves the co-primary
    /// case.
    pub async fn check_and_recover_dead_intermediate_primary(
        &self,
        entry: &AnalysisEntry,
        skip_filters: bool,
    ) -> RegentResult<RecoveryOutcome> {
        if !filters_match(
            entry,
            &self.config.recover_intermediate_master_cluster_filters,
            skip_filters,
        ) {
            return Ok(RecoveryOutcome::no_action());
        }

        let outcome = self
            .recover_dead_intermediate_primary(entry, skip_filters)
            .await?;

        if outcome.action_taken {
            let _ = execute_processes(
                self.runner.as_ref(),
                &self.config.post_intermediate_master_failover_processes,
                "PostIntermediateMasterFailoverProcesses",
                entry,
                outcome.successor.as_ref(),
                false,
            )
            .await;
        }

        Ok(outcome)
    }

    /// Recover a dead intermediate primary. Plan A re-parents its replicas
    /// onto a validated sibling; plan B regroups them and matches the
    /// remainder up onto the failed instance's own upstream.
    async fn recover_dead_intermediate_primary(
        &self,
        entry: &AnalysisEntry,
        force: bool,
    ) -> RegentResult<RecoveryOutcome> {
        let failed_key = &entry.analyzed_key;
        if self
            .registrar
            .attempt_registration(entry, force)
            .await?
            .is_none()
        {
            debug!(instance = %failed_key, "will not recover dead intermediate primary");
            return Ok(RecoveryOutcome::no_action());
        }

        self.audit
            .audit(
                "recover-dead-intermediate-master",
                Some(failed_key),
                "problem found; will recover",
            )
            .await;

        execute_processes(
            self.runner.as_ref(),
            &self.config.pre_failover_processes,
            "PreFailoverProcesses",
            entry,
            None,
            true,
        )
        .await?;

        // Plan A: move everything under a healthy sibling
        if let Ok(Some(sibling)) = self.candidate_sibling_of_intermediate_primary(failed_key).await
        {
            debug!(sibling = %sibling.key, "attempting candidate sibling for dead intermediate primary");
            match self
                .store
                .multi_match_replicas(failed_key, &sibling.key, "")
                .await
            {
                Ok(matched) => {
                    self.registrar.resolve(failed_key, Some(&sibling.key)).await?;
                    self.audit
                        .audit(
                            "recover-dead-intermediate-master",
                            Some(failed_key),
                            &format!(
                                "done. matched {} replicas under candidate sibling {}; {} errors",
                                matched.matched.len(),
                                sibling.key,
                                matched.errors.len()
                            ),
                        )
                        .await;

                    let error = if matched.errors.is_empty() {
                        None
                    } else {
                        Some(matched.errors.join("; "))
                    };
                    return Ok(RecoveryOutcome {
                        action_taken: true,
                        successor: Some(sibling),
                        error,
                    });
                }
                Err(err) => {
                    debug!(sibling = %sibling.key, %err,
                           "move to candidate sibling did not complete; will regroup and match up");
                    self.audit
                        .audit(
                            "recover-dead-intermediate-master",
                            Some(failed_key),
                            &format!("candidate sibling {} did not work out: {err}", sibling.key),
                        )
                        .await;
                }
            }
        }

        // Plan B: regroup whatever regroups, then match the rest up onto
        // the failed instance's upstream. A failed or partial regroup is
        // acceptable; match-up picks up anything it left behind.
        let _ = self.store.regroup_replicas(failed_key).await;

        debug!(instance = %failed_key, "attempting match up from dead intermediate primary");
        let matched = self
            .store
            .match_up_replicas(failed_key, "")
            .await
            .map_err(|err| {
                RegentError::promotion(failed_key.to_string(), format!("match up failed: {err}"))
            })?;

        if matched.matched.is_empty() {
            error!(instance = %failed_key, "failed to match up any replica");
            return Err(RegentError::promotion(
                failed_key.to_string(),
                "no replicas matched up",
            ));
        }

        let Some(successor) = matched.successor else {
            return Err(RegentError::promotion(
                failed_key.to_string(),
                "match up reported no successor",
            ));
        };

        self.registrar.resolve(failed_key, Some(&successor.key)).await?;
        self.audit
            .audit(
                "recover-dead-intermediate-master",
                Some(failed_key),
                &format!(
                    "done. matched {} replicas under {}; {} errors",
                    matched.matched.len(),
                    successor.key,
                    matched.errors.len()
                ),
            )
            .await;

        let error = if matched.errors.is_empty() {
            None
        } else {
            Some(matched.errors.join("; "))
        };
        Ok(RecoveryOutcome {
            action_taken: true,
            successor: Some(successor),
            error,
        })
    }

    /// Choose the best sibling of a failed intermediate primary to inherit
    /// its replicas: the validated sibling with the most downstream
    /// replicas, ties broken by the more advanced execution coordinates.
    pub async fn candidate_sibling_of_intermediate_primary(
        &self,
        intermediate_key: &InstanceKey,
    ) -> RegentResult<Option<Instance>> {
        let Some(intermediate) = self.store.read_instance(intermediate_key).await? else {
            return Ok(None);
        };
        let Some(upstream_key) = intermediate.upstream_key.clone() else {
            return Ok(None);
        };

        let mut siblings = self.store.read_replica_instances(&upstream_key).await?;
        if siblings.len() <= 1 {
            debug!(instance = %intermediate_key, "no siblings found");
            return Ok(None);
        }

        siblings.sort_by(|a, b| compare_siblings(a, b));

        for sibling in siblings {
            if is_valid_candidate_sibling(&intermediate, &sibling) {
                // Assumed to be a good choice: the dead intermediate's
                // position may have advanced past what was last recorded,
                // and the sibling may have stalled since. It's an attempt.
                return Ok(Some(sibling));
            }
        }

        debug!(instance = %intermediate_key, "cannot find candidate sibling");
        Ok(None)
    }
}

/// Descending by number of downstream replicas, ties broken by the greater
/// execution coordinates first
fn compare_siblings(a: &Instance, b: &Instance) -> Ordering {
    b.downstream_keys
        .len()
        .cmp(&a.downstream_keys.len())
        .then_with(|| b.exec_coordinates.cmp(&a.exec_coordinates))
}

fn is_generally_valid_candidate_sibling(sibling: &Instance) -> bool {
    sibling.binlog_enabled
        && sibling.log_replica_updates
        && sibling.replica_running
        && sibling.last_check_valid
}

/// All the predicates a sibling must satisfy to adopt the failed
/// intermediate primary's replicas
fn is_valid_candidate_sibling(intermediate: &Instance, sibling: &Instance) -> bool {
    if sibling.key == intermediate.key {
        return false;
    }
    if !is_generally_valid_candidate_sibling(sibling) {
        return false;
    }
    if sibling.data_center != intermediate.data_center {
        return false;
    }
    if sibling.physical_environment != intermediate.physical_environment {
        return false;
    }
    if sibling.has_replication_filters != intermediate.has_replication_filters {
        return false;
    }
    if sibling.is_max_scale || intermediate.is_max_scale {
        // MaxScale failover takes a different route; no move-to-sibling
        return false;
    }
    if sibling
        .exec_coordinates
        .smaller_than(&intermediate.exec_coordinates)
    {
        return false;
    }
    true
}
