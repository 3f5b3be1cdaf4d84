use crate::analysis::{AnalysisEntry, AnalysisVerdict};
use crate::audit::AuditSink;
use crate::config::RegentConfig;
use crate::exception::RegentResult;
use crate::hooks::{execute_processes, ProcessRunner};
use crate::instance::InstanceKey;
use crate::promotion::{PromotionPlanner, RecoveryOutcome};
use crate::refresher::EmergentRefresher;
use crate::topology::ReplicationAnalyzer;
use std::sync::Arc;
use tracing::{debug, error};

enum VerdictHandler {
    DeadPrimary,
    DeadIntermediatePrimary,
}

/// Top-level recovery loop: fetches analyses, filters them, and routes each
/// to the right handler, synchronously in force mode and fire-and-forget
/// otherwise.
pub struct RecoveryController {
    analyzer: Arc<dyn ReplicationAnalyzer>,
    planner: Arc<PromotionPlanner>,
    refresher: EmergentRefresher,
    runner: Arc<dyn ProcessRunner>,
    audit: Arc<dyn AuditSink>,
    config: Arc<RegentConfig>,
}

impl RecoveryController {
    pub fn new(
        analyzer: Arc<dyn ReplicationAnalyzer>,
        planner: Arc<PromotionPlanner>,
        refresher: EmergentRefresher,
        runner: Arc<dyn ProcessRunner>,
        audit: Arc<dyn AuditSink>,
        config: Arc<RegentConfig>,
    ) -> Self {
        Self {
            analyzer,
            planner,
            refresher,
            runner,
            audit,
            config,
        }
    }

    /// Main entry point for the recovery mechanism.
    ///
    /// Walks the current analyses and dispatches each actionable entry.
    /// When `specific_instance` is given together with `skip_filters`
    /// (force mode) the matching entry is handled synchronously and its
    /// outcome returned; every other dispatch is asynchronous and the
    /// caller gets a no-action outcome for it.
    pub async fn check_and_recover(
        &self,
        specific_instance: Option<&InstanceKey>,
        candidate_key: Option<&InstanceKey>,
        skip_filters: bool,
    ) -> RegentResult<RecoveryOutcome> {
        let analyses = self.analyzer.get_replication_analysis(true).await?;

        let mut outcome = RecoveryOutcome::no_action();
        for entry in analyses {
            if let Some(specific) = specific_instance {
                if specific != &entry.analyzed_key {
                    continue;
                }
            }
            if entry.is_downtimed && specific_instance.is_none() {
                // Downtimed servers only recover on explicit request
                continue;
            }

            if specific_instance.is_some() && skip_filters {
                // Force mode: keep it synchronous and surface the outcome
                outcome = self
                    .execute_check_and_recover(&entry, candidate_key, skip_filters)
                    .await?;
            } else {
                let controller = self.clone();
                let candidate_key = candidate_key.cloned();
                tokio::spawn(async move {
                    if let Err(err) = controller
                        .execute_check_and_recover(&entry, candidate_key.as_ref(), skip_filters)
                        .await
                    {
                        error!(instance = %entry.analyzed_key, %err, "recovery dispatch failed");
                    }
                });
            }
        }
        Ok(outcome)
    }

    /// Route one analysis entry by verdict and possibly take action
    pub async fn execute_check_and_recover(
        &self,
        entry: &AnalysisEntry,
        candidate_key: Option<&InstanceKey>,
        skip_filters: bool,
    ) -> RegentResult<RecoveryOutcome> {
        let handler = match entry.verdict {
            AnalysisVerdict::DeadMaster | AnalysisVerdict::DeadMasterAndSomeSlaves => {
                Some(VerdictHandler::DeadPrimary)
            }
            AnalysisVerdict::DeadIntermediateMaster
            | AnalysisVerdict::DeadIntermediateMasterAndSomeSlaves
            | AnalysisVerdict::DeadCoMaster => Some(VerdictHandler::DeadIntermediatePrimary),
            AnalysisVerdict::UnreachableMaster => {
                self.refresher
                    .schedule_replica_reads(&entry.analyzed_key, entry.verdict);
                None
            }
            AnalysisVerdict::AllMasterSlavesNotReplicating => {
                self.refresher
                    .schedule_instance_read(&entry.analyzed_key, entry.verdict);
                None
            }
            AnalysisVerdict::FirstTierSlaveFailingToConnectToMaster => {
                if let Some(upstream_key) = &entry.analyzed_upstream_key {
                    self.refresher
                        .schedule_instance_read(upstream_key, entry.verdict);
                }
                None
            }
            _ => {
                debug!(verdict = %entry.verdict, "no handler for verdict");
                None
            }
        };

        let Some(handler) = handler else {
            return Ok(RecoveryOutcome::no_action());
        };

        // A recovery function was selected; detection hooks run first and
        // gate everything downstream
        execute_processes(
            self.runner.as_ref(),
            &self.config.on_failure_detection_processes,
            "OnFailureDetectionProcesses",
            entry,
            None,
            true,
        )
        .await?;

        let outcome = match handler {
            VerdictHandler::DeadPrimary => {
                self.planner
                    .check_and_recover_dead_primary(entry, candidate_key, skip_filters)
                    .await?
            }
            VerdictHandler::DeadIntermediatePrimary => {
                self.planner
                    .check_and_recover_dead_intermediate_primary(entry, skip_filters)
                    .await?
            }
        };

        if outcome.action_taken {
            if let Some(error) = &outcome.error {
                self.audit
                    .audit(
                        "recovery-partial-errors",
                        Some(&entry.analyzed_key),
                        error,
                    )
                    .await;
            }
            let _ = execute_processes(
                self.runner.as_ref(),
                &self.config.post_failover_processes,
                "PostFailoverProcesses",
                entry,
                outcome.successor.as_ref(),
                false,
            )
            .await;
        }

        Ok(outcome)
    }
}

impl Clone for RecoveryController {
    fn clone(&self) -> Self {
        Self {
            analyzer: Arc::clone(&self.analyzer),
            planner: Arc::clone(&self.planner),
            refresher: self.refresher.clone(),
            runner: Arc::clone(&self.runner),
            audit: Arc::clone(&self.audit),
            config: Arc::clone(&self.config),
        }
    }
}
