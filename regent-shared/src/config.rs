use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Operator-facing configuration for the recovery core.
///
/// Field names serialize in the PascalCase form operators write in the TOML
/// config file; those spellings are a compatibility surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RegentConfig {
    /// Cooldown: a cluster that finished any recovery within this window
    /// declines new recovery registrations
    pub recovery_period_block_minutes: i64,

    /// Filters gating dead-primary recovery (see `filters_match`)
    pub recover_master_cluster_filters: Vec<String>,

    /// Filters gating dead-intermediate-primary recovery
    pub recover_intermediate_master_cluster_filters: Vec<String>,

    /// TTL of the emergent-read dedup window, in seconds
    pub discovery_poll_seconds: u64,

    /// Interval between check-and-recover sweeps, in seconds
    pub recovery_poll_seconds: u64,

    /// Concurrency cap on topology-wide operations such as emergent reads
    pub topology_pool_size: usize,

    /// Hostname resolve cache entries expire after twice this many minutes
    pub expiry_hostname_resolves_minutes: i64,

    /// Commands run before any failover action; a failure aborts recovery
    pub pre_failover_processes: Vec<String>,

    /// Commands run when a failure is detected, before recovery; a failure
    /// aborts recovery
    pub on_failure_detection_processes: Vec<String>,

    /// Commands run after any recovery that took action; failures are logged
    pub post_failover_processes: Vec<String>,

    /// Commands run after a dead-primary recovery; failures are logged
    pub post_master_failover_processes: Vec<String>,

    /// Commands run after a dead-intermediate-primary recovery; failures are
    /// logged
    pub post_intermediate_master_failover_processes: Vec<String>,

    /// Path of the SQLite database holding the recovery registry
    pub recovery_database_path: PathBuf,
}

impl Default for RegentConfig {
    fn default() -> Self {
        Self {
            recovery_period_block_minutes: 60,
            recover_master_cluster_filters: Vec::new(),
            recover_intermediate_master_cluster_filters: Vec::new(),
            discovery_poll_seconds: 5,
            recovery_poll_seconds: 1,
            topology_pool_size: 10,
            expiry_hostname_resolves_minutes: 60,
            pre_failover_processes: Vec::new(),
            on_failure_detection_processes: Vec::new(),
            post_failover_processes: Vec::new(),
            post_master_failover_processes: Vec::new(),
            post_intermediate_master_failover_processes: Vec::new(),
            recovery_database_path: PathBuf::from("regent_recovery.db"),
        }
    }
}

impl RegentConfig {
    pub fn recovery_block_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.recovery_period_block_minutes)
    }

    pub fn discovery_poll_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.discovery_poll_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegentConfig::default();
        assert_eq!(config.recovery_period_block_minutes, 60);
        assert_eq!(config.discovery_poll_seconds, 5);
        assert_eq!(config.topology_pool_size, 10);
        assert!(config.recover_master_cluster_filters.is_empty());
    }

    #[test]
    fn test_operator_key_spelling() {
        let config = RegentConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("RecoveryPeriodBlockMinutes").is_some());
        assert!(json.get("RecoverMasterClusterFilters").is_some());
        assert!(json.get("DiscoveryPollSeconds").is_some());
        assert!(json.get("PostIntermediateMasterFailoverProcesses").is_some());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: RegentConfig =
            serde_json::from_str(r#"{"RecoveryPeriodBlockMinutes": 15}"#).unwrap();
        assert_eq!(config.recovery_period_block_minutes, 15);
        assert_eq!(config.discovery_poll_seconds, 5);
    }

    #[test]
    fn test_block_duration() {
        let config = RegentConfig {
            recovery_period_block_minutes: 2,
            ..Default::default()
        };
        assert_eq!(config.recovery_block_duration().num_seconds(), 120);
    }
}
