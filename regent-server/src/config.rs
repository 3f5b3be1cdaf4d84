use regent_shared::{RegentConfig, RegentError, RegentResult};
use std::path::Path;
use tracing::{info, warn};

/// Load configuration from a TOML file, falling back to defaults when the
/// file does not exist. Keys are spelled in their operator-facing form,
/// e.g. `RecoveryPeriodBlockMinutes = 30`.
pub async fn load_config(path: &Path) -> RegentResult<RegentConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(RegentConfig::default());
    }

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RegentError::configuration(format!("cannot read config file: {e}")))?;
    let config: RegentConfig = toml::from_str(&raw)
        .map_err(|e| RegentError::configuration(format!("cannot parse config file: {e}")))?;

    info!(path = %path.display(), "configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/regent.toml"))
            .await
            .unwrap();
        assert_eq!(config.recovery_period_block_minutes, 60);
    }

    #[tokio::test]
    async fn test_load_operator_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regent.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
RecoveryPeriodBlockMinutes = 30
DiscoveryPollSeconds = 3
RecoverMasterClusterFilters = ["alias=prod", "cluster-.*"]
PreFailoverProcesses = ["/usr/local/bin/wall 'failing over {{failureCluster}}'"]
"#
        )
        .unwrap();

        let config = load_config(&path).await.unwrap();
        assert_eq!(config.recovery_period_block_minutes, 30);
        assert_eq!(config.discovery_poll_seconds, 3);
        assert_eq!(
            config.recover_master_cluster_filters,
            vec!["alias=prod", "cluster-.*"]
        );
        assert_eq!(config.pre_failover_processes.len(), 1);
        // Untouched keys keep their defaults
        assert_eq!(config.recovery_poll_seconds, 1);
    }

    #[tokio::test]
    async fn test_malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regent.toml");
        std::fs::write(&path, "RecoveryPeriodBlockMinutes = \"not a number\"").unwrap();

        let err = load_config(&path).await.unwrap_err();
        assert!(matches!(err, RegentError::Configuration(_)));
    }
}
