use regent_shared::{
    AuditSink, ClockSource, EmergentRefresher, InstanceKey, ProcessRunner, PromotionPlanner,
    RecoveryController, RecoveryOutcome, RecoveryRegistrar, RecoveryStore, RecoveryStoreConfig,
    RegentConfig, RegentError, RegentResult, ReplicationAnalyzer, ShellProcessRunner,
    SqliteRecoveryStore, SystemClock, TopologyStore, TracingAuditSink,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with an env-filter; `RUST_LOG` overrides the default
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}

/// Builder for [`RegentServer`].
///
/// The topology store and the analyzer come from the embedding deployment;
/// everything else defaults to the in-repo implementations.
pub struct RegentServerBuilder {
    config: RegentConfig,
    node_hostname: Option<String>,
    analyzer: Option<Arc<dyn ReplicationAnalyzer>>,
    topology_store: Option<Arc<dyn TopologyStore>>,
    recovery_store: Option<Arc<dyn RecoveryStore>>,
    process_runner: Option<Arc<dyn ProcessRunner>>,
    audit: Option<Arc<dyn AuditSink>>,
    clock: Option<Arc<dyn ClockSource>>,
}

impl RegentServerBuilder {
    pub fn new(config: RegentConfig) -> Self {
        Self {
            config,
            node_hostname: None,
            analyzer: None,
            topology_store: None,
            recovery_store: None,
            process_runner: None,
            audit: None,
            clock: None,
        }
    }

    pub fn with_node_hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.node_hostname = Some(hostname.into());
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ReplicationAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_topology_store(mut self, store: Arc<dyn TopologyStore>) -> Self {
        self.topology_store = Some(store);
        self
    }

    pub fn with_recovery_store(mut self, store: Arc<dyn RecoveryStore>) -> Self {
        self.recovery_store = Some(store);
        self
    }

    pub fn with_process_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.process_runner = Some(runner);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub async fn build(self) -> RegentResult<RegentServer> {
        let analyzer = self
            .analyzer
            .ok_or_else(|| RegentError::configuration("no replication analyzer configured"))?;
        let topology_store = self
            .topology_store
            .ok_or_else(|| RegentError::configuration("no topology store configured"))?;

        let config = Arc::new(self.config);
        let recovery_store = match self.recovery_store {
            Some(store) => store,
            None => Arc::new(
                SqliteRecoveryStore::new(RecoveryStoreConfig {
                    database_path: config.recovery_database_path.clone(),
                    ..Default::default()
                })
                .await?,
            ),
        };
        let process_runner = self
            .process_runner
            .unwrap_or_else(|| Arc::new(ShellProcessRunner));
        let audit = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let node_hostname = self.node_hostname.unwrap_or_else(|| {
            std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
        });

        let registrar = Arc::new(RecoveryRegistrar::new(
            recovery_store,
            Arc::clone(&clock),
            node_hostname,
            config.recovery_block_duration(),
        ));
        let planner = Arc::new(PromotionPlanner::new(
            Arc::clone(&topology_store),
            registrar,
            Arc::clone(&process_runner),
            Arc::clone(&audit),
            Arc::clone(&config),
        ));
        let refresher = EmergentRefresher::new(
            topology_store,
            Arc::clone(&audit),
            config.topology_pool_size,
            config.discovery_poll_duration(),
        );
        let controller = RecoveryController::new(
            analyzer,
            planner,
            refresher,
            process_runner,
            audit,
            Arc::clone(&config),
        );

        Ok(RegentServer { config, controller })
    }
}

/// Long-lived recovery service: sweeps the fleet for failures on every
/// poll tick and dispatches recoveries per policy.
pub struct RegentServer {
    config: Arc<RegentConfig>,
    controller: RecoveryController,
}

impl RegentServer {
    pub fn builder(config: RegentConfig) -> RegentServerBuilder {
        RegentServerBuilder::new(config)
    }

    pub fn controller(&self) -> &RecoveryController {
        &self.controller
    }

    /// One check-and-recover sweep over the current analyses
    pub async fn run_once(&self) -> RegentResult<RecoveryOutcome> {
        self.controller.check_and_recover(None, None, false).await
    }

    /// Imperative entry point: recover a specific instance, optionally in
    /// force mode (synchronous, bypassing filters and the cluster cooldown)
    pub async fn check_and_recover(
        &self,
        specific_instance: Option<&InstanceKey>,
        candidate_key: Option<&InstanceKey>,
        skip_filters: bool,
    ) -> RegentResult<RecoveryOutcome> {
        self.controller
            .check_and_recover(specific_instance, candidate_key, skip_filters)
            .await
    }

    /// Run the continuous recovery loop until ctrl-c.
    ///
    /// Sweep failures are logged and the loop carries on; only losing the
    /// process stops recovery.
    pub async fn start(&self) -> RegentResult<()> {
        info!(
            poll_seconds = self.config.recovery_poll_seconds,
            "regent server starting"
        );
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.recovery_poll_seconds.max(1),
        ));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.run_once().await {
                        error!(%err, "recovery sweep failed");
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        error!(%err, "failed listening for shutdown signal");
                    }
                    info!("shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}
