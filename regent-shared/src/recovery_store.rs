use crate::analysis::{AnalysisEntry, AnalysisVerdict};
use crate::exception::{RegentError, RegentResult};
use crate::instance::InstanceKey;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Persistent record of one recovery attempt. Created at claim time,
/// flipped inactive on completion, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyRecovery {
    pub recovery_id: i64,
    pub verdict: AnalysisVerdict,
    pub analyzed_key: InstanceKey,
    pub cluster_name: String,
    pub cluster_alias: String,
    pub description: String,
    pub successor_key: Option<InstanceKey>,
    pub is_active: bool,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub processing_node_hostname: String,
    pub processing_node_token: String,
}

/// Durable registry of recovery claims, shared by all orchestrator peers.
///
/// The store is the serialization point for the at-most-one-active-recovery
/// guarantee: `claim_recovery` must be atomic with respect to concurrent
/// claims for the same analyzed key, whichever peer they come from.
#[async_trait]
pub trait RecoveryStore: Send + Sync {
    /// Atomically insert an active recovery row for the entry's analyzed
    /// key. Declines (returns `None`) when an active row already exists for
    /// that key, or when `cooldown` is given and any recovery for the
    /// entry's cluster ended within that window before `now`.
    async fn claim_recovery(
        &self,
        entry: &AnalysisEntry,
        node_hostname: &str,
        node_token: &str,
        now: DateTime<Utc>,
        cooldown: Option<Duration>,
    ) -> RegentResult<Option<TopologyRecovery>>;

    /// Flip the active recovery for `failed_key` to inactive, recording the
    /// successor and the end timestamp
    async fn resolve_recovery(
        &self,
        failed_key: &InstanceKey,
        successor_key: Option<&InstanceKey>,
        now: DateTime<Utc>,
    ) -> RegentResult<()>;

    /// The active recovery for the given key, if any
    async fn read_active_recovery(
        &self,
        key: &InstanceKey,
    ) -> RegentResult<Option<TopologyRecovery>>;

    /// Recoveries for the cluster that ended at or after `since`
    async fn read_recent_recoveries(
        &self,
        cluster_name: &str,
        since: DateTime<Utc>,
    ) -> RegentResult<Vec<TopologyRecovery>>;
}

/// Configuration for the SQLite-backed recovery store
#[derive(Debug, Clone)]
pub struct RecoveryStoreConfig {
    /// Database file path
    pub database_path: PathBuf,
    /// Enable Write-Ahead Logging
    pub enable_wal: bool,
}

impl Default for RecoveryStoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("regent_recovery.db"),
            enable_wal: true,
        }
    }
}

/// SQLite-backed recovery store.
///
/// The partial unique index on the active flag is what makes concurrent
/// claims from multiple peers safe: at most one insert for a given analyzed
/// key can ever hold `is_active = 1`.
pub struct SqliteRecoveryStore {
    pool: SqlitePool,
    config: RecoveryStoreConfig,
}

impl SqliteRecoveryStore {
    pub async fn new(config: RecoveryStoreConfig) -> RegentResult<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    RegentError::store(format!("failed to create database directory: {e}"))
                })?;
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", config.database_path.display());
        let pool = SqlitePool::connect(&database_url)
            .await
            .map_err(|e| RegentError::store(format!("failed to connect to database: {e}")))?;

        let store = Self { pool, config };
        store.initialize_schema().await?;
        store.configure_database().await?;

        info!(
            "recovery store initialized: {}",
            store.config.database_path.display()
        );
        Ok(store)
    }

    async fn initialize_schema(&self) -> RegentResult<()> {
        let schema_sql = r#"
            CREATE TABLE IF NOT EXISTS topology_recovery (
                recovery_id INTEGER PRIMARY KEY AUTOINCREMENT,
                analyzed_hostname TEXT NOT NULL,
                analyzed_port INTEGER NOT NULL,
                verdict TEXT NOT NULL,
                cluster_name TEXT NOT NULL,
                cluster_alias TEXT NOT NULL,
                description TEXT NOT NULL,
                successor_hostname TEXT,
                successor_port INTEGER,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                start_timestamp INTEGER NOT NULL,
                end_timestamp INTEGER,
                processing_node_hostname TEXT NOT NULL,
                processing_node_token TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_recovery_active_key
            ON topology_recovery(analyzed_hostname, analyzed_port)
            WHERE is_active = 1;

            CREATE INDEX IF NOT EXISTS idx_recovery_cluster_end
            ON topology_recovery(cluster_name, end_timestamp);
        "#;

        sqlx::query(schema_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| RegentError::store(format!("failed to initialize schema: {e}")))?;

        Ok(())
    }

    async fn configure_database(&self) -> RegentResult<()> {
        let journal_mode = if self.config.enable_wal {
            "PRAGMA journal_mode = WAL"
        } else {
            "PRAGMA journal_mode = DELETE"
        };
        sqlx::query(journal_mode)
            .execute(&self.pool)
            .await
            .map_err(|e| RegentError::store(format!("failed to set journal mode: {e}")))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| RegentError::store(format!("failed to set synchronous mode: {e}")))?;

        debug!(wal = self.config.enable_wal, "recovery store configured");
        Ok(())
    }

    fn row_to_recovery(row: &sqlx::sqlite::SqliteRow) -> RegentResult<TopologyRecovery> {
        let verdict_name: String = row.get("verdict");
        let verdict = AnalysisVerdict::from_str_opt(&verdict_name)
            .ok_or_else(|| RegentError::store(format!("unknown verdict in store: {verdict_name}")))?;

        let successor_hostname: Option<String> = row.get("successor_hostname");
        let successor_port: Option<i64> = row.get("successor_port");
        let successor_key = match (successor_hostname, successor_port) {
            (Some(hostname), Some(port)) => Some(InstanceKey::new(hostname, port as u16)),
            _ => None,
        };

        let start_millis: i64 = row.get("start_timestamp");
        let end_millis: Option<i64> = row.get("end_timestamp");

        Ok(TopologyRecovery {
            recovery_id: row.get("recovery_id"),
            verdict,
            analyzed_key: InstanceKey::new(
                row.get::<String, _>("analyzed_hostname"),
                row.get::<i64, _>("analyzed_port") as u16,
            ),
            cluster_name: row.get("cluster_name"),
            cluster_alias: row.get("cluster_alias"),
            description: row.get("description"),
            successor_key,
            is_active: row.get("is_active"),
            start_timestamp: millis_to_datetime(start_millis),
            end_timestamp: end_millis.map(millis_to_datetime),
            processing_node_hostname: row.get("processing_node_hostname"),
            processing_node_token: row.get("processing_node_token"),
        })
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

#[async_trait]
impl RecoveryStore for SqliteRecoveryStore {
    async fn claim_recovery(
        &self,
        entry: &AnalysisEntry,
        node_hostname: &str,
        node_token: &str,
        now: DateTime<Utc>,
        cooldown: Option<Duration>,
    ) -> RegentResult<Option<TopologyRecovery>> {
        let hostname = entry.analyzed_key.hostname.to_ascii_lowercase();
        let port = entry.analyzed_key.port as i64;
        // With no cooldown in force, a cutoff in the far future of nothing:
        // end_timestamp > i64::MIN always admits
        let cooldown_cutoff = match cooldown {
            Some(window) => now.timestamp_millis() - window.num_milliseconds(),
            None => i64::MIN,
        };

        let result = sqlx::query(
            r#"INSERT INTO topology_recovery
               (analyzed_hostname, analyzed_port, verdict, cluster_name, cluster_alias,
                description, is_active, start_timestamp, processing_node_hostname, processing_node_token)
               SELECT ?, ?, ?, ?, ?, ?, 1, ?, ?, ?
               WHERE NOT EXISTS (
                   SELECT 1 FROM topology_recovery
                   WHERE analyzed_hostname = ? AND analyzed_port = ? AND is_active = 1
               )
               AND NOT EXISTS (
                   SELECT 1 FROM topology_recovery
                   WHERE cluster_name = ? AND end_timestamp IS NOT NULL AND end_timestamp > ?
               )"#,
        )
        .bind(&hostname)
        .bind(port)
        .bind(entry.verdict.as_str())
        .bind(&entry.cluster_name)
        .bind(&entry.cluster_alias)
        .bind(&entry.description)
        .bind(now.timestamp_millis())
        .bind(node_hostname)
        .bind(node_token)
        .bind(&hostname)
        .bind(port)
        .bind(&entry.cluster_name)
        .bind(cooldown_cutoff)
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            // A racing peer inserted first; the partial unique index kicked in
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Ok(None);
            }
            Err(e) => return Err(RegentError::store(format!("failed to claim recovery: {e}"))),
        };

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM topology_recovery WHERE recovery_id = ?")
            .bind(result.last_insert_rowid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RegentError::store(format!("failed to read claimed recovery: {e}")))?;

        Ok(Some(Self::row_to_recovery(&row)?))
    }

    async fn resolve_recovery(
        &self,
        failed_key: &InstanceKey,
        successor_key: Option<&InstanceKey>,
        now: DateTime<Utc>,
    ) -> RegentResult<()> {
        sqlx::query(
            r#"UPDATE topology_recovery
               SET is_active = 0,
                   end_timestamp = ?,
                   successor_hostname = ?,
                   successor_port = ?
               WHERE analyzed_hostname = ? AND analyzed_port = ? AND is_active = 1"#,
        )
        .bind(now.timestamp_millis())
        .bind(successor_key.map(|key| key.hostname.to_ascii_lowercase()))
        .bind(successor_key.map(|key| key.port as i64))
        .bind(failed_key.hostname.to_ascii_lowercase())
        .bind(failed_key.port as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| RegentError::store(format!("failed to resolve recovery: {e}")))?;

        debug!(failed = %failed_key, "resolved recovery");
        Ok(())
    }

    async fn read_active_recovery(
        &self,
        key: &InstanceKey,
    ) -> RegentResult<Option<TopologyRecovery>> {
        let row = sqlx::query(
            r#"SELECT * FROM topology_recovery
               WHERE analyzed_hostname = ? AND analyzed_port = ? AND is_active = 1"#,
        )
        .bind(key.hostname.to_ascii_lowercase())
        .bind(key.port as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RegentError::store(format!("failed to read active recovery: {e}")))?;

        row.as_ref().map(Self::row_to_recovery).transpose()
    }

    async fn read_recent_recoveries(
        &self,
        cluster_name: &str,
        since: DateTime<Utc>,
    ) -> RegentResult<Vec<TopologyRecovery>> {
        let rows = sqlx::query(
            r#"SELECT * FROM topology_recovery
               WHERE cluster_name = ? AND end_timestamp IS NOT NULL AND end_timestamp >= ?
               ORDER BY end_timestamp DESC"#,
        )
        .bind(cluster_name)
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RegentError::store(format!("failed to read recent recoveries: {e}")))?;

        rows.iter().map(Self::row_to_recovery).collect()
    }
}

/// In-memory recovery store with the same conditional-claim semantics,
/// for tests and single-node ephemeral deployments
pub struct InMemoryRecoveryStore {
    state: Arc<Mutex<InMemoryState>>,
}

struct InMemoryState {
    recoveries: Vec<TopologyRecovery>,
    next_id: i64,
}

impl InMemoryRecoveryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState {
                recoveries: Vec::new(),
                next_id: 1,
            })),
        }
    }

    /// Every recovery ever recorded, newest last
    pub async fn all_recoveries(&self) -> Vec<TopologyRecovery> {
        self.state.lock().await.recoveries.clone()
    }
}

impl Default for InMemoryRecoveryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryRecoveryStore {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

#[async_trait]
impl RecoveryStore for InMemoryRecoveryStore {
    async fn claim_recovery(
        &self,
        entry: &AnalysisEntry,
        node_hostname: &str,
        node_token: &str,
        now: DateTime<Utc>,
        cooldown: Option<Duration>,
    ) -> RegentResult<Option<TopologyRecovery>> {
        let mut state = self.state.lock().await;

        let key_already_claimed = state
            .recoveries
            .iter()
            .any(|r| r.is_active && r.analyzed_key == entry.analyzed_key);
        if key_already_claimed {
            return Ok(None);
        }

        if let Some(window) = cooldown {
            let cutoff = now - window;
            let cluster_in_cooldown = state.recoveries.iter().any(|r| {
                r.cluster_name == entry.cluster_name
                    && r.end_timestamp.map(|end| end > cutoff).unwrap_or(false)
            });
            if cluster_in_cooldown {
                return Ok(None);
            }
        }

        let recovery = TopologyRecovery {
            recovery_id: state.next_id,
            verdict: entry.verdict,
            analyzed_key: entry.analyzed_key.clone(),
            cluster_name: entry.cluster_name.clone(),
            cluster_alias: entry.cluster_alias.clone(),
            description: entry.description.clone(),
            successor_key: None,
            is_active: true,
            start_timestamp: now,
            end_timestamp: None,
            processing_node_hostname: node_hostname.to_string(),
            processing_node_token: node_token.to_string(),
        };
        state.next_id += 1;
        state.recoveries.push(recovery.clone());
        Ok(Some(recovery))
    }

    async fn resolve_recovery(
        &self,
        failed_key: &InstanceKey,
        successor_key: Option<&InstanceKey>,
        now: DateTime<Utc>,
    ) -> RegentResult<()> {
        let mut state = self.state.lock().await;
        for recovery in state.recoveries.iter_mut() {
            if recovery.is_active && &recovery.analyzed_key == failed_key {
                recovery.is_active = false;
                recovery.end_timestamp = Some(now);
                recovery.successor_key = successor_key.cloned();
            }
        }
        Ok(())
    }

    async fn read_active_recovery(
        &self,
        key: &InstanceKey,
    ) -> RegentResult<Option<TopologyRecovery>> {
        let state = self.state.lock().await;
        Ok(state
            .recoveries
            .iter()
            .find(|r| r.is_active && &r.analyzed_key == key)
            .cloned())
    }

    async fn read_recent_recoveries(
        &self,
        cluster_name: &str,
        since: DateTime<Utc>,
    ) -> RegentResult<Vec<TopologyRecovery>> {
        let state = self.state.lock().await;
        Ok(state
            .recoveries
            .iter()
            .filter(|r| {
                r.cluster_name == cluster_name
                    && r.end_timestamp.map(|end| end >= since).unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(host: &str, cluster: &str) -> AnalysisEntry {
        let mut entry =
            AnalysisEntry::new(AnalysisVerdict::DeadMaster, InstanceKey::new(host, 3306));
        entry.cluster_name = cluster.to_string();
        entry.cluster_alias = format!("{cluster}-alias");
        entry.description = "primary is dead".to_string();
        entry
    }

    async fn check_claim_semantics(store: &dyn RecoveryStore) {
        let now = Utc::now();
        let cooldown = Some(Duration::minutes(60));

        let claimed = store
            .claim_recovery(&entry("p", "c1"), "node-a", "token-a", now, cooldown)
            .await
            .unwrap();
        let claimed = claimed.expect("first claim should win");
        assert!(claimed.is_active);
        assert_eq!(claimed.analyzed_key, InstanceKey::new("p", 3306));

        // Second claim for the same key declines
        let second = store
            .claim_recovery(&entry("p", "c1"), "node-b", "token-b", now, cooldown)
            .await
            .unwrap();
        assert!(second.is_none());

        // Hostname case does not defeat the uniqueness
        let cased = store
            .claim_recovery(&entry("P", "c1"), "node-b", "token-b", now, cooldown)
            .await
            .unwrap();
        assert!(cased.is_none());

        // Resolve, then the cluster cooldown blocks re-entry...
        store
            .resolve_recovery(
                &InstanceKey::new("p", 3306),
                Some(&InstanceKey::new("r2", 3306)),
                now,
            )
            .await
            .unwrap();
        assert!(store
            .read_active_recovery(&InstanceKey::new("p", 3306))
            .await
            .unwrap()
            .is_none());

        let blocked = store
            .claim_recovery(
                &entry("p", "c1"),
                "node-a",
                "token-a",
                now + Duration::minutes(5),
                cooldown,
            )
            .await
            .unwrap();
        assert!(blocked.is_none());

        // ...but no cooldown (force) claims again
        let forced = store
            .claim_recovery(
                &entry("p", "c1"),
                "node-a",
                "token-a",
                now + Duration::minutes(5),
                None,
            )
            .await
            .unwrap();
        assert!(forced.is_some());

        // Past the window, claims for another instance of the cluster work
        store
            .resolve_recovery(&InstanceKey::new("p", 3306), None, now + Duration::minutes(6))
            .await
            .unwrap();
        let later = store
            .claim_recovery(
                &entry("q", "c1"),
                "node-a",
                "token-a",
                now + Duration::minutes(120),
                cooldown,
            )
            .await
            .unwrap();
        assert!(later.is_some());
    }

    #[tokio::test]
    async fn test_in_memory_claim_semantics() {
        let store = InMemoryRecoveryStore::new();
        check_claim_semantics(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_claim_semantics() {
        let dir = tempdir().unwrap();
        let store = SqliteRecoveryStore::new(RecoveryStoreConfig {
            database_path: dir.path().join("recovery_test.db"),
            enable_wal: true,
        })
        .await
        .unwrap();
        check_claim_semantics(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_resolve_records_successor() {
        let dir = tempdir().unwrap();
        let store = SqliteRecoveryStore::new(RecoveryStoreConfig {
            database_path: dir.path().join("recovery_test.db"),
            enable_wal: false,
        })
        .await
        .unwrap();

        let now = Utc::now();
        store
            .claim_recovery(&entry("p", "c1"), "node-a", "token-a", now, None)
            .await
            .unwrap()
            .expect("claim");
        store
            .resolve_recovery(
                &InstanceKey::new("p", 3306),
                Some(&InstanceKey::new("r2", 3306)),
                now,
            )
            .await
            .unwrap();

        let recent = store.read_recent_recoveries("c1", now - Duration::minutes(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(!recent[0].is_active);
        assert_eq!(
            recent[0].successor_key.as_ref(),
            Some(&InstanceKey::new("r2", 3306))
        );
        assert!(recent[0].end_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let store = Arc::new(InMemoryRecoveryStore::new());
        let now = Utc::now();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .claim_recovery(
                        &entry("p", "c1"),
                        &format!("node-{i}"),
                        "token",
                        now,
                        Some(Duration::minutes(60)),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_recovery_ids_monotonic() {
        let store = InMemoryRecoveryStore::new();
        let now = Utc::now();
        let first = store
            .claim_recovery(&entry("a", "c1"), "n", "t", now, None)
            .await
            .unwrap()
            .unwrap();
        let second = store
            .claim_recovery(&entry("b", "c2"), "n", "t", now, None)
            .await
            .unwrap()
            .unwrap();
        assert!(second.recovery_id > first.recovery_id);
    }
}
