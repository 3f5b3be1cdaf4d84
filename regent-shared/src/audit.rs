use crate::instance::InstanceKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regent_util::TimeUtils;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// One recorded audit event
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub instance_key: Option<InstanceKey>,
    pub message: String,
}

/// Destination for operator-visible audit events.
///
/// Recovery progress is audited at every phase: problem found, hooks run,
/// promotion outcome, partial errors, emergent reads.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn audit(&self, operation: &str, instance_key: Option<&InstanceKey>, message: &str);
}

/// Audit sink that emits structured tracing events
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn audit(&self, operation: &str, instance_key: Option<&InstanceKey>, message: &str) {
        match instance_key {
            Some(key) => info!(operation, instance = %key, "{}", message),
            None => info!(operation, "{}", message),
        }
    }
}

/// Audit sink that records events in memory, for assertions in tests and
/// for the in-process audit page
pub struct InMemoryAuditSink {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    /// Events recorded for a given operation name
    pub async fn events_for_operation(&self, operation: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.operation == operation)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryAuditSink {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn audit(&self, operation: &str, instance_key: Option<&InstanceKey>, message: &str) {
        let mut events = self.events.write().await;
        events.push(AuditEvent {
            timestamp: TimeUtils::now(),
            operation: operation.to_string(),
            instance_key: instance_key.cloned(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_sink_records() {
        let sink = InMemoryAuditSink::new();
        let key = InstanceKey::new("db1", 3306);

        sink.audit("recover-dead-master", Some(&key), "problem found").await;
        sink.audit("emergently-read-topology-instance", None, "UnreachableMaster")
            .await;

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].operation, "recover-dead-master");
        assert_eq!(events[0].instance_key.as_ref(), Some(&key));

        let filtered = sink.events_for_operation("recover-dead-master").await;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].message, "problem found");
    }

    #[tokio::test]
    async fn test_clone_shares_events() {
        let sink = InMemoryAuditSink::new();
        let clone = sink.clone();
        clone.audit("op", None, "via clone").await;
        assert_eq!(sink.events().await.len(), 1);
    }
}
