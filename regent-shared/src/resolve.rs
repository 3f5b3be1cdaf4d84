use crate::exception::RegentResult;
use crate::topology::ClockSource;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Forward and reverse hostname mapping with expiry
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    /// Map a hostname to its resolved form; unknown hostnames pass through
    /// unchanged
    async fn resolve(&self, hostname: &str) -> RegentResult<String>;

    /// Reverse lookup: a hostname that resolves to the given name, or the
    /// input unchanged when none is known
    async fn unresolve(&self, hostname: &str) -> RegentResult<String>;
}

#[derive(Debug, Clone)]
struct ResolveEntry {
    resolved: String,
    resolved_at: DateTime<Utc>,
}

/// In-process hostname resolve cache.
///
/// Instances register under many names (short names, FQDNs, VIPs); the
/// cache pins each observed hostname to the canonical form so that keys
/// compare consistently across analyses.
pub struct HostnameResolveCache {
    entries: DashMap<String, ResolveEntry>,
    clock: Arc<dyn ClockSource>,
    expiry: Duration,
}

impl HostnameResolveCache {
    /// `expiry_minutes` matches the operator setting; entries survive twice
    /// that long before `forget_expired` drops them
    pub fn new(clock: Arc<dyn ClockSource>, expiry_minutes: i64) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            expiry: Duration::minutes(expiry_minutes * 2),
        }
    }

    /// Record a hostname and its resolved form, refreshing the timestamp on
    /// re-registration
    pub fn write_resolved(&self, hostname: &str, resolved: &str) {
        debug!(hostname, resolved, "recording hostname resolve");
        self.entries.insert(
            hostname.to_string(),
            ResolveEntry {
                resolved: resolved.to_string(),
                resolved_at: self.clock.now(),
            },
        );
    }

    /// The resolved form of a hostname, if one is cached
    pub fn read_resolved(&self, hostname: &str) -> Option<String> {
        self.entries.get(hostname).map(|entry| entry.resolved.clone())
    }

    /// Drop mappings past their expiry window
    pub fn forget_expired(&self) -> usize {
        let cutoff = self.clock.now() - self.expiry;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.resolved_at >= cutoff);
        before - self.entries.len()
    }

    /// Remove mutual-loop mappings: when both A→B and B→A are cached, the
    /// earlier mapping is the invalid one and is dropped.
    ///
    /// Works on a snapshot; nested map access during iteration would
    /// contend on the shard locks.
    pub fn delete_invalid_resolves(&self) -> usize {
        let snapshot: Vec<(String, ResolveEntry)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut invalid: Vec<String> = Vec::new();
        for (hostname, resolve) in &snapshot {
            if hostname == &resolve.resolved {
                continue;
            }
            if let Some((_, reverse)) = snapshot.iter().find(|(h, _)| h == &resolve.resolved) {
                if &reverse.resolved == hostname && resolve.resolved_at > reverse.resolved_at {
                    invalid.push(resolve.resolved.clone());
                }
            }
        }
        for hostname in &invalid {
            debug!(hostname, "dropping invalid hostname resolve");
            self.entries.remove(hostname);
        }
        invalid.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl HostnameResolver for HostnameResolveCache {
    async fn resolve(&self, hostname: &str) -> RegentResult<String> {
        Ok(self
            .read_resolved(hostname)
            .unwrap_or_else(|| hostname.to_string()))
    }

    async fn unresolve(&self, hostname: &str) -> RegentResult<String> {
        for entry in self.entries.iter() {
            if entry.value().resolved == hostname {
                return Ok(entry.key().clone());
            }
        }
        Ok(hostname.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::SystemClock;
    use std::sync::Mutex;

    struct MockClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl MockClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Utc::now()),
            }
        }

        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl ClockSource for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn test_resolve_roundtrip() {
        let cache = HostnameResolveCache::new(Arc::new(SystemClock), 60);
        cache.write_resolved("db1", "db1.example.com");

        assert_eq!(cache.resolve("db1").await.unwrap(), "db1.example.com");
        assert_eq!(cache.unresolve("db1.example.com").await.unwrap(), "db1");
    }

    #[tokio::test]
    async fn test_unknown_hostname_passes_through() {
        let cache = HostnameResolveCache::new(Arc::new(SystemClock), 60);
        assert_eq!(cache.resolve("unknown").await.unwrap(), "unknown");
        assert_eq!(cache.unresolve("unknown").await.unwrap(), "unknown");
    }

    #[test]
    fn test_forget_expired() {
        let clock = Arc::new(MockClock::new());
        let cache = HostnameResolveCache::new(Arc::clone(&clock) as Arc<dyn ClockSource>, 1);

        cache.write_resolved("old", "old.example.com");
        clock.advance(Duration::minutes(3));
        cache.write_resolved("fresh", "fresh.example.com");

        assert_eq!(cache.forget_expired(), 1);
        assert!(cache.read_resolved("old").is_none());
        assert_eq!(
            cache.read_resolved("fresh").as_deref(),
            Some("fresh.example.com")
        );
    }

    #[test]
    fn test_delete_invalid_drops_earlier_loop_mapping() {
        let clock = Arc::new(MockClock::new());
        let cache = HostnameResolveCache::new(Arc::clone(&clock) as Arc<dyn ClockSource>, 60);

        cache.write_resolved("a.example.com", "b.example.com");
        clock.advance(Duration::seconds(10));
        cache.write_resolved("b.example.com", "a.example.com");

        assert_eq!(cache.delete_invalid_resolves(), 1);
        // The earlier mapping (a -> b) was the invalid one
        assert!(cache.read_resolved("a.example.com").is_none());
        assert_eq!(
            cache.read_resolved("b.example.com").as_deref(),
            Some("a.example.com")
        );
    }

    #[test]
    fn test_self_mapping_is_not_a_loop() {
        let cache = HostnameResolveCache::new(Arc::new(SystemClock), 60);
        cache.write_resolved("a.example.com", "a.example.com");
        assert_eq!(cache.delete_invalid_resolves(), 0);
        assert_eq!(cache.len(), 1);
    }
}
