use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Unique identifier for a database instance: hostname and port.
///
/// Hostname comparison is ASCII case-insensitive, so `DB1.example.com:3306`
/// and `db1.example.com:3306` are the same instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceKey {
    pub hostname: String,
    pub port: u16,
}

impl InstanceKey {
    pub fn new<S: Into<String>>(hostname: S, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// Parse a key from `host:port` format
    pub fn from_string(s: &str) -> Option<Self> {
        let (hostname, port) = s.rsplit_once(':')?;
        let port = port.parse().ok()?;
        if hostname.is_empty() {
            return None;
        }
        Some(Self::new(hostname, port))
    }

    fn normalized_hostname(&self) -> String {
        self.hostname.to_ascii_lowercase()
    }
}

impl PartialEq for InstanceKey {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.hostname.eq_ignore_ascii_case(&other.hostname)
    }
}

impl Eq for InstanceKey {}

impl Hash for InstanceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized_hostname().hash(state);
        self.port.hash(state);
    }
}

impl PartialOrd for InstanceKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InstanceKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized_hostname()
            .cmp(&other.normalized_hostname())
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Binary log file/position pair.
///
/// Ordering is lexicographic on the file name, then numeric on the position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct BinlogCoordinates {
    pub log_file: String,
    pub log_pos: u64,
}

impl BinlogCoordinates {
    pub fn new<S: Into<String>>(log_file: S, log_pos: u64) -> Self {
        Self {
            log_file: log_file.into(),
            log_pos,
        }
    }

    pub fn smaller_than(&self, other: &Self) -> bool {
        self < other
    }
}

impl fmt::Display for BinlogCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.log_file, self.log_pos)
    }
}

/// Point-in-time snapshot of one database server, read through the
/// topology store. Treated as immutable for the duration of one recovery
/// decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub key: InstanceKey,
    pub upstream_key: Option<InstanceKey>,
    pub downstream_keys: BTreeSet<InstanceKey>,
    pub exec_coordinates: BinlogCoordinates,
    pub read_coordinates: BinlogCoordinates,
    pub binlog_enabled: bool,
    pub log_replica_updates: bool,
    pub replica_running: bool,
    pub last_check_valid: bool,
    pub has_replication_filters: bool,
    pub is_max_scale: bool,
    pub cluster_name: String,
    pub cluster_alias: String,
    pub data_center: String,
    pub physical_environment: String,
}

impl Instance {
    /// A bare instance with the given key; everything else defaulted.
    pub fn with_key(key: InstanceKey) -> Self {
        Self {
            key,
            upstream_key: None,
            downstream_keys: BTreeSet::new(),
            exec_coordinates: BinlogCoordinates::default(),
            read_coordinates: BinlogCoordinates::default(),
            binlog_enabled: false,
            log_replica_updates: false,
            replica_running: false,
            last_check_valid: false,
            has_replication_filters: false,
            is_max_scale: false,
            cluster_name: String::new(),
            cluster_alias: String::new(),
            data_center: String::new(),
            physical_environment: String::new(),
        }
    }

    /// Whether this instance replicates from the given key
    pub fn replicates_from(&self, key: &InstanceKey) -> bool {
        self.upstream_key.as_ref() == Some(key)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_equality_case_insensitive() {
        let a = InstanceKey::new("DB1.Example.Com", 3306);
        let b = InstanceKey::new("db1.example.com", 3306);
        assert_eq!(a, b);

        let c = InstanceKey::new("db1.example.com", 3307);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_hash_matches_equality() {
        let mut set = HashSet::new();
        set.insert(InstanceKey::new("DB1", 3306));
        assert!(set.contains(&InstanceKey::new("db1", 3306)));
        assert!(!set.contains(&InstanceKey::new("db2", 3306)));
    }

    #[test]
    fn test_key_from_string() {
        let key = InstanceKey::from_string("db1.example.com:3306").unwrap();
        assert_eq!(key.hostname, "db1.example.com");
        assert_eq!(key.port, 3306);

        assert!(InstanceKey::from_string("no-port").is_none());
        assert!(InstanceKey::from_string(":3306").is_none());
        assert!(InstanceKey::from_string("host:notaport").is_none());
    }

    #[test]
    fn test_key_display_roundtrip() {
        let key = InstanceKey::new("db1", 3306);
        assert_eq!(key.to_string(), "db1:3306");
        assert_eq!(InstanceKey::from_string(&key.to_string()).unwrap(), key);
    }

    #[test]
    fn test_coordinates_ordering() {
        let a = BinlogCoordinates::new("mysql-bin.000010", 500);
        let b = BinlogCoordinates::new("mysql-bin.000010", 700);
        let c = BinlogCoordinates::new("mysql-bin.000011", 4);

        assert!(a.smaller_than(&b));
        assert!(b.smaller_than(&c));
        assert!(a.smaller_than(&c));
        assert!(!c.smaller_than(&a));
        assert!(!a.smaller_than(&a.clone()));
    }

    #[test]
    fn test_coordinates_total_order_is_strict() {
        let a = BinlogCoordinates::new("mysql-bin.000010", 500);
        let b = BinlogCoordinates::new("mysql-bin.000010", 500);
        assert_eq!(a, b);
        assert!(!a.smaller_than(&b));
        assert!(!b.smaller_than(&a));
    }

    #[test]
    fn test_sort_stable_on_equal_coordinates() {
        let mk = |host: &str, pos: u64| {
            let mut inst = Instance::with_key(InstanceKey::new(host, 3306));
            inst.exec_coordinates = BinlogCoordinates::new("mysql-bin.000001", pos);
            inst
        };
        let mut instances = vec![mk("a", 10), mk("b", 10), mk("c", 10)];
        instances.sort_by(|x, y| x.exec_coordinates.cmp(&y.exec_coordinates));
        let order: Vec<_> = instances.iter().map(|i| i.key.hostname.clone()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_replicates_from() {
        let primary = InstanceKey::new("p", 3306);
        let mut replica = Instance::with_key(InstanceKey::new("r", 3306));
        replica.upstream_key = Some(primary.clone());
        assert!(replica.replicates_from(&primary));
        assert!(!replica.replicates_from(&InstanceKey::new("x", 3306)));
    }
}
