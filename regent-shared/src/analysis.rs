use crate::instance::InstanceKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Verdict derived from raw per-instance observations.
///
/// The display form of each variant is an operator-facing identifier: it is
/// what `{failureType}` expands to in hook commands and what the persistent
/// recovery record stores. Renaming a variant's display string breaks
/// existing operator tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisVerdict {
    NoProblem,
    DeadMaster,
    DeadMasterAndSomeSlaves,
    DeadMasterWithoutSlaves,
    UnreachableMaster,
    AllMasterSlavesNotReplicating,
    DeadIntermediateMaster,
    DeadIntermediateMasterAndSomeSlaves,
    UnreachableIntermediateMaster,
    AllIntermediateMasterSlavesNotReplicating,
    DeadCoMaster,
    FirstTierSlaveFailingToConnectToMaster,
}

impl AnalysisVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisVerdict::NoProblem => "NoProblem",
            AnalysisVerdict::DeadMaster => "DeadMaster",
            AnalysisVerdict::DeadMasterAndSomeSlaves => "DeadMasterAndSomeSlaves",
            AnalysisVerdict::DeadMasterWithoutSlaves => "DeadMasterWithoutSlaves",
            AnalysisVerdict::UnreachableMaster => "UnreachableMaster",
            AnalysisVerdict::AllMasterSlavesNotReplicating => "AllMasterSlavesNotReplicating",
            AnalysisVerdict::DeadIntermediateMaster => "DeadIntermediateMaster",
            AnalysisVerdict::DeadIntermediateMasterAndSomeSlaves => {
                "DeadIntermediateMasterAndSomeSlaves"
            }
            AnalysisVerdict::UnreachableIntermediateMaster => "UnreachableIntermediateMaster",
            AnalysisVerdict::AllIntermediateMasterSlavesNotReplicating => {
                "AllIntermediateMasterSlavesNotReplicating"
            }
            AnalysisVerdict::DeadCoMaster => "DeadCoMaster",
            AnalysisVerdict::FirstTierSlaveFailingToConnectToMaster => {
                "FirstTierSlaveFailingToConnectToMaster"
            }
        }
    }

    /// Parse the operator-facing identifier back into a verdict
    pub fn from_str_opt(s: &str) -> Option<Self> {
        let verdict = match s {
            "NoProblem" => AnalysisVerdict::NoProblem,
            "DeadMaster" => AnalysisVerdict::DeadMaster,
            "DeadMasterAndSomeSlaves" => AnalysisVerdict::DeadMasterAndSomeSlaves,
            "DeadMasterWithoutSlaves" => AnalysisVerdict::DeadMasterWithoutSlaves,
            "UnreachableMaster" => AnalysisVerdict::UnreachableMaster,
            "AllMasterSlavesNotReplicating" => AnalysisVerdict::AllMasterSlavesNotReplicating,
            "DeadIntermediateMaster" => AnalysisVerdict::DeadIntermediateMaster,
            "DeadIntermediateMasterAndSomeSlaves" => {
                AnalysisVerdict::DeadIntermediateMasterAndSomeSlaves
            }
            "UnreachableIntermediateMaster" => AnalysisVerdict::UnreachableIntermediateMaster,
            "AllIntermediateMasterSlavesNotReplicating" => {
                AnalysisVerdict::AllIntermediateMasterSlavesNotReplicating
            }
            "DeadCoMaster" => AnalysisVerdict::DeadCoMaster,
            "FirstTierSlaveFailingToConnectToMaster" => {
                AnalysisVerdict::FirstTierSlaveFailingToConnectToMaster
            }
            _ => return None,
        };
        Some(verdict)
    }
}

impl fmt::Display for AnalysisVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analyzed failure: the verdict plus everything the recovery pipeline
/// and the hook placeholders need to know about the failed instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisEntry {
    pub verdict: AnalysisVerdict,
    pub analyzed_key: InstanceKey,
    pub analyzed_upstream_key: Option<InstanceKey>,
    pub cluster_name: String,
    pub cluster_alias: String,
    pub count_replicas: u64,
    pub replica_hosts: Vec<InstanceKey>,
    pub description: String,
    pub is_downtimed: bool,
}

impl AnalysisEntry {
    pub fn new(verdict: AnalysisVerdict, analyzed_key: InstanceKey) -> Self {
        Self {
            verdict,
            analyzed_key,
            analyzed_upstream_key: None,
            cluster_name: String::new(),
            cluster_alias: String::new(),
            count_replicas: 0,
            replica_hosts: Vec::new(),
            description: String::new(),
            is_downtimed: false,
        }
    }

    /// Comma-separated `host:port` list, the `{slaveHosts}` expansion
    pub fn replica_hosts_as_string(&self) -> String {
        self.replica_hosts
            .iter()
            .map(|key| key.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for AnalysisEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.verdict, self.analyzed_key)
    }
}
