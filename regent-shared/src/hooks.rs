use crate::analysis::AnalysisEntry;
use crate::exception::{RegentError, RegentResult};
use crate::instance::Instance;
use async_trait::async_trait;
use tracing::{error, info};

/// Runs one opaque shell command string to completion. Exit status zero is
/// success; anything else is a failure.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str) -> RegentResult<()>;
}

/// Process runner that hands the command to `sh -c`
#[derive(Debug, Default, Clone)]
pub struct ShellProcessRunner;

#[async_trait]
impl ProcessRunner for ShellProcessRunner {
    async fn run(&self, command: &str) -> RegentResult<()> {
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .await
            .map_err(|e| RegentError::internal(format!("failed to spawn command: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(RegentError::ProcessFailed {
                command: command.to_string(),
                status: status.code().unwrap_or(-1),
            })
        }
    }
}

/// Expand the agreed-upon placeholders in a hook command with analysis data.
///
/// Every literal occurrence is replaced, with no awareness of shell quoting;
/// values containing shell metacharacters reach the shell verbatim. That is
/// a compatibility requirement for existing operator hooks, and the reason
/// hook commands must come from trusted configuration only. Successor
/// placeholders are left unexpanded when no successor is known.
pub fn expand_placeholders(
    command: &str,
    entry: &AnalysisEntry,
    successor: Option<&Instance>,
) -> String {
    let mut command = command
        .replace("{failureType}", entry.verdict.as_str())
        .replace("{failureDescription}", &entry.description)
        .replace("{failedHost}", &entry.analyzed_key.hostname)
        .replace("{failedPort}", &entry.analyzed_key.port.to_string())
        .replace("{failureCluster}", &entry.cluster_name)
        .replace("{failureClusterAlias}", &entry.cluster_alias)
        .replace("{countSlaves}", &entry.count_replicas.to_string());

    if let Some(successor) = successor {
        command = command
            .replace("{successorHost}", &successor.key.hostname)
            .replace("{successorPort}", &successor.key.port.to_string());
    }

    command.replace("{slaveHosts}", &entry.replica_hosts_as_string())
}

/// Execute a list of hook commands, expanding placeholders in each.
///
/// The first error is remembered. With `fail_on_error` the remainder of the
/// list is skipped and that error returned immediately; otherwise every
/// command runs and the first error is returned at the end.
pub async fn execute_processes(
    runner: &dyn ProcessRunner,
    commands: &[String],
    description: &str,
    entry: &AnalysisEntry,
    successor: Option<&Instance>,
    fail_on_error: bool,
) -> RegentResult<()> {
    let mut first_error: Option<RegentError> = None;
    for command in commands {
        let command = expand_placeholders(command, entry, successor);
        match runner.run(&command).await {
            Ok(()) => {
                info!(hook = description, %command, "executed hook command");
            }
            Err(err) => {
                error!(hook = description, %command, %err, "hook command failed");
                if fail_on_error {
                    return Err(err);
                }
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
