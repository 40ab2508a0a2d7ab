//! Command-sequence selection per Job kind (§4.9 concretion; §3: "opaque
//! parameter bag interpreted by the job kind's handler" on `Job::params`).

use crate::entities::{Job, JobKind};

const DEFAULT_BACKUP_COMMANDS: &[&str] = &["show running-config"];

/// Resolves the command sequence `device::run_attempt` runs for one Job.
/// `reachability` (§4.9: "open session, do nothing, close") always runs the
/// empty sequence regardless of `params`; the other kinds read a
/// `"commands"` array from `params`, falling back to a backup-sensible
/// default only for `backup`.
pub fn commands_for_job(job: &Job) -> Vec<String> {
    if job.kind == JobKind::Reachability {
        return Vec::new();
    }

    let from_params = job
        .params
        .get("commands")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>());

    match from_params {
        Some(commands) if !commands.is_empty() => commands,
        _ if job.kind == JobKind::Backup => {
            DEFAULT_BACKUP_COMMANDS.iter().map(|s| s.to_string()).collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::JobSelector;
    use crate::id::TagId;

    fn job_with(kind: JobKind, params: serde_json::Value) -> Job {
        Job::builder().name("t").kind(kind).selector(JobSelector::Tag(TagId::new()).to_json()).params(params).build()
    }

    #[test]
    fn reachability_job_has_no_commands_regardless_of_params() {
        let job = job_with(JobKind::Reachability, serde_json::json!({"commands": ["show version"]}));
        assert!(commands_for_job(&job).is_empty());
    }

    #[test]
    fn backup_job_falls_back_to_default_when_params_empty() {
        let job = job_with(JobKind::Backup, serde_json::Value::Null);
        assert_eq!(commands_for_job(&job), vec!["show running-config".to_string()]);
    }

    #[test]
    fn command_job_uses_params_commands() {
        let job = job_with(JobKind::Command, serde_json::json!({"commands": ["show version", "show clock"]}));
        assert_eq!(commands_for_job(&job), vec!["show version".to_string(), "show clock".to_string()]);
    }

    #[test]
    fn command_job_with_no_commands_runs_nothing() {
        let job = job_with(JobKind::Command, serde_json::Value::Null);
        assert!(commands_for_job(&job).is_empty());
    }
}
