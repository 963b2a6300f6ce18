use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier handed back by `submit`.
///
/// For the DRM backend this is the manager's native job-id string; for the
/// local backend it is the caller-assigned [`JobSpec::id`] rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchedulerJobId(String);

impl SchedulerJobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SchedulerJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SchedulerJobId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SchedulerJobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SchedulerJobId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Job state as reported by `status`.
///
/// The local scheduler only ever reports `QueuedActive`, `Running`, `Done`
/// and `Failed`; the remaining states exist because the DRM backend proxies
/// the resource manager's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Undetermined,
    QueuedActive,
    SystemOnHold,
    UserOnHold,
    UserSystemOnHold,
    Running,
    SystemSuspended,
    UserSuspended,
    Done,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Undetermined => write!(f, "undetermined"),
            JobStatus::QueuedActive => write!(f, "queued_active"),
            JobStatus::SystemOnHold => write!(f, "system_on_hold"),
            JobStatus::UserOnHold => write!(f, "user_on_hold"),
            JobStatus::UserSystemOnHold => write!(f, "user_system_on_hold"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::SystemSuspended => write!(f, "system_suspended"),
            JobStatus::UserSuspended => write!(f, "user_suspended"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    /// True for the two states a job can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitKind {
    FinishedRegularly,
    UserKilled,
    ExitAborted,
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitKind::FinishedRegularly => write!(f, "finished_regularly"),
            ExitKind::UserKilled => write!(f, "user_killed"),
            ExitKind::ExitAborted => write!(f, "exit_aborted"),
        }
    }
}

/// Terminal result record for one job.
///
/// Produced exactly once, either by the dispatch loop on normal completion or
/// by `kill`. Reading it through `exit_info` consumes it; a second read for
/// the same id fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub kind: ExitKind,
    pub exit_code: Option<i32>,
    pub term_signal: Option<String>,
    pub resource_usage: Option<String>,
}

impl ExitInfo {
    pub fn finished(exit_code: i32) -> Self {
        Self {
            kind: ExitKind::FinishedRegularly,
            exit_code: Some(exit_code),
            term_signal: None,
            resource_usage: None,
        }
    }

    pub fn user_killed() -> Self {
        Self {
            kind: ExitKind::UserKilled,
            exit_code: None,
            term_signal: None,
            resource_usage: None,
        }
    }

    pub fn aborted() -> Self {
        Self {
            kind: ExitKind::ExitAborted,
            exit_code: None,
            term_signal: None,
            resource_usage: None,
        }
    }
}

/// Multi-process/multi-node resource request, translated by the DRM backend
/// into manager-specific native attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelJobInfo {
    pub configuration: String,
    pub max_nodes: u32,
}

impl ParallelJobInfo {
    pub fn new(configuration: impl Into<String>, max_nodes: u32) -> Self {
        Self {
            configuration: configuration.into(),
            max_nodes,
        }
    }
}

/// Immutable description of one unit of work.
///
/// Built by the caller, handed to `submit` and never mutated by the
/// scheduler afterwards. `env = None` means the spawned process inherits the
/// caller's environment; `Some(vars)` replaces it entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: Uuid,
    pub command: Vec<String>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub join_stderrout: bool,
    pub stdin_path: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub env: Option<Vec<(String, String)>>,
    pub queue: Option<String>,
    pub parallel_job_info: Option<ParallelJobInfo>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl JobSpec {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
            stdout_path: None,
            stderr_path: None,
            join_stderrout: false,
            stdin_path: None,
            working_directory: None,
            env: None,
            queue: None,
            parallel_job_info: None,
            priority: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_stdout_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_path = Some(path.into());
        self
    }

    pub fn with_stderr_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr_path = Some(path.into());
        self
    }

    /// Merge stderr into the stdout file; any `stderr_path` is ignored.
    pub fn with_join_stderrout(mut self, join: bool) -> Self {
        self.join_stderrout = join;
        self
    }

    pub fn with_stdin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin_path = Some(path.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_parallel_job_info(mut self, info: ParallelJobInfo) -> Self {
        self.parallel_job_info = Some(info);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// The id this job is tracked under by the local backend.
    pub fn job_id(&self) -> SchedulerJobId {
        SchedulerJobId::from(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_spec_defaults() {
        let spec = JobSpec::new(vec!["echo".to_string(), "hi".to_string()]);
        assert_eq!(spec.priority, 0);
        assert!(spec.env.is_none());
        assert!(!spec.join_stderrout);
        assert!(spec.stdout_path.is_none());
        assert_eq!(spec.job_id(), SchedulerJobId::from(spec.id));
    }

    #[test]
    fn test_job_spec_builder_chain() {
        let spec = JobSpec::new(vec!["sleep".to_string(), "1".to_string()])
            .with_priority(5)
            .with_stdout_path("/tmp/out.log")
            .with_join_stderrout(true)
            .with_queue("short");
        assert_eq!(spec.priority, 5);
        assert!(spec.join_stderrout);
        assert_eq!(spec.queue.as_deref(), Some("short"));
    }

    #[test]
    fn test_status_terminal() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::QueuedActive.is_terminal());
    }
}
