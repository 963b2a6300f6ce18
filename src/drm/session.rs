use std::path::PathBuf;

use thiserror::Error;

use crate::scheduler::job::JobStatus;

/// Error reported by a resource-manager session.
#[derive(Debug, Error)]
pub enum DrmError {
    /// The manager's API returned a failure code.
    #[error("resource manager error {code}: {message}")]
    Api { code: i32, message: String },

    /// The manager does not know the referenced job id.
    #[error("resource manager does not track job {0}")]
    InvalidJob(String),

    /// No usable session. Raised by the stub session and by a real binding
    /// whose initialization failed.
    #[error("resource manager session unavailable: {0}")]
    Unavailable(String),
}

/// Fully translated job submission, ready for the manager's template API.
///
/// Built by the adapter from a [`JobSpec`](crate::scheduler::JobSpec); the
/// session implementation maps the fields onto the manager's
/// allocate/set-attribute/set-vector-attribute/run/delete calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobTemplate {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub join_stderrout: bool,
    pub stdin_path: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    /// Replacement environment as KEY/VALUE pairs. Empty means inherit.
    pub env: Vec<(String, String)>,
    /// Manager queue hint.
    pub queue: Option<String>,
    /// Manager-native option string, e.g. a parallel-environment request.
    pub native_specification: Option<String>,
}

/// Decomposed result of a blocking wait on one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrmExitStatus {
    pub exited: bool,
    pub exit_code: Option<i32>,
    pub signaled: bool,
    pub term_signal: Option<String>,
    pub aborted: bool,
    pub resource_usage: Vec<String>,
}

/// Capability interface over a stateful resource-manager session.
///
/// Mirrors the C binding surface one to one: synchronous, blocking calls.
/// The adapter bridges them onto the async runtime with `spawn_blocking`,
/// so implementations must be `Send + Sync` and may block freely.
///
/// Exactly one production implementation exists (the DRMAA binding, behind
/// the `drmaa` feature); a stub that fails every call is compiled otherwise.
pub trait DrmSession: Send + Sync {
    /// Open the session. Called once at adapter construction and again on
    /// `wake` after an `exit`.
    fn init(&self) -> Result<(), DrmError>;

    /// Close the session, releasing manager-side resources.
    fn exit(&self) -> Result<(), DrmError>;

    /// Name of the managing DRM implementation, used to select
    /// vendor-specific behavior.
    fn drm_system(&self) -> Result<String, DrmError>;

    /// Submit a translated template; returns the manager's native job id.
    fn run_job(&self, template: &JobTemplate) -> Result<String, DrmError>;

    /// Current state of a job, in the manager's vocabulary.
    fn job_state(&self, job_id: &str) -> Result<JobStatus, DrmError>;

    /// Block until the job reaches a terminal state and reap it inside the
    /// manager. Reaping is what makes a second wait for the same id fail.
    fn wait_job(&self, job_id: &str) -> Result<DrmExitStatus, DrmError>;

    /// Ask the manager to terminate the job.
    fn kill_job(&self, job_id: &str) -> Result<(), DrmError>;
}
