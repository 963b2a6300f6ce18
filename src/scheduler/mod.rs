pub mod configured;
pub mod job;
pub mod local;

pub use configured::ConfiguredLocalScheduler;
pub use job::{ExitInfo, ExitKind, JobSpec, JobStatus, ParallelJobInfo, SchedulerJobId};
pub use local::LocalScheduler;

use async_trait::async_trait;

use crate::error::Result;

/// Uniform scheduling contract implemented by both backends.
///
/// Contract notes shared by all implementors: `exit_info` is a consuming
/// read — it removes the record it returns, and a second call for the same
/// id fails with `UnknownJob`. `shutdown` must be safe to call more than
/// once.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submit a job for execution; the job is observable through `status`
    /// and `exit_info` from this call onward. Fails with `Submission` when
    /// the backend rejects the job outright.
    async fn submit(&self, job: JobSpec) -> Result<SchedulerJobId>;

    /// Current status of a tracked job. Fails with `UnknownJob` for ids
    /// never submitted or no longer retained by the backend.
    async fn status(&self, id: &SchedulerJobId) -> Result<JobStatus>;

    /// Terminal result of a job. The local backend fails with `UnknownJob`
    /// while the job is unfinished; the DRM backend blocks until the manager
    /// reports completion, so callers must treat it as potentially
    /// long-running.
    async fn exit_info(&self, id: &SchedulerJobId) -> Result<ExitInfo>;

    /// Request termination of a queued or running job. Fails with
    /// `UnknownJob` when the id is not tracked.
    async fn kill(&self, id: &SchedulerJobId) -> Result<()>;

    /// Advisory hook: drop expensive backend resources while the scheduler
    /// is not needed. A no-op for backends without such resources.
    async fn sleep(&self) -> Result<()>;

    /// Advisory hook: recreate whatever [`sleep`](Scheduler::sleep) dropped.
    async fn wake(&self) -> Result<()>;

    /// Release backend-owned resources (background tasks, sessions, temp
    /// files). Idempotent.
    async fn shutdown(&self);
}
