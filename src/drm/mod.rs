//! Scheduling backend that delegates to an external Distributed Resource
//! Manager through a session binding.
//!
//! The adapter owns one [`DrmSession`] for its whole life. `sleep` closes the
//! session so an idle caller does not hold manager resources (some managers
//! time sessions out); `wake` reopens it, and any job operation issued while
//! asleep wakes the session first. All session calls are blocking C-style
//! calls, bridged onto the runtime with `spawn_blocking`.

pub mod parallel;
pub mod session;

#[cfg(feature = "drmaa")]
pub mod native;
#[cfg(not(feature = "drmaa"))]
pub mod stub;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{ExitInfo, JobSpec, JobStatus, SchedulerJobId};
use crate::scheduler::Scheduler;

pub use parallel::{ParallelRequest, ParallelTable};
pub use session::{DrmError, DrmExitStatus, DrmSession, JobTemplate};

/// Scheduler backed by an external resource manager.
pub struct DrmScheduler {
    session: Arc<dyn DrmSession>,
    parallel: ParallelTable,
    sleeping: AtomicBool,
    shut_down: AtomicBool,
    /// Disposable stdio files created by the vendor workaround, removed at
    /// shutdown.
    workaround_files: Mutex<Vec<PathBuf>>,
}

impl DrmScheduler {
    /// Open the session and prepare the adapter. Fails with `Unavailable`
    /// when the session cannot be initialized.
    pub async fn new(session: Arc<dyn DrmSession>) -> Result<Self> {
        Self::with_parallel_table(session, ParallelTable::default()).await
    }

    pub async fn with_parallel_table(
        session: Arc<dyn DrmSession>,
        parallel: ParallelTable,
    ) -> Result<Self> {
        let scheduler = Self {
            session,
            parallel,
            sleeping: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            workaround_files: Mutex::new(Vec::new()),
        };

        scheduler
            .blocking(|session| session.init())
            .await
            .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;

        let system = scheduler
            .blocking(|session| session.drm_system())
            .await
            .map_err(drm_to_scheduler)?;
        tracing::info!(drm_system = %system, "Resource manager session opened");

        if needs_vendor_workaround(&system) {
            scheduler.apply_vendor_workaround().await?;
        }

        Ok(scheduler)
    }

    /// Connect using the session implementation this build carries: the
    /// native DRMAA binding with the `drmaa` feature, the failing stub
    /// without it.
    pub async fn connect() -> Result<Self> {
        #[cfg(feature = "drmaa")]
        let session: Arc<dyn DrmSession> = Arc::new(native::NativeDrmSession::new());
        #[cfg(not(feature = "drmaa"))]
        let session: Arc<dyn DrmSession> = Arc::new(stub::StubDrmSession);
        Self::new(session).await
    }

    /// Run one throwaway job to completion.
    ///
    /// PBS-family managers mishandle the first submission of a fresh
    /// session; one disposable job submitted and waited for up front makes
    /// every later submission behave. Its stdio files are removed by
    /// `shutdown`.
    async fn apply_vendor_workaround(&self) -> Result<()> {
        let stdout_path = std::env::temp_dir().join(format!("taskmill-warmup-{}.out", Uuid::new_v4()));
        let stderr_path = std::env::temp_dir().join(format!("taskmill-warmup-{}.err", Uuid::new_v4()));
        {
            let mut files = self
                .workaround_files
                .lock()
                .expect("workaround file list poisoned");
            files.push(stdout_path.clone());
            files.push(stderr_path.clone());
        }

        let template = JobTemplate {
            command: vec!["sleep".to_string(), "0".to_string()],
            stdout_path: Some(stdout_path),
            stderr_path: Some(stderr_path),
            ..Default::default()
        };

        tracing::info!("Submitting warmup job for PBS-family manager");
        let job_id = self
            .blocking(move |session| session.run_job(&template))
            .await
            .map_err(drm_to_scheduler)?;
        self.blocking(move |session| session.wait_job(&job_id))
            .await
            .map_err(drm_to_scheduler)?;
        Ok(())
    }

    /// Translate a JobSpec into the manager's template vocabulary.
    fn build_template(&self, job: &JobSpec) -> Result<JobTemplate> {
        if job.command.is_empty() {
            return Err(SchedulerError::Submission("empty command".to_string()));
        }

        let mut env = job.env.clone().unwrap_or_default();
        let native_specification = match &job.parallel_job_info {
            Some(info) => {
                let request = self.parallel.expand(info)?;
                env.extend(request.env);
                Some(request.native_specification)
            }
            None => None,
        };

        Ok(JobTemplate {
            command: job.command.clone(),
            stdout_path: job.stdout_path.clone(),
            stderr_path: job.stderr_path.clone(),
            join_stderrout: job.join_stderrout,
            stdin_path: job.stdin_path.clone(),
            working_directory: job.working_directory.clone(),
            env,
            queue: job.queue.clone(),
            native_specification,
        })
    }

    /// Reopen the session if a `sleep` closed it, so job operations on a
    /// slept adapter do not fail spuriously.
    async fn ensure_awake(&self) -> Result<()> {
        if self.sleeping.load(Ordering::SeqCst) {
            self.wake().await?;
        }
        Ok(())
    }

    /// Run a session call on the blocking pool.
    async fn blocking<T, F>(&self, call: F) -> std::result::Result<T, DrmError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DrmSession) -> std::result::Result<T, DrmError> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || call(session.as_ref()))
            .await
            .map_err(|e| DrmError::Unavailable(format!("session call aborted: {e}")))?
    }
}

/// Managers whose first submission in a fresh session is broken.
fn needs_vendor_workaround(drm_system: &str) -> bool {
    let system = drm_system.to_ascii_lowercase();
    system.contains("pbs") || system.contains("torque")
}

fn drm_to_scheduler(e: DrmError) -> SchedulerError {
    match e {
        DrmError::InvalidJob(id) => SchedulerError::UnknownJob(SchedulerJobId::from(id)),
        DrmError::Unavailable(message) => SchedulerError::Unavailable(message),
        api => SchedulerError::Drm(api),
    }
}

/// Decode a manager wait result into the caller-facing exit record.
fn decode_exit_status(status: DrmExitStatus) -> ExitInfo {
    let resource_usage = if status.resource_usage.is_empty() {
        None
    } else {
        Some(status.resource_usage.join("; "))
    };

    if status.exited {
        ExitInfo {
            kind: crate::scheduler::job::ExitKind::FinishedRegularly,
            exit_code: status.exit_code,
            term_signal: None,
            resource_usage,
        }
    } else if status.signaled {
        ExitInfo {
            kind: crate::scheduler::job::ExitKind::UserKilled,
            exit_code: None,
            term_signal: status.term_signal,
            resource_usage,
        }
    } else {
        ExitInfo {
            kind: crate::scheduler::job::ExitKind::ExitAborted,
            exit_code: None,
            term_signal: None,
            resource_usage,
        }
    }
}

#[async_trait]
impl Scheduler for DrmScheduler {
    async fn submit(&self, job: JobSpec) -> Result<SchedulerJobId> {
        self.ensure_awake().await?;
        let template = self.build_template(&job)?;
        let native_id = self
            .blocking(move |session| session.run_job(&template))
            .await
            .map_err(|e| match e {
                DrmError::Api { code, message } => SchedulerError::Submission(format!(
                    "manager rejected job (error {code}): {message}"
                )),
                other => drm_to_scheduler(other),
            })?;

        tracing::info!(job_id = %job.id, native_id = %native_id, "Job submitted to resource manager");
        Ok(SchedulerJobId::from(native_id))
    }

    async fn status(&self, id: &SchedulerJobId) -> Result<JobStatus> {
        self.ensure_awake().await?;
        let native_id = id.as_str().to_owned();
        self.blocking(move |session| session.job_state(&native_id))
            .await
            .map_err(drm_to_scheduler)
    }

    /// Blocks until the manager reports completion; the manager reaps the
    /// job during the wait, which is what makes this read consuming.
    async fn exit_info(&self, id: &SchedulerJobId) -> Result<ExitInfo> {
        self.ensure_awake().await?;
        let native_id = id.as_str().to_owned();
        let status = self
            .blocking(move |session| session.wait_job(&native_id))
            .await
            .map_err(drm_to_scheduler)?;
        Ok(decode_exit_status(status))
    }

    async fn kill(&self, id: &SchedulerJobId) -> Result<()> {
        self.ensure_awake().await?;
        let native_id = id.as_str().to_owned();
        self.blocking(move |session| session.kill_job(&native_id))
            .await
            .map_err(drm_to_scheduler)?;
        tracing::info!(native_id = %id, "Kill requested at resource manager");
        Ok(())
    }

    async fn sleep(&self) -> Result<()> {
        if self.sleeping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Closing resource manager session until next use");
        self.blocking(|session| session.exit())
            .await
            .map_err(drm_to_scheduler)
    }

    async fn wake(&self) -> Result<()> {
        if !self.sleeping.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.blocking(|session| session.init())
            .await
            .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;
        self.sleeping.store(false, Ordering::SeqCst);
        tracing::info!("Resource manager session reopened");
        Ok(())
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        if !self.sleeping.load(Ordering::SeqCst) {
            if let Err(e) = self.blocking(|session| session.exit()).await {
                tracing::warn!(error = %e, "Resource manager session did not close cleanly");
            }
        }

        let files = std::mem::take(
            &mut *self
                .workaround_files
                .lock()
                .expect("workaround file list poisoned"),
        );
        for path in files {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Could not remove warmup file");
                }
            }
        }
        tracing::info!("DRM scheduler shut down");
    }
}
