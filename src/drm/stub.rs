//! Session implementation used when the crate is built without the `drmaa`
//! feature. Every call fails, so a `DrmScheduler` cannot even be
//! constructed; callers find out at startup rather than at first submit.

use crate::drm::session::{DrmError, DrmExitStatus, DrmSession, JobTemplate};
use crate::scheduler::job::JobStatus;

pub struct StubDrmSession;

impl StubDrmSession {
    fn unavailable<T>() -> Result<T, DrmError> {
        Err(DrmError::Unavailable(
            "built without the 'drmaa' feature; no resource manager binding is linked".to_string(),
        ))
    }
}

impl DrmSession for StubDrmSession {
    fn init(&self) -> Result<(), DrmError> {
        Self::unavailable()
    }

    fn exit(&self) -> Result<(), DrmError> {
        Self::unavailable()
    }

    fn drm_system(&self) -> Result<String, DrmError> {
        Self::unavailable()
    }

    fn run_job(&self, _template: &JobTemplate) -> Result<String, DrmError> {
        Self::unavailable()
    }

    fn job_state(&self, _job_id: &str) -> Result<JobStatus, DrmError> {
        Self::unavailable()
    }

    fn wait_job(&self, _job_id: &str) -> Result<DrmExitStatus, DrmError> {
        Self::unavailable()
    }

    fn kill_job(&self, _job_id: &str) -> Result<(), DrmError> {
        Self::unavailable()
    }
}
