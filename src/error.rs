use thiserror::Error;

use crate::drm::session::DrmError;
use crate::scheduler::job::SchedulerJobId;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job submission rejected: {0}")]
    Submission(String),

    #[error("Unknown job: {0}")]
    UnknownJob(SchedulerJobId),

    #[error("Scheduler unavailable: {0}")]
    Unavailable(String),

    #[error("Resource manager error: {0}")]
    Drm(#[from] DrmError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
