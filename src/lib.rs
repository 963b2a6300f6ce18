pub mod config;
pub mod drm;
pub mod error;
pub mod scheduler;
pub mod worker;

pub use config::{ConfigEvent, FileConfig, SchedulerConfig};
pub use drm::DrmScheduler;
pub use error::{Result, SchedulerError};
pub use scheduler::{
    ConfiguredLocalScheduler, ExitInfo, ExitKind, JobSpec, JobStatus, LocalScheduler,
    ParallelJobInfo, Scheduler, SchedulerJobId,
};
