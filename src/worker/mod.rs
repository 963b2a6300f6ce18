//! Process supervision for locally executed jobs.
//!
//! The scheduler talks to the OS through this layer alone:
//! - [`spawn_job`]: starts a job's process with its stdio/cwd/environment
//! - [`JobProcess::poll_exit`]: non-blocking reap used by the dispatch loop
//! - [`JobProcess::terminate`]: forced kill (platform handling inside)
//!
//! Spawn failures never propagate out of this layer; they are written into
//! the job's own output files and surface as a failed job.

pub mod process;

pub use process::{spawn_job, JobProcess};
