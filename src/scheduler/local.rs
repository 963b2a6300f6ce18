use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{ExitInfo, JobSpec, JobStatus, SchedulerJobId};
use crate::scheduler::Scheduler;
use crate::worker::{spawn_job, JobProcess};

/// Everything the dispatch loop and the public methods share.
///
/// One lock guards all of it; the lock is never held across an await. A job
/// id moves through the structures in one direction: `submit` puts it into
/// `jobs` + `status` + `queue`; the loop moves it from `queue` into
/// `processes`; a reap, spawn failure or kill takes it out of `processes`/
/// `queue`/`jobs` and leaves a terminal `status` plus an `exit_info` record;
/// the consuming `exit_info` read removes that record.
struct LocalState {
    /// Pending job ids, kept sorted by descending priority. Stable resort
    /// after every insert preserves submission order between equal
    /// priorities.
    queue: Vec<Uuid>,
    /// Specs of not-yet-finished jobs.
    jobs: HashMap<Uuid, JobSpec>,
    /// Live OS processes, present only while a job is `Running`.
    processes: HashMap<Uuid, JobProcess>,
    /// Status of every id this scheduler has ever been given.
    status: HashMap<Uuid, JobStatus>,
    /// Unconsumed terminal results.
    exit_info: HashMap<Uuid, ExitInfo>,
    proc_nb: usize,
    interval: Duration,
}

impl LocalState {
    fn resort_queue(&mut self) {
        let jobs = &self.jobs;
        self.queue
            .sort_by_key(|id| Reverse(jobs.get(id).map(|j| j.priority).unwrap_or(i32::MIN)));
    }

    /// Record a terminal outcome for a job that is no longer queued or
    /// running.
    fn finish(&mut self, id: Uuid, status: JobStatus, info: ExitInfo) {
        self.jobs.remove(&id);
        self.status.insert(id, status);
        self.exit_info.insert(id, info);
    }
}

/// In-process job scheduler: bounded-concurrency dispatch over OS processes.
///
/// Jobs are queued at `submit` and promoted to running processes by a
/// background loop that wakes every `interval`, reaps finished processes and
/// starts queued ones while fewer than `proc_nb` are running. Submission is
/// synchronous only with respect to id allocation; execution happens on the
/// loop's schedule.
pub struct LocalScheduler {
    state: Arc<Mutex<LocalState>>,
    shutdown_token: CancellationToken,
    /// Wakes the loop out of its current sleep when a tunable changes, so a
    /// shortened interval does not wait out the old one first.
    tunables_changed: Arc<Notify>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LocalScheduler {
    pub fn new(proc_nb: usize, interval: Duration) -> Self {
        let state = Arc::new(Mutex::new(LocalState {
            queue: Vec::new(),
            jobs: HashMap::new(),
            processes: HashMap::new(),
            status: HashMap::new(),
            exit_info: HashMap::new(),
            proc_nb,
            interval,
        }));

        let shutdown_token = CancellationToken::new();
        let tunables_changed = Arc::new(Notify::new());
        let loop_state = Arc::clone(&state);
        let loop_token = shutdown_token.clone();
        let loop_notify = Arc::clone(&tunables_changed);
        let handle = tokio::spawn(async move {
            Self::dispatch_loop(loop_state, loop_token, loop_notify).await;
        });

        Self {
            state,
            shutdown_token,
            tunables_changed,
            loop_handle: Mutex::new(Some(handle)),
        }
    }

    /// Background loop: sleep one interval, then reap and dispatch under the
    /// lock. The interval is re-read each iteration, and a tunable change
    /// restarts an in-flight sleep so a shorter interval applies at once.
    async fn dispatch_loop(
        state: Arc<Mutex<LocalState>>,
        token: CancellationToken,
        tunables_changed: Arc<Notify>,
    ) {
        loop {
            let interval = state.lock().expect("scheduler lock poisoned").interval;
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("Dispatch loop stopping");
                    break;
                }
                _ = tunables_changed.notified() => {
                    // Restart the sleep with the new interval.
                }
                _ = tokio::time::sleep(interval) => {
                    Self::tick(&state);
                }
            }
        }
    }

    fn tick(state: &Mutex<LocalState>) {
        let mut state = state.lock().expect("scheduler lock poisoned");

        // Idle scheduler: nothing to reap, nothing to start.
        if state.queue.is_empty() && state.processes.is_empty() {
            return;
        }

        Self::reap(&mut state);
        Self::dispatch(&mut state);
    }

    /// Poll every live process once; record results for those that exited.
    fn reap(state: &mut LocalState) {
        let mut finished = Vec::new();
        for (id, process) in state.processes.iter_mut() {
            match process.poll_exit() {
                Ok(Some(exit_code)) => finished.push((*id, Some(exit_code))),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "Could not poll job process");
                    finished.push((*id, None));
                }
            }
        }

        for (id, exit_code) in finished {
            state.processes.remove(&id);
            match exit_code {
                Some(code) => {
                    tracing::info!(job_id = %id, exit_code = code, "Job finished");
                    state.finish(id, JobStatus::Done, ExitInfo::finished(code));
                }
                None => state.finish(id, JobStatus::Failed, ExitInfo::aborted()),
            }
        }
    }

    /// Start queued jobs while a concurrency slot is free. A spawn failure
    /// is terminal for that job only; the loop moves on to the next one.
    fn dispatch(state: &mut LocalState) {
        while state.processes.len() < state.proc_nb && !state.queue.is_empty() {
            let id = state.queue.remove(0);
            let Some(spec) = state.jobs.get(&id) else {
                continue;
            };

            match spawn_job(spec) {
                Some(process) => {
                    tracing::info!(job_id = %id, pid = ?process.pid(), "Job started");
                    state.processes.insert(id, process);
                    state.status.insert(id, JobStatus::Running);
                }
                None => {
                    state.finish(id, JobStatus::Failed, ExitInfo::aborted());
                }
            }
        }
    }

    /// Change the concurrency cap; applies on the next tick.
    pub fn set_proc_nb(&self, proc_nb: usize) {
        self.state.lock().expect("scheduler lock poisoned").proc_nb = proc_nb;
        self.tunables_changed.notify_waiters();
        tracing::info!(proc_nb, "Concurrency cap updated");
    }

    /// Change the loop period; an in-flight sleep is restarted with the new
    /// value.
    pub fn set_interval(&self, interval: Duration) {
        self.state.lock().expect("scheduler lock poisoned").interval = interval;
        self.tunables_changed.notify_waiters();
        tracing::info!(interval_ms = interval.as_millis() as u64, "Poll interval updated");
    }

    fn parse_id(id: &SchedulerJobId) -> Result<Uuid> {
        Uuid::parse_str(id.as_str()).map_err(|_| SchedulerError::UnknownJob(id.clone()))
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn submit(&self, job: JobSpec) -> Result<SchedulerJobId> {
        if job.command.is_empty() {
            return Err(SchedulerError::Submission("empty command".to_string()));
        }

        let id = job.id;
        let priority = job.priority;
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        state.jobs.insert(id, job);
        state.status.insert(id, JobStatus::QueuedActive);
        state.queue.push(id);
        state.resort_queue();

        tracing::info!(
            job_id = %id,
            priority,
            queue_depth = state.queue.len(),
            "Job submitted"
        );
        Ok(SchedulerJobId::from(id))
    }

    async fn status(&self, id: &SchedulerJobId) -> Result<JobStatus> {
        let uuid = Self::parse_id(id)?;
        let state = self.state.lock().expect("scheduler lock poisoned");
        state
            .status
            .get(&uuid)
            .copied()
            .ok_or_else(|| SchedulerError::UnknownJob(id.clone()))
    }

    async fn exit_info(&self, id: &SchedulerJobId) -> Result<ExitInfo> {
        let uuid = Self::parse_id(id)?;
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        state
            .exit_info
            .remove(&uuid)
            .ok_or_else(|| SchedulerError::UnknownJob(id.clone()))
    }

    async fn kill(&self, id: &SchedulerJobId) -> Result<()> {
        let uuid = Self::parse_id(id)?;
        let mut state = self.state.lock().expect("scheduler lock poisoned");

        if let Some(mut process) = state.processes.remove(&uuid) {
            // Signal only; the exited child is reaped in the background once
            // the handle drops.
            if let Err(e) = process.terminate() {
                tracing::warn!(job_id = %uuid, error = %e, "Kill signal failed");
            }
            tracing::info!(job_id = %uuid, "Running job killed");
            state.finish(uuid, JobStatus::Failed, ExitInfo::user_killed());
            return Ok(());
        }

        if let Some(pos) = state.queue.iter().position(|queued| *queued == uuid) {
            state.queue.remove(pos);
            tracing::info!(job_id = %uuid, "Queued job killed");
            state.finish(uuid, JobStatus::Failed, ExitInfo::aborted());
            return Ok(());
        }

        Err(SchedulerError::UnknownJob(id.clone()))
    }

    async fn sleep(&self) -> Result<()> {
        Ok(())
    }

    async fn wake(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let handle = self
            .loop_handle
            .lock()
            .expect("scheduler lock poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Dispatch loop did not stop cleanly");
            }
            tracing::info!("Local scheduler shut down");
        }
    }
}

impl Drop for LocalScheduler {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
        if let Ok(mut handle) = self.loop_handle.lock() {
            if let Some(handle) = handle.take() {
                handle.abort();
            }
        }
    }
}
