use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigEvent, SchedulerConfig};
use crate::error::Result;
use crate::scheduler::job::{ExitInfo, JobSpec, JobStatus, SchedulerJobId};
use crate::scheduler::{LocalScheduler, Scheduler};

/// A [`LocalScheduler`] whose tunables follow a live configuration.
///
/// At construction the configuration's current `proc_nb` and `interval` are
/// applied; afterwards an observer task listens for [`ConfigEvent`]s, applies
/// each change to the scheduler and persists the configuration. Everything
/// else delegates to the inner scheduler.
pub struct ConfiguredLocalScheduler {
    inner: Arc<LocalScheduler>,
    shutdown_token: CancellationToken,
    observer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConfiguredLocalScheduler {
    pub fn new(config: Arc<dyn SchedulerConfig>) -> Self {
        let inner = Arc::new(LocalScheduler::new(config.proc_nb(), config.interval()));

        // Subscribe before returning so a change made right after
        // construction cannot slip past the observer.
        let events = config.subscribe();
        let shutdown_token = CancellationToken::new();
        let observer_token = shutdown_token.clone();
        let observer_scheduler = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            Self::observe(config, events, observer_scheduler, observer_token).await;
        });

        Self {
            inner,
            shutdown_token,
            observer_handle: Mutex::new(Some(handle)),
        }
    }

    async fn observe(
        config: Arc<dyn SchedulerConfig>,
        mut events: tokio::sync::broadcast::Receiver<ConfigEvent>,
        scheduler: Arc<LocalScheduler>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Ok(ConfigEvent::ProcNbChanged(proc_nb)) => {
                        scheduler.set_proc_nb(proc_nb);
                        Self::persist(config.as_ref());
                    }
                    Ok(ConfigEvent::IntervalChanged(interval)) => {
                        scheduler.set_interval(interval);
                        Self::persist(config.as_ref());
                    }
                    // Missed notifications are fine: the next one carries a
                    // full value, not a delta.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Configuration observer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    fn persist(config: &dyn SchedulerConfig) {
        if let Err(e) = config.save_to_file() {
            tracing::warn!(error = %e, "Could not persist configuration change");
        }
    }
}

#[async_trait]
impl Scheduler for ConfiguredLocalScheduler {
    async fn submit(&self, job: JobSpec) -> Result<SchedulerJobId> {
        self.inner.submit(job).await
    }

    async fn status(&self, id: &SchedulerJobId) -> Result<JobStatus> {
        self.inner.status(id).await
    }

    async fn exit_info(&self, id: &SchedulerJobId) -> Result<ExitInfo> {
        self.inner.exit_info(id).await
    }

    async fn kill(&self, id: &SchedulerJobId) -> Result<()> {
        self.inner.kill(id).await
    }

    async fn sleep(&self) -> Result<()> {
        self.inner.sleep().await
    }

    async fn wake(&self) -> Result<()> {
        self.inner.wake().await
    }

    async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let handle = self
            .observer_handle
            .lock()
            .expect("observer lock poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Configuration observer did not stop cleanly");
            }
        }
        self.inner.shutdown().await;
    }
}
