use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::{Result, SchedulerError};

/// Change notification sent to configuration subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEvent {
    ProcNbChanged(usize),
    IntervalChanged(Duration),
}

/// Live configuration source for a scheduler's tunables.
///
/// `ConfiguredLocalScheduler` reads the current values at construction and
/// then follows `subscribe` notifications, persisting after each applied
/// change.
pub trait SchedulerConfig: Send + Sync {
    /// Maximum number of concurrently running local jobs.
    fn proc_nb(&self) -> usize;

    /// Period of the local dispatch loop.
    fn interval(&self) -> Duration;

    /// Receive future [`ConfigEvent`]s.
    fn subscribe(&self) -> broadcast::Receiver<ConfigEvent>;

    /// Persist the current values to the backing store. A no-op for
    /// in-memory configurations.
    fn save_to_file(&self) -> Result<()>;
}

/// On-disk representation. The interval is stored as whole milliseconds.
#[derive(Debug, Serialize, Deserialize)]
struct ConfigFile {
    proc_nb: usize,
    interval_ms: u64,
}

struct ConfigValues {
    proc_nb: usize,
    interval: Duration,
}

/// TOML-file-backed [`SchedulerConfig`].
///
/// Values live in memory behind a mutex; setters notify subscribers over a
/// broadcast channel. `save_to_file` writes the backing file when a path was
/// given, so a scheduler restarted against the same file picks up the last
/// applied tunables.
pub struct FileConfig {
    values: Mutex<ConfigValues>,
    path: Option<PathBuf>,
    events: broadcast::Sender<ConfigEvent>,
}

impl Default for FileConfig {
    fn default() -> Self {
        let proc_nb = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(proc_nb, Duration::from_secs(1))
    }
}

impl FileConfig {
    pub fn new(proc_nb: usize, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            values: Mutex::new(ConfigValues { proc_nb, interval }),
            path: None,
            events,
        }
    }

    /// Attach a backing file; `save_to_file` writes there from now on.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Read a configuration from a TOML file written by `save_to_file`.
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path)?;
        let file: ConfigFile = toml::from_str(&raw)
            .map_err(|e| SchedulerError::Config(format!("{}: {e}", path.display())))?;
        Ok(
            Self::new(file.proc_nb, Duration::from_millis(file.interval_ms))
                .with_path(path),
        )
    }

    pub fn set_proc_nb(&self, proc_nb: usize) {
        self.values
            .lock()
            .expect("config lock poisoned")
            .proc_nb = proc_nb;
        // Send fails only when nobody subscribed, which is fine.
        let _ = self.events.send(ConfigEvent::ProcNbChanged(proc_nb));
    }

    pub fn set_interval(&self, interval: Duration) {
        self.values
            .lock()
            .expect("config lock poisoned")
            .interval = interval;
        let _ = self.events.send(ConfigEvent::IntervalChanged(interval));
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl SchedulerConfig for FileConfig {
    fn proc_nb(&self) -> usize {
        self.values.lock().expect("config lock poisoned").proc_nb
    }

    fn interval(&self) -> Duration {
        self.values.lock().expect("config lock poisoned").interval
    }

    fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }

    fn save_to_file(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = {
            let values = self.values.lock().expect("config lock poisoned");
            ConfigFile {
                proc_nb: values.proc_nb,
                interval_ms: values.interval.as_millis() as u64,
            }
        };
        let raw = toml::to_string_pretty(&file)
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        std::fs::write(path, raw)?;
        tracing::debug!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir().join(format!("taskmill-config-{}.toml", uuid::Uuid::new_v4()))
    }

    #[test]
    fn file_config_defaults() {
        let cfg = FileConfig::default();
        assert!(cfg.proc_nb() >= 1);
        assert_eq!(cfg.interval(), Duration::from_secs(1));
        assert!(cfg.path().is_none());
    }

    #[test]
    fn setters_notify_subscribers() {
        let cfg = FileConfig::new(2, Duration::from_millis(500));
        let mut rx = cfg.subscribe();

        cfg.set_proc_nb(4);
        cfg.set_interval(Duration::from_millis(100));

        assert_eq!(rx.try_recv().unwrap(), ConfigEvent::ProcNbChanged(4));
        assert_eq!(
            rx.try_recv().unwrap(),
            ConfigEvent::IntervalChanged(Duration::from_millis(100))
        );
        assert_eq!(cfg.proc_nb(), 4);
        assert_eq!(cfg.interval(), Duration::from_millis(100));
    }

    #[test]
    fn save_and_load_round_trip() {
        let path = temp_config_path();
        let cfg = FileConfig::new(3, Duration::from_millis(250)).with_path(&path);
        cfg.save_to_file().unwrap();

        let loaded = FileConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.proc_nb(), 3);
        assert_eq!(loaded.interval(), Duration::from_millis(250));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn save_without_path_is_noop() {
        let cfg = FileConfig::new(1, Duration::from_secs(1));
        cfg.save_to_file().unwrap();
    }

    #[test]
    fn load_rejects_malformed_file() {
        let path = temp_config_path();
        std::fs::write(&path, "not valid toml [").unwrap();
        assert!(FileConfig::load_from_file(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
