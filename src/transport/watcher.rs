use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::{sync::watch, task::spawn_blocking};
use tracing::{debug, error, info, instrument, warn};

use super::server::SharedConfig;
use crate::config::read_config_file;

/// Polls the collector's configuration file and publishes valid changes.
///
/// A file that fails to parse is reported and otherwise ignored, so agents keep
/// the last good configuration.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
    sender: watch::Sender<SharedConfig>,
}

impl ConfigWatcher {
    /// `last_modified` is sampled now, so the configuration already published
    /// is not sent again on the first poll.
    pub fn new(path: impl Into<PathBuf>, sender: watch::Sender<SharedConfig>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            last_modified,
            sender,
        }
    }

    /// Reload the file if its modification time changed. Returns `true` when a
    /// new configuration was published.
    ///
    /// Touches the filesystem; async callers go through [`ConfigWatcher::run`].
    pub fn poll(&mut self) -> bool {
        let current = modified(&self.path);
        if current.is_none() || current == self.last_modified {
            return false;
        }
        self.last_modified = current;

        match read_config_file(&self.path) {
            Ok(entries) => {
                info!(
                    "configuration file changed, publishing {} entries",
                    entries.len()
                );
                self.sender.send_replace(Arc::new(entries));
                true
            }
            Err(e) => {
                warn!("ignoring invalid configuration: {e:#}");
                false
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn run(mut self, interval: Duration) {
        debug!("watching {} every {interval:?}", self.path.display());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self = match spawn_blocking(move || {
                self.poll();
                self
            })
            .await
            {
                Ok(watcher) => watcher,
                Err(e) => {
                    error!("configuration poll failed: {e}");
                    return;
                }
            };
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
