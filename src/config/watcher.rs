//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::lifecycle::signals::ControlEvent;

/// A watcher that monitors the configuration file for changes.
///
/// Change detection only emits `ControlEvent::Reload`; loading, validation
/// and publication happen in the reload path so a watcher-triggered reload
/// behaves exactly like `SIGHUP`.
pub struct ConfigWatcher {
    path: PathBuf,
    events: mpsc::UnboundedSender<ControlEvent>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher publishing into `events`.
    pub fn new(path: &Path, events: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self {
            path: path.to_path_buf(),
            events,
        }
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for events to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.events.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Config file change detected, scheduling reload");
                        let _ = tx.send(ControlEvent::Reload);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(watcher)
    }
}
