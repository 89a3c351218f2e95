use std::path::Path;
use std::sync::Arc;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::file::{ConfigError, ConfigFile};

/// Reloads a [`ConfigFile`] whenever it changes on disk.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher").finish_non_exhaustive()
    }
}

impl ConfigWatcher {
    pub fn spawn(config: Arc<ConfigFile>) -> Result<Self, ConfigError> {
        let path = config.path().to_path_buf();
        let file_name = path.file_name().map(|name| name.to_os_string());

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }

                    let touches_config = event
                        .paths
                        .iter()
                        .any(|changed| changed.file_name() == file_name.as_deref());
                    if touches_config && let Err(err) = config.reload() {
                        tracing::warn!("config reload failed: {err}");
                    }
                }
                Err(err) => {
                    tracing::warn!("config watcher error: {err}");
                }
            })?;

        // Watch the directory so editors that replace the file are still seen.
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        tracing::debug!(path = %path.display(), "watching config file");
        Ok(Self { _watcher: watcher })
    }
}
