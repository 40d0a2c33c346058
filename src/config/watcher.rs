//! Hot reload of the configuration file
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by replacing the file keep working. Bursts of filesystem
//! events collapse into one reload, and a reload that parses to the config
//! already in use is not reported.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Quiet period before a changed file is read back
const SETTLE_DELAY: Duration = Duration::from_millis(100);

pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
    current: AppConfig,
    /// Capacity 1: a pending signal already covers any later event
    signals: mpsc::Receiver<()>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it
    pub async fn new(config_path: impl Into<PathBuf>) -> Result<Self> {
        let path: PathBuf = config_path.into();
        let path_str = path.to_string_lossy().to_string();

        let current = AppConfig::load(&path_str)
            .await
            .context("Failed to load initial config")?;

        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .with_context(|| format!("Config path has no file name: {}", path_str))?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, signals) = mpsc::channel(1);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                    && event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if relevant {
                    // Full means a reload is already queued
                    let _ = tx.try_send(());
                }
            }
            Err(e) => error!("Config watch error: {}", e),
        })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        info!("Config file watcher started for: {}", path_str);

        Ok(Self {
            _watcher: watcher,
            path,
            current,
            signals,
        })
    }

    /// The configuration currently in effect
    pub fn current(&self) -> &AppConfig {
        &self.current
    }

    /// Wait for the next configuration that differs from the current one
    ///
    /// Unreadable or invalid files are logged and skipped. Returns None once
    /// the watcher is gone.
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        loop {
            self.signals.recv().await?;
            tokio::time::sleep(SETTLE_DELAY).await;
            // Events that arrived while settling are covered by this read
            while self.signals.try_recv().is_ok() {}

            match self.reload().await {
                Ok(Some(config)) => return Some(config),
                Ok(None) => debug!("Config file touched, contents unchanged"),
                Err(e) => warn!("⚠️  Failed to reload config (keeping old config): {:#}", e),
            }
        }
    }

    async fn reload(&mut self) -> Result<Option<AppConfig>> {
        let config = AppConfig::load(&self.path.to_string_lossy()).await?;
        if config == self.current {
            return Ok(None);
        }
        self.current = config.clone();
        Ok(Some(config))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
