//! Binding hot reload
//! A background task watches the manifest source and publishes each changed manifest that
//! parses. A manifest that fails to load is logged and the active binding set stays in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, error, info, warn};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::ManifestError;
use crate::mapping::bindings::BindingStore;

/// Somewhere a manifest can be re-read from.
#[async_trait::async_trait]
pub trait ManifestSource: Send + Sync {
    /// Returns the manifest text if it changed since the last call. The first call always
    /// returns the current text.
    async fn poll_changed(&mut self) -> Result<Option<String>, ManifestError>;

    fn describe(&self) -> String;
}

/// Manifest file on disk, checked by modification time and size.
pub struct FileManifestSource {
    path: PathBuf,
    last_seen: Option<(SystemTime, u64)>,
}

impl FileManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_seen: None,
        }
    }

    /// Treats the file's current contents as already loaded.
    pub async fn mark_current(&mut self) -> Result<(), ManifestError> {
        self.last_seen = Some(Self::fingerprint(&self.path).await?);
        Ok(())
    }

    async fn fingerprint(path: &Path) -> Result<(SystemTime, u64), ManifestError> {
        let metadata = fs::metadata(path).await?;
        Ok((metadata.modified()?, metadata.len()))
    }
}

#[async_trait::async_trait]
impl ManifestSource for FileManifestSource {
    async fn poll_changed(&mut self) -> Result<Option<String>, ManifestError> {
        let fingerprint = Self::fingerprint(&self.path).await?;
        if self.last_seen == Some(fingerprint) {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path).await?;
        self.last_seen = Some(fingerprint);
        Ok(Some(text))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Checks `source` once and publishes a changed manifest. Returns whether a new set went live.
pub async fn reload_once(source: &mut dyn ManifestSource, store: &BindingStore) -> Result<bool, ManifestError> {
    let Some(text) = source.poll_changed().await? else {
        return Ok(false);
    };
    let generation = store.load(&text)?;
    info!("Reloaded bindings from {} (generation {})", source.describe(), generation);
    Ok(true)
}

pub struct ManifestWatcher {
    cancel_token: Arc<CancellationToken>,
    task_handle: Option<JoinHandle<()>>,
}

impl ManifestWatcher {
    /// Spawns the watch task on the current tokio runtime.
    pub fn start(source: Box<dyn ManifestSource>, store: Arc<BindingStore>, period: Duration) -> Self {
        let cancel_token = Arc::new(CancellationToken::new());
        let cancel_token_for_task = cancel_token.clone();
        let handle = tokio::spawn(async move {
            Self::watch_task(source, store, period, cancel_token_for_task).await;
        });
        Self {
            cancel_token,
            task_handle: Some(handle),
        }
    }

    async fn watch_task(
        mut source: Box<dyn ManifestSource>,
        store: Arc<BindingStore>,
        period: Duration,
        cancel_token: Arc<CancellationToken>,
    ) {
        info!("Watching {} for binding changes every {:?}", source.describe(), period);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_error: Option<String> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match reload_once(source.as_mut(), &store).await {
                        Ok(_) => last_error = None,
                        Err(e) => {
                            let message = e.to_string();
                            if last_error.as_deref() != Some(message.as_str()) {
                                match e {
                                    ManifestError::Io(_) => warn!("Cannot read {}: {}", source.describe(), message),
                                    _ => error!("Rejected manifest {}: {}; keeping previous bindings", source.describe(), message),
                                }
                                last_error = Some(message);
                            }
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    debug!("Manifest watcher cancelled");
                    break;
                }
            }
        }
    }

    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                error!("Manifest watcher task failed: {}", e);
            }
        }
        info!("Manifest watcher stopped.");
    }
}

impl Drop for ManifestWatcher {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
