use std::path::Path;

use anyhow::Result;
use log::{error, info};
use tokio::fs;

/// Asynchronously ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        if let Err(e) = fs::create_dir_all(path).await {
            error!("Failed to create directory at {:?}: {}", path, e);
            return Err(e.into());
        }
        info!("Created directory at: {:?}", path);
    }
    Ok(())
}

/// Remembers the last error seen from a recurring operation so each distinct failure is
/// logged once instead of every tick.
#[derive(Debug)]
pub struct LastError<E> {
    last: Option<E>,
}

impl<E> Default for LastError<E> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<E: PartialEq + Clone> LastError<E> {
    /// Returns true when `error` differs from the previously reported one.
    pub fn report(&mut self, error: &E) -> bool {
        if self.last.as_ref() == Some(error) {
            return false;
        }
        self.last = Some(error.clone());
        true
    }

    /// Returns true if an error was pending, i.e. the operation just recovered.
    pub fn clear(&mut self) -> bool {
        self.last.take().is_some()
    }
}
