use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{load_json, save_json};

const CONFIG_FILE_NAME: &str = "overlay_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    /// How long a frame submission may wait for the compositor before it is dropped.
    pub submit_timeout_ms: u64,
    /// Frames that may be queued for the compositor at once.
    pub queue_depth: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlayConfig {
            enabled: true,
            submit_timeout_ms: 8,
            queue_depth: 2,
        }
    }
}

impl OverlayConfig {
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        load_json(config_dir, CONFIG_FILE_NAME, "Overlay").await
    }

    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        save_json(self, config_dir, CONFIG_FILE_NAME, "Overlay").await
    }
}
