use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{load_json, save_json};
use crate::core::backend::BackendPreference;

const CONFIG_FILE_NAME: &str = "session_config.json";

/// Device session and tick loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name the runtime shows for this client.
    pub application_name: String,
    pub backend: BackendPreference,
    /// Upper bound for a single device poll.
    pub poll_timeout_ms: u64,
    /// Oldest runtime interface version accepted at open.
    pub min_interface_version: u32,
    /// Newest runtime interface version accepted at open.
    pub max_interface_version: u32,
    pub tick_rate_hz: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            application_name: "vr-input-bridge".to_string(),
            backend: BackendPreference::Auto,
            poll_timeout_ms: 4,
            min_interface_version: 19,
            max_interface_version: 22,
            tick_rate_hz: 90,
        }
    }
}

impl SessionConfig {
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        load_json(config_dir, CONFIG_FILE_NAME, "Session").await
    }

    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        save_json(self, config_dir, CONFIG_FILE_NAME, "Session").await
    }
}
