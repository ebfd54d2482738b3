pub mod input_config;
pub mod overlay_config;
pub mod session_config;

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::input_config::InputConfig;
use crate::config::overlay_config::OverlayConfig;
use crate::config::session_config::SessionConfig;
use crate::utils::ensure_directory_exists;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub input: InputConfig,
    pub overlay: OverlayConfig,
}

impl AppConfig {
    /// Loads every section from `config_dir`. Missing files fall back to defaults.
    pub async fn load(config_dir: &Path) -> Result<Self> {
        Ok(Self {
            session: SessionConfig::load_config(config_dir).await?,
            input: InputConfig::load_config(config_dir).await?,
            overlay: OverlayConfig::load_config(config_dir).await?,
        })
    }

    pub async fn save(&self, config_dir: &Path) -> Result<()> {
        self.session.save_config(config_dir).await?;
        self.input.save_config(config_dir).await?;
        self.overlay.save_config(config_dir).await?;
        Ok(())
    }
}

async fn load_json<T: DeserializeOwned + Default>(config_dir: &Path, file_name: &str, label: &str) -> Result<T> {
    let file_path = config_dir.join(file_name);
    let file_path_str = file_path.to_string_lossy().into_owned();

    if !file_path.exists() {
        warn!("{} config file not found at {:?}, using default.", label, file_path_str);
        return Ok(T::default());
    }

    let config_json = fs::read_to_string(&file_path).await?;
    let config: T = serde_json::from_str(&config_json)?;

    info!("{} config loaded from {:?}", label, file_path_str);
    Ok(config)
}

async fn save_json<T: Serialize>(config: &T, config_dir: &Path, file_name: &str, label: &str) -> Result<()> {
    ensure_directory_exists(config_dir).await?;

    let file_path = config_dir.join(file_name);
    let file_path_str = file_path.to_string_lossy().into_owned();

    let config_json = match serde_json::to_string_pretty(config) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize {} config to JSON: {}", label, e);
            return Err(e.into());
        }
    };

    fs::write(&file_path, config_json).await?;
    info!("{} config saved to {:?}", label, file_path_str);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::BackendPreference;

    #[tokio::test]
    async fn missing_files_load_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).await.unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn save_then_load_keeps_changes() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("config");

        let mut config = AppConfig::default();
        config.session.backend = BackendPreference::Direct;
        config.input.default_deadzone = 0.12;
        config.overlay.enabled = false;
        config.save(&nested).await.unwrap();

        assert!(nested.join("session_config.json").exists());
        let loaded = AppConfig::load(&nested).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("input_config.json"), r#"{ "click_threshold": 0.3 }"#)
            .await
            .unwrap();
        let input = InputConfig::load_config(dir.path()).await.unwrap();
        assert_eq!(input.click_threshold, 0.3);
        assert_eq!(input.default_deadzone, InputConfig::default().default_deadzone);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("overlay_config.json"), "{ not json")
            .await
            .unwrap();
        assert!(OverlayConfig::load_config(dir.path()).await.is_err());
    }
}
