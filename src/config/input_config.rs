use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::{load_json, save_json};
use crate::mapping::resolver::CoordinateConvention;

const CONFIG_FILE_NAME: &str = "input_config.json";

/// Action resolution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Deadzone for analog actions that don't declare their own.
    pub default_deadzone: f32,
    /// Analog value at which a boolean action bound to an analog source turns on.
    pub click_threshold: f32,
    /// Convention poses are converted into before they reach the host.
    pub coordinate_convention: CoordinateConvention,
    /// Host world units per meter, used by `left_handed_z_up`.
    pub world_to_meters: f32,
    pub manifest_path: Option<PathBuf>,
    /// Where stub binding files are written for controller types the manifest lacks.
    pub default_bindings_dir: Option<PathBuf>,
    /// How often the manifest file is checked for changes.
    pub reload_interval_ms: u64,
    /// Longest legacy haptic pulse, reached at amplitude 1.
    pub haptic_max_pulse_us: u16,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            default_deadzone: 0.05,
            click_threshold: 0.5,
            coordinate_convention: CoordinateConvention::RightHandedYUp,
            world_to_meters: 100.0,
            manifest_path: None,
            default_bindings_dir: None,
            reload_interval_ms: 1000,
            haptic_max_pulse_us: 2000,
        }
    }
}

impl InputConfig {
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        load_json(config_dir, CONFIG_FILE_NAME, "Input").await
    }

    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        save_json(self, config_dir, CONFIG_FILE_NAME, "Input").await
    }
}
