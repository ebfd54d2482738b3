//! Error taxonomy
//! Session- and manifest-scoped errors are returned to the caller of open/load.
//! Device- and frame-scoped errors are absorbed by the component that owns them.

use std::time::Duration;

use thiserror::Error;

use crate::core::overlay::{ColorSpace, GraphicsApi, TextureFormat};

/// Failures reported by the native runtime client contract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("VR runtime is not installed or not running")]
    NotInstalled,
    #[error("VR runtime initialization failed: {0}")]
    InitFailed(String),
    #[error("tracked device {0} is not valid")]
    InvalidDevice(u32),
    #[error("input service call failed: {0}")]
    Input(String),
    #[error("compositor call failed: {0}")]
    Compositor(String),
    #[error("VR runtime connection lost")]
    ConnectionLost,
}

/// Fatal to a Device Session open. No controller input is available for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("VR runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("VR runtime interface version {found} is outside the supported range {min}..={max}")]
    VersionMismatch { found: u32, min: u32, max: u32 },
}

/// Fatal to a single load or reload attempt. The previously active binding set stays active.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    Parse(String),
    #[error("unknown action type '{0}'")]
    UnknownActionType(String),
    #[error("duplicate path '{0}'")]
    DuplicatePath(String),
}

impl From<serde_json::Error> for ManifestError {
    fn from(e: serde_json::Error) -> Self {
        ManifestError::Parse(e.to_string())
    }
}

/// Recoverable: the tick is skipped and polling is retried on the next tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DevicePollError {
    #[error("device poll failed: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("device poll exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("session is closed")]
    SessionClosed,
}

/// Recoverable per frame except `FormatMismatch`, which is a client configuration error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OverlayError {
    #[error("graphics API {0:?} is not supported for compositor submission")]
    UnsupportedApi(GraphicsApi),
    #[error("compositor submission did not complete within {0:?}")]
    SubmissionTimeout(Duration),
    #[error(
        "texture format {found_format:?}/{found_color_space:?} does not match the {api:?} expectation {expected_format:?}/{expected_color_space:?}"
    )]
    FormatMismatch {
        api: GraphicsApi,
        expected_format: TextureFormat,
        expected_color_space: ColorSpace,
        found_format: TextureFormat,
        found_color_space: ColorSpace,
    },
    #[error("compositor rejected frame: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("overlay bridge is shut down")]
    Closed,
}
