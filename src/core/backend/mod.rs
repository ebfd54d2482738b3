//! Backend adapter
//! One capability interface over the interchangeable native runtime integrations. The concrete
//! backend is chosen once when the session opens and never changes for the session's lifetime.

pub mod direct;
pub mod mediated;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::info;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::frame::{BoneTransform, RawPose, RawSkeleton, RawValue};
use crate::core::overlay::{GraphicsApi, GraphicsTextureHandle};
use crate::core::runtime::{
    DeviceClass, InputService, NativeBoneTransform, NativeDevice, NativePose, ReferencePose, RuntimeClient,
    TrackedDeviceIndex,
};
use crate::error::RuntimeError;
use crate::mapping::haptics::HapticRequest;

use self::direct::DirectBackend;
use self::mediated::MediatedBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Talks to the native SDK directly using the legacy controller state.
    Direct,
    /// Routes input and vibration through the intermediary input service.
    Mediated,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Direct => f.write_str("direct"),
            BackendKind::Mediated => f.write_str("mediated"),
        }
    }
}

/// Which backend to use when a session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// Mediated when the input service is available, otherwise direct.
    #[default]
    Auto,
    Direct,
    Mediated,
}

/// Everything one device reported for one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DevicePoll {
    pub inputs: BTreeMap<String, RawValue>,
    pub pose: Option<RawPose>,
    pub skeleton: Option<RawSkeleton>,
}

/// Capability set every backend provides. Implementations must behave identically from the
/// poller's and resolver's point of view.
pub trait InputBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Called once per poll before any device is queried.
    fn begin_frame(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn enumerate_devices(&self) -> Result<Vec<NativeDevice>, RuntimeError>;

    /// Reads one device. `class` is the class `enumerate_devices` reported for the slot.
    fn poll_state(&self, index: TrackedDeviceIndex, class: DeviceClass) -> Result<DevicePoll, RuntimeError>;

    fn supports_skeleton(&self) -> bool;

    /// Bones of a fixed hand pose for the device's skeleton.
    fn reference_pose(
        &self,
        _index: TrackedDeviceIndex,
        _pose: ReferencePose,
    ) -> Result<Option<Vec<BoneTransform>>, RuntimeError> {
        Ok(None)
    }

    fn submit_haptic(&self, index: TrackedDeviceIndex, request: &HapticRequest) -> Result<(), RuntimeError>;

    /// True when one submission covers the request's whole duration. Otherwise the caller
    /// re-submits every tick until the duration has elapsed.
    fn sustains_haptics(&self) -> bool;

    fn supported_graphics_apis(&self) -> Vec<GraphicsApi>;

    fn submit_compositor_frame(&self, texture: &GraphicsTextureHandle, api: GraphicsApi) -> Result<(), RuntimeError>;

    fn shutdown(&self);
}

/// Picks the backend for a new session. Returns `None` when the preference cannot be honored.
pub fn select_backend(
    preference: BackendPreference,
    runtime: Arc<dyn RuntimeClient>,
    service: Option<Arc<dyn InputService>>,
    haptic_max_pulse_us: u16,
) -> Option<Arc<dyn InputBackend>> {
    let service = service.filter(|s| s.is_available());
    let backend: Arc<dyn InputBackend> = match (preference, service) {
        (BackendPreference::Auto | BackendPreference::Mediated, Some(service)) => {
            Arc::new(MediatedBackend::new(runtime, service))
        }
        (BackendPreference::Mediated, None) => return None,
        (BackendPreference::Auto | BackendPreference::Direct, _) => {
            Arc::new(DirectBackend::new(runtime, haptic_max_pulse_us))
        }
    };
    info!("Selected {} input backend ({:?} requested)", backend.kind(), preference);
    Some(backend)
}

/// Converts a native pose to the runtime-convention raw pose. Invalid poses yield `None`.
pub(crate) fn raw_pose_from_native(pose: &NativePose) -> Option<RawPose> {
    if !pose.valid {
        return None;
    }
    Some(RawPose {
        position: Vector3::from(pose.position),
        orientation: unit_quaternion(pose.orientation)?,
        linear_velocity: Vector3::from(pose.velocity),
        angular_velocity: Vector3::from(pose.angular_velocity),
    })
}

fn unit_quaternion(xyzw: [f32; 4]) -> Option<UnitQuaternion<f32>> {
    let [x, y, z, w] = xyzw;
    let quaternion = Quaternion::new(w, x, y, z);
    if quaternion.norm() <= f32::EPSILON || !quaternion.norm().is_finite() {
        return None;
    }
    Some(UnitQuaternion::from_quaternion(quaternion))
}

/// Converts native bones. A bone with a degenerate rotation keeps its position and gets no
/// rotation.
pub(crate) fn bones_from_native(bones: &[NativeBoneTransform]) -> Vec<BoneTransform> {
    bones
        .iter()
        .map(|bone| BoneTransform {
            position: Vector3::from(bone.position),
            orientation: unit_quaternion(bone.orientation).unwrap_or_else(UnitQuaternion::identity),
        })
        .collect()
}
