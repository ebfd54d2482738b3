//! Native VR runtime client contract
//! The crate consumes the native runtime through these two traits. `RuntimeClient` is the
//! direct SDK surface (session, tracked devices, legacy controller state, poses, haptic pulses,
//! compositor). `InputService` is the intermediary input service the mediated backend routes
//! controller input and vibration through.

pub mod simulated;

use serde::{Deserialize, Serialize};

use crate::core::frame::SkeletalTrackingLevel;
use crate::core::overlay::{GraphicsApi, GraphicsTextureHandle};
use crate::error::RuntimeError;

/// Slot index of a tracked device inside the native runtime.
pub type TrackedDeviceIndex = u32;

/// Number of tracked device slots the native runtime exposes.
pub const MAX_TRACKED_DEVICES: u32 = 64;

/// Number of legacy analog axes per controller.
pub const CONTROLLER_AXIS_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    Invalid,
    Hmd,
    Controller,
    GenericTracker,
    TrackingReference,
    DisplayRedirect,
}

/// Hand assignment reported by the runtime for a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerRole {
    Invalid,
    LeftHand,
    RightHand,
}

/// One populated device slot as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeDevice {
    pub index: TrackedDeviceIndex,
    pub class: DeviceClass,
    pub role: ControllerRole,
    pub connected: bool,
    pub serial: String,
    pub has_haptics: bool,
}

/// Identification returned by a successful runtime init.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub runtime_name: String,
    pub interface_version: u32,
}

/// Legacy button ids, used as bit positions in the pressed/touched masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonId {
    System = 0,
    ApplicationMenu = 1,
    Grip = 2,
    A = 7,
    Axis0 = 32,
    Axis1 = 33,
    Axis2 = 34,
}

impl ButtonId {
    pub const ALL: [ButtonId; 7] = [
        ButtonId::System,
        ButtonId::ApplicationMenu,
        ButtonId::Grip,
        ButtonId::A,
        ButtonId::Axis0,
        ButtonId::Axis1,
        ButtonId::Axis2,
    ];

    pub fn mask(self) -> u64 {
        1u64 << (self as u64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeAxis {
    pub x: f32,
    pub y: f32,
}

/// Legacy per-controller snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeControllerState {
    /// Increments whenever the runtime has new data for the controller.
    pub packet_num: u32,
    pub buttons_pressed: u64,
    pub buttons_touched: u64,
    pub axes: [NativeAxis; CONTROLLER_AXIS_COUNT],
}

impl NativeControllerState {
    pub fn is_pressed(&self, button: ButtonId) -> bool {
        self.buttons_pressed & button.mask() != 0
    }

    pub fn is_touched(&self, button: ButtonId) -> bool {
        self.buttons_touched & button.mask() != 0
    }
}

/// Pose in the runtime's own convention: right-handed, +Y up, -Z forward, meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NativePose {
    pub position: [f32; 3],
    /// Quaternion as (x, y, z, w).
    pub orientation: [f32; 4],
    pub velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
    pub valid: bool,
}

impl Default for NativePose {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [0.0, 0.0, 0.0, 1.0],
            velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
            valid: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ComponentValue {
    Boolean(bool),
    Scalar(f32),
    Vector2(f32, f32),
}

/// A path-addressed input component as exposed by the input service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputComponent {
    pub path: String,
    pub value: ComponentValue,
}

/// Parent-relative bone transform as the input service reports it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NativeBoneTransform {
    pub position: [f32; 3],
    /// Quaternion as (x, y, z, w).
    pub orientation: [f32; 4],
}

impl Default for NativeBoneTransform {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Hand skeleton reported by the input service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeSkeleton {
    pub finger_curls: [f32; 5],
    pub finger_splays: [f32; 4],
    pub tracking_level: SkeletalTrackingLevel,
    /// One entry per hand bone, or empty when only the summary is available.
    pub bones: Vec<NativeBoneTransform>,
}

/// Fixed hand poses the input service can report for a skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePose {
    BindPose,
    OpenHand,
    Fist,
    GripLimit,
}

/// Direct native SDK surface.
pub trait RuntimeClient: Send + Sync {
    /// Cheap availability probe, performed before init.
    fn is_installed(&self) -> bool;

    fn init(&self, application_name: &str) -> Result<RuntimeInfo, RuntimeError>;

    fn shutdown(&self);

    /// All populated device slots, connected or not.
    fn tracked_devices(&self) -> Result<Vec<NativeDevice>, RuntimeError>;

    fn controller_state(&self, index: TrackedDeviceIndex) -> Result<NativeControllerState, RuntimeError>;

    fn device_pose(&self, index: TrackedDeviceIndex) -> Result<Option<NativePose>, RuntimeError>;

    fn trigger_haptic_pulse(
        &self,
        index: TrackedDeviceIndex,
        axis: u32,
        duration_us: u16,
    ) -> Result<(), RuntimeError>;

    /// Graphics APIs the compositor accepts textures from.
    fn compositor_graphics_apis(&self) -> Vec<GraphicsApi>;

    fn submit_texture(&self, texture: &GraphicsTextureHandle, api: GraphicsApi) -> Result<(), RuntimeError>;
}

/// Intermediary input service used by the mediated backend.
pub trait InputService: Send + Sync {
    fn is_available(&self) -> bool;

    /// Latches fresh input state. Called once per poll before any component query.
    fn update_state(&self) -> Result<(), RuntimeError>;

    fn input_components(&self, index: TrackedDeviceIndex) -> Result<Vec<InputComponent>, RuntimeError>;

    fn skeletal_summary(&self, index: TrackedDeviceIndex) -> Result<Option<NativeSkeleton>, RuntimeError>;

    /// Bones of a fixed hand pose for the device's skeleton, if it has one.
    fn reference_pose(
        &self,
        index: TrackedDeviceIndex,
        pose: ReferencePose,
    ) -> Result<Option<Vec<NativeBoneTransform>>, RuntimeError>;

    fn trigger_vibration(
        &self,
        index: TrackedDeviceIndex,
        duration_secs: f32,
        frequency: f32,
        amplitude: f32,
    ) -> Result<(), RuntimeError>;
}
