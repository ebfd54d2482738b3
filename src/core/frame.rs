//! Per-device, per-frame raw input snapshots
//! Frames are produced by the poller and consumed by the resolver within the same tick.

use std::collections::BTreeMap;

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::device::{DeviceHandle, DeviceRole};

/// A single raw hardware value addressed by an input path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RawValue {
    Digital(bool),
    Analog(f32),
    Axis2 { x: f32, y: f32 },
}

/// Pose in the runtime convention: right-handed, +Y up, -Z forward, meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPose {
    pub position: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
    pub linear_velocity: Vector3<f32>,
    pub angular_velocity: Vector3<f32>,
}

impl Default for RawPose {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
        }
    }
}

/// How directly the device measures the hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SkeletalTrackingLevel {
    /// Hand pose inferred from button and trigger state (wands, gamepads).
    #[default]
    Estimated,
    /// Some joints measured directly, e.g. finger curl only.
    Partial,
    /// Every joint measured through its full range of motion.
    Full,
}

/// Number of bones in a hand skeleton.
pub const BONE_COUNT: usize = 31;

/// Bones of the hand skeleton, in the runtime's bone-array order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandBone {
    Root,
    Wrist,
    Thumb0,
    Thumb1,
    Thumb2,
    Thumb3,
    IndexFinger0,
    IndexFinger1,
    IndexFinger2,
    IndexFinger3,
    IndexFinger4,
    MiddleFinger0,
    MiddleFinger1,
    MiddleFinger2,
    MiddleFinger3,
    MiddleFinger4,
    RingFinger0,
    RingFinger1,
    RingFinger2,
    RingFinger3,
    RingFinger4,
    PinkyFinger0,
    PinkyFinger1,
    PinkyFinger2,
    PinkyFinger3,
    PinkyFinger4,
    AuxThumb,
    AuxIndexFinger,
    AuxMiddleFinger,
    AuxRingFinger,
    AuxPinkyFinger,
}

/// How a bone changes when a hand is mirrored onto the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoneMirror {
    None,
    /// Position negated, orientation kept.
    TranslationOnly,
    /// Metacarpals: X negated and the rotation re-based onto the other hand's bind pose.
    Full,
    /// Wrist and aux bones: X negated, rotation reflected across the YZ plane.
    Partial,
}

impl HandBone {
    pub const ALL: [HandBone; BONE_COUNT] = [
        HandBone::Root,
        HandBone::Wrist,
        HandBone::Thumb0,
        HandBone::Thumb1,
        HandBone::Thumb2,
        HandBone::Thumb3,
        HandBone::IndexFinger0,
        HandBone::IndexFinger1,
        HandBone::IndexFinger2,
        HandBone::IndexFinger3,
        HandBone::IndexFinger4,
        HandBone::MiddleFinger0,
        HandBone::MiddleFinger1,
        HandBone::MiddleFinger2,
        HandBone::MiddleFinger3,
        HandBone::MiddleFinger4,
        HandBone::RingFinger0,
        HandBone::RingFinger1,
        HandBone::RingFinger2,
        HandBone::RingFinger3,
        HandBone::RingFinger4,
        HandBone::PinkyFinger0,
        HandBone::PinkyFinger1,
        HandBone::PinkyFinger2,
        HandBone::PinkyFinger3,
        HandBone::PinkyFinger4,
        HandBone::AuxThumb,
        HandBone::AuxIndexFinger,
        HandBone::AuxMiddleFinger,
        HandBone::AuxRingFinger,
        HandBone::AuxPinkyFinger,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn mirror(self) -> BoneMirror {
        use HandBone::*;
        match self {
            Root => BoneMirror::None,
            Wrist | AuxThumb | AuxIndexFinger | AuxMiddleFinger | AuxRingFinger | AuxPinkyFinger => {
                BoneMirror::Partial
            }
            Thumb0 | IndexFinger0 | MiddleFinger0 | RingFinger0 | PinkyFinger0 => BoneMirror::Full,
            _ => BoneMirror::TranslationOnly,
        }
    }
}

/// One bone relative to its parent, in the runtime convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoneTransform {
    pub position: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl BoneTransform {
    pub fn identity() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite()) && self.orientation.coords.iter().all(|v| v.is_finite())
    }
}

/// Mirrors a left-hand skeleton onto the right hand or the other way round. Bones past the
/// end of `bones` are skipped.
pub fn mirror_bones(bones: &mut [BoneTransform]) {
    for (index, bone) in bones.iter_mut().enumerate() {
        let Some(kind) = HandBone::from_index(index) else {
            break;
        };
        let q = *bone.orientation.quaternion();
        match kind.mirror() {
            BoneMirror::None => {}
            BoneMirror::TranslationOnly => bone.position = -bone.position,
            BoneMirror::Full => {
                bone.position.x = -bone.position.x;
                bone.orientation = UnitQuaternion::new_unchecked(Quaternion::new(q.i, -q.w, q.k, -q.j));
            }
            BoneMirror::Partial => {
                bone.position.x = -bone.position.x;
                bone.orientation = UnitQuaternion::new_unchecked(Quaternion::new(q.w, q.i, -q.j, -q.k));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSkeleton {
    /// Thumb, index, middle, ring, pinky. 0 is open, 1 is fully curled.
    pub finger_curls: [f32; 5],
    /// Thumb-index, index-middle, middle-ring, ring-pinky.
    pub finger_splays: [f32; 4],
    pub tracking_level: SkeletalTrackingLevel,
    /// Parent-relative bone transforms in `HandBone` order. May be shorter than `BONE_COUNT`
    /// or empty when the runtime only reports a summary.
    #[serde(default)]
    pub bones: Vec<BoneTransform>,
}

/// Raw state of one connected device for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInputFrame {
    pub device: DeviceHandle,
    pub role: DeviceRole,
    /// Poller tick that produced the frame.
    pub tick: u64,
    pub inputs: BTreeMap<String, RawValue>,
    pub pose: Option<RawPose>,
    pub skeleton: Option<RawSkeleton>,
}

impl RawInputFrame {
    pub fn new(device: DeviceHandle, role: DeviceRole, tick: u64) -> Self {
        Self {
            device,
            role,
            tick,
            inputs: BTreeMap::new(),
            pose: None,
            skeleton: None,
        }
    }

    pub fn with_input(mut self, path: impl Into<String>, value: RawValue) -> Self {
        self.inputs.insert(path.into(), value);
        self
    }

    pub fn with_pose(mut self, pose: RawPose) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn with_skeleton(mut self, skeleton: RawSkeleton) -> Self {
        self.skeleton = Some(skeleton);
        self
    }

    pub fn input(&self, path: &str) -> Option<RawValue> {
        self.inputs.get(path).copied()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    fn bone(position: [f32; 3], q: Quaternion<f32>) -> BoneTransform {
        BoneTransform {
            position: Vector3::from(position),
            orientation: UnitQuaternion::new_normalize(q),
        }
    }

    #[test]
    fn bone_order_matches_the_runtime_array() {
        assert_eq!(HandBone::Wrist.index(), 1);
        assert_eq!(HandBone::IndexFinger0.index(), 6);
        assert_eq!(HandBone::AuxPinkyFinger.index(), BONE_COUNT - 1);
        assert_eq!(HandBone::from_index(BONE_COUNT), None);
        assert!(HandBone::ALL.iter().enumerate().all(|(i, b)| b.index() == i));
    }

    #[test]
    fn mirroring_follows_each_bone_group() {
        let rotated = Quaternion::new(0.5, 0.5, 0.5, 0.5);
        let mut bones = vec![bone([1.0, 2.0, 3.0], rotated); BONE_COUNT];
        mirror_bones(&mut bones);

        let root = bones[HandBone::Root.index()];
        assert_eq!(root.position, Vector3::new(1.0, 2.0, 3.0));

        let joint = bones[HandBone::IndexFinger2.index()];
        assert_eq!(joint.position, Vector3::new(-1.0, -2.0, -3.0));
        assert_eq!(joint.orientation.quaternion(), &rotated);

        let metacarpal = bones[HandBone::Thumb0.index()];
        assert_eq!(metacarpal.position, Vector3::new(-1.0, 2.0, 3.0));
        assert_eq!(metacarpal.orientation.quaternion(), &Quaternion::new(0.5, -0.5, 0.5, -0.5));

        let wrist = bones[HandBone::Wrist.index()];
        assert_eq!(wrist.position, Vector3::new(-1.0, 2.0, 3.0));
        assert_eq!(wrist.orientation.quaternion(), &Quaternion::new(0.5, 0.5, -0.5, -0.5));
    }

    #[test]
    fn mirroring_twice_restores_wrist_and_joints() {
        let turn = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        let original = vec![
            BoneTransform::identity(),
            BoneTransform {
                position: Vector3::new(0.1, 0.2, 0.3),
                orientation: turn,
            },
            BoneTransform::identity(),
            BoneTransform {
                position: Vector3::new(0.0, 0.0, 0.04),
                orientation: turn,
            },
        ];
        let mut bones = original.clone();
        mirror_bones(&mut bones);
        assert_ne!(bones, original);
        mirror_bones(&mut bones);
        assert_eq!(bones[HandBone::Wrist.index()], original[1]);
        assert_eq!(bones[HandBone::Thumb1.index()], original[3]);
    }
}
