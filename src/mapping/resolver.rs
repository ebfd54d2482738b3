//! Action resolver
//! Turns the tick's raw frames into one `ResolvedActionState` per action of the active binding
//! set. Edge flags compare against the previous tick's state, kept here one slot per action.
//!
//! Coordinate conventions: the runtime reports right-handed, +Y up, -Z forward poses in meters.
//! `RightHandedYUp` passes them through unchanged. `LeftHandedZUp` is the X-forward, Y-right,
//! Z-up convention used by left-handed engines; positions and velocities become
//! `(-z, x, y) * world_to_meters` and rotations flip sense along with the handedness.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::config::input_config::InputConfig;
use crate::core::device::{DeviceEvent, DeviceHandle};
use crate::core::frame::{
    mirror_bones, BoneTransform, HandBone, RawInputFrame, RawPose, RawSkeleton, RawValue, SkeletalTrackingLevel,
};
use crate::mapping::bindings::{ActionDescriptor, ActionType, AxisSemantics, BindingSet, RoleBindings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateConvention {
    /// The runtime's own convention: right-handed, +Y up, -Z forward, meters.
    #[default]
    RightHandedYUp,
    /// Left-handed, +X forward, +Y right, +Z up, scaled by `world_to_meters`.
    LeftHandedZUp,
}

/// Pose in the host's coordinate convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPose {
    pub position: Vector3<f32>,
    pub orientation: UnitQuaternion<f32>,
    pub linear_velocity: Vector3<f32>,
    pub angular_velocity: Vector3<f32>,
}

fn convert_point(v: &Vector3<f32>, convention: CoordinateConvention, world_to_meters: f32) -> Vector3<f32> {
    match convention {
        CoordinateConvention::RightHandedYUp => *v,
        CoordinateConvention::LeftHandedZUp => Vector3::new(-v.z, v.x, v.y) * world_to_meters,
    }
}

/// Axial vectors pick up an extra sign from the handedness flip.
fn convert_axial(v: &Vector3<f32>, convention: CoordinateConvention) -> Vector3<f32> {
    match convention {
        CoordinateConvention::RightHandedYUp => *v,
        CoordinateConvention::LeftHandedZUp => Vector3::new(v.z, -v.x, -v.y),
    }
}

fn convert_rotation(q: &UnitQuaternion<f32>, convention: CoordinateConvention) -> UnitQuaternion<f32> {
    let imag = convert_axial(&q.quaternion().imag(), convention);
    UnitQuaternion::new_unchecked(Quaternion::new(q.w, imag.x, imag.y, imag.z))
}

/// Converts a runtime pose into `convention`.
pub fn convert_pose(raw: &RawPose, convention: CoordinateConvention, world_to_meters: f32) -> ResolvedPose {
    ResolvedPose {
        position: convert_point(&raw.position, convention, world_to_meters),
        orientation: convert_rotation(&raw.orientation, convention),
        linear_velocity: convert_point(&raw.linear_velocity, convention, world_to_meters),
        angular_velocity: convert_axial(&raw.angular_velocity, convention),
    }
}

/// Mirrors runtime bones if asked, then converts them into `convention`. Bones with
/// non-finite components are reported as identity.
pub fn convert_bones(
    bones: &[BoneTransform],
    mirror: bool,
    convention: CoordinateConvention,
    world_to_meters: f32,
) -> Vec<BoneTransform> {
    let mut bones = bones.to_vec();
    if mirror {
        mirror_bones(&mut bones);
    }
    bones
        .iter()
        .map(|bone| {
            if !bone.is_finite() {
                return BoneTransform::identity();
            }
            BoneTransform {
                position: convert_point(&bone.position, convention, world_to_meters),
                orientation: convert_rotation(&bone.orientation, convention),
            }
        })
        .collect()
}

/// Hand skeleton in the host's coordinate convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletalPose {
    pub finger_curls: [f32; 5],
    pub finger_splays: [f32; 4],
    pub tracking_level: SkeletalTrackingLevel,
    /// Parent-relative, in `HandBone` order. Empty when the runtime reported no bones.
    pub bones: Vec<BoneTransform>,
}

impl SkeletalPose {
    pub fn from_raw(raw: &RawSkeleton, mirror: bool, convention: CoordinateConvention, world_to_meters: f32) -> Self {
        let unit = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        Self {
            finger_curls: raw.finger_curls.map(unit),
            finger_splays: raw.finger_splays.map(unit),
            tracking_level: raw.tracking_level,
            bones: convert_bones(&raw.bones, mirror, convention, world_to_meters),
        }
    }

    /// Transform of `bone`, or identity when the skeleton has no data for it.
    pub fn bone_transform(&self, bone: HandBone) -> BoneTransform {
        self.bones
            .get(bone.index())
            .copied()
            .unwrap_or_else(BoneTransform::identity)
    }
}

/// Device a haptic action currently drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HapticTarget {
    pub device: Option<DeviceHandle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionValue {
    Boolean(bool),
    Vector1(f32),
    Vector2 { x: f32, y: f32 },
    Pose(Option<ResolvedPose>),
    Haptic(HapticTarget),
    Skeleton(Option<SkeletalPose>),
}

impl ActionValue {
    /// Value an action takes when none of its sources is available.
    pub fn neutral(action_type: ActionType) -> Self {
        match action_type {
            ActionType::Boolean => ActionValue::Boolean(false),
            ActionType::Vector1 => ActionValue::Vector1(0.0),
            ActionType::Vector2 => ActionValue::Vector2 { x: 0.0, y: 0.0 },
            ActionType::Pose => ActionValue::Pose(None),
            ActionType::Haptic => ActionValue::Haptic(HapticTarget::default()),
            ActionType::Skeleton => ActionValue::Skeleton(None),
        }
    }

    /// Drives the edge flags: pressed, non-zero, tracked or targeted.
    pub fn is_active(&self) -> bool {
        match self {
            ActionValue::Boolean(b) => *b,
            ActionValue::Vector1(v) => *v != 0.0,
            ActionValue::Vector2 { x, y } => *x != 0.0 || *y != 0.0,
            ActionValue::Pose(pose) => pose.is_some(),
            ActionValue::Haptic(target) => target.device.is_some(),
            ActionValue::Skeleton(skeleton) => skeleton.is_some(),
        }
    }

    fn magnitude(&self) -> f32 {
        match self {
            ActionValue::Vector1(v) => v.abs(),
            ActionValue::Vector2 { x, y } => x.hypot(*y),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedActionState {
    pub name: String,
    /// Runtime path; tells apart actions of different types sharing `name`.
    pub path: String,
    pub action_type: ActionType,
    pub value: ActionValue,
    pub became_active: bool,
    pub became_inactive: bool,
    /// Tick at which `value` last changed; 0 if it never left neutral.
    pub timestamp: u64,
    /// Last tick whose poll produced this state. Behind the feed's tick while polls fail.
    pub resolved_tick: u64,
    /// Device the value came from, if any source was available.
    pub source: Option<DeviceHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverOptions {
    pub default_deadzone: f32,
    pub click_threshold: f32,
    pub convention: CoordinateConvention,
    pub world_to_meters: f32,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::from(&InputConfig::default())
    }
}

impl From<&InputConfig> for ResolverOptions {
    fn from(config: &InputConfig) -> Self {
        Self {
            default_deadzone: config.default_deadzone,
            click_threshold: config.click_threshold,
            convention: config.coordinate_convention,
            world_to_meters: config.world_to_meters,
        }
    }
}

/// Scales `v` so the range outside the deadzone maps onto [0, 1] in magnitude.
pub fn apply_deadzone(v: f32, deadzone: f32) -> f32 {
    let magnitude = v.abs();
    if magnitude <= deadzone {
        return 0.0;
    }
    (magnitude - deadzone) / (1.0 - deadzone) * v.signum()
}

pub fn clamp_axis(v: f32, axis: AxisSemantics) -> f32 {
    match axis {
        AxisSemantics::Bipolar => v.clamp(-1.0, 1.0),
        AxisSemantics::Unipolar => v.clamp(0.0, 1.0),
    }
}

fn sanitize(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) }
}

fn pose_is_finite(pose: &RawPose) -> bool {
    pose.position.iter().all(|v| v.is_finite())
        && pose.orientation.coords.iter().all(|v| v.is_finite())
        && pose.linear_velocity.iter().all(|v| v.is_finite())
        && pose.angular_velocity.iter().all(|v| v.is_finite())
}

pub struct ActionResolver {
    options: ResolverOptions,
    /// Last tick's state per action path.
    previous: HashMap<String, ResolvedActionState>,
    bound_set: Option<Arc<BindingSet>>,
}

impl ActionResolver {
    pub fn new(options: ResolverOptions) -> Self {
        Self {
            options,
            previous: HashMap::new(),
            bound_set: None,
        }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Last resolved state of the action at `path`, if it has been resolved at least once.
    pub fn previous_state(&self, path: &str) -> Option<&ResolvedActionState> {
        self.previous.get(path)
    }

    /// Logs the actions that degrade to neutral because their device went away.
    pub fn note_device_events(&self, events: &[DeviceEvent]) {
        let Some(set) = &self.bound_set else {
            return;
        };
        for event in events {
            if let DeviceEvent::Disconnected { handle, role } = event {
                let affected: Vec<&str> = set.actions_for_role(*role).map(|a| a.name.as_str()).collect();
                if !affected.is_empty() {
                    info!("{} ({}) gone, actions now neutral: {}", handle, role, affected.join(", "));
                }
            }
        }
    }

    /// Resolves every action of `set` against this tick's frames, in the set's action order.
    pub fn resolve(&mut self, frames: &[RawInputFrame], set: &Arc<BindingSet>, tick: u64) -> Vec<ResolvedActionState> {
        if !self.bound_set.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, set)) {
            // Keep history only for actions that survive the swap unchanged in type.
            self.previous
                .retain(|path, state| set.action_by_path(path).is_some_and(|a| a.action_type == state.action_type));
            self.bound_set = Some(set.clone());
            debug!("Resolver bound to new binding set ({} actions)", set.actions().len());
        }

        let mut ordered: Vec<&RawInputFrame> = frames.iter().collect();
        ordered.sort_by_key(|f| (f.role, f.device));

        let mut states = Vec::with_capacity(set.actions().len());
        for action in set.actions() {
            let sample = set
                .bindings_for(&action.path)
                .and_then(|bindings| self.sample(action, bindings, &ordered));
            let previous = self.previous.get(&action.path);
            let state = self.next_state(action, sample, previous, tick);
            self.previous.insert(action.path.clone(), state.clone());
            states.push(state);
        }
        states
    }

    fn next_state(
        &self,
        action: &ActionDescriptor,
        sample: Option<(ActionValue, DeviceHandle)>,
        previous: Option<&ResolvedActionState>,
        tick: u64,
    ) -> ResolvedActionState {
        let neutral = ActionValue::neutral(action.action_type);
        let (value, source, was_active, available) = match sample {
            Some((value, source)) => (
                value,
                Some(source),
                previous.is_some_and(|p| p.value.is_active()),
                true,
            ),
            None => (neutral.clone(), None, false, false),
        };
        let is_active = value.is_active();
        let changed = match previous {
            Some(p) => p.value != value,
            None => value != neutral,
        };
        ResolvedActionState {
            name: action.name.clone(),
            path: action.path.clone(),
            action_type: action.action_type,
            value,
            became_active: available && is_active && !was_active,
            became_inactive: available && !is_active && was_active,
            timestamp: if changed { tick } else { previous.map_or(0, |p| p.timestamp) },
            resolved_tick: tick,
            source,
        }
    }

    fn sample(
        &self,
        action: &ActionDescriptor,
        bindings: &RoleBindings,
        frames: &[&RawInputFrame],
    ) -> Option<(ActionValue, DeviceHandle)> {
        let sources = bindings.iter().flat_map(|(role, paths)| {
            frames
                .iter()
                .filter(move |f| f.role == *role)
                .flat_map(move |f| paths.iter().map(move |p| (*f, p.as_str())))
        });

        match action.action_type {
            ActionType::Boolean => {
                let mut first = None;
                let mut pressed_by = None;
                for (frame, path) in sources {
                    let Some(raw) = frame.input(path) else { continue };
                    first.get_or_insert(frame.device);
                    let on = match raw {
                        RawValue::Digital(b) => b,
                        RawValue::Analog(v) => sanitize(v) >= self.options.click_threshold,
                        RawValue::Axis2 { x, y } => sanitize(x).hypot(sanitize(y)) >= self.options.click_threshold,
                    };
                    if on && pressed_by.is_none() {
                        pressed_by = Some(frame.device);
                    }
                }
                first.map(|device| (ActionValue::Boolean(pressed_by.is_some()), pressed_by.unwrap_or(device)))
            }
            ActionType::Vector1 | ActionType::Vector2 => {
                let mut best: Option<(ActionValue, DeviceHandle)> = None;
                for (frame, path) in sources {
                    let Some(raw) = frame.input(path) else { continue };
                    let value = self.convert_analog(action, raw);
                    if best.as_ref().is_none_or(|(current, _)| value.magnitude() > current.magnitude()) {
                        best = Some((value, frame.device));
                    }
                }
                best
            }
            ActionType::Pose => sources
                .filter(|(_, path)| path.starts_with("/pose/"))
                .find_map(|(frame, _)| {
                    let pose = frame.pose.as_ref().filter(|p| pose_is_finite(p))?;
                    let converted = convert_pose(pose, self.options.convention, self.options.world_to_meters);
                    Some((ActionValue::Pose(Some(converted)), frame.device))
                }),
            ActionType::Skeleton => sources
                .filter(|(_, path)| path.starts_with("/skeleton/"))
                .find_map(|(frame, _)| {
                    let skeleton = frame.skeleton.as_ref()?;
                    let pose = SkeletalPose::from_raw(
                        skeleton,
                        action.mirror_hand,
                        self.options.convention,
                        self.options.world_to_meters,
                    );
                    Some((ActionValue::Skeleton(Some(pose)), frame.device))
                }),
            ActionType::Haptic => sources.map(|(frame, _)| frame.device).next().map(|device| {
                (
                    ActionValue::Haptic(HapticTarget { device: Some(device) }),
                    device,
                )
            }),
        }
    }

    fn convert_analog(&self, action: &ActionDescriptor, raw: RawValue) -> ActionValue {
        let deadzone = action.deadzone.unwrap_or(self.options.default_deadzone);
        let axis = action.axis_semantics();
        let (x, y) = match raw {
            RawValue::Digital(b) => (if b { 1.0 } else { 0.0 }, 0.0),
            RawValue::Analog(v) => (sanitize(v), 0.0),
            RawValue::Axis2 { x, y } => (sanitize(x), sanitize(y)),
        };

        if action.action_type == ActionType::Vector1 {
            return ActionValue::Vector1(clamp_axis(apply_deadzone(x, deadzone), axis));
        }

        let magnitude = x.hypot(y);
        let scaled = apply_deadzone(magnitude, deadzone);
        let (x, y) = if scaled == 0.0 {
            (0.0, 0.0)
        } else {
            (x / magnitude * scaled, y / magnitude * scaled)
        };
        ActionValue::Vector2 {
            x: clamp_axis(x, axis),
            y: clamp_axis(y, axis),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use super::*;
    use crate::core::device::DeviceRole;
    use crate::core::frame::BONE_COUNT;
    use crate::mapping::bindings::BindingSetBuilder;
    use crate::mapping::manifest::parse_manifest;

    fn device(id: u64) -> DeviceHandle {
        serde_json::from_str(&id.to_string()).unwrap()
    }

    fn left(tick: u64) -> RawInputFrame {
        RawInputFrame::new(device(1), DeviceRole::Left, tick)
    }

    fn right(tick: u64) -> RawInputFrame {
        RawInputFrame::new(device(2), DeviceRole::Right, tick)
    }

    fn grip_set() -> Arc<BindingSet> {
        Arc::new(
            parse_manifest(
                r#"{ "actions": { "boolean": [
                    { "name": "Grip", "bindings": { "left": ["/input/grip/click"] } }
                ] } }"#,
            )
            .unwrap(),
        )
    }

    fn state<'a>(states: &'a [ResolvedActionState], name: &str) -> &'a ResolvedActionState {
        states.iter().find(|s| s.name == name).unwrap()
    }

    #[test]
    fn grip_press_hold_disconnect() {
        let set = grip_set();
        let mut resolver = ActionResolver::new(ResolverOptions::default());

        let frame = left(1).with_input("/input/grip/click", RawValue::Digital(true));
        let states = resolver.resolve(&[frame], &set, 1);
        assert_eq!(states[0].value, ActionValue::Boolean(true));
        assert!(states[0].became_active);

        let frame = left(2).with_input("/input/grip/click", RawValue::Digital(true));
        let states = resolver.resolve(&[frame], &set, 2);
        assert_eq!(states[0].value, ActionValue::Boolean(true));
        assert!(!states[0].became_active);

        let states = resolver.resolve(&[], &set, 3);
        assert_eq!(states[0].value, ActionValue::Boolean(false));
        assert!(!states[0].became_active && !states[0].became_inactive);
        assert_eq!(states[0].source, None);
    }

    #[test]
    fn release_sets_became_inactive_once() {
        let set = grip_set();
        let mut resolver = ActionResolver::new(ResolverOptions::default());
        let at = |tick, on| left(tick).with_input("/input/grip/click", RawValue::Digital(on));

        resolver.resolve(&[at(1, true)], &set, 1);
        let states = resolver.resolve(&[at(2, false)], &set, 2);
        assert!(states[0].became_inactive && !states[0].became_active);
        let states = resolver.resolve(&[at(3, false)], &set, 3);
        assert!(!states[0].became_inactive);
    }

    #[test]
    fn identical_frames_yield_identical_states() {
        let set = Arc::new(
            BindingSetBuilder::new()
                .action("Grip", ActionType::Boolean)
                .bind("Grip", DeviceRole::Left, "/input/grip/click")
                .action("Trigger", ActionType::Vector1)
                .bind("Trigger", DeviceRole::Right, "/input/trigger/value")
                .action("Aim", ActionType::Pose)
                .bind("Aim", DeviceRole::Right, "/pose/raw")
                .build()
                .unwrap(),
        );
        let frames = |tick| {
            vec![
                left(tick).with_input("/input/grip/click", RawValue::Digital(true)),
                right(tick)
                    .with_input("/input/trigger/value", RawValue::Analog(0.6))
                    .with_pose(RawPose::default()),
            ]
        };
        let mut resolver = ActionResolver::new(ResolverOptions::default());
        resolver.resolve(&frames(1), &set, 1);
        let second = resolver.resolve(&frames(2), &set, 2);
        let third = resolver.resolve(&frames(3), &set, 3);
        assert_eq!(second, third);
        assert!(third.iter().all(|s| !s.became_active && !s.became_inactive));
        assert!(third.iter().all(|s| s.timestamp == 1));
    }

    #[test]
    fn analog_values_are_clamped_to_declared_axis() {
        let set = Arc::new(
            parse_manifest(
                r#"{ "actions": {
                    "vector1": [
                        { "name": "Trigger", "deadzone": 0.0, "bindings": { "right": ["/input/trigger/value"] } },
                        { "name": "Throttle", "axis": "bipolar", "deadzone": 0.0, "bindings": { "left": ["/input/joystick/y"] } }
                    ],
                    "vector2": [
                        { "name": "Move", "deadzone": 0.0, "bindings": { "left": ["/input/thumbstick"] } }
                    ]
                } }"#,
            )
            .unwrap(),
        );
        let mut resolver = ActionResolver::new(ResolverOptions::default());
        let frames = [
            right(1).with_input("/input/trigger/value", RawValue::Analog(1.7)),
            left(1)
                .with_input("/input/joystick/y", RawValue::Analog(-3.0))
                .with_input("/input/thumbstick", RawValue::Axis2 { x: 5.0, y: 0.0 }),
        ];
        let states = resolver.resolve(&frames, &set, 1);
        assert_eq!(state(&states, "Trigger").value, ActionValue::Vector1(1.0));
        assert_eq!(state(&states, "Throttle").value, ActionValue::Vector1(-1.0));
        assert_eq!(state(&states, "Move").value, ActionValue::Vector2 { x: 1.0, y: 0.0 });

        let frames = [right(2).with_input("/input/trigger/value", RawValue::Analog(-0.4))];
        let states = resolver.resolve(&frames, &set, 2);
        assert_eq!(state(&states, "Trigger").value, ActionValue::Vector1(0.0));

        let frames = [right(3).with_input("/input/trigger/value", RawValue::Analog(f32::NAN))];
        let states = resolver.resolve(&frames, &set, 3);
        assert_eq!(state(&states, "Trigger").value, ActionValue::Vector1(0.0));
    }

    #[test]
    fn deadzone_rescales_the_remaining_range() {
        assert_eq!(apply_deadzone(0.03, 0.05), 0.0);
        assert!((apply_deadzone(0.525, 0.05) - 0.5).abs() < 1e-6);
        assert!((apply_deadzone(-0.525, 0.05) + 0.5).abs() < 1e-6);
        assert_eq!(apply_deadzone(1.0, 0.05), 1.0);
    }

    #[test]
    fn analog_source_drives_boolean_through_click_threshold() {
        let set = Arc::new(
            BindingSetBuilder::new()
                .action("Fire", ActionType::Boolean)
                .bind("Fire", DeviceRole::Right, "/input/trigger/value")
                .build()
                .unwrap(),
        );
        let mut resolver = ActionResolver::new(ResolverOptions::default());
        let at = |tick, v| right(tick).with_input("/input/trigger/value", RawValue::Analog(v));
        assert_eq!(resolver.resolve(&[at(1, 0.4)], &set, 1)[0].value, ActionValue::Boolean(false));
        let states = resolver.resolve(&[at(2, 0.5)], &set, 2);
        assert_eq!(states[0].value, ActionValue::Boolean(true));
        assert!(states[0].became_active);
    }

    #[test]
    fn multiple_sources_combine_deterministically() {
        let set = Arc::new(
            BindingSetBuilder::new()
                .action("Grip", ActionType::Boolean)
                .bind("Grip", DeviceRole::Left, "/input/grip/click")
                .bind("Grip", DeviceRole::Right, "/input/grip/click")
                .action("Squeeze", ActionType::Vector1)
                .bind("Squeeze", DeviceRole::Left, "/input/grip/value")
                .bind("Squeeze", DeviceRole::Right, "/input/grip/value")
                .build()
                .unwrap(),
        );
        let frames = [
            right(1)
                .with_input("/input/grip/click", RawValue::Digital(true))
                .with_input("/input/grip/value", RawValue::Analog(0.9)),
            left(1)
                .with_input("/input/grip/click", RawValue::Digital(false))
                .with_input("/input/grip/value", RawValue::Analog(0.3)),
        ];
        let mut resolver = ActionResolver::new(ResolverOptions::default());
        let states = resolver.resolve(&frames, &set, 1);
        let grip = state(&states, "Grip");
        assert_eq!(grip.value, ActionValue::Boolean(true));
        assert_eq!(grip.source, Some(device(2)));
        let squeeze = state(&states, "Squeeze");
        assert_eq!(squeeze.source, Some(device(2)));
        match &squeeze.value {
            ActionValue::Vector1(v) => assert!(*v > 0.85),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn left_handed_conversion_maps_axes_and_rotation() {
        let raw = RawPose {
            position: Vector3::new(1.0, 2.0, -3.0),
            orientation: UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2),
            linear_velocity: Vector3::new(0.0, 0.0, -1.0),
            angular_velocity: Vector3::new(0.0, 1.0, 0.0),
        };
        let pose = convert_pose(&raw, CoordinateConvention::LeftHandedZUp, 100.0);
        assert!((pose.position - Vector3::new(300.0, 100.0, 200.0)).norm() < 1e-3);
        assert!((pose.linear_velocity - Vector3::new(100.0, 0.0, 0.0)).norm() < 1e-3);
        assert!((pose.angular_velocity - Vector3::new(0.0, 0.0, -1.0)).norm() < 1e-6);

        // Turning left in the runtime points forward at -X; in the host that is -Y.
        let forward = pose.orientation * Vector3::x();
        assert!((forward - Vector3::new(0.0, -1.0, 0.0)).norm() < 1e-5);

        let same = convert_pose(&raw, CoordinateConvention::RightHandedYUp, 100.0);
        assert_eq!(same.position, raw.position);
    }

    #[test]
    fn pose_skeleton_and_haptic_targets() {
        let set = Arc::new(
            parse_manifest(
                r#"{ "actions": {
                    "pose": [ { "name": "LeftPose", "bindings": { "left": ["/pose/raw"] } } ],
                    "skeleton": [ { "name": "LeftHand", "bindings": { "left": ["/skeleton/hand/left"] } } ],
                    "haptic": [ { "name": "Buzz", "bindings": { "right": ["/output/haptic"] } } ]
                } }"#,
            )
            .unwrap(),
        );
        let skeleton = RawSkeleton {
            finger_curls: [1.5, 0.5, 0.0, 0.0, 0.0],
            finger_splays: [0.1; 4],
            tracking_level: SkeletalTrackingLevel::Full,
            bones: Vec::new(),
        };
        let frames = [
            left(1).with_pose(RawPose::default()).with_skeleton(skeleton),
            right(1),
        ];
        let mut resolver = ActionResolver::new(ResolverOptions::default());
        let states = resolver.resolve(&frames, &set, 1);
        assert!(matches!(state(&states, "LeftPose").value, ActionValue::Pose(Some(_))));
        match &state(&states, "LeftHand").value {
            ActionValue::Skeleton(Some(summary)) => {
                assert_eq!(summary.finger_curls[0], 1.0);
                assert_eq!(summary.bone_transform(HandBone::Wrist), BoneTransform::identity());
                assert_eq!(summary.tracking_level, SkeletalTrackingLevel::Full);
            }
            other => panic!("unexpected value {:?}", other),
        }
        assert_eq!(
            state(&states, "Buzz").value,
            ActionValue::Haptic(HapticTarget { device: Some(device(2)) })
        );

        let states = resolver.resolve(&[], &set, 2);
        assert_eq!(state(&states, "LeftPose").value, ActionValue::Pose(None));
        assert_eq!(state(&states, "LeftHand").value, ActionValue::Skeleton(None));
        assert_eq!(state(&states, "Buzz").value, ActionValue::neutral(ActionType::Haptic));
    }

    #[test]
    fn new_set_drops_history_of_removed_actions() {
        let mut resolver = ActionResolver::new(ResolverOptions::default());
        let set = grip_set();
        let frame = left(1).with_input("/input/grip/click", RawValue::Digital(true));
        resolver.resolve(&[frame], &set, 1);
        assert!(resolver.previous_state("/actions/main/in/Grip").is_some());

        let empty = Arc::new(BindingSet::default());
        assert!(resolver.resolve(&[], &empty, 2).is_empty());
        assert!(resolver.previous_state("/actions/main/in/Grip").is_none());
    }

    #[test]
    fn same_named_actions_resolve_independently() {
        let set = Arc::new(
            parse_manifest(
                r#"{ "actions": {
                    "boolean": [ { "name": "Trigger", "bindings": { "right": ["/input/trigger/click"] } } ],
                    "vector1": [ { "name": "Trigger", "deadzone": 0.0, "bindings": { "right": ["/input/trigger/value"] } } ]
                } }"#,
            )
            .unwrap(),
        );
        let at = |tick, click, value| {
            right(tick)
                .with_input("/input/trigger/click", RawValue::Digital(click))
                .with_input("/input/trigger/value", RawValue::Analog(value))
        };
        let mut resolver = ActionResolver::new(ResolverOptions::default());

        let states = resolver.resolve(&[at(1, true, 0.7)], &set, 1);
        assert_eq!(states.len(), 2);
        let click = states.iter().find(|s| s.action_type == ActionType::Boolean).unwrap();
        let value = states.iter().find(|s| s.action_type == ActionType::Vector1).unwrap();
        assert_eq!(click.value, ActionValue::Boolean(true));
        assert_eq!(value.value, ActionValue::Vector1(0.7));
        assert_ne!(click.path, value.path);
        assert!(click.became_active && value.became_active);

        let states = resolver.resolve(&[at(2, false, 0.7)], &set, 2);
        let click = states.iter().find(|s| s.action_type == ActionType::Boolean).unwrap();
        let value = states.iter().find(|s| s.action_type == ActionType::Vector1).unwrap();
        assert!(click.became_inactive);
        assert!(!value.became_active && !value.became_inactive);
        assert_eq!(value.timestamp, 1);
        assert_eq!(
            resolver.previous_state("/actions/main/in/Trigger_axis").unwrap().value,
            ActionValue::Vector1(0.7)
        );
        assert_eq!(
            resolver.previous_state("/actions/main/in/Trigger").unwrap().value,
            ActionValue::Boolean(false)
        );
    }

    #[test]
    fn skeleton_bones_are_converted_and_mirrored() {
        let set = Arc::new(
            parse_manifest(
                r#"{ "actions": { "skeleton": [
                    { "name": "LeftHand", "bindings": { "left": ["/skeleton/hand/left"] } },
                    { "name": "RightHand", "mirror_hand": true, "bindings": { "left": ["/skeleton/hand/left"] } }
                ] } }"#,
            )
            .unwrap(),
        );
        let mut bones = vec![BoneTransform::identity(); BONE_COUNT];
        bones[HandBone::Wrist.index()].position = Vector3::new(0.1, 0.2, 0.3);
        bones[HandBone::IndexFinger1.index()].position = Vector3::new(0.0, 0.0, 0.04);
        let skeleton = RawSkeleton {
            finger_curls: [0.0; 5],
            finger_splays: [0.0; 4],
            tracking_level: SkeletalTrackingLevel::Full,
            bones,
        };
        let options = ResolverOptions {
            convention: CoordinateConvention::LeftHandedZUp,
            world_to_meters: 100.0,
            ..ResolverOptions::default()
        };
        let mut resolver = ActionResolver::new(options);
        let states = resolver.resolve(&[left(1).with_skeleton(skeleton)], &set, 1);

        let pose = |name| match &state(&states, name).value {
            ActionValue::Skeleton(Some(pose)) => pose.clone(),
            other => panic!("unexpected value {:?}", other),
        };
        let close = |a: Vector3<f32>, b: Vector3<f32>| (a - b).norm() < 1e-4;

        let left_hand = pose("LeftHand");
        assert_eq!(left_hand.bones.len(), BONE_COUNT);
        assert!(close(left_hand.bone_transform(HandBone::Wrist).position, Vector3::new(-30.0, 10.0, 20.0)));
        assert!(close(left_hand.bone_transform(HandBone::IndexFinger1).position, Vector3::new(-4.0, 0.0, 0.0)));

        let right_hand = pose("RightHand");
        assert!(close(right_hand.bone_transform(HandBone::Wrist).position, Vector3::new(-30.0, -10.0, 20.0)));
        assert!(close(right_hand.bone_transform(HandBone::IndexFinger1).position, Vector3::new(4.0, 0.0, 0.0)));
    }

    #[test]
    fn missing_bones_read_as_identity() {
        let raw = RawSkeleton {
            finger_curls: [0.0; 5],
            finger_splays: [0.0; 4],
            tracking_level: SkeletalTrackingLevel::Partial,
            bones: vec![
                BoneTransform::identity(),
                BoneTransform {
                    position: Vector3::new(f32::NAN, 0.0, 0.0),
                    orientation: UnitQuaternion::identity(),
                },
            ],
        };
        let pose = SkeletalPose::from_raw(&raw, false, CoordinateConvention::RightHandedYUp, 1.0);
        assert_eq!(pose.bone_transform(HandBone::Wrist), BoneTransform::identity());
        assert_eq!(pose.bone_transform(HandBone::AuxPinkyFinger), BoneTransform::identity());
    }
}
