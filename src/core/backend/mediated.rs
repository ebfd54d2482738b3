//! Mediated backend
//! Devices, poses and the compositor come from the native runtime; controller input, hand
//! skeletons and vibration are routed through the intermediary input service.

use std::sync::Arc;

use log::info;

use crate::core::backend::{bones_from_native, raw_pose_from_native, BackendKind, DevicePoll, InputBackend};
use crate::core::frame::{BoneTransform, RawSkeleton, RawValue};
use crate::core::overlay::{GraphicsApi, GraphicsTextureHandle};
use crate::core::runtime::{
    ComponentValue, DeviceClass, InputService, NativeDevice, ReferencePose, RuntimeClient, TrackedDeviceIndex,
};
use crate::error::RuntimeError;
use crate::mapping::haptics::HapticRequest;

pub struct MediatedBackend {
    runtime: Arc<dyn RuntimeClient>,
    service: Arc<dyn InputService>,
}

impl MediatedBackend {
    pub fn new(runtime: Arc<dyn RuntimeClient>, service: Arc<dyn InputService>) -> Self {
        info!("Mediated backend routing input through the input service");
        Self { runtime, service }
    }
}

fn raw_value(value: ComponentValue) -> RawValue {
    match value {
        ComponentValue::Boolean(b) => RawValue::Digital(b),
        ComponentValue::Scalar(v) => RawValue::Analog(v),
        ComponentValue::Vector2(x, y) => RawValue::Axis2 { x, y },
    }
}

impl InputBackend for MediatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mediated
    }

    fn begin_frame(&self) -> Result<(), RuntimeError> {
        self.service.update_state()
    }

    fn enumerate_devices(&self) -> Result<Vec<NativeDevice>, RuntimeError> {
        self.runtime.tracked_devices()
    }

    fn poll_state(&self, index: TrackedDeviceIndex, _class: DeviceClass) -> Result<DevicePoll, RuntimeError> {
        let pose = self
            .runtime
            .device_pose(index)?
            .as_ref()
            .and_then(raw_pose_from_native);
        let inputs = self
            .service
            .input_components(index)?
            .into_iter()
            .map(|c| (c.path, raw_value(c.value)))
            .collect();
        let skeleton = self.service.skeletal_summary(index)?.map(|s| RawSkeleton {
            finger_curls: s.finger_curls,
            finger_splays: s.finger_splays,
            tracking_level: s.tracking_level,
            bones: bones_from_native(&s.bones),
        });
        Ok(DevicePoll { inputs, pose, skeleton })
    }

    fn supports_skeleton(&self) -> bool {
        true
    }

    fn reference_pose(
        &self,
        index: TrackedDeviceIndex,
        pose: ReferencePose,
    ) -> Result<Option<Vec<BoneTransform>>, RuntimeError> {
        Ok(self
            .service
            .reference_pose(index, pose)?
            .map(|bones| bones_from_native(&bones)))
    }

    fn submit_haptic(&self, index: TrackedDeviceIndex, request: &HapticRequest) -> Result<(), RuntimeError> {
        self.service.trigger_vibration(
            index,
            request.duration.as_secs_f32(),
            request.frequency.max(0.0),
            request.effective_amplitude(),
        )
    }

    fn sustains_haptics(&self) -> bool {
        true
    }

    fn supported_graphics_apis(&self) -> Vec<GraphicsApi> {
        self.runtime.compositor_graphics_apis()
    }

    fn submit_compositor_frame(&self, texture: &GraphicsTextureHandle, api: GraphicsApi) -> Result<(), RuntimeError> {
        self.runtime.submit_texture(texture, api)
    }

    fn shutdown(&self) {
        self.runtime.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::frame::{HandBone, SkeletalTrackingLevel, BONE_COUNT};
    use crate::core::runtime::simulated::SimulatedRuntime;
    use crate::core::runtime::{ButtonId, ControllerRole, NativeBoneTransform, NativeSkeleton};

    fn backend() -> (Arc<SimulatedRuntime>, MediatedBackend) {
        let runtime = Arc::new(SimulatedRuntime::new());
        let backend = MediatedBackend::new(runtime.clone(), runtime.clone());
        (runtime, backend)
    }

    #[test]
    fn reports_same_paths_as_direct() {
        let (runtime, backend) = backend();
        let index = runtime.add_controller(ControllerRole::RightHand);
        runtime.press(index, ButtonId::A);
        runtime.set_component(index, "/input/thumbstick", ComponentValue::Vector2(0.1, 0.2));

        backend.begin_frame().unwrap();
        let poll = backend.poll_state(index, DeviceClass::Controller).unwrap();
        assert_eq!(poll.inputs["/input/a/click"], RawValue::Digital(true));
        assert_eq!(poll.inputs["/input/thumbstick"], RawValue::Axis2 { x: 0.1, y: 0.2 });
        assert_eq!(runtime.service_updates(), 1);
    }

    #[test]
    fn forwards_skeleton_and_vibration() {
        let (runtime, backend) = backend();
        let index = runtime.add_controller(ControllerRole::LeftHand);
        runtime.set_skeleton(
            index,
            NativeSkeleton {
                finger_curls: [1.0, 0.5, 0.0, 0.0, 0.0],
                finger_splays: [0.2; 4],
                tracking_level: SkeletalTrackingLevel::Partial,
                bones: vec![NativeBoneTransform::default(); BONE_COUNT],
            },
        );
        let poll = backend.poll_state(index, DeviceClass::Controller).unwrap();
        let skeleton = poll.skeleton.unwrap();
        assert_eq!(skeleton.finger_curls[0], 1.0);
        assert_eq!(skeleton.tracking_level, SkeletalTrackingLevel::Partial);
        assert_eq!(skeleton.bones.len(), BONE_COUNT);

        assert_eq!(backend.reference_pose(index, ReferencePose::Fist).unwrap(), None);
        runtime.set_reference_pose(
            ReferencePose::Fist,
            vec![
                NativeBoneTransform {
                    position: [0.0, 0.0, 0.05],
                    ..NativeBoneTransform::default()
                };
                BONE_COUNT
            ],
        );
        let fist = backend.reference_pose(index, ReferencePose::Fist).unwrap().unwrap();
        assert_eq!(fist[HandBone::Thumb1.index()].position.z, 0.05);

        backend
            .submit_haptic(
                index,
                &HapticRequest {
                    amplitude: 0.8,
                    frequency: 0.0,
                    duration: Duration::from_millis(100),
                },
            )
            .unwrap();
        let log = runtime.vibration_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].amplitude, 0.0);
    }
}
