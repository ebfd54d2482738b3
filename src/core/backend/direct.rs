//! Direct native-SDK backend
//! Reads the legacy per-controller button masks and axes and exposes them under the same input
//! paths the mediated backend reports, so bindings work unchanged on either backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, trace};

use crate::core::backend::{raw_pose_from_native, BackendKind, DevicePoll, InputBackend};
use crate::core::frame::RawValue;
use crate::core::overlay::{GraphicsApi, GraphicsTextureHandle};
use crate::core::runtime::{ButtonId, DeviceClass, NativeControllerState, NativeDevice, RuntimeClient, TrackedDeviceIndex};
use crate::error::RuntimeError;
use crate::mapping::haptics::HapticRequest;

/// Legacy haptic pulses always go to the first haptic axis.
const HAPTIC_AXIS: u32 = 0;

/// Digital inputs derived from the pressed mask.
const CLICK_PATHS: [(ButtonId, &str); 6] = [
    (ButtonId::System, "/input/system/click"),
    (ButtonId::ApplicationMenu, "/input/application_menu/click"),
    (ButtonId::Grip, "/input/grip/click"),
    (ButtonId::A, "/input/a/click"),
    (ButtonId::Axis0, "/input/trackpad/click"),
    (ButtonId::Axis1, "/input/trigger/click"),
];

/// Digital inputs derived from the touched mask.
const TOUCH_PATHS: [(ButtonId, &str); 2] = [
    (ButtonId::Axis0, "/input/trackpad/touch"),
    (ButtonId::Axis1, "/input/trigger/touch"),
];

/// Translates a legacy controller snapshot into path-addressed raw values.
pub fn legacy_inputs(state: &NativeControllerState) -> BTreeMap<String, RawValue> {
    let mut inputs = BTreeMap::new();
    for (button, path) in CLICK_PATHS {
        inputs.insert(path.to_string(), RawValue::Digital(state.is_pressed(button)));
    }
    for (button, path) in TOUCH_PATHS {
        inputs.insert(path.to_string(), RawValue::Digital(state.is_touched(button)));
    }
    let trackpad = state.axes[0];
    inputs.insert(
        "/input/trackpad".to_string(),
        RawValue::Axis2 {
            x: trackpad.x,
            y: trackpad.y,
        },
    );
    inputs.insert("/input/trigger/value".to_string(), RawValue::Analog(state.axes[1].x));
    inputs.insert("/input/grip/value".to_string(), RawValue::Analog(state.axes[2].x));
    inputs
}

/// Maps a vibration request to a legacy pulse length in microseconds.
pub fn pulse_length_us(request: &HapticRequest, max_pulse_us: u16) -> u16 {
    let amplitude = request.effective_amplitude();
    (amplitude * f32::from(max_pulse_us)).round().clamp(0.0, f32::from(max_pulse_us)) as u16
}

pub struct DirectBackend {
    runtime: Arc<dyn RuntimeClient>,
    max_pulse_us: u16,
}

impl DirectBackend {
    pub fn new(runtime: Arc<dyn RuntimeClient>, max_pulse_us: u16) -> Self {
        info!("Direct backend using legacy controller state, max pulse {}us", max_pulse_us);
        Self { runtime, max_pulse_us }
    }
}

impl InputBackend for DirectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    fn enumerate_devices(&self) -> Result<Vec<NativeDevice>, RuntimeError> {
        self.runtime.tracked_devices()
    }

    fn poll_state(&self, index: TrackedDeviceIndex, class: DeviceClass) -> Result<DevicePoll, RuntimeError> {
        let pose = self
            .runtime
            .device_pose(index)?
            .as_ref()
            .and_then(raw_pose_from_native);

        let inputs = if class == DeviceClass::Controller {
            legacy_inputs(&self.runtime.controller_state(index)?)
        } else {
            BTreeMap::new()
        };

        Ok(DevicePoll {
            inputs,
            pose,
            skeleton: None,
        })
    }

    fn supports_skeleton(&self) -> bool {
        false
    }

    fn submit_haptic(&self, index: TrackedDeviceIndex, request: &HapticRequest) -> Result<(), RuntimeError> {
        let duration_us = pulse_length_us(request, self.max_pulse_us);
        if duration_us == 0 {
            trace!("Skipping zero-length pulse for device {}", index);
            return Ok(());
        }
        self.runtime.trigger_haptic_pulse(index, HAPTIC_AXIS, duration_us)
    }

    fn sustains_haptics(&self) -> bool {
        false
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
