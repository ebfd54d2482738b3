//! In-process simulated VR runtime
//! Implements both native contracts against scripted device state. Used by the headless binary
//! and as the runtime double in tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::core::backend::direct::legacy_inputs;
use crate::core::frame::RawValue;
use crate::core::overlay::{GraphicsApi, GraphicsTextureHandle};
use crate::core::runtime::{
    ButtonId, ComponentValue, ControllerRole, DeviceClass, InputComponent, InputService, NativeAxis,
    NativeBoneTransform, NativeControllerState, NativeDevice, NativePose, NativeSkeleton, ReferencePose,
    RuntimeClient, RuntimeInfo, TrackedDeviceIndex, CONTROLLER_AXIS_COUNT, MAX_TRACKED_DEVICES,
};
use crate::error::RuntimeError;

/// Interface version the simulated runtime reports unless overridden.
pub const SIMULATED_INTERFACE_VERSION: u32 = 22;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HapticPulseRecord {
    pub index: TrackedDeviceIndex,
    pub axis: u32,
    pub duration_us: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VibrationRecord {
    pub index: TrackedDeviceIndex,
    pub duration_secs: f32,
    pub frequency: f32,
    pub amplitude: f32,
}

#[derive(Debug, Clone)]
struct SimDevice {
    native: NativeDevice,
    controller: NativeControllerState,
    pose: NativePose,
    extra_components: BTreeMap<String, ComponentValue>,
    skeleton: Option<NativeSkeleton>,
}

#[derive(Debug)]
struct SimState {
    installed: bool,
    init_failure: Option<String>,
    interface_version: u32,
    service_available: bool,
    initialized: bool,
    init_count: u32,
    shutdown_count: u32,
    service_updates: u32,
    enumerations: u32,
    failing_polls: u32,
    poll_delay: Duration,
    submit_delay: Duration,
    compositor_apis: Vec<GraphicsApi>,
    submitted_frames: u64,
    devices: BTreeMap<TrackedDeviceIndex, SimDevice>,
    reference_poses: BTreeMap<ReferencePose, Vec<NativeBoneTransform>>,
    haptic_log: Vec<HapticPulseRecord>,
    vibration_log: Vec<VibrationRecord>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            installed: true,
            init_failure: None,
            interface_version: SIMULATED_INTERFACE_VERSION,
            service_available: true,
            initialized: false,
            init_count: 0,
            shutdown_count: 0,
            service_updates: 0,
            enumerations: 0,
            failing_polls: 0,
            poll_delay: Duration::ZERO,
            submit_delay: Duration::ZERO,
            compositor_apis: vec![
                GraphicsApi::OpenGl,
                GraphicsApi::Vulkan,
                GraphicsApi::Direct3D11,
                GraphicsApi::Metal,
            ],
            submitted_frames: 0,
            devices: BTreeMap::new(),
            reference_poses: BTreeMap::new(),
            haptic_log: Vec::new(),
            vibration_log: Vec::new(),
        }
    }
}

/// Scriptable runtime. Every setter takes `&self` so tests can share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct SimulatedRuntime {
    state: Mutex<SimState>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_device(&self, index: TrackedDeviceIndex, f: impl FnOnce(&mut SimDevice)) {
        if let Some(device) = self.state().devices.get_mut(&index) {
            f(device);
        }
    }

    fn add_device(&self, class: DeviceClass, role: ControllerRole, has_haptics: bool) -> TrackedDeviceIndex {
        let mut state = self.state();
        let index = (0..MAX_TRACKED_DEVICES)
            .find(|i| !state.devices.contains_key(i))
            .unwrap_or(MAX_TRACKED_DEVICES - 1);
        let serial = format!("SIM-{:?}-{}", class, index).to_uppercase();
        debug!("Simulated {:?} added in slot {}", class, index);
        state.devices.insert(
            index,
            SimDevice {
                native: NativeDevice {
                    index,
                    class,
                    role,
                    connected: true,
                    serial,
                    has_haptics,
                },
                controller: NativeControllerState::default(),
                pose: NativePose::default(),
                extra_components: BTreeMap::new(),
                skeleton: None,
            },
        );
        index
    }

    pub fn add_controller(&self, role: ControllerRole) -> TrackedDeviceIndex {
        self.add_device(DeviceClass::Controller, role, true)
    }

    pub fn add_tracker(&self) -> TrackedDeviceIndex {
        self.add_device(DeviceClass::GenericTracker, ControllerRole::Invalid, false)
    }

    pub fn add_hmd(&self) -> TrackedDeviceIndex {
        self.add_device(DeviceClass::Hmd, ControllerRole::Invalid, false)
    }

    pub fn disconnect(&self, index: TrackedDeviceIndex) {
        self.with_device(index, |d| d.native.connected = false);
    }

    pub fn reconnect(&self, index: TrackedDeviceIndex) {
        self.with_device(index, |d| d.native.connected = true);
    }

    pub fn set_role(&self, index: TrackedDeviceIndex, role: ControllerRole) {
        self.with_device(index, |d| d.native.role = role);
    }

    pub fn press(&self, index: TrackedDeviceIndex, button: ButtonId) {
        self.with_device(index, |d| {
            d.controller.buttons_pressed |= button.mask();
            d.controller.buttons_touched |= button.mask();
            d.controller.packet_num += 1;
        });
    }

    pub fn release(&self, index: TrackedDeviceIndex, button: ButtonId) {
        self.with_device(index, |d| {
            d.controller.buttons_pressed &= !button.mask();
            d.controller.buttons_touched &= !button.mask();
            d.controller.packet_num += 1;
        });
    }

    pub fn set_axis(&self, index: TrackedDeviceIndex, axis: usize, x: f32, y: f32) {
        if axis >= CONTROLLER_AXIS_COUNT {
            return;
        }
        self.with_device(index, |d| {
            d.controller.axes[axis] = NativeAxis { x, y };
            d.controller.packet_num += 1;
        });
    }

    pub fn set_pose(&self, index: TrackedDeviceIndex, pose: NativePose) {
        self.with_device(index, |d| d.pose = pose);
    }

    /// Adds or overrides a component reported by the input service.
    pub fn set_component(&self, index: TrackedDeviceIndex, path: &str, value: ComponentValue) {
        self.with_device(index, |d| {
            d.extra_components.insert(path.to_string(), value);
        });
    }

    pub fn set_skeleton(&self, index: TrackedDeviceIndex, skeleton: NativeSkeleton) {
        self.with_device(index, |d| d.skeleton = Some(skeleton));
    }

    /// Bones every controller reports for `pose`.
    pub fn set_reference_pose(&self, pose: ReferencePose, bones: Vec<NativeBoneTransform>) {
        self.state().reference_poses.insert(pose, bones);
    }

    pub fn set_installed(&self, installed: bool) {
        self.state().installed = installed;
    }

    pub fn set_init_failure(&self, reason: Option<String>) {
        self.state().init_failure = reason;
    }

    pub fn set_interface_version(&self, version: u32) {
        self.state().interface_version = version;
    }

    pub fn set_service_available(&self, available: bool) {
        self.state().service_available = available;
    }

    pub fn set_compositor_apis(&self, apis: Vec<GraphicsApi>) {
        self.state().compositor_apis = apis;
    }

    /// Makes the next `count` device enumerations fail with a lost connection.
    pub fn fail_polls(&self, count: u32) {
        self.state().failing_polls = count;
    }

    pub fn set_poll_delay(&self, delay: Duration) {
        self.state().poll_delay = delay;
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        self.state().submit_delay = delay;
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn init_count(&self) -> u32 {
        self.state().init_count
    }

    pub fn shutdown_count(&self) -> u32 {
        self.state().shutdown_count
    }

    pub fn service_updates(&self) -> u32 {
        self.state().service_updates
    }

    /// Calls to `tracked_devices`, failed ones included.
    pub fn enumeration_count(&self) -> u32 {
        self.state().enumerations
    }

    pub fn submitted_frames(&self) -> u64 {
        self.state().submitted_frames
    }

    pub fn haptic_log(&self) -> Vec<HapticPulseRecord> {
        self.state().haptic_log.clone()
    }

    pub fn vibration_log(&self) -> Vec<VibrationRecord> {
        self.state().vibration_log.clone()
    }

    fn connected_device(&self, index: TrackedDeviceIndex) -> Result<SimDevice, RuntimeError> {
        self.state()
            .devices
            .get(&index)
            .filter(|d| d.native.connected)
            .cloned()
            .ok_or(RuntimeError::InvalidDevice(index))
    }
}

impl RuntimeClient for SimulatedRuntime {
    fn is_installed(&self) -> bool {
        self.state().installed
    }

    fn init(&self, application_name: &str) -> Result<RuntimeInfo, RuntimeError> {
        let mut state = self.state();
        if !state.installed {
            return Err(RuntimeError::NotInstalled);
        }
        if let Some(reason) = &state.init_failure {
            return Err(RuntimeError::InitFailed(reason.clone()));
        }
        state.initialized = true;
        state.init_count += 1;
        info!("Simulated runtime initialized for '{}'", application_name);
        Ok(RuntimeInfo {
            runtime_name: "simulated".to_string(),
            interface_version: state.interface_version,
        })
    }

    fn shutdown(&self) {
        let mut state = self.state();
        state.initialized = false;
        state.shutdown_count += 1;
    }

    fn tracked_devices(&self) -> Result<Vec<NativeDevice>, RuntimeError> {
        let delay = {
            let mut state = self.state();
            state.enumerations += 1;
            if !state.initialized {
                return Err(RuntimeError::ConnectionLost);
            }
            if state.failing_polls > 0 {
                state.failing_polls -= 1;
                return Err(RuntimeError::ConnectionLost);
            }
            state.poll_delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(self.state().devices.values().map(|d| d.native.clone()).collect())
    }

    fn controller_state(&self, index: TrackedDeviceIndex) -> Result<NativeControllerState, RuntimeError> {
        Ok(self.connected_device(index)?.controller)
    }

    fn device_pose(&self, index: TrackedDeviceIndex) -> Result<Option<NativePose>, RuntimeError> {
        Ok(Some(self.connected_device(index)?.pose))
    }

    fn trigger_haptic_pulse(&self, index: TrackedDeviceIndex, axis: u32, duration_us: u16) -> Result<(), RuntimeError> {
        let device = self.connected_device(index)?;
        if !device.native.has_haptics {
            return Err(RuntimeError::InvalidDevice(index));
        }
        self.state().haptic_log.push(HapticPulseRecord {
            index,
            axis,
            duration_us,
        });
        Ok(())
    }

    fn compositor_graphics_apis(&self) -> Vec<GraphicsApi> {
        self.state().compositor_apis.clone()
    }

    fn submit_texture(&self, _texture: &GraphicsTextureHandle, api: GraphicsApi) -> Result<(), RuntimeError> {
        let delay = {
            let state = self.state();
            if !state.compositor_apis.contains(&api) {
                return Err(RuntimeError::Compositor(format!("{:?} textures not accepted", api)));
            }
            state.submit_delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.state().submitted_frames += 1;
        Ok(())
    }
}

impl InputService for SimulatedRuntime {
    fn is_available(&self) -> bool {
        self.state().service_available
    }

    fn update_state(&self) -> Result<(), RuntimeError> {
        let mut state = self.state();
        if !state.service_available {
            return Err(RuntimeError::Input("input service unavailable".to_string()));
        }
        state.service_updates += 1;
        Ok(())
    }

    fn input_components(&self, index: TrackedDeviceIndex) -> Result<Vec<InputComponent>, RuntimeError> {
        let device = self.connected_device(index)?;
        let mut components: BTreeMap<String, ComponentValue> = BTreeMap::new();
        if device.native.class == DeviceClass::Controller {
            for (path, value) in legacy_inputs(&device.controller) {
                let value = match value {
                    RawValue::Digital(b) => ComponentValue::Boolean(b),
                    RawValue::Analog(v) => ComponentValue::Scalar(v),
                    RawValue::Axis2 { x, y } => ComponentValue::Vector2(x, y),
                };
                components.insert(path, value);
            }
        }
        components.extend(device.extra_components);
        Ok(components
            .into_iter()
            .map(|(path, value)| InputComponent { path, value })
            .collect())
    }

    fn skeletal_summary(&self, index: TrackedDeviceIndex) -> Result<Option<NativeSkeleton>, RuntimeError> {
        Ok(self.connected_device(index)?.skeleton)
    }

    fn reference_pose(
        &self,
        index: TrackedDeviceIndex,
        pose: ReferencePose,
    ) -> Result<Option<Vec<NativeBoneTransform>>, RuntimeError> {
        let device = self.connected_device(index)?;
        if device.native.class != DeviceClass::Controller {
            return Ok(None);
        }
        Ok(self.state().reference_poses.get(&pose).cloned())
    }

    fn trigger_vibration(
        &self,
        index: TrackedDeviceIndex,
        duration_secs: f32,
        frequency: f32,
        amplitude: f32,
    ) -> Result<(), RuntimeError> {
        self.connected_device(index)?;
        self.state().vibration_log.push(VibrationRecord {
            index,
            duration_secs,
            frequency,
            amplitude,
        });
        Ok(())
    }
}
