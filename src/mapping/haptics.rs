//! Haptic output routing
//! Vibration requests are queued against a haptic action by name and delivered on the next
//! tick to whichever device the action currently targets.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::core::backend::InputBackend;
use crate::core::device::DeviceHandle;
use crate::core::runtime::TrackedDeviceIndex;
use crate::error::RuntimeError;
use crate::mapping::bindings::HapticDefaults;
use crate::utils::LastError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HapticRequest {
    /// 0 to 1.
    pub amplitude: f32,
    /// Hz. Zero or below means no vibration.
    pub frequency: f32,
    pub duration: Duration,
}

impl HapticRequest {
    /// Amplitude actually applied: clamped to [0, 1], and 0 when the frequency is not positive.
    pub fn effective_amplitude(&self) -> f32 {
        if !(self.frequency > 0.0) || self.amplitude.is_nan() {
            return 0.0;
        }
        self.amplitude.clamp(0.0, 1.0)
    }
}

impl From<HapticDefaults> for HapticRequest {
    fn from(defaults: HapticDefaults) -> Self {
        Self {
            amplitude: defaults.amplitude,
            frequency: defaults.frequency,
            duration: Duration::from_millis(defaults.duration_ms),
        }
    }
}

/// Where a haptic action's output should go this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HapticRoute {
    pub device: DeviceHandle,
    pub native_index: TrackedDeviceIndex,
}

#[derive(Debug, Clone, Copy)]
struct ActiveVibration {
    request: HapticRequest,
    until: Instant,
}

#[derive(Debug, Default)]
pub struct HapticRouter {
    pending: Vec<(String, HapticRequest)>,
    /// Requests the backend needs re-issued every tick until they expire.
    sustained: BTreeMap<DeviceHandle, ActiveVibration>,
    failure_count: u64,
    last_error: LastError<RuntimeError>,
}

impl HapticRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, action: &str, request: HapticRequest) {
        self.pending.push((action.to_string(), request));
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// Cancels vibration on every device.
    pub fn stop_all(&mut self) {
        self.pending.clear();
        self.sustained.clear();
    }

    /// Delivers queued requests and refreshes sustained ones. `slot_of` maps a device to its
    /// current native slot; sustained vibration on a device it no longer knows is dropped.
    /// Failures are counted and logged, never returned.
    pub fn flush(
        &mut self,
        backend: &dyn InputBackend,
        route: impl Fn(&str) -> Option<HapticRoute>,
        slot_of: impl Fn(DeviceHandle) -> Option<TrackedDeviceIndex>,
        now: Instant,
    ) {
        for (action, request) in std::mem::take(&mut self.pending) {
            let Some(target) = route(&action) else {
                debug!("Dropping vibration for '{}': no device bound", action);
                continue;
            };
            if request.effective_amplitude() == 0.0 {
                self.sustained.remove(&target.device);
            } else if !backend.sustains_haptics() {
                self.sustained.insert(
                    target.device,
                    ActiveVibration {
                        request,
                        until: now + request.duration,
                    },
                );
                continue;
            }
            self.submit(backend, target.native_index, &request);
        }

        let mut live = Vec::new();
        self.sustained.retain(|device, vibration| {
            if vibration.until <= now {
                return false;
            }
            match slot_of(*device) {
                Some(index) => {
                    live.push((index, vibration.request));
                    true
                }
                None => {
                    debug!("Dropping vibration for {}: device is gone", device);
                    false
                }
            }
        });
        for (index, request) in live {
            self.submit(backend, index, &request);
        }
    }

    fn submit(&mut self, backend: &dyn InputBackend, index: TrackedDeviceIndex, request: &HapticRequest) {
        match backend.submit_haptic(index, request) {
            Ok(()) => {
                self.last_error.clear();
            }
            Err(e) => {
                self.failure_count += 1;
                if self.last_error.report(&e) {
                    warn!("Haptic output to device slot {} failed: {}", index, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::backend::direct::DirectBackend;
    use crate::core::backend::mediated::MediatedBackend;
    use crate::core::runtime::simulated::SimulatedRuntime;
    use crate::core::runtime::ControllerRole;

    fn handle(id: u64) -> DeviceHandle {
        serde_json::from_str(&id.to_string()).unwrap()
    }

    fn request(amplitude: f32, millis: u64) -> HapticRequest {
        HapticRequest {
            amplitude,
            frequency: 160.0,
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn non_positive_frequency_silences() {
        let silent = HapticRequest {
            frequency: 0.0,
            ..request(1.0, 10)
        };
        assert_eq!(silent.effective_amplitude(), 0.0);
        assert_eq!(request(2.0, 10).effective_amplitude(), 1.0);
    }

    #[test]
    fn direct_backend_pulses_every_tick_until_expired() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let index = runtime.add_controller(ControllerRole::LeftHand);
        let backend = DirectBackend::new(runtime.clone(), 2000);
        let route = |name: &str| {
            (name == "Buzz").then_some(HapticRoute {
                device: handle(1),
                native_index: index,
            })
        };
        let slot = |device: DeviceHandle| (device == handle(1)).then_some(index);

        let mut router = HapticRouter::new();
        let start = Instant::now();
        router.queue("Buzz", request(0.5, 30));
        router.queue("Unbound", request(0.5, 30));
        router.flush(&backend, route, slot, start);
        router.flush(&backend, route, slot, start + Duration::from_millis(11));
        router.flush(&backend, route, slot, start + Duration::from_millis(40));

        let pulses = runtime.haptic_log();
        assert_eq!(pulses.len(), 2);
        assert!(pulses.iter().all(|p| p.duration_us == 1000 && p.axis == 0));
    }

    #[test]
    fn mediated_backend_gets_one_call_per_request() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let index = runtime.add_controller(ControllerRole::RightHand);
        let backend = MediatedBackend::new(runtime.clone(), runtime.clone());
        let route = |_: &str| {
            Some(HapticRoute {
                device: handle(1),
                native_index: index,
            })
        };
        let slot = |device: DeviceHandle| (device == handle(1)).then_some(index);

        let mut router = HapticRouter::new();
        let start = Instant::now();
        router.queue("Buzz", request(0.8, 100));
        router.flush(&backend, route, slot, start);
        router.flush(&backend, route, slot, start + Duration::from_millis(11));

        let log = runtime.vibration_log();
        assert_eq!(log.len(), 1);
        assert!((log[0].duration_secs - 0.1).abs() < 1e-6);
        assert_eq!(log[0].amplitude, 0.8);
    }

    #[test]
    fn failures_are_counted_not_propagated() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let tracker = runtime.add_tracker();
        let backend = DirectBackend::new(runtime.clone(), 2000);
        let route = |_: &str| {
            Some(HapticRoute {
                device: handle(3),
                native_index: tracker,
            })
        };
        let slot = |_: DeviceHandle| Some(tracker);

        let mut router = HapticRouter::new();
        let start = Instant::now();
        router.queue("Buzz", request(1.0, 20));
        router.flush(&backend, route, slot, start);
        router.flush(&backend, route, slot, start + Duration::from_millis(5));
        assert_eq!(router.failure_count(), 2);
        assert!(runtime.haptic_log().is_empty());
    }

    #[test]
    fn zero_amplitude_stops_sustained_vibration() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let index = runtime.add_controller(ControllerRole::LeftHand);
        let backend = DirectBackend::new(runtime.clone(), 2000);
        let route = |_: &str| {
            Some(HapticRoute {
                device: handle(1),
                native_index: index,
            })
        };
        let slot = |device: DeviceHandle| (device == handle(1)).then_some(index);

        let mut router = HapticRouter::new();
        let start = Instant::now();
        router.queue("Buzz", request(1.0, 1000));
        router.flush(&backend, route, slot, start);
        router.queue("Buzz", request(0.0, 0));
        router.flush(&backend, route, slot, start + Duration::from_millis(11));
        router.flush(&backend, route, slot, start + Duration::from_millis(22));
        assert_eq!(runtime.haptic_log().len(), 1);
    }

    #[test]
    fn sustained_vibration_ends_when_its_device_goes_away() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let index = runtime.add_controller(ControllerRole::LeftHand);
        let backend = DirectBackend::new(runtime.clone(), 2000);
        let route = |_: &str| {
            Some(HapticRoute {
                device: handle(1),
                native_index: index,
            })
        };

        let mut router = HapticRouter::new();
        let start = Instant::now();
        router.queue("Buzz", request(1.0, 1000));
        router.flush(&backend, route, |d| (d == handle(1)).then_some(index), start);
        assert_eq!(runtime.haptic_log().len(), 1);

        // Another device took over the slot; the old handle is no longer registered.
        let unbound = |_: &str| -> Option<HapticRoute> { None };
        let replaced = |d: DeviceHandle| (d == handle(2)).then_some(index);
        router.flush(&backend, unbound, replaced, start + Duration::from_millis(11));
        router.flush(&backend, unbound, replaced, start + Duration::from_millis(22));
        assert_eq!(runtime.haptic_log().len(), 1);
        assert_eq!(router.failure_count(), 0);
    }
}
