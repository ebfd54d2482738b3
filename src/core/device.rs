//! Tracked device identity and role assignment
//! Devices are discovered by the poller on every tick. Each newly seen device gets a fresh
//! `DeviceHandle`; handles are never reused within a registry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::runtime::{ControllerRole, DeviceClass, NativeDevice, TrackedDeviceIndex};

/// Maximum number of generic trackers that get a role.
pub const MAX_GENERIC_TRACKERS: u8 = 11;

/// Opaque identifier for a physical tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// Role a device plays for bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceRole {
    Left,
    Right,
    Head,
    /// Generic tracker slot, 1-based.
    Generic(u8),
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Left => f.write_str("left"),
            DeviceRole::Right => f.write_str("right"),
            DeviceRole::Head => f.write_str("head"),
            DeviceRole::Generic(slot) => write!(f, "generic_{}", slot),
        }
    }
}

impl FromStr for DeviceRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(DeviceRole::Left),
            "right" => Ok(DeviceRole::Right),
            "head" => Ok(DeviceRole::Head),
            "generic" => Ok(DeviceRole::Generic(1)),
            other => other
                .strip_prefix("generic_")
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| (1..=MAX_GENERIC_TRACKERS).contains(n))
                .map(DeviceRole::Generic)
                .ok_or_else(|| format!("unknown device role '{}'", other)),
        }
    }
}

impl TryFrom<String> for DeviceRole {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceRole> for String {
    fn from(role: DeviceRole) -> Self {
        role.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub has_pose: bool,
    pub has_haptics: bool,
    pub has_skeleton: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub handle: DeviceHandle,
    pub role: DeviceRole,
    pub class: DeviceClass,
    pub native_index: TrackedDeviceIndex,
    pub serial: String,
    pub capabilities: DeviceCapabilities,
    pub connection: ConnectionState,
}

/// Hot-plug and role notifications produced while reconciling the device list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    Connected(DeviceInfo),
    Disconnected { handle: DeviceHandle, role: DeviceRole },
    RoleChanged { handle: DeviceHandle, from: DeviceRole, to: DeviceRole },
}

/// Maps native device slots to handles and roles.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    next_id: u64,
    by_index: BTreeMap<TrackedDeviceIndex, DeviceInfo>,
    /// Trackers that could not get a generic slot; warned about once.
    unmapped_trackers: BTreeSet<TrackedDeviceIndex>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently connected devices in native slot order.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.by_index.values()
    }

    pub fn get(&self, handle: DeviceHandle) -> Option<&DeviceInfo> {
        self.by_index.values().find(|d| d.handle == handle)
    }

    pub fn by_role(&self, role: DeviceRole) -> Option<&DeviceInfo> {
        self.by_index.values().find(|d| d.role == role)
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// Brings the registry in line with the runtime's device list and reports what changed.
    pub fn reconcile(&mut self, natives: &[NativeDevice], skeletal_supported: bool) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        let seen: BTreeSet<TrackedDeviceIndex> = natives
            .iter()
            .filter(|n| n.connected)
            .map(|n| n.index)
            .collect();

        // Vanished or disconnected slots first, so their generic slots can be reused this tick.
        let gone: Vec<TrackedDeviceIndex> = self
            .by_index
            .keys()
            .copied()
            .filter(|index| !seen.contains(index))
            .collect();
        for index in gone {
            if let Some(info) = self.by_index.remove(&index) {
                info!("{} ({}) disconnected from slot {}", info.handle, info.role, index);
                events.push(DeviceEvent::Disconnected {
                    handle: info.handle,
                    role: info.role,
                });
            }
        }
        self.unmapped_trackers.retain(|index| seen.contains(index));

        for native in natives.iter().filter(|n| n.connected) {
            if self.by_index.contains_key(&native.index) {
                continue;
            }
            let role = match native.class {
                DeviceClass::Controller => match native.role {
                    ControllerRole::LeftHand => DeviceRole::Left,
                    ControllerRole::RightHand => DeviceRole::Right,
                    ControllerRole::Invalid => {
                        debug!("Controller in slot {} has no hand role yet, skipping", native.index);
                        continue;
                    }
                },
                DeviceClass::GenericTracker => match self.free_generic_slot() {
                    Some(slot) => DeviceRole::Generic(slot),
                    None => {
                        if self.unmapped_trackers.insert(native.index) {
                            warn!(
                                "Unable to map tracker in slot {}: all {} generic roles are taken",
                                native.index, MAX_GENERIC_TRACKERS
                            );
                        }
                        continue;
                    }
                },
                DeviceClass::Hmd => DeviceRole::Head,
                DeviceClass::Invalid | DeviceClass::TrackingReference | DeviceClass::DisplayRedirect => {
                    continue;
                }
            };

            let info = DeviceInfo {
                handle: self.allocate_handle(),
                role,
                class: native.class,
                native_index: native.index,
                serial: native.serial.clone(),
                capabilities: DeviceCapabilities {
                    has_pose: true,
                    has_haptics: native.has_haptics,
                    has_skeleton: skeletal_supported && native.class == DeviceClass::Controller,
                },
                connection: ConnectionState::Connected,
            };
            info!(
                "{} ({:?}, serial {}) registered in slot {} as {}",
                info.handle, info.class, info.serial, info.native_index, info.role
            );
            events.push(DeviceEvent::Connected(info.clone()));
            self.by_index.insert(native.index, info);
        }

        events.extend(self.detect_handedness_swap(natives));
        events
    }

    fn allocate_handle(&mut self) -> DeviceHandle {
        self.next_id += 1;
        DeviceHandle(self.next_id)
    }

    fn free_generic_slot(&self) -> Option<u8> {
        let taken: BTreeSet<u8> = self
            .by_index
            .values()
            .filter_map(|d| match d.role {
                DeviceRole::Generic(slot) => Some(slot),
                _ => None,
            })
            .collect();
        (1..=MAX_GENERIC_TRACKERS).find(|slot| !taken.contains(slot))
    }

    /// Re-assigns hands when the runtime swapped which controller is left and right.
    /// Only acts when both hands are assigned, as a lone controller's role may still settle.
    fn detect_handedness_swap(&mut self, natives: &[NativeDevice]) -> Vec<DeviceEvent> {
        let hand_slot = |wanted: ControllerRole| {
            natives
                .iter()
                .find(|n| n.connected && n.class == DeviceClass::Controller && n.role == wanted)
                .map(|n| n.index)
        };
        let (Some(left_index), Some(right_index)) =
            (hand_slot(ControllerRole::LeftHand), hand_slot(ControllerRole::RightHand))
        else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for (index, wanted) in [(left_index, DeviceRole::Left), (right_index, DeviceRole::Right)] {
            if let Some(info) = self.by_index.get_mut(&index) {
                if info.role != wanted {
                    info!("Handedness swap: {} changes from {} to {}", info.handle, info.role, wanted);
                    events.push(DeviceEvent::RoleChanged {
                        handle: info.handle,
                        from: info.role,
                        to: wanted,
                    });
                    info.role = wanted;
                }
            }
        }
        events
    }
}
