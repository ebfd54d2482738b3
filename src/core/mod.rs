//! Core functionality for the VR input bridge
//! This module contains the native runtime contract, the backends built on it, and the
//! session, device and polling layers that feed the action mapping.

pub mod backend;
pub mod device;
pub mod frame;
pub mod overlay;
pub mod poller;
pub mod runtime;
pub mod session;

// Re-export commonly used types
pub use backend::{BackendKind, BackendPreference, InputBackend};
pub use device::{DeviceEvent, DeviceHandle, DeviceRole};
pub use frame::RawInputFrame;
pub use overlay::OverlayBridge;
pub use poller::InputPoller;
pub use session::{SessionHandle, SessionHost};
