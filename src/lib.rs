//! VR input bridge library
//! Polls a native VR runtime for controller state and resolves it into semantic actions
//! described by a JSON action manifest.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod state;
pub mod utils;

pub use state::{AppState, InputSystem, TickOutcome};
