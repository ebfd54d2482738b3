//! Action mapping
//! Loads binding manifests and resolves raw device frames into semantic actions.

pub mod bindings;
pub mod feed;
pub mod haptics;
pub mod manifest;
pub mod reload;
pub mod resolver;

pub use bindings::{BindingSet, BindingStore};
pub use feed::{ActionFeed, ActionSnapshot};
pub use manifest::{load_manifest, parse_manifest, serialize_manifest};
pub use resolver::{ActionResolver, ResolvedActionState};
