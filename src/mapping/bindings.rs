//! Action descriptors, binding sets and the atomically published active set

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::info;
use serde::{Deserialize, Serialize};

use crate::core::device::DeviceRole;
use crate::core::frame::SkeletalTrackingLevel;
use crate::error::ManifestError;
use crate::mapping::manifest::{
    assign_action_paths, parse_manifest, serialize_manifest, DEFAULT_ACTION_SET, DEFAULT_ACTION_SET_USAGE,
};

/// Declared type of an action. The order is the order categories are resolved and emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Boolean,
    Vector1,
    Vector2,
    Pose,
    Haptic,
    Skeleton,
}

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        ActionType::Boolean,
        ActionType::Vector1,
        ActionType::Vector2,
        ActionType::Pose,
        ActionType::Haptic,
        ActionType::Skeleton,
    ];

    /// Key of the category list in the manifest's `actions` object.
    pub fn key(self) -> &'static str {
        match self {
            ActionType::Boolean => "boolean",
            ActionType::Vector1 => "vector1",
            ActionType::Vector2 => "vector2",
            ActionType::Pose => "pose",
            ActionType::Haptic => "haptic",
            ActionType::Skeleton => "skeleton",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.key() == key)
    }

    /// Input paths an action of this type may bind.
    pub fn path_prefix(self) -> &'static str {
        match self {
            ActionType::Boolean | ActionType::Vector1 | ActionType::Vector2 => "/input/",
            ActionType::Pose => "/pose/",
            ActionType::Haptic => "/output/",
            ActionType::Skeleton => "/skeleton/",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Range an analog action is clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisSemantics {
    /// [-1, 1], e.g. thumbsticks.
    Bipolar,
    /// [0, 1], e.g. triggers.
    Unipolar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Mandatory,
    Suggested,
    #[default]
    Optional,
}

/// Vibration used when a haptic action is triggered without explicit values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HapticDefaults {
    pub amplitude: f32,
    pub frequency: f32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub action_type: ActionType,
    /// Runtime path, e.g. `/actions/main/in/Grip`. Unique within a set even when names are not.
    pub path: String,
    pub requirement: Requirement,
    pub axis: Option<AxisSemantics>,
    pub deadzone: Option<f32>,
    pub haptic: Option<HapticDefaults>,
    pub skeletal_tracking: Option<SkeletalTrackingLevel>,
    pub localized_name: Option<String>,
    /// Skeleton actions only: report the bones mirrored onto the opposite hand.
    pub mirror_hand: bool,
}

impl ActionDescriptor {
    /// Declared axis semantics, or the type's default: unipolar for vector1, bipolar for vector2.
    pub fn axis_semantics(&self) -> AxisSemantics {
        self.axis.unwrap_or(match self.action_type {
            ActionType::Vector1 => AxisSemantics::Unipolar,
            _ => AxisSemantics::Bipolar,
        })
    }

    pub fn display_name(&self) -> &str {
        self.localized_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSetInfo {
    pub name: String,
    pub usage: String,
}

/// Display names for one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Localization {
    pub language_tag: String,
    #[serde(flatten)]
    pub names: BTreeMap<String, String>,
}

/// Default binding file the runtime should use for a controller type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultBinding {
    pub controller_type: String,
    pub binding_url: String,
}

/// Input paths per role for one action.
pub type RoleBindings = BTreeMap<DeviceRole, Vec<String>>;

/// Immutable set of actions and their bindings. Replaced as a whole on reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingSet {
    actions: Vec<ActionDescriptor>,
    /// Keyed by action path.
    bindings: BTreeMap<String, RoleBindings>,
    action_sets: Vec<ActionSetInfo>,
    localization: Vec<Localization>,
    default_bindings: Vec<DefaultBinding>,
}

impl BindingSet {
    pub(crate) fn new(
        actions: Vec<ActionDescriptor>,
        bindings: BTreeMap<String, RoleBindings>,
        action_sets: Vec<ActionSetInfo>,
        localization: Vec<Localization>,
        default_bindings: Vec<DefaultBinding>,
    ) -> Self {
        Self {
            actions,
            bindings,
            action_sets,
            localization,
            default_bindings,
        }
    }

    /// Actions in resolution order: by type, then manifest order.
    pub fn actions(&self) -> &[ActionDescriptor] {
        &self.actions
    }

    /// First action called `name` in resolution order. Use `action_of` when several types
    /// share the name.
    pub fn action(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub fn action_of(&self, name: &str, action_type: ActionType) -> Option<&ActionDescriptor> {
        self.actions
            .iter()
            .find(|a| a.name == name && a.action_type == action_type)
    }

    pub fn action_by_path(&self, path: &str) -> Option<&ActionDescriptor> {
        self.actions.iter().find(|a| a.path == path)
    }

    pub fn bindings_for(&self, path: &str) -> Option<&RoleBindings> {
        self.bindings.get(path)
    }

    pub fn action_sets(&self) -> &[ActionSetInfo] {
        &self.action_sets
    }

    pub fn localization(&self) -> &[Localization] {
        &self.localization
    }

    pub fn default_bindings(&self) -> &[DefaultBinding] {
        &self.default_bindings
    }

    /// Adds default binding entries, e.g. the ones `write_default_bindings` generated.
    pub fn with_default_bindings(mut self, extra: impl IntoIterator<Item = DefaultBinding>) -> Self {
        self.default_bindings.extend(extra);
        self
    }

    /// Actions that read from `role`.
    pub fn actions_for_role(&self, role: DeviceRole) -> impl Iterator<Item = &ActionDescriptor> {
        self.actions.iter().filter(move |a| {
            self.bindings
                .get(&a.path)
                .is_some_and(|roles| roles.contains_key(&role))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Builds a binding set in code, e.g. from a host's own action mappings.
#[derive(Debug, Default)]
pub struct BindingSetBuilder {
    actions: Vec<(ActionDescriptor, RoleBindings)>,
    unbound: Vec<String>,
    default_bindings: Vec<DefaultBinding>,
}

impl BindingSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, name: &str, action_type: ActionType) -> Self {
        let descriptor = ActionDescriptor {
            name: name.to_string(),
            action_type,
            path: String::new(),
            requirement: Requirement::default(),
            axis: None,
            deadzone: None,
            haptic: None,
            skeletal_tracking: None,
            localized_name: None,
            mirror_hand: false,
        };
        self.actions.push((descriptor, RoleBindings::new()));
        self
    }

    /// Adjusts the most recently added action.
    pub fn with(mut self, f: impl FnOnce(&mut ActionDescriptor)) -> Self {
        if let Some((last, _)) = self.actions.last_mut() {
            f(last);
        }
        self
    }

    /// Binds `path` on the most recently added action called `name`. Unknown names are left
    /// for `build` to report.
    pub fn bind(mut self, name: &str, role: DeviceRole, path: &str) -> Self {
        match self.actions.iter_mut().rev().find(|(a, _)| a.name == name) {
            Some((_, roles)) => roles.entry(role).or_default().push(path.to_string()),
            None => self.unbound.push(name.to_string()),
        }
        self
    }

    pub fn default_binding(mut self, controller_type: &str, binding_url: &str) -> Self {
        self.default_bindings.push(DefaultBinding {
            controller_type: controller_type.to_string(),
            binding_url: binding_url.to_string(),
        });
        self
    }

    /// Validates the set exactly as a loaded manifest would be and adds display names for the
    /// current OS language.
    pub fn build(mut self) -> Result<BindingSet, ManifestError> {
        if let Some(name) = self.unbound.first() {
            return Err(ManifestError::Parse(format!("binding for undeclared action '{}'", name)));
        }
        self.actions.sort_by_key(|(a, _)| a.action_type);
        let (mut actions, roles): (Vec<ActionDescriptor>, Vec<RoleBindings>) = self.actions.into_iter().unzip();
        assign_action_paths(DEFAULT_ACTION_SET, &mut actions)?;

        let names = actions
            .iter()
            .map(|a| (a.path.clone(), a.display_name().to_string()))
            .collect();
        let localization = vec![Localization {
            language_tag: current_language_tag(),
            names,
        }];
        let bindings = actions.iter().map(|a| a.path.clone()).zip(roles).collect();
        let draft = BindingSet::new(
            actions,
            bindings,
            vec![ActionSetInfo {
                name: DEFAULT_ACTION_SET.to_string(),
                usage: DEFAULT_ACTION_SET_USAGE.to_string(),
            }],
            localization,
            self.default_bindings,
        );
        parse_manifest(&serialize_manifest(&draft)?)
    }
}

/// OS language as a runtime language tag, e.g. `en_US`.
pub fn current_language_tag() -> String {
    sys_locale::get_locale()
        .map(|locale| locale.replace('-', "_"))
        .unwrap_or_else(|| "en_US".to_string())
}

/// Holds the active binding set. Writers publish a fully built replacement; readers take an
/// `Arc` snapshot and never observe a partially updated set.
#[derive(Debug)]
pub struct BindingStore {
    current: RwLock<Arc<BindingSet>>,
    generation: AtomicU64,
}

impl Default for BindingStore {
    fn default() -> Self {
        Self::new(BindingSet::default())
    }
}

impl BindingStore {
    pub fn new(initial: BindingSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<BindingSet> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of sets published since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replaces the active set and returns the new generation.
    pub fn publish(&self, set: BindingSet) -> u64 {
        let set = Arc::new(set);
        let actions = set.actions().len();
        match self.current.write() {
            Ok(mut guard) => *guard = set,
            Err(poisoned) => *poisoned.into_inner() = set,
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!("Binding set generation {} published ({} actions)", generation, actions);
        generation
    }

    /// Parses `text` and publishes it. On error the active set is left untouched.
    pub fn load(&self, text: &str) -> Result<u64, ManifestError> {
        let set = parse_manifest(text)?;
        Ok(self.publish(set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRIP: &str = r#"{ "actions": { "boolean": [
        { "name": "Grip", "bindings": { "left": ["/input/grip/click"] } }
    ] } }"#;

    #[test]
    fn failed_load_keeps_previous_set() {
        let store = BindingStore::default();
        assert_eq!(store.load(GRIP).unwrap(), 1);
        let before = store.snapshot();

        let duplicate = r#"{ "actions": {
            "boolean": [ { "name": "Grip" }, { "name": "Grip" } ]
        } }"#;
        assert!(matches!(store.load(duplicate), Err(ManifestError::DuplicatePath(_))));
        assert_eq!(store.generation(), 1);
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        assert!(store.snapshot().action("Grip").is_some());
    }

    #[test]
    fn snapshots_survive_publish() {
        let store = BindingStore::default();
        store.load(GRIP).unwrap();
        let old = store.snapshot();
        store.publish(BindingSet::default());
        assert_eq!(old.actions().len(), 1);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn builder_validates_and_localizes() {
        let set = BindingSetBuilder::new()
            .action("Trigger", ActionType::Vector1)
            .with(|a| a.localized_name = Some("Fire".to_string()))
            .bind("Trigger", DeviceRole::Right, "/input/trigger/value")
            .action("Grip", ActionType::Boolean)
            .bind("Grip", DeviceRole::Left, "/input/grip/click")
            .default_binding("knuckles", "bindings/knuckles.json")
            .build()
            .unwrap();
        assert_eq!(set.actions()[0].name, "Grip");
        assert_eq!(set.localization()[0].names["/actions/main/in/Trigger"], "Fire");
        assert_eq!(set.actions_for_role(DeviceRole::Right).count(), 1);

        let unknown = BindingSetBuilder::new()
            .bind("Grip", DeviceRole::Left, "/input/grip/click")
            .build();
        assert!(matches!(unknown, Err(ManifestError::Parse(_))));

        let bad = BindingSetBuilder::new()
            .action("Grip", ActionType::Boolean)
            .bind("Grip", DeviceRole::Left, "/pose/raw")
            .build();
        assert!(matches!(bad, Err(ManifestError::Parse(_))));
    }

    #[test]
    fn builder_binds_same_named_actions_separately() {
        let set = BindingSetBuilder::new()
            .action("Trigger", ActionType::Boolean)
            .bind("Trigger", DeviceRole::Right, "/input/trigger/click")
            .action("Trigger", ActionType::Vector1)
            .bind("Trigger", DeviceRole::Right, "/input/trigger/value")
            .build()
            .unwrap();
        let click = set.action_of("Trigger", ActionType::Boolean).unwrap();
        let value = set.action_of("Trigger", ActionType::Vector1).unwrap();
        assert_eq!(value.path, "/actions/main/in/Trigger_axis");
        assert_eq!(set.bindings_for(&click.path).unwrap()[&DeviceRole::Right], vec!["/input/trigger/click"]);
        assert_eq!(set.bindings_for(&value.path).unwrap()[&DeviceRole::Right], vec!["/input/trigger/value"]);
        assert_eq!(set.action_by_path(&value.path), Some(value));
    }

    #[test]
    fn default_axis_semantics_follow_type() {
        let set = BindingSetBuilder::new()
            .action("Trigger", ActionType::Vector1)
            .action("Move", ActionType::Vector2)
            .build()
            .unwrap();
        assert_eq!(set.action("Trigger").unwrap().axis_semantics(), AxisSemantics::Unipolar);
        assert_eq!(set.action("Move").unwrap().axis_semantics(), AxisSemantics::Bipolar);
    }
}
