//! Action manifest loader
//! Parses the JSON binding manifest into a `BindingSet` and emits a loaded set back into the
//! same format. Unknown fields are ignored so newer manifests still load; unknown keys inside
//! `actions` are rejected because they name an action type this crate can't resolve.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;

use crate::core::device::DeviceRole;
use crate::core::frame::SkeletalTrackingLevel;
use crate::error::ManifestError;
use crate::mapping::bindings::{
    ActionDescriptor, ActionSetInfo, ActionType, AxisSemantics, BindingSet, DefaultBinding, HapticDefaults,
    Localization, Requirement, RoleBindings,
};

/// Action set used when a manifest declares none.
pub const DEFAULT_ACTION_SET: &str = "/actions/main";
pub const DEFAULT_ACTION_SET_USAGE: &str = "leftright";

fn input_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/(input|pose|output|skeleton)(/[a-z0-9_]+)+$").unwrap())
}

fn action_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap())
}

/// One entry of an `actions.<type>` list as written in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestAction {
    name: String,
    /// Keyed by role name as written; aliases of one role are rejected.
    #[serde(default)]
    bindings: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    requirement: Requirement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    axis: Option<AxisSemantics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deadzone: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    haptic: Option<HapticDefaults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    skeletal_tracking: Option<SkeletalTrackingLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    localized_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    mirror_hand: bool,
}

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    actions: Map<String, Value>,
    #[serde(default)]
    action_sets: Vec<ActionSetInfo>,
    #[serde(default)]
    localization: Vec<Localization>,
    #[serde(default)]
    default_bindings: Vec<DefaultBinding>,
}

#[derive(Debug, Serialize)]
struct ManifestOutput<'a> {
    actions: BTreeMap<&'static str, Vec<ManifestAction>>,
    action_sets: &'a [ActionSetInfo],
    localization: &'a [Localization],
    default_bindings: &'a [DefaultBinding],
}

/// Controller types that get a generated binding file when the manifest lists none for them.
pub const COMMON_CONTROLLER_TYPES: [(&str, &str); 6] = [
    ("knuckles", "Knuckles Controllers"),
    ("vive", "Vive"),
    ("vive_controller", "Vive Controllers"),
    ("oculus_touch", "Oculus Touch Controllers"),
    ("holographic_controller", "Holographic Controllers"),
    ("gamepad", "Game Pads"),
];

/// Minimal binding file the runtime accepts and lets the user edit.
#[derive(Debug, Serialize)]
struct BindingFileStub<'a> {
    name: String,
    controller_type: &'a str,
    bindings: Map<String, Value>,
    description: &'a str,
}

/// Runtime path of an action, e.g. `/actions/main/in/Grip`.
pub fn action_path(action_set: &str, action_type: ActionType, name: &str) -> String {
    let direction = if action_type == ActionType::Haptic { "out" } else { "in" };
    format!("{}/{}/{}", action_set, direction, name)
}

fn type_suffix(action_type: ActionType) -> &'static str {
    match action_type {
        ActionType::Boolean | ActionType::Haptic => "",
        ActionType::Vector1 => "_axis",
        ActionType::Vector2 => "_axis2d",
        ActionType::Pose => "_pose",
        ActionType::Skeleton => "_skeleton",
    }
}

/// Gives every action its runtime path. When input actions of different types share a name,
/// the boolean keeps the plain path and the others take a type suffix, e.g.
/// `/actions/main/in/Trigger_axis`. Fails if two actions still land on the same path.
pub(crate) fn assign_action_paths(action_set: &str, actions: &mut [ActionDescriptor]) -> Result<(), ManifestError> {
    let mut input_names: BTreeMap<String, usize> = BTreeMap::new();
    for action in actions.iter().filter(|a| a.action_type != ActionType::Haptic) {
        *input_names.entry(action.name.to_ascii_lowercase()).or_default() += 1;
    }

    let mut seen = BTreeSet::new();
    for action in actions.iter_mut() {
        let shared = input_names
            .get(&action.name.to_ascii_lowercase())
            .is_some_and(|count| *count > 1);
        let leaf = if shared {
            format!("{}{}", action.name, type_suffix(action.action_type))
        } else {
            action.name.clone()
        };
        action.path = action_path(action_set, action.action_type, &leaf);
        if !seen.insert(action.path.to_ascii_lowercase()) {
            return Err(ManifestError::DuplicatePath(action.path.clone()));
        }
    }
    Ok(())
}

fn parse_role_bindings(
    action: &str,
    action_type: ActionType,
    bindings: BTreeMap<String, Vec<String>>,
) -> Result<RoleBindings, ManifestError> {
    let mut role_paths = RoleBindings::new();
    let mut seen_roles = BTreeMap::new();
    for (key, paths) in bindings {
        let role: DeviceRole = key
            .parse()
            .map_err(|e: String| ManifestError::Parse(format!("action '{}': {}", action, e)))?;
        if let Some(first) = seen_roles.insert(role, key.clone()) {
            return Err(ManifestError::DuplicatePath(format!(
                "{} (role {} bound as both '{}' and '{}')",
                action, role, first, key
            )));
        }

        let mut unique = BTreeSet::new();
        for input in &paths {
            validate_path(action, action_type, input)?;
            if !unique.insert(input.as_str()) {
                return Err(ManifestError::DuplicatePath(format!("{} ({} {})", action, role, input)));
            }
        }
        if !paths.is_empty() {
            role_paths.insert(role, paths);
        }
    }
    Ok(role_paths)
}

fn validate_path(action: &str, action_type: ActionType, path: &str) -> Result<(), ManifestError> {
    if !input_path_regex().is_match(path) {
        return Err(ManifestError::Parse(format!(
            "action '{}' binds malformed input path '{}'",
            action, path
        )));
    }
    if !path.starts_with(action_type.path_prefix()) {
        return Err(ManifestError::Parse(format!(
            "action '{}' of type {} cannot bind '{}', expected a path under {}",
            action,
            action_type.key(),
            path,
            action_type.path_prefix()
        )));
    }
    Ok(())
}

/// Parses a manifest document.
pub fn parse_manifest(text: &str) -> Result<BindingSet, ManifestError> {
    let document: ManifestDocument = serde_json::from_str(text)?;

    let mut action_sets = document.action_sets;
    if action_sets.is_empty() {
        action_sets.push(ActionSetInfo {
            name: DEFAULT_ACTION_SET.to_string(),
            usage: DEFAULT_ACTION_SET_USAGE.to_string(),
        });
    }
    let set_name = action_sets[0].name.clone();

    // Validate every category key before looking at any entry.
    let mut categories = Vec::with_capacity(document.actions.len());
    for (key, entries) in document.actions {
        let action_type = ActionType::from_key(&key).ok_or_else(|| ManifestError::UnknownActionType(key.clone()))?;
        categories.push((action_type, entries));
    }
    categories.sort_by_key(|(action_type, _)| *action_type);

    let mut seen_names = BTreeSet::new();
    let mut parsed = Vec::new();
    for (action_type, entries) in categories {
        let entries: Vec<ManifestAction> = serde_json::from_value(entries)?;
        for entry in entries {
            if !action_name_regex().is_match(&entry.name) {
                return Err(ManifestError::Parse(format!("invalid action name '{}'", entry.name)));
            }
            if !seen_names.insert((action_type, entry.name.to_ascii_lowercase())) {
                return Err(ManifestError::DuplicatePath(action_path(&set_name, action_type, &entry.name)));
            }
            if let Some(deadzone) = entry.deadzone {
                if !(0.0..1.0).contains(&deadzone) {
                    return Err(ManifestError::Parse(format!(
                        "action '{}' deadzone {} is outside [0, 1)",
                        entry.name, deadzone
                    )));
                }
            }
            if entry.mirror_hand && action_type != ActionType::Skeleton {
                return Err(ManifestError::Parse(format!(
                    "action '{}' of type {} cannot mirror a hand",
                    entry.name, action_type
                )));
            }

            let role_paths = parse_role_bindings(&entry.name, action_type, entry.bindings)?;
            let descriptor = ActionDescriptor {
                name: entry.name,
                action_type,
                path: String::new(),
                requirement: entry.requirement,
                axis: entry.axis,
                deadzone: entry.deadzone,
                haptic: entry.haptic,
                skeletal_tracking: entry.skeletal_tracking,
                localized_name: entry.localized_name,
                mirror_hand: entry.mirror_hand,
            };
            parsed.push((descriptor, role_paths));
        }
    }

    let mut actions: Vec<ActionDescriptor> = parsed.iter().map(|(descriptor, _)| descriptor.clone()).collect();
    assign_action_paths(&set_name, &mut actions)?;
    let mut bindings = BTreeMap::new();
    for (action, (_, role_paths)) in actions.iter().zip(parsed) {
        debug!(
            "Loaded {} action {} with {} bound roles",
            action.action_type.key(),
            action.path,
            role_paths.len()
        );
        bindings.insert(action.path.clone(), role_paths);
    }

    info!("Manifest parsed: {} actions in {}", actions.len(), set_name);
    Ok(BindingSet::new(
        actions,
        bindings,
        action_sets,
        document.localization,
        document.default_bindings,
    ))
}

/// Reads and parses a manifest file.
pub async fn load_manifest(path: &Path) -> Result<BindingSet, ManifestError> {
    let text = fs::read_to_string(path).await?;
    let set = parse_manifest(&text)?;
    info!("Manifest loaded from {:?}", path);
    Ok(set)
}

/// Emits a binding set in manifest format. Parsing the output yields an equal set.
pub fn serialize_manifest(set: &BindingSet) -> Result<String, ManifestError> {
    let mut actions: BTreeMap<&'static str, Vec<ManifestAction>> = BTreeMap::new();
    for descriptor in set.actions() {
        actions
            .entry(descriptor.action_type.key())
            .or_default()
            .push(ManifestAction {
                name: descriptor.name.clone(),
                bindings: set
                    .bindings_for(&descriptor.path)
                    .map(|roles| {
                        roles
                            .iter()
                            .map(|(role, paths)| (role.to_string(), paths.clone()))
                            .collect()
                    })
                    .unwrap_or_default(),
                requirement: descriptor.requirement,
                axis: descriptor.axis,
                deadzone: descriptor.deadzone,
                haptic: descriptor.haptic,
                skeletal_tracking: descriptor.skeletal_tracking,
                localized_name: descriptor.localized_name.clone(),
                mirror_hand: descriptor.mirror_hand,
            });
    }
    let output = ManifestOutput {
        actions,
        action_sets: set.action_sets(),
        localization: set.localization(),
        default_bindings: set.default_bindings(),
    };
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Writes an empty binding file into `dir` for every common controller type `existing` has no
/// entry for, and returns entries pointing at the new files. Non-empty files already in `dir`
/// are left alone; a numbered name is used instead.
pub async fn write_default_bindings(
    dir: &Path,
    existing: &[DefaultBinding],
) -> Result<Vec<DefaultBinding>, ManifestError> {
    fs::create_dir_all(dir).await?;

    let mut written = Vec::new();
    for (controller_type, display_name) in COMMON_CONTROLLER_TYPES {
        if existing.iter().any(|b| b.controller_type == controller_type) {
            continue;
        }

        let mut path = dir.join(format!("{}.json", controller_type));
        let mut count = 0;
        while fs::metadata(&path).await.is_ok_and(|m| m.len() > 0) {
            count += 1;
            path = dir.join(format!("{}_{}.json", controller_type, count));
        }

        let stub = BindingFileStub {
            name: format!("Default bindings for {}", display_name),
            controller_type,
            bindings: Map::new(),
            description: "",
        };
        fs::write(&path, serde_json::to_string_pretty(&stub)?).await?;
        let path = fs::canonicalize(&path).await?;
        debug!("Wrote default {} bindings to {}", controller_type, path.display());
        written.push(DefaultBinding {
            controller_type: controller_type.to_string(),
            binding_url: path.display().to_string(),
        });
    }

    if !written.is_empty() {
        info!("Generated {} default binding files in {}", written.len(), dir.display());
    }
    Ok(written)
}
