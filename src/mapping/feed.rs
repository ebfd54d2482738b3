//! Resolved action feed
//! Exposes the latest resolved states two ways: a pull query by action name and a push
//! subscription that receives every tick's snapshot. A tick whose poll failed republishes the
//! previous states with their edge flags cleared.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::mapping::bindings::ActionType;
use crate::mapping::resolver::ResolvedActionState;

/// All action states of one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionSnapshot {
    pub tick: u64,
    /// Keyed by action path.
    pub states: BTreeMap<String, ResolvedActionState>,
}

impl ActionSnapshot {
    pub fn new(tick: u64, states: Vec<ResolvedActionState>) -> Self {
        Self {
            tick,
            states: states.into_iter().map(|s| (s.path.clone(), s)).collect(),
        }
    }

    /// Same values at a later tick with no edges, for a tick that saw no input change.
    pub fn carried_over(&self, tick: u64) -> Self {
        let states = self
            .states
            .iter()
            .map(|(path, state)| {
                let state = ResolvedActionState {
                    became_active: false,
                    became_inactive: false,
                    ..state.clone()
                };
                (path.clone(), state)
            })
            .collect();
        Self { tick, states }
    }

    /// State of the action called `name`. When several types share the name, the one resolved
    /// first wins (boolean before vector1 and so on).
    pub fn get(&self, name: &str) -> Option<&ResolvedActionState> {
        self.states
            .values()
            .filter(|s| s.name == name)
            .min_by_key(|s| s.action_type)
    }

    pub fn get_typed(&self, name: &str, action_type: ActionType) -> Option<&ResolvedActionState> {
        self.states
            .values()
            .find(|s| s.name == name && s.action_type == action_type)
    }

    pub fn get_by_path(&self, path: &str) -> Option<&ResolvedActionState> {
        self.states.get(path)
    }
}

/// Clonable handle to the feed. The input thread publishes, any thread reads.
#[derive(Clone)]
pub struct ActionFeed {
    tx: Arc<watch::Sender<Arc<ActionSnapshot>>>,
}

impl Default for ActionFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(ActionSnapshot::default()));
        Self { tx: Arc::new(tx) }
    }

    /// Replaces the current snapshot and wakes subscribers.
    pub fn publish(&self, snapshot: ActionSnapshot) {
        self.tx.send_replace(Arc::new(snapshot));
    }

    pub fn latest(&self) -> Arc<ActionSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn get_action_state(&self, name: &str) -> Option<ResolvedActionState> {
        self.tx.borrow().get(name).cloned()
    }

    pub fn get_typed_action_state(&self, name: &str, action_type: ActionType) -> Option<ResolvedActionState> {
        self.tx.borrow().get_typed(name, action_type).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ActionSnapshot>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::resolver::ActionValue;

    fn grip(value: bool, tick: u64) -> ResolvedActionState {
        ResolvedActionState {
            name: "Grip".to_string(),
            path: "/actions/main/in/Grip".to_string(),
            action_type: ActionType::Boolean,
            value: ActionValue::Boolean(value),
            became_active: value,
            became_inactive: false,
            timestamp: tick,
            resolved_tick: tick,
            source: None,
        }
    }

    fn grip_axis(value: f32, tick: u64) -> ResolvedActionState {
        ResolvedActionState {
            name: "Grip".to_string(),
            path: "/actions/main/in/Grip_axis".to_string(),
            action_type: ActionType::Vector1,
            value: ActionValue::Vector1(value),
            became_active: value != 0.0,
            became_inactive: false,
            timestamp: tick,
            resolved_tick: tick,
            source: None,
        }
    }

    #[test]
    fn pull_returns_latest_state() {
        let feed = ActionFeed::new();
        assert!(feed.get_action_state("Grip").is_none());
        feed.publish(ActionSnapshot::new(4, vec![grip(true, 4)]));
        assert_eq!(feed.get_action_state("Grip").unwrap().value, ActionValue::Boolean(true));
        assert_eq!(feed.latest().tick, 4);
    }

    #[tokio::test]
    async fn subscribers_see_each_publish() {
        let feed = ActionFeed::new();
        let mut rx = feed.subscribe();
        let publisher = feed.clone();
        tokio::spawn(async move {
            publisher.publish(ActionSnapshot::new(1, vec![grip(true, 1)]));
        });
        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.tick, 1);
        assert!(snapshot.get("Grip").unwrap().became_active);
    }

    #[test]
    fn same_name_is_looked_up_by_type() {
        let snapshot = ActionSnapshot::new(2, vec![grip_axis(0.4, 2), grip(true, 2)]);
        assert_eq!(snapshot.states.len(), 2);
        assert_eq!(snapshot.get("Grip").unwrap().action_type, ActionType::Boolean);
        assert_eq!(
            snapshot.get_typed("Grip", ActionType::Vector1).unwrap().value,
            ActionValue::Vector1(0.4)
        );
        assert!(snapshot.get_by_path("/actions/main/in/Grip_axis").is_some());
        assert!(snapshot.get_typed("Grip", ActionType::Pose).is_none());
    }

    #[test]
    fn carried_over_snapshot_has_no_edges() {
        let snapshot = ActionSnapshot::new(3, vec![grip(true, 3), grip_axis(0.4, 3)]);
        let carried = snapshot.carried_over(4);
        assert_eq!(carried.tick, 4);
        for state in carried.states.values() {
            assert!(!state.became_active && !state.became_inactive);
            assert_eq!(state.resolved_tick, 3);
            assert_eq!(state.value, snapshot.states[&state.path].value);
        }
    }
}
