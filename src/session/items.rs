use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::SyncError;
use crate::util::math::Vec3;

/// A shared interactive world object (container, door, lever...).
///
/// `state` is an open key/value map: the server replicates whatever flags the
/// clients agree on (`isOpen`, `isLocked`, ...) without owning the
/// vocabulary. Item-specific rules ("door needs key") live client-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldItem {
    pub id: String,
    pub item_type: String,
    pub position: Vec3,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vec3>,
    pub state: Map<String, Value>,
}

/// Store of interactive world objects, keyed by item id.
///
/// Last write wins: concurrent updates from two participants are applied in
/// arrival order with no conflict resolution.
#[derive(Debug, Default)]
pub struct WorldItemStore {
    items: HashMap<String, WorldItem>,
}

impl WorldItemStore {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
        }
    }

    /// Full upsert, replacing any existing record wholesale.
    pub fn set_item(&mut self, item: WorldItem) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn get(&self, id: &str) -> Option<&WorldItem> {
        self.items.get(id)
    }

    /// Shallow-merge `patch` into the item's state map. Keys present in the
    /// patch overwrite; absent keys are untouched.
    pub fn update_state(&mut self, id: &str, patch: &Map<String, Value>) -> Result<(), SyncError> {
        let item = self
            .items
            .get_mut(id)
            .ok_or_else(|| SyncError::ItemNotFound(id.to_string()))?;
        for (key, value) in patch {
            item.state.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Replace the item's position. Non-finite components reject the update.
    pub fn update_position(&mut self, id: &str, position: Vec3) -> Result<(), SyncError> {
        if !position.is_finite() {
            return Err(SyncError::MalformedNumeric("position"));
        }
        let item = self
            .items
            .get_mut(id)
            .ok_or_else(|| SyncError::ItemNotFound(id.to_string()))?;
        item.position = position;
        Ok(())
    }

    /// Apply a remote `UPDATE_ITEM_STATE`: creates the item on first sight
    /// (level load happens client-side, the server learns items lazily),
    /// otherwise merges state and replaces position when provided.
    pub fn apply_update(
        &mut self,
        id: &str,
        item_type: &str,
        state: &Map<String, Value>,
        position: Option<Vec3>,
    ) -> Result<&WorldItem, SyncError> {
        if let Some(p) = position {
            if !p.is_finite() {
                return Err(SyncError::MalformedNumeric("position"));
            }
        }

        if !self.items.contains_key(id) {
            self.set_item(WorldItem {
                id: id.to_string(),
                item_type: item_type.to_string(),
                position: position.unwrap_or(Vec3::ZERO),
                rotation: None,
                state: state.clone(),
            });
        } else {
            self.update_state(id, state)?;
            if let Some(p) = position {
                self.update_position(id, p)?;
            }
        }

        Ok(&self.items[id])
    }

    pub fn all(&self) -> Vec<WorldItem> {
        self.items.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_of(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn chest() -> WorldItem {
        WorldItem {
            id: "chest-1".to_string(),
            item_type: "chest".to_string(),
            position: Vec3::new(2.0, 0.0, 1.0),
            rotation: None,
            state: state_of(&[("isOpen", json!(false)), ("isLocked", json!(true))]),
        }
    }

    #[test]
    fn test_set_and_get() {
        let mut store = WorldItemStore::new();
        store.set_item(chest());
        assert_eq!(store.get("chest-1").unwrap().item_type, "chest");
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_state_shallow_merge() {
        let mut store = WorldItemStore::new();
        store.set_item(chest());

        store
            .update_state("chest-1", &state_of(&[("isOpen", json!(true))]))
            .unwrap();

        let item = store.get("chest-1").unwrap();
        assert_eq!(item.state["isOpen"], json!(true));
        // Untouched key survives the merge.
        assert_eq!(item.state["isLocked"], json!(true));
        assert_eq!(item.position, Vec3::new(2.0, 0.0, 1.0));
    }

    #[test]
    fn test_update_position() {
        let mut store = WorldItemStore::new();
        store.set_item(chest());

        store
            .update_position("chest-1", Vec3::new(7.0, 0.0, 7.0))
            .unwrap();
        assert_eq!(store.get("chest-1").unwrap().position, Vec3::new(7.0, 0.0, 7.0));
    }

    #[test]
    fn test_non_finite_position_rejected() {
        let mut store = WorldItemStore::new();
        store.set_item(chest());

        let result = store.update_position("chest-1", Vec3::new(f32::NAN, 0.0, 0.0));
        assert!(matches!(result, Err(SyncError::MalformedNumeric(_))));
        assert_eq!(store.get("chest-1").unwrap().position, Vec3::new(2.0, 0.0, 1.0));
    }

    #[test]
    fn test_unknown_item() {
        let mut store = WorldItemStore::new();
        let result = store.update_state("ghost", &Map::new());
        assert!(matches!(result, Err(SyncError::ItemNotFound(_))));
    }

    #[test]
    fn test_apply_update_creates_on_first_sight() {
        let mut store = WorldItemStore::new();

        let item = store
            .apply_update(
                "door-3",
                "door",
                &state_of(&[("isOpen", json!(true))]),
                Some(Vec3::new(1.0, 0.0, 0.0)),
            )
            .unwrap();

        assert_eq!(item.item_type, "door");
        assert_eq!(item.state["isOpen"], json!(true));
        assert_eq!(item.position, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_apply_update_merges_existing() {
        let mut store = WorldItemStore::new();
        store.set_item(chest());

        store
            .apply_update("chest-1", "chest", &state_of(&[("isOpen", json!(true))]), None)
            .unwrap();

        let item = store.get("chest-1").unwrap();
        assert_eq!(item.state["isOpen"], json!(true));
        assert_eq!(item.state["isLocked"], json!(true));
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = WorldItemStore::new();
        store.set_item(chest());

        store
            .apply_update("chest-1", "chest", &state_of(&[("isOpen", json!(true))]), None)
            .unwrap();
        store
            .apply_update("chest-1", "chest", &state_of(&[("isOpen", json!(false))]), None)
            .unwrap();

        assert_eq!(store.get("chest-1").unwrap().state["isOpen"], json!(false));
    }
}
