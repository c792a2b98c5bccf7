use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SyncError;
use crate::util::math::{Quat, Vec3};

/// Stable participant identifier, supplied by the client and reused across
/// reconnects.
pub type ParticipantId = String;

/// Presence status of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerStatus {
    #[serde(rename = "offline")]
    Offline,
    #[serde(rename = "lobby")]
    Lobby,
    #[serde(rename = "in-game")]
    InGame,
}

/// A stable game identity. Survives connection loss: disconnection only flips
/// `status` to `offline`, the record itself is never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub status: PlayerStatus,

    // Transform
    pub position: Vec3,
    pub rotation: Quat,

    // Movement / animation flags
    pub is_moving: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement_direction: Option<String>,
    pub is_running: bool,
    pub is_jumping: bool,
    pub is_grounded: bool,

    // Character selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weapon: Option<String>,

    // Lobby membership
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lobby_id: Option<Uuid>,
    pub is_host: bool,
    pub ready: bool,
}

impl Participant {
    pub fn new(id: ParticipantId, name: String) -> Self {
        Self {
            id,
            name,
            status: PlayerStatus::Lobby,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            is_moving: false,
            movement_direction: None,
            is_running: false,
            is_jumping: false,
            is_grounded: true,
            character: None,
            character_name: None,
            weapon: None,
            lobby_id: None,
            is_host: false,
            ready: false,
        }
    }

    /// Reset the transform to the spawn default (used when entering a lobby).
    pub fn reset_transform(&mut self) {
        self.position = Vec3::ZERO;
        self.rotation = Quat::IDENTITY;
        self.is_moving = false;
        self.movement_direction = None;
        self.is_running = false;
        self.is_jumping = false;
        self.is_grounded = true;
    }

    /// Clear all lobby-related fields.
    pub fn clear_lobby(&mut self) {
        self.lobby_id = None;
        self.is_host = false;
        self.ready = false;
    }
}

/// Partial update for movement/animation flags. Only fields present in the
/// payload are applied; absent fields leave the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_moving: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement_direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_jumping: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_grounded: Option<bool>,
}

/// Canonical store of participant records, keyed by participant id.
///
/// Lobbies reference participants by id only; this map is the single source
/// of truth for player state.
#[derive(Debug, Default)]
pub struct PlayerStore {
    players: HashMap<ParticipantId, Participant>,
}

impl PlayerStore {
    pub fn new() -> Self {
        Self {
            players: HashMap::new(),
        }
    }

    /// Create a participant record, or reuse the existing one on
    /// reconnection. The display name is refreshed either way.
    pub fn connect(&mut self, id: &str, name: &str) -> &Participant {
        let player = self
            .players
            .entry(id.to_string())
            .or_insert_with(|| Participant::new(id.to_string(), name.to_string()));
        player.name = name.to_string();
        if player.status == PlayerStatus::Offline {
            player.status = PlayerStatus::Lobby;
        }
        player
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.players.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.players.get_mut(id)
    }

    /// Replace the stored position. Non-finite components reject the whole
    /// update and the prior position is retained.
    pub fn update_position(&mut self, id: &str, position: Vec3) -> Result<&Participant, SyncError> {
        if !position.is_finite() {
            return Err(SyncError::MalformedNumeric("position"));
        }
        let player = self
            .players
            .get_mut(id)
            .ok_or_else(|| SyncError::PlayerNotFound(id.to_string()))?;
        player.position = position;
        Ok(player)
    }

    /// Replace the stored rotation, with the same finite-component rule as
    /// positions.
    pub fn update_rotation(&mut self, id: &str, rotation: Quat) -> Result<&Participant, SyncError> {
        if !rotation.is_finite() {
            return Err(SyncError::MalformedNumeric("rotation"));
        }
        let player = self
            .players
            .get_mut(id)
            .ok_or_else(|| SyncError::PlayerNotFound(id.to_string()))?;
        player.rotation = rotation;
        Ok(player)
    }

    /// Merge a movement patch into the participant record.
    pub fn apply_movement(
        &mut self,
        id: &str,
        patch: &MovementPatch,
    ) -> Result<&Participant, SyncError> {
        let player = self
            .players
            .get_mut(id)
            .ok_or_else(|| SyncError::PlayerNotFound(id.to_string()))?;
        if let Some(v) = patch.is_moving {
            player.is_moving = v;
        }
        if let Some(v) = &patch.movement_direction {
            player.movement_direction = Some(v.clone());
        }
        if let Some(v) = patch.is_running {
            player.is_running = v;
        }
        if let Some(v) = patch.is_jumping {
            player.is_jumping = v;
        }
        if let Some(v) = patch.is_grounded {
            player.is_grounded = v;
        }
        Ok(player)
    }

    pub fn set_status(&mut self, id: &str, status: PlayerStatus) -> Result<(), SyncError> {
        let player = self
            .players
            .get_mut(id)
            .ok_or_else(|| SyncError::PlayerNotFound(id.to_string()))?;
        player.status = status;
        Ok(())
    }

    /// All participant records, for snapshot serialization.
    pub fn all(&self) -> Vec<Participant> {
        self.players.values().cloned().collect()
    }

    /// Resolve a list of ids into participant records, skipping ids with no
    /// record. Used when serializing lobby snapshots.
    pub fn resolve(&self, ids: &[ParticipantId]) -> Vec<Participant> {
        ids.iter()
            .filter_map(|id| self.players.get(id))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.players.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(id: &str) -> PlayerStore {
        let mut store = PlayerStore::new();
        store.connect(id, "Tester");
        store
    }

    #[test]
    fn test_connect_creates_record() {
        let mut store = PlayerStore::new();
        let player = store.connect("u1", "Alice");
        assert_eq!(player.id, "u1");
        assert_eq!(player.name, "Alice");
        assert_eq!(player.status, PlayerStatus::Lobby);
        assert_eq!(player.position, Vec3::ZERO);
    }

    #[test]
    fn test_connect_is_idempotent() {
        let mut store = store_with("u1");
        store
            .update_position("u1", Vec3::new(4.0, 0.0, 2.0))
            .unwrap();

        // Reconnection keeps the existing record and its state.
        let player = store.connect("u1", "Tester");
        assert_eq!(player.position, Vec3::new(4.0, 0.0, 2.0));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_reconnect_clears_offline() {
        let mut store = store_with("u1");
        store.set_status("u1", PlayerStatus::Offline).unwrap();

        let player = store.connect("u1", "Tester");
        assert_eq!(player.status, PlayerStatus::Lobby);
    }

    #[test]
    fn test_update_position() {
        let mut store = store_with("u1");
        store
            .update_position("u1", Vec3::new(1.0, 2.0, 3.0))
            .unwrap();
        assert_eq!(store.get("u1").unwrap().position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_nan_position_rejected() {
        let mut store = store_with("u1");
        store
            .update_position("u1", Vec3::new(5.0, 5.0, 5.0))
            .unwrap();

        let result = store.update_position("u1", Vec3::new(f32::NAN, 0.0, 0.0));
        assert!(matches!(result, Err(SyncError::MalformedNumeric(_))));
        // Prior position retained.
        assert_eq!(store.get("u1").unwrap().position, Vec3::new(5.0, 5.0, 5.0));
    }

    #[test]
    fn test_infinite_rotation_rejected() {
        let mut store = store_with("u1");
        let result = store.update_rotation("u1", Quat::new(0.0, f32::INFINITY, 0.0, 1.0));
        assert!(matches!(result, Err(SyncError::MalformedNumeric(_))));
        assert_eq!(store.get("u1").unwrap().rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_update_unknown_player() {
        let mut store = PlayerStore::new();
        let result = store.update_position("ghost", Vec3::ZERO);
        assert!(matches!(result, Err(SyncError::PlayerNotFound(_))));
    }

    #[test]
    fn test_movement_patch_merges() {
        let mut store = store_with("u1");

        store
            .apply_movement(
                "u1",
                &MovementPatch {
                    is_moving: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .apply_movement(
                "u1",
                &MovementPatch {
                    is_running: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        let player = store.get("u1").unwrap();
        assert!(player.is_moving);
        assert!(player.is_running);
    }

    #[test]
    fn test_movement_patch_leaves_absent_fields() {
        let mut store = store_with("u1");
        store
            .apply_movement(
                "u1",
                &MovementPatch {
                    is_moving: Some(true),
                    movement_direction: Some("forward".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .apply_movement(
                "u1",
                &MovementPatch {
                    is_jumping: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        let player = store.get("u1").unwrap();
        assert!(player.is_moving);
        assert!(player.is_jumping);
        assert_eq!(player.movement_direction.as_deref(), Some("forward"));
    }

    #[test]
    fn test_reset_transform() {
        let mut store = store_with("u1");
        store
            .update_position("u1", Vec3::new(9.0, 9.0, 9.0))
            .unwrap();
        store
            .apply_movement(
                "u1",
                &MovementPatch {
                    is_running: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        store.get_mut("u1").unwrap().reset_transform();

        let player = store.get("u1").unwrap();
        assert_eq!(player.position, Vec3::ZERO);
        assert!(!player.is_running);
    }

    #[test]
    fn test_resolve_skips_missing() {
        let mut store = store_with("u1");
        store.connect("u2", "Other");

        let resolved = store.resolve(&["u1".to_string(), "ghost".to_string(), "u2".to_string()]);
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&PlayerStatus::InGame).unwrap(),
            "\"in-game\""
        );
        assert_eq!(
            serde_json::to_string(&PlayerStatus::Offline).unwrap(),
            "\"offline\""
        );
    }

    #[test]
    fn test_participant_wire_casing() {
        let player = Participant::new("u1".to_string(), "Alice".to_string());
        let json = serde_json::to_value(&player).unwrap();
        assert!(json.get("isHost").is_some());
        assert!(json.get("isGrounded").is_some());
        // Unset optionals are omitted entirely.
        assert!(json.get("lobbyId").is_none());
        assert!(json.get("character").is_none());
    }
}
