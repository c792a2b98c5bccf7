use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::player::ParticipantId;
use crate::session::SyncError;

/// Lobby lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LobbyStatus {
    /// Waiting for players to join and ready up
    Waiting,
    /// Game in progress
    Playing,
}

/// A named, capacity-bounded grouping of participants.
///
/// Lobbies store participant ids only — never player records. Resolved player
/// objects are joined from the canonical store at snapshot serialization
/// time, so there is a single source of truth for player state.
#[derive(Debug, Clone)]
pub struct Lobby {
    pub id: Uuid,
    pub name: String,
    pub host_id: ParticipantId,
    pub host_name: String,
    pub max_players: usize,
    /// Insertion order is join order; host re-election picks the front.
    pub participant_ids: Vec<ParticipantId>,
    pub status: LobbyStatus,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Lobby {
    pub fn is_full(&self) -> bool {
        self.participant_ids.len() >= self.max_players
    }

    pub fn is_empty(&self) -> bool {
        self.participant_ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.participant_ids.iter().any(|p| p == id)
    }

    pub fn player_count(&self) -> usize {
        self.participant_ids.len()
    }
}

/// What happened when a participant left a lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Participant removed, host unchanged
    Left,
    /// The departing participant was host; the earliest remaining joiner
    /// takes over
    HostChanged(ParticipantId),
    /// The lobby became empty and was deleted
    Deleted,
}

/// Directory of all live lobbies.
pub struct LobbyDirectory {
    lobbies: HashMap<Uuid, Lobby>,
    max_lobbies: usize,
}

impl LobbyDirectory {
    pub fn new(max_lobbies: usize) -> Self {
        Self {
            lobbies: HashMap::new(),
            max_lobbies,
        }
    }

    /// Create a lobby with the given host as its first member.
    pub fn create(
        &mut self,
        name: String,
        host_id: ParticipantId,
        host_name: String,
        max_players: usize,
    ) -> Result<&Lobby, SyncError> {
        if self.lobbies.len() >= self.max_lobbies {
            return Err(SyncError::TooManyLobbies);
        }

        let id = Uuid::new_v4();
        let lobby = Lobby {
            id,
            name,
            host_id: host_id.clone(),
            host_name,
            max_players,
            participant_ids: vec![host_id],
            status: LobbyStatus::Waiting,
            created_at: epoch_millis(),
        };
        self.lobbies.insert(id, lobby);
        Ok(&self.lobbies[&id])
    }

    pub fn get(&self, id: Uuid) -> Option<&Lobby> {
        self.lobbies.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Lobby> {
        self.lobbies.get_mut(&id)
    }

    /// Append a participant, enforcing capacity at join time.
    pub fn join(&mut self, lobby_id: Uuid, participant_id: &str) -> Result<&Lobby, SyncError> {
        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(SyncError::LobbyNotFound(lobby_id))?;
        if lobby.is_full() {
            return Err(SyncError::LobbyFull(lobby_id));
        }
        if !lobby.contains(participant_id) {
            lobby.participant_ids.push(participant_id.to_string());
        }
        Ok(lobby)
    }

    /// Remove a participant. Re-elects the host (earliest remaining joiner)
    /// or deletes the lobby when it becomes empty.
    pub fn leave(&mut self, lobby_id: Uuid, participant_id: &str) -> Result<LeaveOutcome, SyncError> {
        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(SyncError::LobbyNotFound(lobby_id))?;

        lobby.participant_ids.retain(|p| p != participant_id);

        if lobby.is_empty() {
            self.lobbies.remove(&lobby_id);
            return Ok(LeaveOutcome::Deleted);
        }

        if lobby.host_id == participant_id {
            let new_host = lobby.participant_ids[0].clone();
            lobby.host_id = new_host.clone();
            return Ok(LeaveOutcome::HostChanged(new_host));
        }

        Ok(LeaveOutcome::Left)
    }

    /// Remove a lobby and return its former member ids.
    pub fn delete(&mut self, lobby_id: Uuid) -> Result<Vec<ParticipantId>, SyncError> {
        self.lobbies
            .remove(&lobby_id)
            .map(|lobby| lobby.participant_ids)
            .ok_or(SyncError::LobbyNotFound(lobby_id))
    }

    /// Drop every lobby, returning all member ids so callers can clear the
    /// membership fields on the canonical player records.
    pub fn flush(&mut self) -> Vec<ParticipantId> {
        let members = self
            .lobbies
            .values()
            .flat_map(|l| l.participant_ids.iter().cloned())
            .collect();
        self.lobbies.clear();
        members
    }

    /// waiting -> playing. Idempotent on an already-playing lobby.
    pub fn start(&mut self, lobby_id: Uuid) -> Result<&Lobby, SyncError> {
        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(SyncError::LobbyNotFound(lobby_id))?;
        lobby.status = LobbyStatus::Playing;
        Ok(lobby)
    }

    /// playing -> waiting. Returns member ids so the caller can clear each
    /// member's readiness, forcing re-confirmation before the next start.
    pub fn pause(&mut self, lobby_id: Uuid) -> Result<Vec<ParticipantId>, SyncError> {
        let lobby = self
            .lobbies
            .get_mut(&lobby_id)
            .ok_or(SyncError::LobbyNotFound(lobby_id))?;
        lobby.status = LobbyStatus::Waiting;
        Ok(lobby.participant_ids.clone())
    }

    pub fn all(&self) -> Vec<&Lobby> {
        self.lobbies.values().collect()
    }

    pub fn count(&self) -> usize {
        self.lobbies.len()
    }
}

impl Default for LobbyDirectory {
    fn default() -> Self {
        Self::new(100)
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_lobby(dir: &mut LobbyDirectory, host: &str, max_players: usize) -> Uuid {
        dir.create(
            "Test Lobby".to_string(),
            host.to_string(),
            host.to_string(),
            max_players,
        )
        .unwrap()
        .id
    }

    #[test]
    fn test_create_seeds_host() {
        let mut dir = LobbyDirectory::new(10);
        let id = create_lobby(&mut dir, "host", 4);

        let lobby = dir.get(id).unwrap();
        assert_eq!(lobby.participant_ids, vec!["host".to_string()]);
        assert_eq!(lobby.host_id, "host");
        assert_eq!(lobby.status, LobbyStatus::Waiting);
        assert_eq!(lobby.max_players, 4);
    }

    #[test]
    fn test_max_lobbies() {
        let mut dir = LobbyDirectory::new(2);
        create_lobby(&mut dir, "h1", 4);
        create_lobby(&mut dir, "h2", 4);

        let result = dir.create("Third".to_string(), "h3".to_string(), "h3".to_string(), 4);
        assert!(matches!(result, Err(SyncError::TooManyLobbies)));
    }

    #[test]
    fn test_join_up_to_capacity() {
        let mut dir = LobbyDirectory::new(10);
        let id = create_lobby(&mut dir, "host", 4);

        dir.join(id, "p2").unwrap();
        dir.join(id, "p3").unwrap();
        dir.join(id, "p4").unwrap();

        let lobby = dir.get(id).unwrap();
        assert_eq!(lobby.player_count(), 4);
        assert_eq!(lobby.status, LobbyStatus::Waiting);
    }

    #[test]
    fn test_join_full_lobby_rejected() {
        let mut dir = LobbyDirectory::new(10);
        let id = create_lobby(&mut dir, "host", 2);
        dir.join(id, "p2").unwrap();

        let result = dir.join(id, "p3");
        assert!(matches!(result, Err(SyncError::LobbyFull(_))));
        // Membership unchanged.
        assert_eq!(dir.get(id).unwrap().participant_ids, vec!["host", "p2"]);
    }

    #[test]
    fn test_join_unknown_lobby() {
        let mut dir = LobbyDirectory::new(10);
        let result = dir.join(Uuid::new_v4(), "p1");
        assert!(matches!(result, Err(SyncError::LobbyNotFound(_))));
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut dir = LobbyDirectory::new(10);
        let id = create_lobby(&mut dir, "host", 4);
        dir.join(id, "p2").unwrap();
        dir.join(id, "p2").unwrap();

        assert_eq!(dir.get(id).unwrap().player_count(), 2);
    }

    #[test]
    fn test_leave_non_host() {
        let mut dir = LobbyDirectory::new(10);
        let id = create_lobby(&mut dir, "host", 4);
        dir.join(id, "p2").unwrap();

        let outcome = dir.leave(id, "p2").unwrap();
        assert_eq!(outcome, LeaveOutcome::Left);
        assert_eq!(dir.get(id).unwrap().host_id, "host");
    }

    #[test]
    fn test_host_leave_elects_earliest_joiner() {
        let mut dir = LobbyDirectory::new(10);
        let id = create_lobby(&mut dir, "host", 4);
        dir.join(id, "second").unwrap();
        dir.join(id, "third").unwrap();

        let outcome = dir.leave(id, "host").unwrap();
        assert_eq!(outcome, LeaveOutcome::HostChanged("second".to_string()));
        assert_eq!(dir.get(id).unwrap().host_id, "second");
        // Join order of the remaining members is preserved.
        assert_eq!(dir.get(id).unwrap().participant_ids, vec!["second", "third"]);
    }

    #[test]
    fn test_last_leave_deletes_lobby() {
        let mut dir = LobbyDirectory::new(10);
        let id = create_lobby(&mut dir, "host", 4);

        let outcome = dir.leave(id, "host").unwrap();
        assert_eq!(outcome, LeaveOutcome::Deleted);
        assert!(dir.get(id).is_none());
        assert_eq!(dir.count(), 0);
    }

    #[test]
    fn test_start_and_pause() {
        let mut dir = LobbyDirectory::new(10);
        let id = create_lobby(&mut dir, "host", 4);

        dir.start(id).unwrap();
        assert_eq!(dir.get(id).unwrap().status, LobbyStatus::Playing);

        let members = dir.pause(id).unwrap();
        assert_eq!(dir.get(id).unwrap().status, LobbyStatus::Waiting);
        assert_eq!(members, vec!["host".to_string()]);
    }

    #[test]
    fn test_delete_returns_members() {
        let mut dir = LobbyDirectory::new(10);
        let id = create_lobby(&mut dir, "host", 4);
        dir.join(id, "p2").unwrap();

        let members = dir.delete(id).unwrap();
        assert_eq!(members, vec!["host".to_string(), "p2".to_string()]);
        assert!(dir.get(id).is_none());
    }

    #[test]
    fn test_flush() {
        let mut dir = LobbyDirectory::new(10);
        let a = create_lobby(&mut dir, "h1", 4);
        create_lobby(&mut dir, "h2", 4);
        dir.join(a, "p2").unwrap();

        let mut members = dir.flush();
        members.sort();
        assert_eq!(members, vec!["h1", "h2", "p2"]);
        assert_eq!(dir.count(), 0);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&LobbyStatus::Waiting).unwrap(),
            "\"waiting\""
        );
        assert_eq!(
            serde_json::to_string(&LobbyStatus::Playing).unwrap(),
            "\"playing\""
        );
    }
}
