//! Message dispatcher: decodes inbound frames, routes them to store
//! mutations and decides whether a full-state broadcast follows.
//!
//! Every inbound message is handled to completion before the next one is
//! processed (the server holds one lock around the whole dispatcher), so
//! state transitions are linearizable per process without finer-grained
//! locking.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::net::binder::IdentityBinder;
use crate::net::peer::{ConnectionId, PeerRegistry};
use crate::net::protocol::{
    decode_client, ClientMessage, DecodeError, LobbySnapshot, ServerMessage,
};
use crate::session::lobby::LeaveOutcome;
use crate::session::player::{MovementPatch, ParticipantId, PlayerStatus};
use crate::session::roll::{RollArgs, RollOutcome};
use crate::session::{SessionState, SyncError};
use crate::util::math::{Quat, Vec3};

/// Whether a handled message is followed by a full snapshot broadcast.
///
/// Suppression is reserved for high-frequency updates (transforms, movement
/// flags) and for relays that already broadcast their own targeted message;
/// everything else pushes full state so clients stay consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Broadcast a full `SYNC_STATE` snapshot after the handler
    Full,
    /// The handler already emitted whatever the clients need
    Suppressed,
}

/// Routes decoded messages to the session stores and owns all shared state.
pub struct Dispatcher {
    peers: PeerRegistry,
    binder: IdentityBinder,
    state: SessionState,
    default_max_players: usize,
}

impl Dispatcher {
    pub fn new(max_lobbies: usize, default_max_players: usize) -> Self {
        Self {
            peers: PeerRegistry::new(),
            binder: IdentityBinder::new(),
            state: SessionState::new(max_lobbies),
            default_max_players,
        }
    }

    /// A connection opened: register it, confirm, and push an initial
    /// snapshot so late joiners are consistent immediately.
    pub fn handle_open(&mut self, tx: mpsc::UnboundedSender<String>) -> ConnectionId {
        let conn = self.peers.register(tx);
        info!(conn_id = conn, peers = self.peers.count(), "peer connected");

        self.peers
            .send_to(conn, &ServerMessage::ConnectionEstablished { peer_id: conn });
        self.peers.send_to(conn, &self.snapshot());

        conn
    }

    /// A connection closed: drop the peer and flip its participant to
    /// offline. The participant record and its lobby membership are
    /// retained so the player can reconnect mid-session.
    pub fn handle_close(&mut self, conn: ConnectionId) {
        self.peers.remove(conn);

        let Some(user) = self.binder.unbind(conn) else {
            debug!(conn_id = conn, "unbound peer disconnected");
            return;
        };

        // A replacement connection may already be bound for this user; only
        // the last live connection going away marks the player offline.
        if self.binder.conn_of(&user).is_some() {
            debug!(conn_id = conn, user_id = %user, "stale connection closed");
            return;
        }

        info!(conn_id = conn, user_id = %user, "player disconnected");
        if self
            .state
            .players
            .set_status(&user, PlayerStatus::Offline)
            .is_ok()
        {
            self.peers.broadcast(&ServerMessage::PlayerDisconnected {
                user_id: user,
                players: self.state.players.all(),
            });
            self.broadcast_sync();
        }
    }

    /// Entry point for one inbound text frame.
    pub fn handle_frame(&mut self, conn: ConnectionId, text: &str) {
        let message = match decode_client(text) {
            Ok(message) => message,
            Err(DecodeError::UnknownType(tag)) => {
                warn!(conn_id = conn, message_type = %tag, "unknown message type ignored");
                return;
            }
            Err(err) => {
                warn!(conn_id = conn, error = %err, "undecodable frame ignored");
                return;
            }
        };

        match self.dispatch(conn, message) {
            Ok(SyncPolicy::Full) => self.broadcast_sync(),
            Ok(SyncPolicy::Suppressed) => {}
            Err(err) => {
                debug!(conn_id = conn, error = %err, "operation rejected");
                self.peers.send_to(conn, &ServerMessage::error(&err));
            }
        }
    }

    fn dispatch(
        &mut self,
        conn: ConnectionId,
        message: ClientMessage,
    ) -> Result<SyncPolicy, SyncError> {
        match message {
            ClientMessage::PlayerConnectionRequest { user_id, username } => {
                self.on_player_connection(conn, user_id, username)
            }
            ClientMessage::PlayerDisconnectionRequest => self.on_player_disconnection(conn),
            ClientMessage::CreateLobby {
                lobby_name,
                max_players,
            } => self.on_create_lobby(conn, lobby_name, max_players),
            ClientMessage::DeleteLobby { lobby_id } => self.on_delete_lobby(conn, lobby_id),
            ClientMessage::JoinLobbyRequest { lobby_id } => self.on_join_lobby(conn, lobby_id),
            ClientMessage::LeaveLobby { lobby_id } => self.on_leave_lobby(conn, lobby_id),
            ClientMessage::FlushLobbies => self.on_flush_lobbies(conn),
            ClientMessage::PlayerReady { lobby_id, value } => {
                self.on_player_ready(conn, lobby_id, value)
            }
            ClientMessage::StartGame { lobby_id } => self.on_start_game(conn, lobby_id),
            ClientMessage::PauseGame { lobby_id } => self.on_pause_game(conn, lobby_id),
            ClientMessage::SelectCharacter {
                lobby_id,
                character_name,
                character,
                weapon,
            } => self.on_select_character(conn, lobby_id, character_name, character, weapon),
            ClientMessage::UpdatePlayerPosition { position, .. } => {
                self.on_update_position(conn, position)
            }
            ClientMessage::UpdatePlayerRotation { rotation, .. } => {
                self.on_update_rotation(conn, rotation)
            }
            ClientMessage::UpdatePlayerState { state, .. } => self.on_update_state(conn, &state),
            ClientMessage::UpdatePlayerStatus { status } => self.on_update_status(conn, status),
            ClientMessage::UpdateItemState {
                item_id,
                item_type,
                state,
                position,
            } => self.on_update_item(conn, item_id, item_type, state, position),
            ClientMessage::DiceRollStart { args } => self.on_roll_start(conn, args),
            ClientMessage::DiceRollResult { outcome } => self.on_roll_result(conn, outcome),
            ClientMessage::DiceRollClose => self.on_roll_close(conn),
        }
    }

    // === Connection / identity ===

    fn on_player_connection(
        &mut self,
        conn: ConnectionId,
        user_id: String,
        username: String,
    ) -> Result<SyncPolicy, SyncError> {
        info!(conn_id = conn, user_id = %user_id, username = %username, "player connection request");

        self.state.players.connect(&user_id, &username);
        self.binder.bind(conn, &user_id);

        // A reconnecting player whose lobby is already playing goes straight
        // back in-game.
        let lobby_status = self
            .state
            .players
            .get(&user_id)
            .and_then(|p| p.lobby_id)
            .and_then(|id| self.state.lobbies.get(id))
            .map(|l| l.status);
        if lobby_status == Some(crate::session::lobby::LobbyStatus::Playing) {
            self.state
                .players
                .set_status(&user_id, PlayerStatus::InGame)?;
        }

        let player = self
            .state
            .players
            .get(&user_id)
            .cloned()
            .ok_or_else(|| SyncError::PlayerNotFound(user_id.clone()))?;
        self.peers
            .send_to(conn, &ServerMessage::PlayerConnectionResponse { player });

        Ok(SyncPolicy::Full)
    }

    fn on_player_disconnection(&mut self, conn: ConnectionId) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        self.state.players.set_status(&user, PlayerStatus::Offline)?;

        self.peers.broadcast(&ServerMessage::PlayerDisconnected {
            user_id: user,
            players: self.state.players.all(),
        });

        Ok(SyncPolicy::Full)
    }

    // === Lobby directory ===

    fn on_create_lobby(
        &mut self,
        conn: ConnectionId,
        name: String,
        max_players: Option<usize>,
    ) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        let host_name = self
            .state
            .players
            .get(&user)
            .map(|p| p.name.clone())
            .ok_or_else(|| SyncError::PlayerNotFound(user.clone()))?;

        let capacity = max_players.unwrap_or(self.default_max_players);
        let lobby_id = self
            .state
            .lobbies
            .create(name, user.clone(), host_name, capacity)?
            .id;
        info!(user_id = %user, lobby_id = %lobby_id, "lobby created");

        let player = self
            .state
            .players
            .get_mut(&user)
            .ok_or_else(|| SyncError::PlayerNotFound(user.clone()))?;
        player.lobby_id = Some(lobby_id);
        player.is_host = true;
        player.ready = false;
        player.reset_transform();

        if let Some(peer) = self.peers.get_mut(conn) {
            peer.subscribe(&lobby_id.to_string());
        }

        Ok(SyncPolicy::Full)
    }

    fn on_join_lobby(&mut self, conn: ConnectionId, lobby_id: Uuid) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        if self.state.players.get(&user).is_none() {
            return Err(SyncError::PlayerNotFound(user));
        }

        self.state.lobbies.join(lobby_id, &user)?;
        info!(user_id = %user, lobby_id = %lobby_id, "player joined lobby");

        if let Some(player) = self.state.players.get_mut(&user) {
            player.lobby_id = Some(lobby_id);
            player.is_host = false;
            player.ready = false;
            player.reset_transform();
        }

        if let Some(peer) = self.peers.get_mut(conn) {
            peer.subscribe(&lobby_id.to_string());
        }

        Ok(SyncPolicy::Full)
    }

    fn on_leave_lobby(
        &mut self,
        conn: ConnectionId,
        lobby_id: Uuid,
    ) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        let outcome = self.state.lobbies.leave(lobby_id, &user)?;

        if let Some(player) = self.state.players.get_mut(&user) {
            player.clear_lobby();
        }

        match outcome {
            LeaveOutcome::Deleted => {
                info!(lobby_id = %lobby_id, "lobby emptied and deleted");
            }
            LeaveOutcome::HostChanged(new_host) => {
                info!(lobby_id = %lobby_id, new_host = %new_host, "host re-elected");
                let host_name = self
                    .state
                    .players
                    .get(&new_host)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                if let Some(lobby) = self.state.lobbies.get_mut(lobby_id) {
                    lobby.host_name = host_name;
                }
                if let Some(player) = self.state.players.get_mut(&new_host) {
                    player.is_host = true;
                }
            }
            LeaveOutcome::Left => {}
        }

        Ok(SyncPolicy::Full)
    }

    fn on_delete_lobby(&mut self, conn: ConnectionId, lobby_id: Uuid) -> Result<SyncPolicy, SyncError> {
        self.bound_user(conn)?;
        let members = self.state.lobbies.delete(lobby_id)?;
        info!(lobby_id = %lobby_id, "lobby deleted");

        for member in members {
            if let Some(player) = self.state.players.get_mut(&member) {
                player.clear_lobby();
            }
        }
        Ok(SyncPolicy::Full)
    }

    fn on_flush_lobbies(&mut self, conn: ConnectionId) -> Result<SyncPolicy, SyncError> {
        self.bound_user(conn)?;
        let members = self.state.lobbies.flush();
        info!(members = members.len(), "all lobbies flushed");

        for member in members {
            if let Some(player) = self.state.players.get_mut(&member) {
                player.clear_lobby();
            }
        }
        Ok(SyncPolicy::Full)
    }

    fn on_player_ready(
        &mut self,
        conn: ConnectionId,
        lobby_id: Uuid,
        value: bool,
    ) -> Result<SyncPolicy, SyncError> {
        let user = self.member_of(conn, lobby_id)?;
        if let Some(player) = self.state.players.get_mut(&user) {
            player.ready = value;
        }
        Ok(SyncPolicy::Full)
    }

    fn on_select_character(
        &mut self,
        conn: ConnectionId,
        lobby_id: Uuid,
        character_name: String,
        character: String,
        weapon: Option<String>,
    ) -> Result<SyncPolicy, SyncError> {
        let user = self.member_of(conn, lobby_id)?;
        if let Some(player) = self.state.players.get_mut(&user) {
            player.character = Some(character);
            player.character_name = Some(character_name);
            player.weapon = weapon;
        }
        Ok(SyncPolicy::Full)
    }

    fn on_start_game(&mut self, conn: ConnectionId, lobby_id: Uuid) -> Result<SyncPolicy, SyncError> {
        self.bound_user(conn)?;
        let members = self.state.lobbies.start(lobby_id)?.participant_ids.clone();
        info!(lobby_id = %lobby_id, players = members.len(), "game started");

        for member in &members {
            if let Some(player) = self.state.players.get_mut(member) {
                if player.status != PlayerStatus::Offline {
                    player.status = PlayerStatus::InGame;
                }
            }
        }

        self.peers
            .broadcast(&ServerMessage::GameStarted { lobby_id });
        Ok(SyncPolicy::Full)
    }

    fn on_pause_game(&mut self, conn: ConnectionId, lobby_id: Uuid) -> Result<SyncPolicy, SyncError> {
        self.bound_user(conn)?;
        let members = self.state.lobbies.pause(lobby_id)?;
        info!(lobby_id = %lobby_id, "game paused");

        // Readiness is cleared on every member so the next start needs
        // re-confirmation.
        for member in &members {
            if let Some(player) = self.state.players.get_mut(member) {
                player.ready = false;
                if player.status == PlayerStatus::InGame {
                    player.status = PlayerStatus::Lobby;
                }
            }
        }
        Ok(SyncPolicy::Full)
    }

    // === Player state ===

    fn on_update_position(
        &mut self,
        conn: ConnectionId,
        position: Vec3,
    ) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        let player = self.state.players.update_position(&user, position)?.clone();
        self.peers
            .broadcast(&ServerMessage::PlayerUpdate { player });
        Ok(SyncPolicy::Suppressed)
    }

    fn on_update_rotation(
        &mut self,
        conn: ConnectionId,
        rotation: Quat,
    ) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        let player = self.state.players.update_rotation(&user, rotation)?.clone();
        self.peers
            .broadcast(&ServerMessage::PlayerUpdate { player });
        Ok(SyncPolicy::Suppressed)
    }

    fn on_update_state(
        &mut self,
        conn: ConnectionId,
        patch: &MovementPatch,
    ) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        let player = self.state.players.apply_movement(&user, patch)?.clone();
        self.peers
            .broadcast(&ServerMessage::PlayerUpdate { player });
        Ok(SyncPolicy::Suppressed)
    }

    fn on_update_status(
        &mut self,
        conn: ConnectionId,
        status: PlayerStatus,
    ) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        self.state.players.set_status(&user, status)?;
        Ok(SyncPolicy::Full)
    }

    // === World items ===

    fn on_update_item(
        &mut self,
        conn: ConnectionId,
        item_id: String,
        item_type: String,
        state: serde_json::Map<String, serde_json::Value>,
        position: Option<Vec3>,
    ) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        self.state
            .items
            .apply_update(&item_id, &item_type, &state, position)?;

        self.peers.broadcast(&ServerMessage::ItemStateUpdate {
            item_id,
            item_type,
            state,
            position,
            player_id: user,
        });
        Ok(SyncPolicy::Suppressed)
    }

    // === Roll coordination ===

    fn on_roll_start(&mut self, conn: ConnectionId, args: RollArgs) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        self.state.rolls.start(&user, args.clone());

        self.peers.broadcast(&ServerMessage::DiceRollStart {
            player_id: user,
            args,
        });
        Ok(SyncPolicy::Suppressed)
    }

    fn on_roll_result(
        &mut self,
        conn: ConnectionId,
        outcome: RollOutcome,
    ) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        if !self.state.rolls.resolve(&user, outcome.clone()) {
            debug!(user_id = %user, "roll result without active roll, relayed anyway");
        }

        self.peers.broadcast(&ServerMessage::DiceRollResult {
            player_id: user,
            outcome,
        });
        Ok(SyncPolicy::Suppressed)
    }

    fn on_roll_close(&mut self, conn: ConnectionId) -> Result<SyncPolicy, SyncError> {
        let user = self.bound_user(conn)?;
        self.state.rolls.close(&user);

        self.peers
            .broadcast(&ServerMessage::DiceRollClose { player_id: user });
        Ok(SyncPolicy::Suppressed)
    }

    // === Snapshot / fan-out ===

    /// Build the full-state snapshot. Lobby membership ids are resolved into
    /// player records here, at serialization time only.
    fn snapshot(&self) -> ServerMessage {
        let mut lobbies: Vec<LobbySnapshot> = self
            .state
            .lobbies
            .all()
            .into_iter()
            .map(|lobby| LobbySnapshot::from_lobby(lobby, &self.state.players))
            .collect();
        lobbies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut players = self.state.players.all();
        players.sort_by(|a, b| a.id.cmp(&b.id));

        let mut items = self.state.items.all();
        items.sort_by(|a, b| a.id.cmp(&b.id));

        ServerMessage::SyncState {
            lobbies,
            players,
            items,
        }
    }

    fn broadcast_sync(&self) {
        self.peers.broadcast(&self.snapshot());
    }

    fn bound_user(&self, conn: ConnectionId) -> Result<ParticipantId, SyncError> {
        self.binder
            .user_of(conn)
            .cloned()
            .ok_or(SyncError::UnboundConnection)
    }

    /// Resolve the calling peer's identity and require membership in the
    /// given lobby.
    fn member_of(&self, conn: ConnectionId, lobby_id: Uuid) -> Result<ParticipantId, SyncError> {
        let user = self.bound_user(conn)?;
        let lobby = self
            .state
            .lobbies
            .get(lobby_id)
            .ok_or(SyncError::LobbyNotFound(lobby_id))?;
        if !lobby.contains(&user) {
            return Err(SyncError::PlayerNotFound(user));
        }
        Ok(user)
    }
}
