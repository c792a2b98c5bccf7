//! Wire protocol: UTF-8 JSON frames, one object per message, discriminated
//! by a mandatory `"type"` tag.
//!
//! Payload shapes are enforced by the type system at decode time instead of
//! runtime field checks; a frame that does not match its tagged variant is a
//! decode error, never a partial message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::net::peer::ConnectionId;
use crate::session::items::WorldItem;
use crate::session::lobby::{Lobby, LobbyStatus};
use crate::session::player::{MovementPatch, Participant, ParticipantId, PlayerStatus, PlayerStore};
use crate::session::roll::{RollArgs, RollOutcome};
use crate::session::SyncError;
use crate::util::math::{Quat, Vec3};

/// Messages from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    PlayerConnectionRequest { user_id: String, username: String },
    PlayerDisconnectionRequest,
    #[serde(rename_all = "camelCase")]
    CreateLobby {
        lobby_name: String,
        /// Falls back to the server's configured default when absent.
        #[serde(default)]
        max_players: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    DeleteLobby { lobby_id: Uuid },
    #[serde(rename_all = "camelCase")]
    JoinLobbyRequest { lobby_id: Uuid },
    #[serde(rename_all = "camelCase")]
    LeaveLobby { lobby_id: Uuid },
    FlushLobbies,
    #[serde(rename_all = "camelCase")]
    PlayerReady { lobby_id: Uuid, value: bool },
    #[serde(rename_all = "camelCase")]
    StartGame { lobby_id: Uuid },
    #[serde(rename_all = "camelCase")]
    PauseGame { lobby_id: Uuid },
    #[serde(rename_all = "camelCase")]
    SelectCharacter {
        lobby_id: Uuid,
        character_name: String,
        character: String,
        #[serde(default)]
        weapon: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UpdatePlayerPosition { lobby_id: Uuid, position: Vec3 },
    #[serde(rename_all = "camelCase")]
    UpdatePlayerRotation { lobby_id: Uuid, rotation: Quat },
    #[serde(rename_all = "camelCase")]
    UpdatePlayerState { lobby_id: Uuid, state: MovementPatch },
    UpdatePlayerStatus { status: PlayerStatus },
    #[serde(rename_all = "camelCase")]
    UpdateItemState {
        item_id: String,
        item_type: String,
        #[serde(default)]
        state: Map<String, Value>,
        #[serde(default)]
        position: Option<Vec3>,
    },
    DiceRollStart { args: RollArgs },
    DiceRollResult {
        #[serde(flatten)]
        outcome: RollOutcome,
    },
    DiceRollClose,
}

/// Messages from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    ConnectionEstablished { peer_id: ConnectionId },
    PlayerConnectionResponse { player: Participant },
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected {
        user_id: ParticipantId,
        players: Vec<Participant>,
    },
    #[serde(rename_all = "camelCase")]
    GameStarted { lobby_id: Uuid },
    PlayerUpdate { player: Participant },
    SyncState {
        lobbies: Vec<LobbySnapshot>,
        players: Vec<Participant>,
        items: Vec<WorldItem>,
    },
    #[serde(rename_all = "camelCase")]
    ItemStateUpdate {
        item_id: String,
        item_type: String,
        state: Map<String, Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<Vec3>,
        player_id: ParticipantId,
    },
    #[serde(rename_all = "camelCase")]
    DiceRollStart {
        player_id: ParticipantId,
        args: RollArgs,
    },
    #[serde(rename_all = "camelCase")]
    DiceRollResult {
        player_id: ParticipantId,
        #[serde(flatten)]
        outcome: RollOutcome,
    },
    #[serde(rename_all = "camelCase")]
    DiceRollClose { player_id: ParticipantId },
    Error { code: ErrorCode, context: String },
}

/// Stable error codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnboundConnection,
    NotFound,
    CapacityExceeded,
    MalformedNumeric,
}

impl From<&SyncError> for ErrorCode {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::UnboundConnection => ErrorCode::UnboundConnection,
            SyncError::PlayerNotFound(_)
            | SyncError::LobbyNotFound(_)
            | SyncError::ItemNotFound(_) => ErrorCode::NotFound,
            SyncError::LobbyFull(_) | SyncError::TooManyLobbies => ErrorCode::CapacityExceeded,
            SyncError::MalformedNumeric(_) => ErrorCode::MalformedNumeric,
        }
    }
}

impl ServerMessage {
    /// Build the structured error relayed to the offending peer.
    pub fn error(err: &SyncError) -> Self {
        ServerMessage::Error {
            code: ErrorCode::from(err),
            context: err.to_string(),
        }
    }
}

/// A lobby as serialized into `SYNC_STATE`: membership ids are resolved into
/// full player records at this point and nowhere else, so stale embedded
/// copies cannot exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySnapshot {
    pub id: Uuid,
    pub name: String,
    pub host_id: ParticipantId,
    pub host_name: String,
    pub max_players: usize,
    pub players: Vec<Participant>,
    pub status: LobbyStatus,
    pub created_at: u64,
}

impl LobbySnapshot {
    pub fn from_lobby(lobby: &Lobby, players: &PlayerStore) -> Self {
        Self {
            id: lobby.id,
            name: lobby.name.clone(),
            host_id: lobby.host_id.clone(),
            host_name: lobby.host_name.clone(),
            max_players: lobby.max_players,
            players: players.resolve(&lobby.participant_ids),
            status: lobby.status,
            created_at: lobby.created_at,
        }
    }
}

/// Every inbound type tag the dispatcher understands. Used to tell a
/// malformed payload apart from a genuinely unknown message type.
pub const CLIENT_MESSAGE_TYPES: &[&str] = &[
    "PLAYER_CONNECTION_REQUEST",
    "PLAYER_DISCONNECTION_REQUEST",
    "CREATE_LOBBY",
    "DELETE_LOBBY",
    "JOIN_LOBBY_REQUEST",
    "LEAVE_LOBBY",
    "FLUSH_LOBBIES",
    "PLAYER_READY",
    "START_GAME",
    "PAUSE_GAME",
    "SELECT_CHARACTER",
    "UPDATE_PLAYER_POSITION",
    "UPDATE_PLAYER_ROTATION",
    "UPDATE_PLAYER_STATE",
    "UPDATE_PLAYER_STATUS",
    "UPDATE_ITEM_STATE",
    "DICE_ROLL_START",
    "DICE_ROLL_RESULT",
    "DICE_ROLL_CLOSE",
];

/// Decode failure classification for inbound frames.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not a JSON object with a type field")]
    MissingType,
    #[error("unknown message type {0}")]
    UnknownType(String),
    #[error("malformed {0} payload: {1}")]
    Malformed(String, String),
}

/// Decode an inbound text frame into a typed message.
pub fn decode_client(text: &str) -> Result<ClientMessage, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|_| DecodeError::MissingType)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();

    serde_json::from_value(value).map_err(|e| {
        if CLIENT_MESSAGE_TYPES.contains(&tag.as_str()) {
            DecodeError::Malformed(tag, e.to_string())
        } else {
            DecodeError::UnknownType(tag)
        }
    })
}

/// Serialize an outbound message to a JSON text frame.
pub fn encode_server(message: &ServerMessage) -> String {
    // ServerMessage contains no non-string map keys, so serialization cannot
    // fail; an empty frame would only hide a programming error.
    serde_json::to_string(message).unwrap_or_default()
}
