use std::collections::HashMap;

use crate::net::peer::ConnectionId;
use crate::session::player::ParticipantId;

/// Bidirectional map between transport connections and stable participant
/// identities.
///
/// Identity outlives any single connection: a reconnect rebinds the user id
/// to the new connection. The reverse direction (`user -> conn`) always
/// points at the most recent connection, but an older connection keeps its
/// forward binding until it closes, so a stale socket still resolves to the
/// one canonical participant record.
#[derive(Debug, Default)]
pub struct IdentityBinder {
    conn_to_user: HashMap<ConnectionId, ParticipantId>,
    user_to_conn: HashMap<ParticipantId, ConnectionId>,
}

impl IdentityBinder {
    pub fn new() -> Self {
        Self {
            conn_to_user: HashMap::new(),
            user_to_conn: HashMap::new(),
        }
    }

    /// Bind a connection to a user id. Idempotent per user: rebinding from a
    /// new connection repoints `user -> conn` at it.
    pub fn bind(&mut self, conn: ConnectionId, user: &str) {
        self.conn_to_user.insert(conn, user.to_string());
        self.user_to_conn.insert(user.to_string(), conn);
    }

    /// Identity bound to a connection. Disconnection handling resolves the
    /// user through this map, never through payload fields.
    pub fn user_of(&self, conn: ConnectionId) -> Option<&ParticipantId> {
        self.conn_to_user.get(&conn)
    }

    /// Most recent connection for a user.
    pub fn conn_of(&self, user: &str) -> Option<ConnectionId> {
        self.user_to_conn.get(user).copied()
    }

    /// Drop a connection's binding, returning the user id it carried. The
    /// reverse mapping is only cleared when it still points at this
    /// connection — a newer connection for the same user keeps its entry.
    pub fn unbind(&mut self, conn: ConnectionId) -> Option<ParticipantId> {
        let user = self.conn_to_user.remove(&conn)?;
        if self.user_to_conn.get(&user) == Some(&conn) {
            self.user_to_conn.remove(&user);
        }
        Some(user)
    }

    pub fn bound_count(&self) -> usize {
        self.conn_to_user.len()
    }
}
