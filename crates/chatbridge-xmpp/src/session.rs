//! Shared connect/reconnect state machine used by both the listener
//! session and every pooled actor session. The Python source
//! implements the same disconnect/backoff/rejoin shape independently
//! in `actor.py` and `client.py`; this unifies it into one component
//! both sides drive identically.

use std::collections::HashSet;
use std::time::Duration;

use jid::{BareJid, FullJid};
use tokio_xmpp::AsyncClient;
use tracing::{info, warn};

/// Gap between detecting a disconnect and attempting to reconnect.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Where a session currently sits in its connect/reconnect lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    SessionStarted,
    Reconnecting,
}

/// Tracks connection state and the set of MUC rooms this session has
/// joined, so a reconnect can rejoin every one of them. Shared by the
/// listener and every actor — each owns its own `SessionLifecycle`.
pub struct SessionLifecycle {
    jid: FullJid,
    password: String,
    state: SessionState,
    rooms: HashSet<BareJid>,
    torn_down: bool,
}

impl SessionLifecycle {
    pub fn new(jid: FullJid, password: impl Into<String>) -> Self {
        Self {
            jid,
            password: password.into(),
            state: SessionState::Disconnected,
            rooms: HashSet::new(),
            torn_down: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn jid(&self) -> &FullJid {
        &self.jid
    }

    /// Builds a fresh, unconnected client for this identity. The
    /// caller drives its connection and event loop; this type only
    /// tracks the lifecycle bookkeeping around it.
    pub fn new_client(&mut self) -> AsyncClient {
        self.state = SessionState::Connecting;
        AsyncClient::new(self.jid.clone(), self.password.clone())
    }

    pub fn mark_connected(&mut self) {
        self.state = SessionState::Connected;
    }

    pub fn mark_session_started(&mut self) {
        if self.state == SessionState::Reconnecting {
            info!(jid = %self.jid, "rejoining rooms after reconnect");
        }
        self.state = SessionState::SessionStarted;
    }

    pub fn remember_room(&mut self, room: BareJid) {
        self.rooms.insert(room);
    }

    pub fn forget_room(&mut self, room: &BareJid) {
        self.rooms.remove(room);
    }

    pub fn joined_rooms(&self) -> impl Iterator<Item = &BareJid> {
        self.rooms.iter()
    }

    /// Marks this session as deliberately torn down: a later
    /// disconnect event must not trigger a reconnect.
    pub fn mark_torn_down(&mut self) {
        self.torn_down = true;
        self.state = SessionState::Disconnected;
    }

    /// Call on a disconnect event. Returns `true` when the caller
    /// should wait out the backoff and reconnect; `false` when the
    /// disconnect was an explicit teardown.
    pub fn should_reconnect(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        warn!(jid = %self.jid, "xmpp session disconnected, will reconnect");
        self.state = SessionState::Reconnecting;
        true
    }

    /// Waits out the fixed reconnect backoff.
    pub async fn wait_backoff() {
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jid() -> FullJid {
        "bridge@xmpp.example.org/listener".parse().unwrap()
    }

    #[test]
    fn starts_disconnected() {
        let lifecycle = SessionLifecycle::new(jid(), "secret");
        assert_eq!(lifecycle.state(), SessionState::Disconnected);
    }

    #[test]
    fn explicit_teardown_suppresses_reconnect() {
        let mut lifecycle = SessionLifecycle::new(jid(), "secret");
        lifecycle.mark_torn_down();
        assert!(!lifecycle.should_reconnect());
    }

    #[test]
    fn disconnect_without_teardown_requests_reconnect() {
        let mut lifecycle = SessionLifecycle::new(jid(), "secret");
        lifecycle.mark_connected();
        assert!(lifecycle.should_reconnect());
        assert_eq!(lifecycle.state(), SessionState::Reconnecting);
    }

    #[test]
    fn tracks_joined_rooms_for_rejoin() {
        let mut lifecycle = SessionLifecycle::new(jid(), "secret");
        let room: BareJid = "room@conference.example.org".parse().unwrap();
        lifecycle.remember_room(room.clone());
        assert_eq!(lifecycle.joined_rooms().count(), 1);
        lifecycle.forget_room(&room);
        assert_eq!(lifecycle.joined_rooms().count(), 0);
    }
}
