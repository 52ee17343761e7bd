//! Connected WebSocket sessions, addressable by participant

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::world::{Messenger, ParticipantId};
use crate::ws::protocol::ServerMsg;

/// Outbound buffer per session; a client this far behind loses messages
pub const SESSION_BUFFER: usize = 256;

/// Identifies one connection of a participant
pub type SessionId = u64;

struct Session {
    id: SessionId,
    tx: mpsc::Sender<ServerMsg>,
}

/// Routes server messages to the writer task of each live session
#[derive(Default)]
pub struct SessionHub {
    sessions: DashMap<ParticipantId, Session>,
    next_id: AtomicU64,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session channel. A previous session for the same participant
    /// is replaced and its writer ends once its sender is dropped.
    pub fn register(&self, participant: ParticipantId) -> (SessionId, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.sessions.insert(participant, Session { id, tx }).is_some() {
            debug!(participant = %participant, "Replaced existing session");
        }
        (id, rx)
    }

    /// Close the session, unless a newer one has taken its place.
    /// Returns true if `session` was still the current one.
    pub fn unregister(&self, participant: ParticipantId, session: SessionId) -> bool {
        self.sessions
            .remove_if(&participant, |_, s| s.id == session)
            .is_some()
    }

    pub fn is_connected(&self, participant: ParticipantId) -> bool {
        self.sessions.contains_key(&participant)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Messenger for SessionHub {
    fn send(&self, to: ParticipantId, msg: ServerMsg) {
        let Some(tx) = self.sessions.get(&to).map(|s| s.tx.clone()) else {
            return;
        };
        match tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(participant = %to, "Session buffer full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(participant = %to, "Session closed");
            }
        }
    }
}
