//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::DuelPhase;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Challenge another participant by display name
    Challenge { target: String },

    /// Accept a pending challenge
    Accept { challenger: String },

    /// Deny a pending challenge
    Deny { challenger: String },

    /// Withdraw our own outgoing challenge
    Cancel,

    /// Join the matchmaking queue
    JoinQueue,

    /// Leave the matchmaking queue
    LeaveQueue,

    /// Skip the post-duel return countdown (or leave the loot phase early)
    ReturnNow,

    /// Position update (headless world only)
    Move {
        world: String,
        x: f64,
        y: f64,
        z: f64,
    },

    /// Block placed by the participant (headless world only)
    PlaceBlock {
        x: i32,
        y: i32,
        z: i32,
        block: String,
    },

    /// Death report (headless world only)
    Died {
        /// Participant credited with the kill, if any
        killer: Option<Uuid>,
        /// Item entities dropped on death
        #[serde(default)]
        drops: Vec<Uuid>,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        participant_id: Uuid,
        server_time: u64,
    },

    /// Free-form informational line
    Notice { text: String },

    /// Someone challenged us
    ChallengeReceived {
        from: String,
        expires_in_secs: u64,
    },

    /// Our challenge was delivered
    ChallengeSent { to: String },

    /// A challenge between us and `other` expired unanswered
    ChallengeExpired { other: String },

    /// A challenge was denied
    ChallengeDenied { by: String },

    /// A challenge was withdrawn by the challenger
    ChallengeCancelled { by: String },

    /// Looking for a natural site
    SearchingSite,

    /// No site could be found; the duel will not start
    SiteUnavailable { reason: String },

    /// Duel constructed, countdown follows
    DuelStarting {
        duel_id: Uuid,
        opponent: String,
        /// Arena name, `None` for a natural site
        arena: Option<String>,
    },

    /// Countdown tick
    Countdown { seconds_remaining: u32 },

    /// Combat is live
    Fight,

    /// The boundary started shrinking
    BoundaryShrinking {
        from_radius: f64,
        to_radius: f64,
        duration_secs: u64,
    },

    /// Close to the boundary edge
    BoundaryWarning { distance: f64 },

    /// Outside the boundary, taking damage
    OutsideBoundary,

    /// Duel decided
    DuelResult {
        winner: String,
        loser: String,
        forfeit: bool,
    },

    /// Winner may collect loot for this long
    LootPhase { seconds: u32 },

    /// Return countdown tick
    ReturnCountdown { seconds_remaining: u32 },

    /// Restored to the lobby / pre-duel location
    Returned,

    /// Joined the matchmaking queue
    QueueJoined { position: usize, size: usize },

    /// Left the matchmaking queue
    QueueLeft,

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Read-only view of an active duel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuelSummary {
    pub duel_id: Uuid,
    pub participants: [DuelParticipant; 2],
    pub arena: Option<String>,
    pub phase: DuelPhase,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub boundary_radius: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuelParticipant {
    pub participant_id: Uuid,
    pub display_name: String,
}
