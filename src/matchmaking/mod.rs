//! Challenges, matchmaking queue and duel construction

pub mod coordinator;
pub mod queue;
pub mod requests;

pub use coordinator::MatchCoordinator;
pub use queue::{MatchmakingQueue, QueueEntry};
pub use requests::{MatchRequest, RequestTable};

/// User-facing matchmaking errors; the message is shown as is
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DuelError {
    #[error("No online participant named '{0}'")]
    UnknownTarget(String),

    #[error("You cannot challenge yourself")]
    SelfChallenge,

    #[error("You are already in a duel")]
    AlreadyInDuel,

    #[error("{0} is already in a duel")]
    TargetInDuel(String),

    #[error("You already have a pending challenge")]
    RequestAlreadyPending,

    #[error("{0} already has a pending challenge")]
    TargetHasPendingRequest(String),

    #[error("No pending challenge from '{0}'")]
    NoPendingRequest(String),

    #[error("The challenge from {0} has expired")]
    RequestExpired(String),

    #[error("{0} is no longer online")]
    ChallengerUnavailable(String),

    #[error("You have no outgoing challenge")]
    NoOutgoingRequest,

    #[error("You are already in the queue")]
    AlreadyQueued,

    #[error("You are not in the queue")]
    NotQueued,

    #[error("You are not in a duel")]
    NotInDuel,

    #[error("There is nothing to return from yet")]
    NothingToReturn,

    #[error("A participant left before the duel started")]
    ParticipantLeft,

    #[error("No duel site available: {0}")]
    SiteUnavailable(String),
}

impl DuelError {
    /// Stable code sent alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            DuelError::UnknownTarget(_) => "unknown_target",
            DuelError::SelfChallenge => "self_challenge",
            DuelError::AlreadyInDuel => "already_in_duel",
            DuelError::TargetInDuel(_) => "target_in_duel",
            DuelError::RequestAlreadyPending => "request_pending",
            DuelError::TargetHasPendingRequest(_) => "target_has_request",
            DuelError::NoPendingRequest(_) => "no_pending_request",
            DuelError::RequestExpired(_) => "request_expired",
            DuelError::ChallengerUnavailable(_) => "challenger_unavailable",
            DuelError::NoOutgoingRequest => "no_outgoing_request",
            DuelError::AlreadyQueued => "already_queued",
            DuelError::NotQueued => "not_queued",
            DuelError::NotInDuel => "not_in_duel",
            DuelError::NothingToReturn => "nothing_to_return",
            DuelError::ParticipantLeft => "participant_left",
            DuelError::SiteUnavailable(_) => "site_unavailable",
        }
    }
}
