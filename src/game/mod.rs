//! Duel engine: terrain search, shrinking boundary and the duel lifecycle

pub mod boundary;
pub mod duel;
pub mod registry;
pub mod snapshot;
pub mod terrain;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::DuelConfig;
use crate::store::StatsStore;
use crate::util::Scheduler;
use crate::world::{Messenger, World};

pub use boundary::{Boundary, BoundaryPhase};
pub use duel::{DuelMatch, DuelSetup};
pub use registry::MatchRegistry;
pub use snapshot::ParticipantSnapshot;
pub use terrain::{LocateError, LocateRequest, NaturalSite, TerrainLocator};

/// Duel lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelPhase {
    /// Counting down before combat
    Countdown,
    /// Combat in progress
    Active,
    /// Winner collecting dropped items
    LootPhase,
    /// Waiting before participants are sent back
    ReturnCountdown,
    /// Over; only deferred cleanup remains
    Ended,
}

/// Collaborators every duel needs
#[derive(Clone)]
pub struct DuelServices {
    pub world: Arc<dyn World>,
    pub messenger: Arc<dyn Messenger>,
    pub stats: Arc<dyn StatsStore>,
    pub scheduler: Scheduler,
    pub config: Arc<DuelConfig>,
}
