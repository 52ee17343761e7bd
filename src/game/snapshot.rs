//! Pre-duel participant state, captured for restoration

use crate::world::{InventorySnapshot, Location, ParticipantId, World, WorldError};

/// What a participant looked like when the duel was constructed
#[derive(Debug, Clone)]
pub struct ParticipantSnapshot {
    pub participant: ParticipantId,
    /// Inventory contents and armor
    pub inventory: InventorySnapshot,
    pub location: Location,
    pub health: f64,
}

impl ParticipantSnapshot {
    /// Capture the current state, `None` if the participant is offline
    pub fn capture(world: &dyn World, participant: ParticipantId) -> Option<Self> {
        Some(Self {
            participant,
            inventory: world.inventory(participant)?,
            location: world.location(participant)?,
            health: world.health(participant)?,
        })
    }

    pub fn restore_inventory(&self, world: &dyn World) -> Result<(), WorldError> {
        world.set_inventory(self.participant, &self.inventory)
    }

    pub fn restore_health(&self, world: &dyn World) -> Result<(), WorldError> {
        world.set_health(self.participant, self.health)
    }
}
