//! World collaborator interfaces
//!
//! The duel core never touches blocks, entities or participants directly.
//! Everything goes through the [`World`] and [`Messenger`] traits so the
//! engine can run against a live game server bridge or the headless
//! [`memory::MemoryWorld`].

pub mod memory;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

pub use memory::{MemoryWorld, MessageLog};

/// Participant identity (stable across display-name changes)
pub type ParticipantId = Uuid;

/// Identity of a non-participant entity (dropped item, projectile, ...)
pub type EntityId = Uuid;

/// Name of the block every cleanup resets placed blocks to
pub const AIR: &str = "air";

/// A position in a named world, with facing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_yaw(mut self, yaw: f32) -> Self {
        self.yaw = yaw;
        self
    }

    pub fn position(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }

    /// Distance in the x/z plane, ignoring height
    pub fn horizontal_distance(&self, other: DVec3) -> f64 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }

    pub fn block(&self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }

    pub fn chunk(&self) -> ChunkPos {
        self.block().chunk()
    }

    /// Midpoint of two locations, in the first location's world
    pub fn midpoint(&self, other: &Location) -> Location {
        Location::new(
            self.world.clone(),
            (self.x + other.x) / 2.0,
            (self.y + other.y) / 2.0,
            (self.z + other.z) / 2.0,
        )
    }
}

/// Integer block coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn chunk(self) -> ChunkPos {
        ChunkPos::new(self.x >> 4, self.z >> 4)
    }
}

/// Chunk coordinate (16x16 block columns)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn of_block(x: i32, z: i32) -> Self {
        Self::new(x >> 4, z >> 4)
    }
}

/// A block type as seen by the duel core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    /// Can be stood on
    pub solid: bool,
    /// Can be walked through
    pub passable: bool,
}

impl Block {
    pub fn air() -> Self {
        Self {
            name: AIR.to_string(),
            solid: false,
            passable: true,
        }
    }
}

/// One stack in an inventory slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item: String,
    pub amount: u32,
}

impl ItemStack {
    pub fn new(item: impl Into<String>, amount: u32) -> Self {
        Self {
            item: item.into(),
            amount,
        }
    }
}

/// Opaque copy of a participant's inventory and armor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub contents: Vec<Option<ItemStack>>,
    pub armor: Vec<Option<ItemStack>>,
}

impl InventorySnapshot {
    pub fn is_empty(&self) -> bool {
        self.contents.iter().chain(self.armor.iter()).all(Option::is_none)
    }
}

/// Optional engine features negotiated with the world implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Velocity can be applied to participants
    pub knockback: bool,
    /// Particles can be shown to individual participants
    pub particles: bool,
    /// A compass/locator can be pointed at another participant
    pub locator_target: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            knockback: true,
            particles: true,
            locator_target: false,
        }
    }
}

/// World primitive failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    #[error("Unknown world: {0}")]
    UnknownWorld(String),

    #[error("Participant {0} is not online")]
    Offline(ParticipantId),

    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("World operation failed: {0}")]
    Failed(String),
}

/// World primitives consumed by the duel core.
///
/// Reads may be called from the terrain worker; every mutating call is
/// made from the async side only.
pub trait World: Send + Sync {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Default spawn of a world, `None` if the world does not exist
    fn spawn_location(&self, world: &str) -> Option<Location>;

    /// Inclusive minimum and exclusive maximum build height
    fn height_range(&self, world: &str) -> (i32, i32);

    fn block_at(&self, world: &str, pos: BlockPos) -> Block;

    fn biome_at(&self, world: &str, x: i32, z: i32) -> String;

    fn set_block(&self, world: &str, pos: BlockPos, block: &str) -> Result<(), WorldError>;

    fn is_chunk_loaded(&self, world: &str, chunk: ChunkPos) -> bool;

    /// Load a chunk and keep it loaded for a duel
    fn claim_chunk(&self, world: &str, chunk: ChunkPos) -> Result<(), WorldError>;

    /// Hand a claimed chunk back to the world's own unloading
    fn release_chunk(&self, world: &str, chunk: ChunkPos) -> Result<(), WorldError>;

    fn is_online(&self, participant: ParticipantId) -> bool;

    fn display_name(&self, participant: ParticipantId) -> Option<String>;

    /// Case-insensitive lookup of an online participant
    fn find_online(&self, name: &str) -> Option<ParticipantId>;

    fn online_participants(&self) -> Vec<ParticipantId>;

    fn location(&self, participant: ParticipantId) -> Option<Location>;

    fn teleport(&self, participant: ParticipantId, to: &Location) -> Result<(), WorldError>;

    fn push(&self, participant: ParticipantId, velocity: DVec3) -> Result<(), WorldError>;

    fn damage(&self, participant: ParticipantId, amount: f64) -> Result<(), WorldError>;

    fn health(&self, participant: ParticipantId) -> Option<f64>;

    fn set_health(&self, participant: ParticipantId, health: f64) -> Result<(), WorldError>;

    fn inventory(&self, participant: ParticipantId) -> Option<InventorySnapshot>;

    fn set_inventory(
        &self,
        participant: ParticipantId,
        inventory: &InventorySnapshot,
    ) -> Result<(), WorldError>;

    fn entity_exists(&self, entity: EntityId) -> bool;

    fn remove_entity(&self, entity: EntityId) -> Result<(), WorldError>;

    fn show_particle(&self, viewer: ParticipantId, world: &str, at: DVec3) -> Result<(), WorldError>;

    fn set_locator_target(
        &self,
        participant: ParticipantId,
        target: Option<ParticipantId>,
    ) -> Result<(), WorldError>;
}

/// Delivers server messages to a participant
pub trait Messenger: Send + Sync {
    fn send(&self, to: ParticipantId, msg: ServerMsg);
}
