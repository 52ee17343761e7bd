//! Headless in-memory world
//!
//! Backs the server when it runs without a game-server bridge, and is the
//! fake every test drives. Terrain is generated per column by a closure;
//! explicit block changes are layered on top.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::DVec3;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    Block, BlockPos, Capabilities, ChunkPos, EntityId, InventorySnapshot, ItemStack, Location,
    Messenger, ParticipantId, World, WorldError, AIR,
};
use crate::ws::protocol::ServerMsg;

/// Name of the world a fresh [`MemoryWorld`] starts with
pub const DEFAULT_WORLD: &str = "world";

/// Default participant health (and maximum)
pub const DEFAULT_HEALTH: f64 = 20.0;

/// Generated terrain for one x/z column
#[derive(Debug, Clone)]
pub struct Column {
    /// Y of the topmost block
    pub surface_y: i32,
    /// Block at `surface_y`
    pub surface: String,
    /// Block between `surface_y` and the bottom
    pub filler: String,
    pub biome: String,
}

impl Column {
    pub fn flat(surface_y: i32) -> Self {
        Self {
            surface_y,
            surface: "grass_block".to_string(),
            filler: "stone".to_string(),
            biome: "plains".to_string(),
        }
    }
}

type TerrainFn = Arc<dyn Fn(i32, i32) -> Column + Send + Sync>;

struct Dimension {
    spawn: Location,
    min_y: i32,
    max_y: i32,
    terrain: TerrainFn,
}

#[derive(Debug, Clone)]
struct Presence {
    name: String,
    location: Location,
    health: f64,
    max_health: f64,
    inventory: InventorySnapshot,
    velocity: DVec3,
    locator_target: Option<ParticipantId>,
}

#[derive(Default)]
struct WorldState {
    dimensions: HashMap<String, Dimension>,
    blocks: HashMap<(String, BlockPos), String>,
    participants: HashMap<ParticipantId, Presence>,
    entities: HashMap<EntityId, Location>,
    loaded: HashSet<(String, ChunkPos)>,
    claimed: HashSet<(String, ChunkPos)>,
    particles_shown: u64,
}

/// In-memory [`World`] implementation
pub struct MemoryWorld {
    state: RwLock<WorldState>,
    capabilities: Capabilities,
}

impl MemoryWorld {
    /// A world named [`DEFAULT_WORLD`]: flat grass plains at y=64
    pub fn new() -> Self {
        let world = Self {
            state: RwLock::new(WorldState::default()),
            capabilities: Capabilities {
                knockback: true,
                particles: true,
                locator_target: true,
            },
        };
        world.add_dimension(
            DEFAULT_WORLD,
            Location::new(DEFAULT_WORLD, 0.5, 65.0, 0.5),
            |_, _| Column::flat(64),
        );
        world
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Add (or replace) a world with its own terrain generator
    pub fn add_dimension<F>(&self, name: &str, spawn: Location, terrain: F)
    where
        F: Fn(i32, i32) -> Column + Send + Sync + 'static,
    {
        self.state.write().dimensions.insert(
            name.to_string(),
            Dimension {
                spawn,
                min_y: -64,
                max_y: 320,
                terrain: Arc::new(terrain),
            },
        );
    }

    /// Replace the terrain generator of an existing world
    pub fn set_terrain<F>(&self, name: &str, terrain: F)
    where
        F: Fn(i32, i32) -> Column + Send + Sync + 'static,
    {
        if let Some(dim) = self.state.write().dimensions.get_mut(name) {
            dim.terrain = Arc::new(terrain);
        }
    }

    /// Bring a participant online at the default world's spawn
    pub fn connect(&self, participant: ParticipantId, name: &str) {
        let mut state = self.state.write();
        let spawn = state
            .dimensions
            .get(DEFAULT_WORLD)
            .map(|d| d.spawn.clone())
            .unwrap_or_else(|| Location::new(DEFAULT_WORLD, 0.5, 65.0, 0.5));
        state.participants.insert(
            participant,
            Presence {
                name: name.to_string(),
                location: spawn,
                health: DEFAULT_HEALTH,
                max_health: DEFAULT_HEALTH,
                inventory: InventorySnapshot::default(),
                velocity: DVec3::ZERO,
                locator_target: None,
            },
        );
    }

    pub fn disconnect(&self, participant: ParticipantId) {
        self.state.write().participants.remove(&participant);
    }

    /// Move a participant without the duel core being involved
    pub fn move_to(&self, participant: ParticipantId, to: Location) {
        if let Some(p) = self.state.write().participants.get_mut(&participant) {
            p.location = to;
        }
    }

    pub fn give(&self, participant: ParticipantId, stack: ItemStack) {
        if let Some(p) = self.state.write().participants.get_mut(&participant) {
            p.inventory.contents.push(Some(stack));
        }
    }

    pub fn clear_inventory(&self, participant: ParticipantId) {
        if let Some(p) = self.state.write().participants.get_mut(&participant) {
            p.inventory = InventorySnapshot::default();
        }
    }

    pub fn spawn_entity(&self, at: Location) -> EntityId {
        let id = Uuid::new_v4();
        self.state.write().entities.insert(id, at);
        id
    }

    /// Mark a chunk as loaded, as if someone had visited it
    pub fn load_chunk(&self, world: &str, chunk: ChunkPos) {
        self.state.write().loaded.insert((world.to_string(), chunk));
    }

    pub fn is_chunk_claimed(&self, world: &str, chunk: ChunkPos) -> bool {
        self.state.read().claimed.contains(&(world.to_string(), chunk))
    }

    pub fn claimed_chunk_count(&self) -> usize {
        self.state.read().claimed.len()
    }

    pub fn velocity(&self, participant: ParticipantId) -> Option<DVec3> {
        self.state.read().participants.get(&participant).map(|p| p.velocity)
    }

    pub fn locator_target(&self, participant: ParticipantId) -> Option<ParticipantId> {
        self.state
            .read()
            .participants
            .get(&participant)
            .and_then(|p| p.locator_target)
    }

    pub fn particles_shown(&self) -> u64 {
        self.state.read().particles_shown
    }

    fn classify(name: &str) -> Block {
        let (solid, passable) = match name {
            "air" | "cave_air" | "void_air" | "short_grass" | "tall_grass" | "fern" | "snow"
            | "dandelion" | "poppy" | "dead_bush" => (false, true),
            "water" | "lava" | "bubble_column" => (false, false),
            _ => (true, false),
        };
        Block {
            name: name.to_string(),
            solid,
            passable,
        }
    }
}

impl Default for MemoryWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl World for MemoryWorld {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn spawn_location(&self, world: &str) -> Option<Location> {
        self.state.read().dimensions.get(world).map(|d| d.spawn.clone())
    }

    fn height_range(&self, world: &str) -> (i32, i32) {
        self.state
            .read()
            .dimensions
            .get(world)
            .map(|d| (d.min_y, d.max_y))
            .unwrap_or((0, 0))
    }

    fn block_at(&self, world: &str, pos: BlockPos) -> Block {
        let terrain = {
            let state = self.state.read();
            if let Some(name) = state.blocks.get(&(world.to_string(), pos)) {
                return Self::classify(name);
            }
            match state.dimensions.get(world) {
                Some(dim) if pos.y >= dim.min_y && pos.y < dim.max_y => dim.terrain.clone(),
                _ => return Block::air(),
            }
        };

        let column = terrain(pos.x, pos.z);
        if pos.y > column.surface_y {
            Block::air()
        } else if pos.y == column.surface_y {
            Self::classify(&column.surface)
        } else {
            Self::classify(&column.filler)
        }
    }

    fn biome_at(&self, world: &str, x: i32, z: i32) -> String {
        let terrain = match self.state.read().dimensions.get(world) {
            Some(dim) => dim.terrain.clone(),
            None => return "void".to_string(),
        };
        terrain(x, z).biome
    }

    fn set_block(&self, world: &str, pos: BlockPos, block: &str) -> Result<(), WorldError> {
        let mut state = self.state.write();
        if !state.dimensions.contains_key(world) {
            return Err(WorldError::UnknownWorld(world.to_string()));
        }
        state.blocks.insert((world.to_string(), pos), block.to_string());
        Ok(())
    }

    fn is_chunk_loaded(&self, world: &str, chunk: ChunkPos) -> bool {
        let state = self.state.read();
        let key = (world.to_string(), chunk);
        state.loaded.contains(&key)
            || state.claimed.contains(&key)
            || state
                .participants
                .values()
                .any(|p| p.location.world == world && p.location.chunk() == chunk)
    }

    fn claim_chunk(&self, world: &str, chunk: ChunkPos) -> Result<(), WorldError> {
        let mut state = self.state.write();
        if !state.dimensions.contains_key(world) {
            return Err(WorldError::UnknownWorld(world.to_string()));
        }
        state.claimed.insert((world.to_string(), chunk));
        Ok(())
    }

    fn release_chunk(&self, world: &str, chunk: ChunkPos) -> Result<(), WorldError> {
        let mut state = self.state.write();
        let key = (world.to_string(), chunk);
        state.claimed.remove(&key);
        state.loaded.remove(&key);
        Ok(())
    }

    fn is_online(&self, participant: ParticipantId) -> bool {
        self.state.read().participants.contains_key(&participant)
    }

    fn display_name(&self, participant: ParticipantId) -> Option<String> {
        self.state
            .read()
            .participants
            .get(&participant)
            .map(|p| p.name.clone())
    }

    fn find_online(&self, name: &str) -> Option<ParticipantId> {
        self.state
            .read()
            .participants
            .iter()
            .find(|(_, p)| p.name.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
    }

    fn online_participants(&self) -> Vec<ParticipantId> {
        self.state.read().participants.keys().copied().collect()
    }

    fn location(&self, participant: ParticipantId) -> Option<Location> {
        self.state
            .read()
            .participants
            .get(&participant)
            .map(|p| p.location.clone())
    }

    fn teleport(&self, participant: ParticipantId, to: &Location) -> Result<(), WorldError> {
        let mut state = self.state.write();
        if !state.dimensions.contains_key(&to.world) {
            return Err(WorldError::UnknownWorld(to.world.clone()));
        }
        let p = state
            .participants
            .get_mut(&participant)
            .ok_or(WorldError::Offline(participant))?;
        p.location = to.clone();
        p.velocity = DVec3::ZERO;
        Ok(())
    }

    fn push(&self, participant: ParticipantId, velocity: DVec3) -> Result<(), WorldError> {
        let mut state = self.state.write();
        let p = state
            .participants
            .get_mut(&participant)
            .ok_or(WorldError::Offline(participant))?;
        p.velocity = velocity;
        Ok(())
    }

    fn damage(&self, participant: ParticipantId, amount: f64) -> Result<(), WorldError> {
        let mut state = self.state.write();
        let p = state
            .participants
            .get_mut(&participant)
            .ok_or(WorldError::Offline(participant))?;
        p.health = (p.health - amount).max(0.0);
        Ok(())
    }

    fn health(&self, participant: ParticipantId) -> Option<f64> {
        self.state.read().participants.get(&participant).map(|p| p.health)
    }

    fn set_health(&self, participant: ParticipantId, health: f64) -> Result<(), WorldError> {
        let mut state = self.state.write();
        let p = state
            .participants
            .get_mut(&participant)
            .ok_or(WorldError::Offline(participant))?;
        p.health = health.clamp(0.0, p.max_health);
        Ok(())
    }

    fn inventory(&self, participant: ParticipantId) -> Option<InventorySnapshot> {
        self.state
            .read()
            .participants
            .get(&participant)
            .map(|p| p.inventory.clone())
    }

    fn set_inventory(
        &self,
        participant: ParticipantId,
        inventory: &InventorySnapshot,
    ) -> Result<(), WorldError> {
        let mut state = self.state.write();
        let p = state
            .participants
            .get_mut(&participant)
            .ok_or(WorldError::Offline(participant))?;
        p.inventory = inventory.clone();
        Ok(())
    }

    fn entity_exists(&self, entity: EntityId) -> bool {
        self.state.read().entities.contains_key(&entity)
    }

    fn remove_entity(&self, entity: EntityId) -> Result<(), WorldError> {
        self.state
            .write()
            .entities
            .remove(&entity)
            .map(|_| ())
            .ok_or(WorldError::UnknownEntity(entity))
    }

    fn show_particle(&self, viewer: ParticipantId, _world: &str, _at: DVec3) -> Result<(), WorldError> {
        let mut state = self.state.write();
        if !state.participants.contains_key(&viewer) {
            return Err(WorldError::Offline(viewer));
        }
        state.particles_shown += 1;
        Ok(())
    }

    fn set_locator_target(
        &self,
        participant: ParticipantId,
        target: Option<ParticipantId>,
    ) -> Result<(), WorldError> {
        let mut state = self.state.write();
        let p = state
            .participants
            .get_mut(&participant)
            .ok_or(WorldError::Offline(participant))?;
        p.locator_target = target;
        Ok(())
    }
}

/// [`Messenger`] that records every message it is asked to deliver
#[derive(Default)]
pub struct MessageLog {
    sent: Mutex<Vec<(ParticipantId, ServerMsg)>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages_for(&self, participant: ParticipantId) -> Vec<ServerMsg> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| *to == participant)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Count messages to `participant` matching `pred`
    pub fn count_for<F>(&self, participant: ParticipantId, pred: F) -> usize
    where
        F: Fn(&ServerMsg) -> bool,
    {
        self.sent
            .lock()
            .iter()
            .filter(|(to, msg)| *to == participant && pred(msg))
            .count()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Messenger for MessageLog {
    fn send(&self, to: ParticipantId, msg: ServerMsg) {
        self.sent.lock().push((to, msg));
    }
}
