//! Natural duel site search
//!
//! Samples random columns around the world spawn until one yields a safe
//! center and two safe, well-separated spawn points. Chunks around a chosen
//! site are marked explored so no later search reuses them. The explored set
//! lives for the life of the process.
//!
//! Everything here is read-only against the world and is meant to run on a
//! blocking worker.

use std::collections::HashSet;
use std::f64::consts::{PI, TAU};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info};

use crate::config::{DuelConfig, TerrainConfig};
use crate::world::{BlockPos, ChunkPos, Location, World};

/// Tries per spawn point
const SPAWN_ATTEMPTS: u32 = 10;

/// Spawn B must be at least this fraction of the requested distance from A
const MIN_SEPARATION_RATIO: f64 = 0.8;

/// Angle jitter (radians) when perturbing the mirrored spawn
const SPAWN_JITTER: f64 = 0.5;

/// Parameters of a single search
#[derive(Debug, Clone)]
pub struct LocateRequest {
    pub world: String,
    pub search_radius: i32,
    pub min_distance: f64,
    pub max_attempts: u32,
    /// Boundary start radius, sizes the claimed chunk square
    pub boundary_radius: f64,
}

impl LocateRequest {
    pub fn from_config(config: &DuelConfig) -> Self {
        Self {
            world: config.terrain.world.clone(),
            search_radius: config.terrain.search_radius,
            min_distance: config.terrain.min_participant_distance,
            max_attempts: config.terrain.max_attempts,
            boundary_radius: config.boundary.start_radius,
        }
    }
}

/// A located site, ready to be claimed
#[derive(Debug, Clone)]
pub struct NaturalSite {
    pub center: Location,
    pub spawn_a: Location,
    pub spawn_b: Location,
    /// Chunks to keep loaded while the duel runs
    pub chunks: Vec<ChunkPos>,
    /// 1-based attempt that succeeded
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocateError {
    #[error("Unknown world: {0}")]
    UnknownWorld(String),

    #[error("No unexplored safe site after {0} attempts")]
    NoUnexploredSite(u32),

    #[error("No safe spawn points after {0} attempts")]
    NoSafeSpawns(u32),
}

pub struct TerrainLocator {
    config: TerrainConfig,
    explored: Mutex<HashSet<(String, ChunkPos)>>,
}

impl TerrainLocator {
    pub fn new(config: TerrainConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            explored: Mutex::new(HashSet::new()),
        })
    }

    pub fn is_explored(&self, world: &str, chunk: ChunkPos) -> bool {
        self.explored.lock().contains(&(world.to_string(), chunk))
    }

    pub fn explored_count(&self) -> usize {
        self.explored.lock().len()
    }

    pub fn locate<R: Rng>(
        &self,
        world: &dyn World,
        request: &LocateRequest,
        rng: &mut R,
    ) -> Result<NaturalSite, LocateError> {
        let origin = world
            .spawn_location(&request.world)
            .ok_or_else(|| LocateError::UnknownWorld(request.world.clone()))?;
        let heights = world.height_range(&request.world);
        let radius = request.search_radius.max(0);
        let mut found_center = false;

        for attempt in 1..=request.max_attempts {
            let x = origin.x.floor() as i32 + rng.gen_range(-radius..=radius);
            let z = origin.z.floor() as i32 + rng.gen_range(-radius..=radius);
            let chunk = ChunkPos::of_block(x, z);

            if self.is_explored(&request.world, chunk) || world.is_chunk_loaded(&request.world, chunk) {
                continue;
            }
            if self.config.is_banned_biome(&world.biome_at(&request.world, x, z)) {
                continue;
            }
            let Some(y) = self.surface(world, &request.world, x, z, heights) else {
                continue;
            };
            found_center = true;

            let center = Location::new(request.world.clone(), x as f64 + 0.5, y as f64, z as f64 + 0.5);
            let Some((spawn_a, spawn_b)) = self.spawn_pair(world, &center, request.min_distance, heights, rng)
            else {
                debug!(attempt, x, z, "No safe spawn pair around candidate");
                continue;
            };

            let chunks = Self::claim_square(chunk, request.boundary_radius);
            {
                let mut explored = self.explored.lock();
                // another search may have taken it while we were sampling
                if explored.contains(&(request.world.clone(), chunk)) {
                    continue;
                }
                explored.extend(chunks.iter().map(|c| (request.world.clone(), *c)));
            }

            info!(attempt, x, y, z, "Natural duel site located");
            return Ok(NaturalSite {
                center,
                spawn_a,
                spawn_b,
                chunks,
                attempt,
            });
        }

        if found_center {
            Err(LocateError::NoSafeSpawns(request.max_attempts))
        } else {
            Err(LocateError::NoUnexploredSite(request.max_attempts))
        }
    }

    /// Y a participant would stand at in this column, if it is safe
    fn surface(&self, world: &dyn World, name: &str, x: i32, z: i32, (min_y, max_y): (i32, i32)) -> Option<i32> {
        for y in (min_y..max_y).rev() {
            let block = world.block_at(name, BlockPos::new(x, y, z));
            if !block.solid {
                continue;
            }
            if self.config.is_banned_block(&block.name) {
                return None;
            }
            let feet = world.block_at(name, BlockPos::new(x, y + 1, z));
            let head = world.block_at(name, BlockPos::new(x, y + 2, z));
            return (feet.passable && head.passable).then_some(y + 1);
        }
        None
    }

    /// Standing location at a column, also requiring the 3x3 footprint
    /// under the feet to be free of banned blocks
    fn safe_spawn(&self, world: &dyn World, name: &str, x: f64, z: f64, heights: (i32, i32)) -> Option<Location> {
        let (bx, bz) = (x.floor() as i32, z.floor() as i32);
        let y = self.surface(world, name, bx, bz, heights)?;
        for dx in -1..=1 {
            for dz in -1..=1 {
                let below = world.block_at(name, BlockPos::new(bx + dx, y - 1, bz + dz));
                if self.config.is_banned_block(&below.name) {
                    return None;
                }
            }
        }
        Some(Location::new(name, bx as f64 + 0.5, y as f64, bz as f64 + 0.5))
    }

    fn spawn_pair<R: Rng>(
        &self,
        world: &dyn World,
        center: &Location,
        distance: f64,
        heights: (i32, i32),
        rng: &mut R,
    ) -> Option<(Location, Location)> {
        let half = distance / 2.0;
        let name = center.world.as_str();

        let (angle_a, spawn_a) = (0..SPAWN_ATTEMPTS).find_map(|_| {
            let angle = rng.gen_range(0.0..TAU);
            let (x, z) = (center.x + angle.cos() * half, center.z + angle.sin() * half);
            self.safe_spawn(world, name, x, z, heights).map(|loc| (angle, loc))
        })?;

        let mirrored = angle_a + PI;
        let spawn_b = (0..=SPAWN_ATTEMPTS).find_map(|i| {
            let (angle, r) = if i == 0 {
                (mirrored, half)
            } else {
                (
                    mirrored + rng.gen_range(-SPAWN_JITTER..SPAWN_JITTER),
                    half * rng.gen_range(0.85..1.15),
                )
            };
            let (x, z) = (center.x + angle.cos() * r, center.z + angle.sin() * r);
            self.safe_spawn(world, name, x, z, heights)
                .filter(|b| b.horizontal_distance(spawn_a.position()) >= distance * MIN_SEPARATION_RATIO)
        })?;

        let yaw_a = yaw_towards(&spawn_a, &spawn_b);
        let yaw_b = yaw_towards(&spawn_b, &spawn_a);
        Some((spawn_a.with_yaw(yaw_a), spawn_b.with_yaw(yaw_b)))
    }

    /// Square of chunks covering the boundary plus a one-chunk margin
    fn claim_square(center: ChunkPos, boundary_radius: f64) -> Vec<ChunkPos> {
        let r = (boundary_radius / 16.0) as i32 + 1;
        (-r..=r)
            .flat_map(|dx| (-r..=r).map(move |dz| ChunkPos::new(center.x + dx, center.z + dz)))
            .collect()
    }
}

/// Yaw (degrees) that faces `to` when standing at `from`
pub fn yaw_towards(from: &Location, to: &Location) -> f32 {
    let dx = to.x - from.x;
    let dz = to.z - from.z;
    (-dx).atan2(dz).to_degrees() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::memory::Column;
    use crate::world::MemoryWorld;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn request(max_attempts: u32) -> LocateRequest {
        LocateRequest {
            world: "world".to_string(),
            search_radius: 2000,
            min_distance: 30.0,
            max_attempts,
            boundary_radius: 50.0,
        }
    }

    #[test]
    fn test_flat_world_yields_site() {
        let world = MemoryWorld::new();
        let locator = TerrainLocator::new(TerrainConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let site = locator.locate(&world, &request(50), &mut rng).unwrap();
        assert_eq!(site.center.y, 65.0);
        assert_eq!(site.spawn_a.y, 65.0);
        let separation = site.spawn_a.horizontal_distance(site.spawn_b.position());
        assert!(separation >= 24.0, "spawns only {} apart", separation);
        assert_eq!(site.chunks.len(), 81);
        assert!(locator.is_explored("world", site.center.chunk()));
    }

    #[test]
    fn test_spawns_face_each_other() {
        let a = Location::new("world", 0.0, 65.0, 0.0);
        let east = Location::new("world", 10.0, 65.0, 0.0);
        let south = Location::new("world", 0.0, 65.0, 10.0);
        assert_eq!(yaw_towards(&a, &south), 0.0);
        assert_eq!(yaw_towards(&a, &east), -90.0);
    }

    #[test]
    fn test_ocean_world_has_no_site() {
        let world = MemoryWorld::new();
        world.set_terrain("world", |_, _| Column {
            surface_y: 62,
            surface: "water".to_string(),
            filler: "sand".to_string(),
            biome: "ocean".to_string(),
        });
        let locator = TerrainLocator::new(TerrainConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let err = locator.locate(&world, &request(20), &mut rng).unwrap_err();
        assert_eq!(err, LocateError::NoUnexploredSite(20));
        assert_eq!(locator.explored_count(), 0);
    }

    #[test]
    fn test_banned_surface_rejects_spawns() {
        let world = MemoryWorld::new();
        // Safe only on a thin stripe along x = 0
        world.set_terrain("world", |x, _| {
            let mut column = Column::flat(64);
            if x != 0 {
                column.surface = "magma_block".to_string();
            }
            column
        });
        let locator = TerrainLocator::new(TerrainConfig::default());
        let mut req = request(30);
        req.search_radius = 0;
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        // The spawn chunk is loaded by nobody, so the center is found
        let err = locator.locate(&world, &req, &mut rng).unwrap_err();
        assert_eq!(err, LocateError::NoSafeSpawns(30));
    }

    #[test]
    fn test_sites_never_reuse_explored_chunks() {
        let world = MemoryWorld::new();
        let locator = TerrainLocator::new(TerrainConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        let first = locator.locate(&world, &request(50), &mut rng).unwrap();
        let second = locator.locate(&world, &request(50), &mut rng).unwrap();
        assert!(!first.chunks.contains(&second.center.chunk()));
    }

    #[test]
    fn test_loaded_chunks_are_skipped() {
        let world = MemoryWorld::new();
        world.load_chunk("world", ChunkPos::new(0, 0));
        let locator = TerrainLocator::new(TerrainConfig::default());
        let mut req = request(5);
        req.search_radius = 0;
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let err = locator.locate(&world, &req, &mut rng).unwrap_err();
        assert_eq!(err, LocateError::NoUnexploredSite(5));
    }

    #[test]
    fn test_unknown_world() {
        let world = MemoryWorld::new();
        let locator = TerrainLocator::new(TerrainConfig::default());
        let mut req = request(5);
        req.world = "nether".to_string();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        assert!(matches!(
            locator.locate(&world, &req, &mut rng),
            Err(LocateError::UnknownWorld(_))
        ));
    }
}
