//! Duel engine settings

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{env_list, env_or, ConfigError};

/// What happens to the loser's items when a duel is decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LootMode {
    /// Items drop where the loser died and stay there
    DropOnDeath,
    /// The loser gets their pre-duel inventory back
    KeepInventory,
    /// Items drop and the winner gets a window to collect them
    LootPhase,
}

impl FromStr for LootMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" | "drop_on_death" => Ok(Self::DropOnDeath),
            "keep" | "keep_inventory" => Ok(Self::KeepInventory),
            "loot" | "loot_phase" => Ok(Self::LootPhase),
            _ => Err(()),
        }
    }
}

/// Shrinking boundary settings
#[derive(Debug, Clone)]
pub struct BoundaryConfig {
    pub start_radius: f64,
    pub end_radius: f64,
    pub shrink_duration: Duration,
    /// Horizontal speed of the inward push
    pub knockback_strength: f64,
    /// Damage per physics tick while outside
    pub damage: f64,
    /// Width of the warning band inside the edge
    pub warning_distance: f64,
    /// Particles are only sent to participants this close to a sample point
    pub render_distance: f64,
    pub particle_period_ticks: u64,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            start_radius: 50.0,
            end_radius: 10.0,
            shrink_duration: Duration::from_secs(120),
            knockback_strength: 1.2,
            damage: 2.0,
            warning_distance: 5.0,
            render_distance: 48.0,
            particle_period_ticks: 10,
        }
    }
}

/// Natural site search settings
#[derive(Debug, Clone)]
pub struct TerrainConfig {
    /// World natural duels take place in
    pub world: String,
    pub search_radius: i32,
    pub min_participant_distance: f64,
    pub max_attempts: u32,
    /// Lowercase biome names that disqualify a column
    pub banned_biomes: Vec<String>,
    /// Lowercase block names that must not be stood on
    pub banned_blocks: Vec<String>,
}

impl TerrainConfig {
    pub fn is_banned_biome(&self, biome: &str) -> bool {
        let biome = biome.to_ascii_lowercase();
        self.banned_biomes.iter().any(|b| *b == biome)
    }

    pub fn is_banned_block(&self, block: &str) -> bool {
        let block = block.to_ascii_lowercase();
        self.banned_blocks.iter().any(|b| *b == block)
    }
}

const DEFAULT_BANNED_BIOMES: &[&str] = &[
    "ocean",
    "deep_ocean",
    "warm_ocean",
    "lukewarm_ocean",
    "cold_ocean",
    "frozen_ocean",
    "river",
    "frozen_river",
    "mushroom_fields",
];

const DEFAULT_BANNED_BLOCKS: &[&str] = &[
    "water",
    "lava",
    "magma_block",
    "cactus",
    "fire",
    "campfire",
    "powder_snow",
    "sweet_berry_bush",
    "ice",
];

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            world: "world".to_string(),
            search_radius: 5000,
            min_participant_distance: 30.0,
            max_attempts: 50,
            banned_biomes: DEFAULT_BANNED_BIOMES.iter().map(|s| s.to_string()).collect(),
            banned_blocks: DEFAULT_BANNED_BLOCKS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Duel lifecycle and matchmaking settings
#[derive(Debug, Clone)]
pub struct DuelConfig {
    pub request_ttl: Duration,
    pub countdown_secs: u32,
    /// Delay between the fight starting and the boundary shrinking
    pub shrink_grace: Duration,
    pub loot_mode: LootMode,
    pub loot_phase_secs: u32,
    /// 0 restores participants immediately after a duel
    pub return_delay_secs: u32,
    pub cleanup_delay_ticks: u64,
    pub remove_placed_blocks: bool,
    pub remove_dropped_items: bool,
    /// Prefer operator-built arenas over natural sites
    pub use_arenas: bool,
    pub queue_check_interval: Duration,
    pub boundary: BoundaryConfig,
    pub terrain: TerrainConfig,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            request_ttl: Duration::from_secs(60),
            countdown_secs: 5,
            shrink_grace: Duration::from_secs(10),
            loot_mode: LootMode::KeepInventory,
            loot_phase_secs: 30,
            return_delay_secs: 0,
            cleanup_delay_ticks: 40,
            remove_placed_blocks: true,
            remove_dropped_items: true,
            use_arenas: true,
            queue_check_interval: Duration::from_secs(5),
            boundary: BoundaryConfig::default(),
            terrain: TerrainConfig::default(),
        }
    }
}

impl DuelConfig {
    /// Load duel settings, every key optional
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let b = BoundaryConfig::default();
        let t = TerrainConfig::default();

        let loot_mode = match std::env::var("DUEL_LOOT_MODE") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("DUEL_LOOT_MODE"))?,
            Err(_) => d.loot_mode,
        };

        let boundary = BoundaryConfig {
            start_radius: env_or("BOUNDARY_START_RADIUS", b.start_radius)?,
            end_radius: env_or("BOUNDARY_END_RADIUS", b.end_radius)?,
            shrink_duration: Duration::from_secs(env_or(
                "BOUNDARY_SHRINK_SECS",
                b.shrink_duration.as_secs(),
            )?),
            knockback_strength: env_or("BOUNDARY_KNOCKBACK", b.knockback_strength)?,
            damage: env_or("BOUNDARY_DAMAGE", b.damage)?,
            warning_distance: env_or("BOUNDARY_WARNING_DISTANCE", b.warning_distance)?,
            render_distance: env_or("BOUNDARY_RENDER_DISTANCE", b.render_distance)?,
            particle_period_ticks: env_or("BOUNDARY_PARTICLE_TICKS", b.particle_period_ticks)?,
        };
        if boundary.end_radius > boundary.start_radius || boundary.end_radius < 0.0 {
            return Err(ConfigError::Invalid("BOUNDARY_END_RADIUS"));
        }

        let terrain = TerrainConfig {
            world: std::env::var("TERRAIN_WORLD").unwrap_or(t.world),
            search_radius: env_or("TERRAIN_SEARCH_RADIUS", t.search_radius)?,
            min_participant_distance: env_or("TERRAIN_MIN_DISTANCE", t.min_participant_distance)?,
            max_attempts: env_or("TERRAIN_MAX_ATTEMPTS", t.max_attempts)?,
            banned_biomes: env_list("TERRAIN_BANNED_BIOMES", DEFAULT_BANNED_BIOMES),
            banned_blocks: env_list("TERRAIN_BANNED_BLOCKS", DEFAULT_BANNED_BLOCKS),
        };

        Ok(Self {
            request_ttl: Duration::from_secs(env_or("DUEL_REQUEST_TTL_SECS", d.request_ttl.as_secs())?),
            countdown_secs: env_or("DUEL_COUNTDOWN_SECS", d.countdown_secs)?,
            shrink_grace: Duration::from_secs(env_or("DUEL_SHRINK_GRACE_SECS", d.shrink_grace.as_secs())?),
            loot_mode,
            loot_phase_secs: env_or("DUEL_LOOT_PHASE_SECS", d.loot_phase_secs)?,
            return_delay_secs: env_or("DUEL_RETURN_DELAY_SECS", d.return_delay_secs)?,
            cleanup_delay_ticks: env_or("DUEL_CLEANUP_DELAY_TICKS", d.cleanup_delay_ticks)?,
            remove_placed_blocks: env_or("DUEL_REMOVE_PLACED_BLOCKS", d.remove_placed_blocks)?,
            remove_dropped_items: env_or("DUEL_REMOVE_DROPPED_ITEMS", d.remove_dropped_items)?,
            use_arenas: env_or("DUEL_USE_ARENAS", d.use_arenas)?,
            queue_check_interval: Duration::from_secs(env_or(
                "QUEUE_CHECK_SECS",
                d.queue_check_interval.as_secs(),
            )?),
            boundary,
            terrain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loot_mode_aliases() {
        assert_eq!("keep".parse::<LootMode>(), Ok(LootMode::KeepInventory));
        assert_eq!("LOOT_PHASE".parse::<LootMode>(), Ok(LootMode::LootPhase));
        assert_eq!("drop_on_death".parse::<LootMode>(), Ok(LootMode::DropOnDeath));
        assert!("sometimes".parse::<LootMode>().is_err());
    }

    #[test]
    fn test_banned_lists_are_case_insensitive() {
        let terrain = TerrainConfig::default();
        assert!(terrain.is_banned_biome("Deep_Ocean"));
        assert!(terrain.is_banned_block("LAVA"));
        assert!(!terrain.is_banned_block("grass_block"));
    }

    #[test]
    fn test_defaults_are_consistent() {
        let config = DuelConfig::default();
        assert!(config.boundary.end_radius < config.boundary.start_radius);
        assert_eq!(config.countdown_secs, 5);
        assert_eq!(config.return_delay_secs, 0);
    }
}
