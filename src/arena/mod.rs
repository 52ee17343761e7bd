//! Operator-built arenas

pub mod catalog;

use serde::{Deserialize, Serialize};

use crate::world::Location;

pub use catalog::{ArenaCatalog, ArenaError};

/// Which of the two spawn points to set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnSlot {
    A,
    B,
}

/// An arena: two spawn points and the center derived from them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaDefinition {
    /// Display name; identity is the lowercased name
    pub name: String,
    pub spawn_a: Option<Location>,
    pub spawn_b: Option<Location>,
    /// Midpoint of the spawns, `None` until both are set
    pub center: Option<Location>,
}

impl ArenaDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spawn_a: None,
            spawn_b: None,
            center: None,
        }
    }

    /// Catalog key for a name
    pub fn key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    /// Usable for duels iff both spawns are set
    pub fn is_ready(&self) -> bool {
        self.spawn_a.is_some() && self.spawn_b.is_some()
    }

    pub fn set_spawn(&mut self, slot: SpawnSlot, location: Location) {
        match slot {
            SpawnSlot::A => self.spawn_a = Some(location),
            SpawnSlot::B => self.spawn_b = Some(location),
        }
        self.recompute_center();
    }

    fn recompute_center(&mut self) {
        self.center = match (&self.spawn_a, &self.spawn_b) {
            (Some(a), Some(b)) => Some(a.midpoint(b)),
            _ => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_follows_spawns() {
        let mut arena = ArenaDefinition::new("Colosseum");
        assert!(!arena.is_ready());

        arena.set_spawn(SpawnSlot::A, Location::new("world", 0.0, 64.0, 0.0));
        assert!(!arena.is_ready());
        assert!(arena.center.is_none());

        arena.set_spawn(SpawnSlot::B, Location::new("world", 20.0, 66.0, -10.0));
        assert!(arena.is_ready());
        let center = arena.center.clone().unwrap();
        assert_eq!((center.x, center.y, center.z), (10.0, 65.0, -5.0));

        arena.set_spawn(SpawnSlot::B, Location::new("world", 40.0, 64.0, 0.0));
        assert_eq!(arena.center.unwrap().x, 20.0);
    }
}
