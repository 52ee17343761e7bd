//! Arena and lobby persistence

use std::collections::HashMap;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::supabase::SupabaseClient;
use super::StoreError;
use crate::arena::{ArenaDefinition, SpawnSlot};
use crate::world::Location;

const ARENA_TABLE: &str = "duel_arenas";
const SETTINGS_TABLE: &str = "duel_settings";
const LOBBY_KEY: &str = "lobby";

/// Durable storage for arena definitions and the lobby location
pub trait ArenaStore: Send + Sync {
    fn load_all(&self) -> BoxFuture<'_, Result<Vec<ArenaDefinition>, StoreError>>;

    fn save(&self, arena: ArenaDefinition) -> BoxFuture<'_, Result<(), StoreError>>;

    fn delete(&self, name: String) -> BoxFuture<'_, Result<(), StoreError>>;

    fn load_lobby(&self) -> BoxFuture<'_, Result<Option<Location>, StoreError>>;

    fn save_lobby(&self, lobby: Location) -> BoxFuture<'_, Result<(), StoreError>>;
}

/// Row in the `duel_arenas` table
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArenaRow {
    /// Lowercased name, primary key
    key: String,
    name: String,
    spawn_a: Option<Location>,
    spawn_b: Option<Location>,
}

impl From<&ArenaDefinition> for ArenaRow {
    fn from(arena: &ArenaDefinition) -> Self {
        Self {
            key: ArenaDefinition::key(&arena.name),
            name: arena.name.clone(),
            spawn_a: arena.spawn_a.clone(),
            spawn_b: arena.spawn_b.clone(),
        }
    }
}

impl From<ArenaRow> for ArenaDefinition {
    fn from(row: ArenaRow) -> Self {
        let mut arena = ArenaDefinition::new(row.name);
        if let Some(a) = row.spawn_a {
            arena.set_spawn(SpawnSlot::A, a);
        }
        if let Some(b) = row.spawn_b {
            arena.set_spawn(SpawnSlot::B, b);
        }
        arena
    }
}

/// Row in the `duel_settings` key/value table
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingRow {
    key: String,
    value: serde_json::Value,
}

/// Arena store backed by Supabase tables
#[derive(Clone)]
pub struct SupabaseArenaStore {
    client: SupabaseClient,
}

impl SupabaseArenaStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

impl ArenaStore for SupabaseArenaStore {
    fn load_all(&self) -> BoxFuture<'_, Result<Vec<ArenaDefinition>, StoreError>> {
        Box::pin(async move {
            let rows: Vec<ArenaRow> = self.client.get(ARENA_TABLE, "select=*").await?;
            Ok(rows.into_iter().map(ArenaDefinition::from).collect())
        })
    }

    fn save(&self, arena: ArenaDefinition) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let row = ArenaRow::from(&arena);
            self.client.upsert(ARENA_TABLE, &row, "key").await?;
            Ok(())
        })
    }

    fn delete(&self, name: String) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let query = format!("key=eq.{}", ArenaDefinition::key(&name));
            self.client.delete(ARENA_TABLE, &query).await?;
            Ok(())
        })
    }

    fn load_lobby(&self) -> BoxFuture<'_, Result<Option<Location>, StoreError>> {
        Box::pin(async move {
            let query = format!("key=eq.{}", LOBBY_KEY);
            let row: Option<SettingRow> = self.client.get_one(SETTINGS_TABLE, &query).await?;
            match row {
                Some(row) => serde_json::from_value(row.value)
                    .map(Some)
                    .map_err(|e| StoreError::Corrupt(format!("lobby: {}", e))),
                None => Ok(None),
            }
        })
    }

    fn save_lobby(&self, lobby: Location) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let value = serde_json::to_value(&lobby)
                .map_err(|e| StoreError::Corrupt(format!("lobby: {}", e)))?;
            let row = SettingRow {
                key: LOBBY_KEY.to_string(),
                value,
            };
            self.client.upsert(SETTINGS_TABLE, &row, "key").await?;
            Ok(())
        })
    }
}

/// Arena store kept in memory (tests, or running without a database)
#[derive(Default)]
pub struct MemoryArenaStore {
    arenas: Mutex<HashMap<String, ArenaDefinition>>,
    lobby: Mutex<Option<Location>>,
    writes: Mutex<usize>,
}

impl MemoryArenaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutations
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }

    pub fn stored(&self, name: &str) -> Option<ArenaDefinition> {
        self.arenas.lock().get(&ArenaDefinition::key(name)).cloned()
    }
}

impl ArenaStore for MemoryArenaStore {
    fn load_all(&self) -> BoxFuture<'_, Result<Vec<ArenaDefinition>, StoreError>> {
        let arenas = self.arenas.lock().values().cloned().collect();
        Box::pin(async move { Ok(arenas) })
    }

    fn save(&self, arena: ArenaDefinition) -> BoxFuture<'_, Result<(), StoreError>> {
        self.arenas
            .lock()
            .insert(ArenaDefinition::key(&arena.name), arena);
        *self.writes.lock() += 1;
        Box::pin(async { Ok(()) })
    }

    fn delete(&self, name: String) -> BoxFuture<'_, Result<(), StoreError>> {
        self.arenas.lock().remove(&ArenaDefinition::key(&name));
        *self.writes.lock() += 1;
        Box::pin(async { Ok(()) })
    }

    fn load_lobby(&self) -> BoxFuture<'_, Result<Option<Location>, StoreError>> {
        let lobby = self.lobby.lock().clone();
        Box::pin(async move { Ok(lobby) })
    }

    fn save_lobby(&self, lobby: Location) -> BoxFuture<'_, Result<(), StoreError>> {
        *self.lobby.lock() = Some(lobby);
        *self.writes.lock() += 1;
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_round_trip_recomputes_center() {
        let mut arena = ArenaDefinition::new("Pit");
        arena.set_spawn(SpawnSlot::A, Location::new("world", 0.0, 70.0, 0.0));
        arena.set_spawn(SpawnSlot::B, Location::new("world", 10.0, 70.0, 0.0));

        let row = ArenaRow::from(&arena);
        assert_eq!(row.key, "pit");

        let json = serde_json::to_value(&row).unwrap();
        let back: ArenaRow = serde_json::from_value(json).unwrap();
        let restored = ArenaDefinition::from(back);
        assert_eq!(restored, arena);
        assert_eq!(restored.center.unwrap().x, 5.0);
    }
}
