//! Arena catalog: definitions, edit claims and the lobby location

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

use super::{ArenaDefinition, SpawnSlot};
use crate::store::{ArenaStore, StoreError};
use crate::world::{Location, ParticipantId};

const MAX_NAME_LEN: usize = 32;

/// Arena catalog errors
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("An arena named '{0}' already exists")]
    DuplicateName(String),

    #[error("Arena names must be 1-32 letters, digits, '_' or '-'")]
    InvalidName,

    #[error("No arena named '{0}'")]
    NotFound(String),

    #[error("Arena '{0}' is being edited by someone else")]
    ArenaClaimed(String),

    #[error("You are not editing an arena")]
    NotEditing,

    #[error("Could not save: {0}")]
    Store(#[from] StoreError),
}

/// All operator-built arenas plus the lobby.
///
/// Every mutation is written to the [`ArenaStore`] first and only applied
/// in memory once the write succeeds.
pub struct ArenaCatalog {
    arenas: RwLock<HashMap<String, ArenaDefinition>>,
    lobby: RwLock<Option<Location>>,
    /// editor -> arena key
    editing: DashMap<ParticipantId, String>,
    store: Arc<dyn ArenaStore>,
}

impl ArenaCatalog {
    /// Empty catalog; use [`ArenaCatalog::load`] at startup
    pub fn new(store: Arc<dyn ArenaStore>) -> Self {
        Self {
            arenas: RwLock::new(HashMap::new()),
            lobby: RwLock::new(None),
            editing: DashMap::new(),
            store,
        }
    }

    /// Load every arena and the lobby from the store
    pub async fn load(store: Arc<dyn ArenaStore>) -> Result<Self, StoreError> {
        let arenas = store.load_all().await?;
        let lobby = store.load_lobby().await?;

        info!(arenas = arenas.len(), lobby = lobby.is_some(), "Arena catalog loaded");

        let catalog = Self::new(store);
        {
            let mut map = catalog.arenas.write();
            for arena in arenas {
                map.insert(ArenaDefinition::key(&arena.name), arena);
            }
        }
        *catalog.lobby.write() = lobby;
        Ok(catalog)
    }

    fn validate_name(name: &str) -> Result<(), ArenaError> {
        let valid = !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(())
        } else {
            Err(ArenaError::InvalidName)
        }
    }

    pub async fn create(&self, name: &str) -> Result<ArenaDefinition, ArenaError> {
        Self::validate_name(name)?;
        let key = ArenaDefinition::key(name);
        if self.arenas.read().contains_key(&key) {
            return Err(ArenaError::DuplicateName(name.to_string()));
        }

        let arena = ArenaDefinition::new(name);
        self.store.save(arena.clone()).await?;

        {
            let mut arenas = self.arenas.write();
            if arenas.contains_key(&key) {
                return Err(ArenaError::DuplicateName(name.to_string()));
            }
            arenas.insert(key, arena.clone());
        }
        info!(arena = %arena.name, "Arena created");
        Ok(arena)
    }

    pub fn get(&self, name: &str) -> Option<ArenaDefinition> {
        self.arenas.read().get(&ArenaDefinition::key(name)).cloned()
    }

    /// Delete an arena; `false` if it did not exist
    pub async fn delete(&self, name: &str) -> Result<bool, ArenaError> {
        let key = ArenaDefinition::key(name);
        let Some(arena) = self.get(name) else {
            return Ok(false);
        };

        self.store.delete(arena.name.clone()).await?;
        if self.arenas.write().remove(&key).is_none() {
            return Ok(false);
        }
        self.editing.retain(|_, editing| *editing != key);
        info!(arena = %arena.name, "Arena deleted");
        Ok(true)
    }

    /// Set one spawn point, recomputing center and readiness
    pub async fn set_spawn(
        &self,
        name: &str,
        slot: SpawnSlot,
        location: Location,
    ) -> Result<ArenaDefinition, ArenaError> {
        let key = ArenaDefinition::key(name);
        let mut arena = self
            .get(name)
            .ok_or_else(|| ArenaError::NotFound(name.to_string()))?;
        arena.set_spawn(slot, location.clone());
        self.store.save(arena.clone()).await?;

        // Apply to the live entry; the other slot may have changed meanwhile
        let arena = {
            let mut arenas = self.arenas.write();
            let live = arenas
                .get_mut(&key)
                .ok_or_else(|| ArenaError::NotFound(name.to_string()))?;
            live.set_spawn(slot, location);
            live.clone()
        };
        info!(arena = %arena.name, ?slot, ready = arena.is_ready(), "Arena spawn set");
        Ok(arena)
    }

    /// All arenas sorted by name
    pub fn list(&self) -> Vec<ArenaDefinition> {
        let mut arenas: Vec<ArenaDefinition> = self.arenas.read().values().cloned().collect();
        arenas.sort_by(|a, b| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()));
        arenas
    }

    /// Uniform choice among ready arenas
    pub fn random_ready<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ArenaDefinition> {
        let ready: Vec<ArenaDefinition> = self
            .arenas
            .read()
            .values()
            .filter(|a| a.is_ready())
            .cloned()
            .collect();
        ready.choose(rng).cloned()
    }

    /// Claim an arena for editing. A claim on another arena is replaced.
    ///
    /// Returns the previously edited arena name, if any.
    pub fn begin_edit(
        &self,
        editor: ParticipantId,
        name: &str,
    ) -> Result<Option<String>, ArenaError> {
        let key = ArenaDefinition::key(name);
        let arena = self
            .get(name)
            .ok_or_else(|| ArenaError::NotFound(name.to_string()))?;

        let claimed_by_other = self
            .editing
            .iter()
            .any(|entry| *entry.key() != editor && *entry.value() == key);
        if claimed_by_other {
            return Err(ArenaError::ArenaClaimed(arena.name));
        }

        let previous = self.editing.insert(editor, key);
        info!(editor = %editor, arena = %arena.name, "Arena edit claimed");
        Ok(previous
            .filter(|prev| *prev != ArenaDefinition::key(&arena.name))
            .and_then(|prev| self.arenas.read().get(&prev).map(|a| a.name.clone())))
    }

    /// Name of the arena `editor` is currently editing
    pub fn editing(&self, editor: ParticipantId) -> Option<String> {
        let key = self.editing.get(&editor).map(|k| k.value().clone())?;
        self.arenas.read().get(&key).map(|a| a.name.clone())
    }

    /// Set a spawn on the arena `editor` has claimed
    pub async fn set_edit_spawn(
        &self,
        editor: ParticipantId,
        slot: SpawnSlot,
        location: Location,
    ) -> Result<ArenaDefinition, ArenaError> {
        let name = self.editing(editor).ok_or(ArenaError::NotEditing)?;
        self.set_spawn(&name, slot, location).await
    }

    /// Finish editing; saved spawns stay
    pub fn end_edit(&self, editor: ParticipantId) -> Result<String, ArenaError> {
        let name = self.editing(editor).ok_or(ArenaError::NotEditing)?;
        self.editing.remove(&editor);
        Ok(name)
    }

    /// Drop any claim held by a disconnecting participant
    pub fn release_editor(&self, editor: ParticipantId) {
        if self.editing.remove(&editor).is_some() {
            info!(editor = %editor, "Arena edit claim released on disconnect");
        }
    }

    pub fn lobby(&self) -> Option<Location> {
        self.lobby.read().clone()
    }

    pub async fn set_lobby(&self, location: Location) -> Result<(), ArenaError> {
        self.store.save_lobby(location.clone()).await?;
        *self.lobby.write() = Some(location);
        info!("Lobby location updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryArenaStore;
    use futures::future::BoxFuture;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    fn catalog() -> (ArenaCatalog, Arc<MemoryArenaStore>) {
        let store = Arc::new(MemoryArenaStore::new());
        (ArenaCatalog::new(store.clone()), store)
    }

    fn loc(x: f64) -> Location {
        Location::new("world", x, 64.0, 0.0)
    }

    /// Memory store whose writes can be switched to fail
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryArenaStore,
        down: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Corrupt("down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl ArenaStore for FlakyStore {
        fn load_all(&self) -> BoxFuture<'_, Result<Vec<ArenaDefinition>, StoreError>> {
            self.inner.load_all()
        }

        fn save(&self, arena: ArenaDefinition) -> BoxFuture<'_, Result<(), StoreError>> {
            match self.check() {
                Ok(()) => self.inner.save(arena),
                Err(e) => Box::pin(async move { Err(e) }),
            }
        }

        fn delete(&self, name: String) -> BoxFuture<'_, Result<(), StoreError>> {
            match self.check() {
                Ok(()) => self.inner.delete(name),
                Err(e) => Box::pin(async move { Err(e) }),
            }
        }

        fn load_lobby(&self) -> BoxFuture<'_, Result<Option<Location>, StoreError>> {
            self.inner.load_lobby()
        }

        fn save_lobby(&self, lobby: Location) -> BoxFuture<'_, Result<(), StoreError>> {
            match self.check() {
                Ok(()) => self.inner.save_lobby(lobby),
                Err(e) => Box::pin(async move { Err(e) }),
            }
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_names() {
        let (catalog, store) = catalog();
        catalog.create("Colosseum").await.unwrap();

        let err = catalog.create("colosseum").await.unwrap_err();
        assert!(matches!(err, ArenaError::DuplicateName(_)));
        assert!(matches!(
            catalog.create("bad name!").await,
            Err(ArenaError::InvalidName)
        ));
        assert_eq!(store.write_count(), 1);
        assert!(catalog.get("COLOSSEUM").is_some());
    }

    #[tokio::test]
    async fn test_spawns_persist_and_drive_readiness() {
        let (catalog, store) = catalog();
        catalog.create("Pit").await.unwrap();
        let arena = catalog.set_spawn("pit", SpawnSlot::A, loc(0.0)).await.unwrap();
        assert!(!arena.is_ready());
        assert!(!store.stored("pit").unwrap().is_ready());

        catalog.set_spawn("Pit", SpawnSlot::B, loc(30.0)).await.unwrap();
        let stored = store.stored("pit").unwrap();
        assert!(stored.is_ready());
        assert_eq!(stored.center.unwrap().x, 15.0);

        assert!(matches!(
            catalog.set_spawn("nowhere", SpawnSlot::A, loc(0.0)).await,
            Err(ArenaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_random_ready_skips_unready_arenas() {
        let (catalog, _) = catalog();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        catalog.create("colosseum").await.unwrap();
        catalog
            .set_spawn("colosseum", SpawnSlot::A, loc(0.0))
            .await
            .unwrap();
        for _ in 0..20 {
            assert!(catalog.random_ready(&mut rng).is_none());
        }

        catalog.create("ring").await.unwrap();
        catalog.set_spawn("ring", SpawnSlot::A, loc(0.0)).await.unwrap();
        catalog.set_spawn("ring", SpawnSlot::B, loc(20.0)).await.unwrap();
        for _ in 0..20 {
            assert_eq!(catalog.random_ready(&mut rng).unwrap().name, "ring");
        }
    }

    #[tokio::test]
    async fn test_delete_is_reported_once() {
        let (catalog, store) = catalog();
        catalog.create("ring").await.unwrap();
        assert!(catalog.delete("RING").await.unwrap());
        assert!(!catalog.delete("ring").await.unwrap());
        assert!(store.stored("ring").is_none());
        assert!(catalog.list().is_empty());
    }

    #[tokio::test]
    async fn test_edit_claims() {
        let (catalog, _) = catalog();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        catalog.create("north").await.unwrap();
        catalog.create("south").await.unwrap();

        assert!(matches!(
            catalog.set_edit_spawn(alice, SpawnSlot::A, loc(0.0)).await,
            Err(ArenaError::NotEditing)
        ));

        assert_eq!(catalog.begin_edit(alice, "north").unwrap(), None);
        assert!(matches!(
            catalog.begin_edit(bob, "North"),
            Err(ArenaError::ArenaClaimed(_))
        ));

        // Switching silently replaces the claim
        assert_eq!(
            catalog.begin_edit(alice, "south").unwrap(),
            Some("north".to_string())
        );
        assert_eq!(catalog.editing(alice).as_deref(), Some("south"));
        catalog.begin_edit(bob, "north").unwrap();

        catalog
            .set_edit_spawn(alice, SpawnSlot::A, loc(1.0))
            .await
            .unwrap();
        catalog.release_editor(alice);
        assert!(catalog.editing(alice).is_none());
        assert!(catalog.get("south").unwrap().spawn_a.is_some());
    }

    #[tokio::test]
    async fn test_load_restores_arenas_and_lobby() {
        let store = Arc::new(MemoryArenaStore::new());
        {
            let catalog = ArenaCatalog::new(store.clone());
            catalog.create("ring").await.unwrap();
            catalog.set_lobby(loc(100.0)).await.unwrap();
        }

        let catalog = ArenaCatalog::load(store).await.unwrap();
        assert!(catalog.get("ring").is_some());
        assert_eq!(catalog.lobby().unwrap().x, 100.0);
    }

    #[tokio::test]
    async fn test_failed_writes_leave_catalog_unchanged() {
        let store = Arc::new(FlakyStore::default());
        let catalog = ArenaCatalog::new(store.clone());
        catalog.create("pit").await.unwrap();
        catalog.set_spawn("pit", SpawnSlot::A, loc(0.0)).await.unwrap();
        catalog.set_lobby(loc(100.0)).await.unwrap();

        store.down.store(true, Ordering::SeqCst);

        assert!(matches!(catalog.create("ring").await, Err(ArenaError::Store(_))));
        assert!(catalog.get("ring").is_none());
        // A retry hits the store again instead of tripping over a phantom entry
        assert!(matches!(catalog.create("ring").await, Err(ArenaError::Store(_))));

        assert!(matches!(
            catalog.set_spawn("pit", SpawnSlot::B, loc(30.0)).await,
            Err(ArenaError::Store(_))
        ));
        let pit = catalog.get("pit").unwrap();
        assert!(pit.spawn_b.is_none());
        assert!(!pit.is_ready());

        assert!(matches!(catalog.set_lobby(loc(5.0)).await, Err(ArenaError::Store(_))));
        assert_eq!(catalog.lobby().unwrap().x, 100.0);

        let editor = Uuid::new_v4();
        catalog.begin_edit(editor, "pit").unwrap();
        assert!(matches!(catalog.delete("pit").await, Err(ArenaError::Store(_))));
        assert!(catalog.get("pit").is_some());
        assert_eq!(catalog.editing(editor).as_deref(), Some("pit"));

        store.down.store(false, Ordering::SeqCst);
        catalog.create("ring").await.unwrap();
        assert!(store.inner.stored("ring").is_some());
        assert!(catalog.delete("pit").await.unwrap());
        assert!(catalog.editing(editor).is_none());
    }
}
