//! Application state shared across routes

use std::sync::Arc;

use tracing::info;

use crate::arena::ArenaCatalog;
use crate::config::Config;
use crate::game::{DuelServices, TerrainLocator};
use crate::matchmaking::MatchCoordinator;
use crate::store::{
    ArenaStore, MemoryArenaStore, MemoryStatsStore, StatsStore, StoreError, SupabaseArenaStore,
    SupabaseClient, SupabaseStatsStore,
};
use crate::util::Scheduler;
use crate::world::MemoryWorld;
use crate::ws::SessionHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Headless world driven by client position and death reports
    pub world: Arc<MemoryWorld>,
    pub hub: Arc<SessionHub>,
    pub catalog: Arc<ArenaCatalog>,
    pub coordinator: Arc<MatchCoordinator>,
}

impl AppState {
    /// Build the state, loading arenas and the lobby from the configured store
    pub async fn new(config: Config) -> Result<Self, StoreError> {
        let (arena_store, stats_store): (Arc<dyn ArenaStore>, Arc<dyn StatsStore>) =
            match &config.supabase {
                Some(supabase) => {
                    let client = SupabaseClient::new(supabase);
                    info!(url = %supabase.url, "Using Supabase persistence");
                    (
                        Arc::new(SupabaseArenaStore::new(client.clone())),
                        Arc::new(SupabaseStatsStore::new(client)),
                    )
                }
                None => {
                    info!("SUPABASE_URL not set, using in-memory persistence");
                    (
                        Arc::new(MemoryArenaStore::new()),
                        Arc::new(MemoryStatsStore::new()),
                    )
                }
            };

        let catalog = ArenaCatalog::load(arena_store).await?;
        info!(arenas = catalog.list().len(), lobby = catalog.lobby().is_some(), "Arena catalog loaded");

        Ok(Self::assemble(config, catalog, stats_store))
    }

    /// Wire the duel engine around an already loaded catalog
    pub fn assemble(config: Config, catalog: ArenaCatalog, stats: Arc<dyn StatsStore>) -> Self {
        let config = Arc::new(config);
        let world = Arc::new(MemoryWorld::new());
        let hub = Arc::new(SessionHub::new());
        let catalog = Arc::new(catalog);

        let services = DuelServices {
            world: world.clone(),
            messenger: hub.clone(),
            stats,
            scheduler: Scheduler::current(),
            config: Arc::new(config.duel.clone()),
        };
        let locator = TerrainLocator::new(config.duel.terrain.clone());
        let coordinator = MatchCoordinator::new(services, catalog.clone(), locator);

        Self {
            config,
            world,
            hub,
            catalog,
            coordinator,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::DuelConfig;

    /// In-memory state with default duel settings
    pub(crate) fn test_state(duel: DuelConfig) -> AppState {
        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "debug".to_string(),
            supabase: None,
            jwt_secret: "test-secret".to_string(),
            client_origin: "http://localhost:3000".to_string(),
            duel,
        };
        let catalog = ArenaCatalog::new(Arc::new(MemoryArenaStore::new()));
        AppState::assemble(config, catalog, Arc::new(MemoryStatsStore::new()))
    }

    #[tokio::test]
    async fn test_new_without_supabase_uses_memory_stores() {
        let base = test_state(DuelConfig::default());
        let state = AppState::new((*base.config).clone()).await.unwrap();
        assert!(state.catalog.list().is_empty());
        assert!(state.catalog.lobby().is_none());
        assert_eq!(state.coordinator.active_duels().len(), 0);
    }
}
