//! Per-participant duel statistics

use std::collections::HashMap;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::supabase::SupabaseClient;
use super::StoreError;

const STATS_TABLE: &str = "duel_stats";

/// Win/loss counters for one participant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuelStats {
    pub participant_id: Uuid,
    pub wins: u32,
    pub losses: u32,
    /// Current win streak
    pub streak: u32,
    pub best_streak: u32,
}

impl DuelStats {
    pub fn new(participant_id: Uuid) -> Self {
        Self {
            participant_id,
            ..Default::default()
        }
    }

    pub fn record_win(&mut self) {
        self.wins += 1;
        self.streak += 1;
        self.best_streak = self.best_streak.max(self.streak);
    }

    /// A loss resets the streak; the best streak is kept
    pub fn record_loss(&mut self) {
        self.losses += 1;
        self.streak = 0;
    }
}

/// Durable storage for duel statistics
pub trait StatsStore: Send + Sync {
    fn get(&self, participant: Uuid) -> BoxFuture<'_, Result<DuelStats, StoreError>>;

    fn record_win(&self, participant: Uuid) -> BoxFuture<'_, Result<DuelStats, StoreError>>;

    fn record_loss(&self, participant: Uuid) -> BoxFuture<'_, Result<DuelStats, StoreError>>;
}

/// Stats store backed by the Supabase `duel_stats` table
#[derive(Clone)]
pub struct SupabaseStatsStore {
    client: SupabaseClient,
}

impl SupabaseStatsStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    async fn fetch(&self, participant: Uuid) -> Result<DuelStats, StoreError> {
        let query = format!("participant_id=eq.{}", participant);
        let row: Option<DuelStats> = self.client.get_one(STATS_TABLE, &query).await?;
        Ok(row.unwrap_or_else(|| DuelStats::new(participant)))
    }

    async fn update<F>(&self, participant: Uuid, apply: F) -> Result<DuelStats, StoreError>
    where
        F: FnOnce(&mut DuelStats) + Send,
    {
        let mut stats = self.fetch(participant).await?;
        apply(&mut stats);
        self.client
            .upsert(STATS_TABLE, &stats, "participant_id")
            .await?;
        Ok(stats)
    }
}

impl StatsStore for SupabaseStatsStore {
    fn get(&self, participant: Uuid) -> BoxFuture<'_, Result<DuelStats, StoreError>> {
        Box::pin(self.fetch(participant))
    }

    fn record_win(&self, participant: Uuid) -> BoxFuture<'_, Result<DuelStats, StoreError>> {
        Box::pin(self.update(participant, DuelStats::record_win))
    }

    fn record_loss(&self, participant: Uuid) -> BoxFuture<'_, Result<DuelStats, StoreError>> {
        Box::pin(self.update(participant, DuelStats::record_loss))
    }
}

/// Stats kept in memory (tests, or running without a database)
#[derive(Default)]
pub struct MemoryStatsStore {
    stats: Mutex<HashMap<Uuid, DuelStats>>,
}

impl MemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, participant: Uuid) -> DuelStats {
        self.stats
            .lock()
            .get(&participant)
            .cloned()
            .unwrap_or_else(|| DuelStats::new(participant))
    }

    fn apply(&self, participant: Uuid, f: impl FnOnce(&mut DuelStats)) -> DuelStats {
        let mut stats = self.stats.lock();
        let entry = stats
            .entry(participant)
            .or_insert_with(|| DuelStats::new(participant));
        f(entry);
        entry.clone()
    }
}

impl StatsStore for MemoryStatsStore {
    fn get(&self, participant: Uuid) -> BoxFuture<'_, Result<DuelStats, StoreError>> {
        let stats = self.snapshot(participant);
        Box::pin(async move { Ok(stats) })
    }

    fn record_win(&self, participant: Uuid) -> BoxFuture<'_, Result<DuelStats, StoreError>> {
        let stats = self.apply(participant, DuelStats::record_win);
        Box::pin(async move { Ok(stats) })
    }

    fn record_loss(&self, participant: Uuid) -> BoxFuture<'_, Result<DuelStats, StoreError>> {
        let stats = self.apply(participant, DuelStats::record_loss);
        Box::pin(async move { Ok(stats) })
    }
}
