//! Persistence for arenas, the lobby and duel statistics

pub mod arenas;
pub mod stats;
pub mod supabase;

pub use arenas::{ArenaStore, MemoryArenaStore, SupabaseArenaStore};
pub use stats::{DuelStats, MemoryStatsStore, StatsStore, SupabaseStatsStore};
pub use supabase::{SupabaseClient, SupabaseError};

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Supabase error: {0}")]
    Supabase(#[from] SupabaseError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}
