//! Index of running duels
//!
//! Lock-free lookups by duel id and by participant. Values are cloned out
//! before anything is called on them so no shard lock is held across a call
//! into a duel.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use super::DuelMatch;
use crate::world::ParticipantId;
use crate::ws::protocol::DuelSummary;

#[derive(Clone, Default)]
pub struct MatchRegistry {
    matches: Arc<DashMap<Uuid, Arc<DuelMatch>>>,
    by_participant: Arc<DashMap<ParticipantId, Uuid>>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, duel: Arc<DuelMatch>) {
        for participant in duel.participants() {
            self.by_participant.insert(participant, duel.id());
        }
        self.matches.insert(duel.id(), duel);
    }

    /// Remove a duel and the participant entries that still point at it
    pub fn remove(&self, id: Uuid) -> Option<Arc<DuelMatch>> {
        let (_, duel) = self.matches.remove(&id)?;
        for participant in duel.participants() {
            self.by_participant.remove_if(&participant, |_, current| *current == id);
        }
        Some(duel)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<DuelMatch>> {
        self.matches.get(&id).map(|entry| entry.value().clone())
    }

    pub fn by_participant(&self, participant: ParticipantId) -> Option<Arc<DuelMatch>> {
        let id = *self.by_participant.get(&participant)?;
        self.get(id)
    }

    pub fn contains_participant(&self, participant: ParticipantId) -> bool {
        self.by_participant.contains_key(&participant)
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn summaries(&self) -> Vec<DuelSummary> {
        let duels: Vec<Arc<DuelMatch>> = self.matches.iter().map(|e| e.value().clone()).collect();
        duels.iter().map(|d| d.summary()).collect()
    }
}
