//! Pending duel challenges
//!
//! A participant has at most one outgoing challenge and at most one incoming
//! challenge at a time.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::util::TaskHandle;
use crate::world::ParticipantId;

#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub id: Uuid,
    pub challenger: ParticipantId,
    pub challenger_name: String,
    pub target: ParticipantId,
    pub target_name: String,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    expiry: Option<TaskHandle>,
}

impl MatchRequest {
    pub fn new(
        challenger: ParticipantId,
        challenger_name: String,
        target: ParticipantId,
        target_name: String,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            challenger,
            challenger_name,
            target,
            target_name,
            created_at: Utc::now(),
            ttl,
            expiry: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        (now - self.created_at)
            .to_std()
            .map(|age| age >= self.ttl)
            .unwrap_or(false)
    }

    pub fn set_expiry(&mut self, task: TaskHandle) {
        self.expiry = Some(task);
    }

    /// Stop the expiry timer, the request was answered
    pub fn settle(&self) {
        if let Some(task) = &self.expiry {
            task.cancel();
        }
    }

    pub fn involves(&self, participant: ParticipantId) -> bool {
        self.challenger == participant || self.target == participant
    }
}

/// Pending challenges keyed by challenger
#[derive(Debug, Default)]
pub struct RequestTable {
    by_challenger: HashMap<ParticipantId, MatchRequest>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outgoing(&self, challenger: ParticipantId) -> Option<&MatchRequest> {
        self.by_challenger.get(&challenger)
    }

    pub fn incoming(&self, target: ParticipantId) -> Option<&MatchRequest> {
        self.by_challenger.values().find(|r| r.target == target)
    }

    /// Callers check both sides are free first
    pub fn insert(&mut self, request: MatchRequest) {
        self.by_challenger.insert(request.challenger, request);
    }

    pub fn remove(&mut self, challenger: ParticipantId) -> Option<MatchRequest> {
        self.by_challenger.remove(&challenger)
    }

    /// Remove a challenge only if it is still the one with `id`
    pub fn remove_if_current(&mut self, challenger: ParticipantId, id: Uuid) -> Option<MatchRequest> {
        match self.by_challenger.get(&challenger) {
            Some(r) if r.id == id => self.by_challenger.remove(&challenger),
            _ => None,
        }
    }

    /// Remove the challenge addressed to `target` from the challenger named
    /// `challenger_name` (case-insensitive)
    pub fn take_incoming(&mut self, target: ParticipantId, challenger_name: &str) -> Option<MatchRequest> {
        let challenger = self
            .by_challenger
            .values()
            .find(|r| r.target == target && r.challenger_name.eq_ignore_ascii_case(challenger_name))
            .map(|r| r.challenger)?;
        self.by_challenger.remove(&challenger)
    }

    /// Remove every challenge involving `participant`
    pub fn purge(&mut self, participant: ParticipantId) -> Vec<MatchRequest> {
        let doomed: Vec<ParticipantId> = self
            .by_challenger
            .values()
            .filter(|r| r.involves(participant))
            .map(|r| r.challenger)
            .collect();
        doomed
            .into_iter()
            .filter_map(|c| self.by_challenger.remove(&c))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_challenger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_challenger.is_empty()
    }
}
