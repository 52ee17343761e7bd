//! Matchmaking queue implementation

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::world::ParticipantId;

/// Participant waiting for an opponent
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub participant: ParticipantId,
    pub queued_at: Instant,
}

impl QueueEntry {
    pub fn new(participant: ParticipantId) -> Self {
        Self {
            participant,
            queued_at: Instant::now(),
        }
    }

    /// How long this participant has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// FIFO queue, paired front to back
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queue: VecDeque<QueueEntry>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant at the back. Returns false if already queued.
    pub fn enqueue(&mut self, participant: ParticipantId) -> bool {
        if self.contains(participant) {
            return false;
        }
        self.queue.push_back(QueueEntry::new(participant));
        true
    }

    /// Remove a participant from the queue
    pub fn dequeue(&mut self, participant: ParticipantId) -> Option<QueueEntry> {
        let pos = self.queue.iter().position(|e| e.participant == participant)?;
        self.queue.remove(pos)
    }

    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.queue.iter().any(|e| e.participant == participant)
    }

    /// 1-based position, front of the queue is 1
    pub fn position(&self, participant: ParticipantId) -> Option<usize> {
        self.queue
            .iter()
            .position(|e| e.participant == participant)
            .map(|i| i + 1)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every entry `keep` rejects, returning what was dropped
    pub fn prune<F>(&mut self, mut keep: F) -> Vec<QueueEntry>
    where
        F: FnMut(ParticipantId) -> bool,
    {
        let mut dropped = Vec::new();
        self.queue.retain(|e| {
            let keep = keep(e.participant);
            if !keep {
                dropped.push(e.clone());
            }
            keep
        });
        dropped
    }

    /// Take the two longest-waiting entries
    pub fn pop_pair(&mut self) -> Option<(QueueEntry, QueueEntry)> {
        if self.queue.len() < 2 {
            return None;
        }
        let first = self.queue.pop_front()?;
        let second = self.queue.pop_front()?;
        Some((first, second))
    }

    /// Put an entry back at the front, keeping its original join time.
    /// Returns false if the participant is already queued.
    pub fn requeue_front(&mut self, entry: QueueEntry) -> bool {
        if self.contains(entry.participant) {
            return false;
        }
        self.queue.push_front(entry);
        true
    }

    /// Longest current wait
    pub fn oldest_wait(&self) -> Option<Duration> {
        self.queue.front().map(QueueEntry::wait_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_pairs_in_fifo_order() {
        let mut queue = MatchmakingQueue::new();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            assert!(queue.enqueue(*id));
        }
        assert!(!queue.enqueue(ids[0]));
        assert_eq!(queue.position(ids[3]), Some(4));

        let (a, b) = queue.pop_pair().unwrap();
        assert_eq!((a.participant, b.participant), (ids[0], ids[1]));
        let (c, d) = queue.pop_pair().unwrap();
        assert_eq!((c.participant, d.participant), (ids[2], ids[3]));
        assert!(queue.pop_pair().is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_prune_and_dequeue() {
        let mut queue = MatchmakingQueue::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        queue.enqueue(a);
        queue.enqueue(b);
        queue.enqueue(c);

        let dropped = queue.prune(|id| id != b);
        assert_eq!(dropped.len(), 1);
        assert_eq!(queue.position(c), Some(2));

        assert!(queue.dequeue(a).is_some());
        assert!(queue.dequeue(a).is_none());
        assert_eq!(queue.position(c), Some(1));
    }

    #[test]
    fn test_requeue_front_restores_order() {
        let mut queue = MatchmakingQueue::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        queue.enqueue(a);
        queue.enqueue(b);
        queue.enqueue(c);

        let (first, second) = queue.pop_pair().unwrap();
        let joined = first.queued_at;
        assert!(queue.requeue_front(second));
        assert!(queue.requeue_front(first));
        assert!(!queue.requeue_front(QueueEntry::new(c)));

        assert_eq!(queue.position(a), Some(1));
        assert_eq!(queue.position(b), Some(2));
        assert_eq!(queue.position(c), Some(3));
        assert_eq!(queue.dequeue(a).unwrap().queued_at, joined);
    }
}
