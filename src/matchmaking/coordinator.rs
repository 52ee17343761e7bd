//! Duel coordinator - challenges, queue and duel construction
//!
//! Owns the pending challenges, the matchmaking queue and the index of
//! running duels. A pair of participants is reserved synchronously the
//! moment a duel is decided on, so nothing else can pull either of them into
//! a second duel while the site is being found.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use super::queue::MatchmakingQueue;
use super::requests::{MatchRequest, RequestTable};
use super::DuelError;
use crate::arena::{ArenaCatalog, ArenaDefinition};
use crate::game::{
    DuelMatch, DuelPhase, DuelServices, DuelSetup, LocateRequest, MatchRegistry, NaturalSite,
    TerrainLocator,
};
use crate::store::{DuelStats, StoreError};
use crate::util::time::duration_ticks;
use crate::world::{BlockPos, EntityId, ParticipantId};
use crate::ws::protocol::{DuelSummary, ServerMsg};

/// Where a duel will be fought
enum DuelSite {
    Arena(ArenaDefinition),
    Natural(NaturalSite),
}

pub struct MatchCoordinator {
    services: DuelServices,
    catalog: Arc<ArenaCatalog>,
    locator: Arc<TerrainLocator>,
    registry: MatchRegistry,
    requests: Mutex<RequestTable>,
    queue: tokio::sync::Mutex<MatchmakingQueue>,
    /// Participants whose duel is being constructed
    reserved: Mutex<HashSet<ParticipantId>>,
    rng: Mutex<ChaCha8Rng>,
}

impl MatchCoordinator {
    pub fn new(
        services: DuelServices,
        catalog: Arc<ArenaCatalog>,
        locator: Arc<TerrainLocator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            services,
            catalog,
            locator,
            registry: MatchRegistry::new(),
            requests: Mutex::new(RequestTable::new()),
            queue: tokio::sync::Mutex::new(MatchmakingQueue::new()),
            reserved: Mutex::new(HashSet::new()),
            rng: Mutex::new(ChaCha8Rng::from_entropy()),
        })
    }

    pub fn catalog(&self) -> &Arc<ArenaCatalog> {
        &self.catalog
    }

    fn notify(&self, participant: ParticipantId, msg: ServerMsg) {
        self.services.messenger.send(participant, msg);
    }

    fn display_name(&self, participant: ParticipantId) -> String {
        self.services
            .world
            .display_name(participant)
            .unwrap_or_else(|| participant.to_string())
    }

    /// In a running duel or in one being constructed
    pub fn is_busy(&self, participant: ParticipantId) -> bool {
        self.reserved.lock().contains(&participant) || self.registry.contains_participant(participant)
    }

    pub fn active_duel(&self, participant: ParticipantId) -> Option<Arc<DuelMatch>> {
        self.registry.by_participant(participant)
    }

    pub fn active_duels(&self) -> Vec<DuelSummary> {
        self.registry.summaries()
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.lock().len()
    }

    pub async fn stats(&self, participant: ParticipantId) -> Result<DuelStats, StoreError> {
        self.services.stats.get(participant).await
    }

    // ---- Challenges ----

    /// Challenge an online participant by display name
    pub fn send_request(self: &Arc<Self>, challenger: ParticipantId, target_name: &str) -> Result<(), DuelError> {
        let world = &self.services.world;
        let target = world
            .find_online(target_name)
            .ok_or_else(|| DuelError::UnknownTarget(target_name.to_string()))?;
        if target == challenger {
            return Err(DuelError::SelfChallenge);
        }
        if self.is_busy(challenger) {
            return Err(DuelError::AlreadyInDuel);
        }
        let target_name = self.display_name(target);
        if self.is_busy(target) {
            return Err(DuelError::TargetInDuel(target_name));
        }
        let challenger_name = self.display_name(challenger);
        let ttl = self.services.config.request_ttl;

        {
            let mut requests = self.requests.lock();
            if requests.outgoing(challenger).is_some() {
                return Err(DuelError::RequestAlreadyPending);
            }
            if requests.incoming(target).is_some() {
                return Err(DuelError::TargetHasPendingRequest(target_name));
            }

            let mut request = MatchRequest::new(
                challenger,
                challenger_name.clone(),
                target,
                target_name.clone(),
                ttl,
            );
            let weak = Arc::downgrade(self);
            let request_id = request.id;
            request.set_expiry(self.services.scheduler.run_later(duration_ticks(ttl), move || {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.expire_request(challenger, request_id);
                }
            }));
            requests.insert(request);
        }

        self.notify(
            challenger,
            ServerMsg::ChallengeSent {
                to: target_name.clone(),
            },
        );
        self.notify(
            target,
            ServerMsg::ChallengeReceived {
                from: challenger_name.clone(),
                expires_in_secs: ttl.as_secs(),
            },
        );
        info!(challenger = %challenger_name, target = %target_name, "Duel challenge sent");
        Ok(())
    }

    fn expire_request(&self, challenger: ParticipantId, request_id: uuid::Uuid) {
        let Some(request) = self.requests.lock().remove_if_current(challenger, request_id) else {
            return;
        };
        self.notify(
            request.challenger,
            ServerMsg::ChallengeExpired {
                other: request.target_name.clone(),
            },
        );
        self.notify(
            request.target,
            ServerMsg::ChallengeExpired {
                other: request.challenger_name.clone(),
            },
        );
        debug!(challenger = %request.challenger_name, target = %request.target_name, "Duel challenge expired");
    }

    /// Accept the challenge `challenger_name` sent us and start the duel
    pub fn accept_request(self: &Arc<Self>, accepter: ParticipantId, challenger_name: &str) -> Result<(), DuelError> {
        let request = self
            .requests
            .lock()
            .take_incoming(accepter, challenger_name)
            .ok_or_else(|| DuelError::NoPendingRequest(challenger_name.to_string()))?;
        request.settle();

        if request.is_expired_at(chrono::Utc::now()) {
            return Err(DuelError::RequestExpired(request.challenger_name));
        }
        if !self.services.world.is_online(request.challenger) {
            return Err(DuelError::ChallengerUnavailable(request.challenger_name));
        }

        self.launch_duel(request.challenger, accepter)?;
        self.notify(
            request.challenger,
            ServerMsg::Notice {
                text: format!("{} accepted your challenge", request.target_name),
            },
        );
        Ok(())
    }

    pub fn deny_request(&self, target: ParticipantId, challenger_name: &str) -> Result<(), DuelError> {
        let request = self
            .requests
            .lock()
            .take_incoming(target, challenger_name)
            .ok_or_else(|| DuelError::NoPendingRequest(challenger_name.to_string()))?;
        request.settle();

        self.notify(
            request.challenger,
            ServerMsg::ChallengeDenied {
                by: request.target_name.clone(),
            },
        );
        self.notify(
            target,
            ServerMsg::Notice {
                text: format!("You denied the challenge from {}", request.challenger_name),
            },
        );
        Ok(())
    }

    /// Withdraw our outgoing challenge
    pub fn cancel_request(&self, challenger: ParticipantId) -> Result<(), DuelError> {
        let request = self
            .requests
            .lock()
            .remove(challenger)
            .ok_or(DuelError::NoOutgoingRequest)?;
        request.settle();

        self.notify(
            request.target,
            ServerMsg::ChallengeCancelled {
                by: request.challenger_name.clone(),
            },
        );
        Ok(())
    }

    // ---- Queue ----

    /// Join the queue and pair immediately if someone is waiting.
    /// Returns our position at the time of joining.
    pub async fn join_queue(self: &Arc<Self>, participant: ParticipantId) -> Result<usize, DuelError> {
        if self.is_busy(participant) {
            return Err(DuelError::AlreadyInDuel);
        }
        let (position, size) = {
            let mut queue = self.queue.lock().await;
            if !queue.enqueue(participant) {
                return Err(DuelError::AlreadyQueued);
            }
            (queue.position(participant).unwrap_or(queue.len()), queue.len())
        };

        self.notify(participant, ServerMsg::QueueJoined { position, size });
        info!(participant = %participant, queue_size = size, "Participant joined duel queue");
        self.check_queue().await;
        Ok(position)
    }

    pub async fn leave_queue(&self, participant: ParticipantId) -> Result<(), DuelError> {
        self.queue
            .lock()
            .await
            .dequeue(participant)
            .ok_or(DuelError::NotQueued)?;
        self.notify(participant, ServerMsg::QueueLeft);
        Ok(())
    }

    pub async fn queue_position(&self, participant: ParticipantId) -> Option<usize> {
        self.queue.lock().await.position(participant)
    }

    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Drop stale entries, then pair from the front.
    /// Returns the number of duels started.
    pub async fn check_queue(self: &Arc<Self>) -> usize {
        let mut queue = self.queue.lock().await;
        let world = &self.services.world;
        let dropped = queue.prune(|p| world.is_online(p) && !self.is_busy(p));
        if !dropped.is_empty() {
            debug!(dropped = dropped.len(), "Pruned stale queue entries");
        }

        self.pair_queued(&mut queue)
    }

    /// Start a duel for every front pair. When one side was reserved by a
    /// challenge in the meantime, the other keeps its place at the front.
    fn pair_queued(self: &Arc<Self>, queue: &mut MatchmakingQueue) -> usize {
        let mut started = 0;
        while let Some((first, second)) = queue.pop_pair() {
            match self.launch_duel(first.participant, second.participant) {
                Ok(()) => started += 1,
                Err(e) => {
                    warn!(error = %e, "Could not pair queued participants");
                    for entry in [second, first] {
                        let participant = entry.participant;
                        if self.services.world.is_online(participant) && !self.is_busy(participant) {
                            queue.requeue_front(entry);
                        }
                    }
                }
            }
        }
        started
    }

    /// Periodic queue processing
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.services.config.queue_check_interval);

        loop {
            interval.tick().await;
            let started = self.check_queue().await;
            if started > 0 {
                debug!(started, "Queue check paired participants");
            }
        }
    }

    // ---- Duel construction ----

    /// Reserve both participants and construct their duel in the background
    fn launch_duel(self: &Arc<Self>, a: ParticipantId, b: ParticipantId) -> Result<(), DuelError> {
        {
            let mut reserved = self.reserved.lock();
            if reserved.contains(&a) || self.registry.contains_participant(a) {
                return Err(DuelError::AlreadyInDuel);
            }
            if reserved.contains(&b) || self.registry.contains_participant(b) {
                return Err(DuelError::TargetInDuel(self.display_name(b)));
            }
            reserved.insert(a);
            reserved.insert(b);
        }

        // Challenges involving either of them are void now
        let purged = {
            let mut requests = self.requests.lock();
            let mut purged = requests.purge(a);
            purged.extend(requests.purge(b));
            purged
        };
        for request in purged {
            request.settle();
            for (other, by) in [
                (request.target, &request.challenger_name),
                (request.challenger, &request.target_name),
            ] {
                if other != a && other != b {
                    self.notify(other, ServerMsg::ChallengeCancelled { by: by.clone() });
                }
            }
        }

        let coordinator = self.clone();
        self.services.scheduler.spawn(async move {
            coordinator.construct(a, b).await;
        });
        Ok(())
    }

    async fn construct(self: Arc<Self>, a: ParticipantId, b: ParticipantId) {
        let result = match self.resolve_site(a, b).await {
            Ok(site) => self.open(a, b, site),
            Err(e) => Err(e),
        };
        {
            let mut reserved = self.reserved.lock();
            reserved.remove(&a);
            reserved.remove(&b);
        }

        let Err(e) = result else {
            return;
        };
        warn!(error = %e, "Duel could not be started");
        for participant in [a, b] {
            let msg = match &e {
                DuelError::SiteUnavailable(reason) => ServerMsg::SiteUnavailable {
                    reason: reason.clone(),
                },
                other => ServerMsg::Notice {
                    text: other.to_string(),
                },
            };
            self.notify(participant, msg);
        }
    }

    /// Prefer a ready arena, else search for a natural site on a worker
    async fn resolve_site(&self, a: ParticipantId, b: ParticipantId) -> Result<DuelSite, DuelError> {
        if self.services.config.use_arenas {
            let arena = self.catalog.random_ready(&mut *self.rng.lock());
            if let Some(arena) = arena {
                return Ok(DuelSite::Arena(arena));
            }
        }

        self.notify(a, ServerMsg::SearchingSite);
        self.notify(b, ServerMsg::SearchingSite);

        let locator = self.locator.clone();
        let world = self.services.world.clone();
        let request = LocateRequest::from_config(&self.services.config);
        let seed: u64 = self.rng.lock().gen();
        let outcome = self
            .services
            .scheduler
            .on_worker(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                locator.locate(world.as_ref(), &request, &mut rng)
            })
            .await;

        match outcome {
            Some(Ok(site)) => Ok(DuelSite::Natural(site)),
            Some(Err(e)) => Err(DuelError::SiteUnavailable(e.to_string())),
            None => Err(DuelError::SiteUnavailable("search was interrupted".to_string())),
        }
    }

    fn open(&self, a: ParticipantId, b: ParticipantId, site: DuelSite) -> Result<(), DuelError> {
        let world = &self.services.world;
        if !world.is_online(a) || !world.is_online(b) {
            return Err(DuelError::ParticipantLeft);
        }

        let setup = match site {
            DuelSite::Arena(arena) => {
                let (Some(spawn_a), Some(spawn_b), Some(center)) = (arena.spawn_a, arena.spawn_b, arena.center)
                else {
                    return Err(DuelError::SiteUnavailable(format!("arena {} is not ready", arena.name)));
                };
                DuelSetup {
                    participants: [a, b],
                    arena: Some(arena.name),
                    center,
                    spawns: [spawn_a, spawn_b],
                    chunks: Vec::new(),
                    lobby: self.catalog.lobby(),
                }
            }
            DuelSite::Natural(site) => {
                let name = site.center.world.clone();
                for (i, chunk) in site.chunks.iter().enumerate() {
                    if let Err(e) = world.claim_chunk(&name, *chunk) {
                        for claimed in &site.chunks[..i] {
                            let _ = world.release_chunk(&name, *claimed);
                        }
                        return Err(DuelError::SiteUnavailable(e.to_string()));
                    }
                }
                info!(attempt = site.attempt, chunks = site.chunks.len(), "Natural duel site claimed");
                DuelSetup {
                    participants: [a, b],
                    arena: None,
                    center: site.center,
                    spawns: [site.spawn_a, site.spawn_b],
                    chunks: site.chunks,
                    lobby: self.catalog.lobby(),
                }
            }
        };

        let duel = DuelMatch::new(setup, self.services.clone(), self.registry.clone());
        self.registry.insert(duel.clone());
        duel.begin();
        Ok(())
    }

    // ---- Events from the world ----

    /// A participant disconnected: forfeit, withdraw challenges, leave the
    /// queue and drop any arena edit claim
    pub async fn handle_disconnect(&self, participant: ParticipantId) {
        if let Some(duel) = self.registry.by_participant(participant) {
            duel.forfeit(participant);
        }

        let purged = self.requests.lock().purge(participant);
        for request in purged {
            request.settle();
            let (other, name) = if request.challenger == participant {
                (request.target, request.challenger_name)
            } else {
                (request.challenger, request.target_name)
            };
            self.notify(other, ServerMsg::ChallengeCancelled { by: name });
        }

        self.queue.lock().await.dequeue(participant);
        self.catalog.release_editor(participant);
    }

    /// A participant died. In an active duel the opponent wins, whoever
    /// dealt the killing blow.
    pub fn handle_death(
        &self,
        participant: ParticipantId,
        killer: Option<ParticipantId>,
        drops: &[EntityId],
    ) -> bool {
        let Some(duel) = self.registry.by_participant(participant) else {
            return false;
        };
        if duel.phase() != DuelPhase::Active {
            return false;
        }
        let Some(opponent) = duel.opponent_of(participant) else {
            return false;
        };
        for item in drops {
            duel.track_dropped_item(*item);
        }
        if killer.is_some_and(|k| k != opponent) {
            debug!(duel_id = %duel.id(), "Duel participant killed by an outsider");
        }
        duel.declare_winner(opponent, participant)
    }

    pub fn return_now(&self, participant: ParticipantId) -> Result<(), DuelError> {
        let duel = self
            .registry
            .by_participant(participant)
            .ok_or(DuelError::NotInDuel)?;
        if duel.return_now(participant) {
            Ok(())
        } else {
            Err(DuelError::NothingToReturn)
        }
    }

    pub fn track_placed_block(&self, participant: ParticipantId, pos: BlockPos) -> bool {
        self.registry
            .by_participant(participant)
            .is_some_and(|d| d.track_placed_block(pos))
    }

    pub fn track_dropped_item(&self, participant: ParticipantId, entity: EntityId) -> bool {
        self.registry
            .by_participant(participant)
            .is_some_and(|d| d.track_dropped_item(entity))
    }

    pub fn track_spawned_entity(&self, participant: ParticipantId, entity: EntityId) -> bool {
        self.registry
            .by_participant(participant)
            .is_some_and(|d| d.track_spawned_entity(entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::SpawnSlot;
    use crate::config::DuelConfig;
    use crate::store::{MemoryArenaStore, MemoryStatsStore};
    use crate::util::Scheduler;
    use crate::world::memory::Column;
    use crate::world::{Location, MemoryWorld, MessageLog, World};
    use std::time::Duration;
    use tokio::time::sleep;
    use uuid::Uuid;

    struct Harness {
        world: Arc<MemoryWorld>,
        log: Arc<MessageLog>,
        coordinator: Arc<MatchCoordinator>,
    }

    impl Harness {
        fn join(&self, name: &str) -> ParticipantId {
            let id = Uuid::new_v4();
            self.world.connect(id, name);
            id
        }
    }

    async fn harness(config: DuelConfig, with_arena: bool) -> Harness {
        let world = Arc::new(MemoryWorld::new());
        let log = Arc::new(MessageLog::new());
        let catalog = Arc::new(ArenaCatalog::new(Arc::new(MemoryArenaStore::new())));
        if with_arena {
            catalog.create("pit").await.unwrap();
            catalog
                .set_spawn("pit", SpawnSlot::A, Location::new("world", 200.5, 65.0, 0.5))
                .await
                .unwrap();
            catalog
                .set_spawn("pit", SpawnSlot::B, Location::new("world", 220.5, 65.0, 0.5))
                .await
                .unwrap();
        }
        let locator = TerrainLocator::new(config.terrain.clone());
        let services = DuelServices {
            world: world.clone(),
            messenger: log.clone(),
            stats: Arc::new(MemoryStatsStore::new()),
            scheduler: Scheduler::current(),
            config: Arc::new(config),
        };
        Harness {
            coordinator: MatchCoordinator::new(services, catalog, locator),
            world,
            log,
        }
    }

    async fn settle() {
        sleep(Duration::from_millis(20)).await;
    }

    async fn wait_for_duel(h: &Harness, participant: ParticipantId) -> Arc<DuelMatch> {
        for _ in 0..200 {
            if let Some(duel) = h.coordinator.active_duel(participant) {
                return duel;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("duel never started");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_validation() {
        let h = harness(DuelConfig::default(), true).await;
        let (a, b, c) = (h.join("Alex"), h.join("Blake"), h.join("Casey"));
        let co = &h.coordinator;

        assert_eq!(
            co.send_request(a, "nobody"),
            Err(DuelError::UnknownTarget("nobody".to_string()))
        );
        assert_eq!(co.send_request(a, "ALEX"), Err(DuelError::SelfChallenge));

        co.send_request(a, "blake").unwrap();
        assert_eq!(co.send_request(a, "Casey"), Err(DuelError::RequestAlreadyPending));
        assert_eq!(
            co.send_request(c, "Blake"),
            Err(DuelError::TargetHasPendingRequest("Blake".to_string()))
        );
        assert_eq!(
            co.accept_request(b, "Casey"),
            Err(DuelError::NoPendingRequest("Casey".to_string()))
        );
        assert_eq!(co.cancel_request(c), Err(DuelError::NoOutgoingRequest));

        let received = h
            .log
            .count_for(b, |m| matches!(m, ServerMsg::ChallengeReceived { .. }));
        assert_eq!(received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_expires_once() {
        let h = harness(DuelConfig::default(), true).await;
        let (a, b) = (h.join("Alex"), h.join("Blake"));
        h.coordinator.send_request(a, "Blake").unwrap();

        sleep(Duration::from_secs(61)).await;
        let expired = |id| {
            h.log
                .count_for(id, |m| matches!(m, ServerMsg::ChallengeExpired { .. }))
        };
        assert_eq!(expired(a), 1);
        assert_eq!(expired(b), 1);
        assert_eq!(h.coordinator.pending_requests(), 0);
        assert!(h.coordinator.accept_request(b, "Alex").is_err());

        // The challenger is free to try again
        h.coordinator.send_request(a, "Blake").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_starts_arena_duel() {
        let h = harness(DuelConfig::default(), true).await;
        let (a, b) = (h.join("Alex"), h.join("Blake"));
        h.coordinator.send_request(a, "Blake").unwrap();
        h.coordinator.accept_request(b, "alex").unwrap();
        assert!(h.coordinator.is_busy(a));
        assert_eq!(h.coordinator.send_request(a, "Blake"), Err(DuelError::AlreadyInDuel));

        let duel = wait_for_duel(&h, a).await;
        assert_eq!(duel.arena(), Some("pit"));
        assert_eq!(h.world.location(a).unwrap().x, 200.5);
        assert_eq!(h.world.location(b).unwrap().x, 220.5);
        let starting = h
            .log
            .count_for(b, |m| matches!(m, ServerMsg::DuelStarting { .. }));
        assert_eq!(starting, 1);

        // Expiry after acceptance is a no-op
        sleep(Duration::from_secs(61)).await;
        assert_eq!(
            h.log
                .count_for(a, |m| matches!(m, ServerMsg::ChallengeExpired { .. })),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny_and_cancel_notify_other_side() {
        let h = harness(DuelConfig::default(), true).await;
        let (a, b) = (h.join("Alex"), h.join("Blake"));

        h.coordinator.send_request(a, "Blake").unwrap();
        h.coordinator.deny_request(b, "Alex").unwrap();
        assert_eq!(
            h.log.count_for(a, |m| *m
                == ServerMsg::ChallengeDenied {
                    by: "Blake".to_string()
                }),
            1
        );

        h.coordinator.send_request(a, "Blake").unwrap();
        h.coordinator.cancel_request(a).unwrap();
        assert_eq!(
            h.log
                .count_for(b, |m| matches!(m, ServerMsg::ChallengeCancelled { .. })),
            1
        );
        assert_eq!(h.coordinator.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_fails_when_challenger_left() {
        let h = harness(DuelConfig::default(), true).await;
        let (a, b) = (h.join("Alex"), h.join("Blake"));
        h.coordinator.send_request(a, "Blake").unwrap();
        h.world.disconnect(a);

        assert_eq!(
            h.coordinator.accept_request(b, "Alex"),
            Err(DuelError::ChallengerUnavailable("Alex".to_string()))
        );
        assert!(!h.coordinator.is_busy(b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_pairs_two_participants() {
        let h = harness(DuelConfig::default(), true).await;
        let (c, d) = (h.join("Casey"), h.join("Drew"));

        assert_eq!(h.coordinator.join_queue(c).await, Ok(1));
        assert_eq!(h.coordinator.join_queue(c).await, Err(DuelError::AlreadyQueued));
        settle().await;
        assert!(h.coordinator.active_duel(c).is_none());
        assert_eq!(h.coordinator.queue_size().await, 1);

        h.coordinator.join_queue(d).await.unwrap();
        assert_eq!(h.coordinator.queue_size().await, 0);
        let duel = wait_for_duel(&h, d).await;
        assert!(duel.involves(c));
        assert_eq!(h.coordinator.join_queue(c).await, Err(DuelError::AlreadyInDuel));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_skips_offline_and_keeps_order() {
        let h = harness(DuelConfig::default(), true).await;
        let (a, b, c) = (h.join("Alex"), h.join("Blake"), h.join("Casey"));

        h.coordinator.join_queue(a).await.unwrap();
        h.world.disconnect(a);
        h.coordinator.join_queue(b).await.unwrap();
        assert_eq!(h.coordinator.queue_position(b).await, Some(1));

        h.coordinator.join_queue(c).await.unwrap();
        let duel = wait_for_duel(&h, b).await;
        assert_eq!(duel.participants(), [b, c]);
        assert_eq!(h.coordinator.leave_queue(b).await, Err(DuelError::NotQueued));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_forfeits_duel() {
        let h = harness(DuelConfig::default(), true).await;
        let (a, b) = (h.join("Alex"), h.join("Blake"));
        h.coordinator.send_request(a, "Blake").unwrap();
        h.coordinator.accept_request(b, "Alex").unwrap();
        let duel = wait_for_duel(&h, a).await;
        sleep(Duration::from_secs(6)).await;
        assert_eq!(duel.phase(), DuelPhase::Active);

        h.world.disconnect(a);
        h.coordinator.handle_disconnect(a).await;
        assert_eq!(duel.winner(), Some(b));
        assert_eq!(duel.phase(), DuelPhase::Ended);
        assert!(h.coordinator.active_duel(b).is_none());
        assert!(!h.coordinator.is_busy(b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_declares_opponent_winner() {
        let h = harness(DuelConfig::default(), true).await;
        let (a, b) = (h.join("Alex"), h.join("Blake"));
        h.coordinator.join_queue(a).await.unwrap();
        h.coordinator.join_queue(b).await.unwrap();
        let duel = wait_for_duel(&h, a).await;

        // Deaths before the fight do not count
        assert!(!h.coordinator.handle_death(a, Some(b), &[]));
        sleep(Duration::from_secs(6)).await;

        assert!(h.coordinator.handle_death(a, None, &[]));
        assert!(!h.coordinator.handle_death(b, Some(a), &[]));
        assert_eq!(duel.winner(), Some(b));
        assert_eq!(h.coordinator.return_now(a), Err(DuelError::NotInDuel));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.coordinator.stats(b).await.unwrap().wins, 1);
    }

    #[tokio::test]
    async fn test_natural_site_without_ready_arenas() {
        let h = harness(DuelConfig::default(), false).await;
        let (a, b) = (h.join("Alex"), h.join("Blake"));
        h.coordinator.send_request(a, "Blake").unwrap();
        h.coordinator.accept_request(b, "Alex").unwrap();

        let duel = wait_for_duel(&h, a).await;
        assert!(duel.arena().is_none());
        assert!(!duel.claimed_chunks().is_empty());
        assert_eq!(h.world.claimed_chunk_count(), duel.claimed_chunks().len());
        assert_eq!(h.log.count_for(a, |m| *m == ServerMsg::SearchingSite), 1);
    }

    #[tokio::test]
    async fn test_site_failure_releases_participants() {
        let h = harness(DuelConfig::default(), false).await;
        h.world.set_terrain("world", |_, _| Column {
            surface_y: 62,
            surface: "water".to_string(),
            filler: "sand".to_string(),
            biome: "ocean".to_string(),
        });
        let (a, b) = (h.join("Alex"), h.join("Blake"));
        h.coordinator.send_request(a, "Blake").unwrap();
        h.coordinator.accept_request(b, "Alex").unwrap();

        for _ in 0..200 {
            if !h.coordinator.is_busy(a) {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(!h.coordinator.is_busy(a));
        assert!(h.coordinator.active_duel(a).is_none());
        let unavailable = h
            .log
            .count_for(b, |m| matches!(m, ServerMsg::SiteUnavailable { .. }));
        assert_eq!(unavailable, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_and_disconnect_record_one_result() {
        let h = harness(DuelConfig::default(), true).await;
        let (a, b) = (h.join("Alex"), h.join("Blake"));
        h.coordinator.send_request(a, "Blake").unwrap();
        h.coordinator.accept_request(b, "Alex").unwrap();
        let duel = wait_for_duel(&h, a).await;
        sleep(Duration::from_secs(6)).await;

        // Killed and disconnected in the same tick
        assert!(h.coordinator.handle_death(a, Some(b), &[]));
        h.world.disconnect(a);
        h.coordinator.handle_disconnect(a).await;
        h.coordinator.handle_disconnect(b).await;
        assert!(!duel.end_duel());
        assert_eq!(duel.winner(), Some(b));

        sleep(Duration::from_millis(50)).await;
        let winner = h.coordinator.stats(b).await.unwrap();
        let loser = h.coordinator.stats(a).await.unwrap();
        assert_eq!((winner.wins, winner.losses), (1, 0));
        assert_eq!((loser.wins, loser.losses), (0, 1));
        assert!(h.coordinator.active_duels().is_empty());
    }

    #[tokio::test]
    async fn test_half_built_arena_falls_back_to_natural_site() {
        let h = harness(DuelConfig::default(), false).await;
        let catalog = h.coordinator.catalog();
        catalog.create("colosseum").await.unwrap();
        catalog
            .set_spawn("colosseum", SpawnSlot::A, Location::new("world", 200.5, 65.0, 0.5))
            .await
            .unwrap();

        let (a, b) = (h.join("Alex"), h.join("Blake"));
        h.coordinator.send_request(a, "Blake").unwrap();
        h.coordinator.accept_request(b, "Alex").unwrap();

        let duel = wait_for_duel(&h, a).await;
        assert!(duel.arena().is_none());
        assert!(!duel.claimed_chunks().is_empty());
        assert_eq!(h.log.count_for(b, |m| *m == ServerMsg::SearchingSite), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pairing_keeps_partner_at_front() {
        let h = harness(DuelConfig::default(), true).await;
        let (a, b, c) = (h.join("Alex"), h.join("Blake"), h.join("Casey"));
        let mut queue = MatchmakingQueue::new();
        queue.enqueue(a);
        queue.enqueue(b);

        // Blake accepted a challenge after the queue was pruned
        h.coordinator.reserved.lock().insert(b);
        assert_eq!(h.coordinator.pair_queued(&mut queue), 0);
        assert_eq!(queue.position(a), Some(1));
        assert!(!queue.contains(b));
        h.coordinator.reserved.lock().remove(&b);

        queue.enqueue(c);
        assert_eq!(h.coordinator.pair_queued(&mut queue), 1);
        assert!(queue.is_empty());
        let duel = wait_for_duel(&h, a).await;
        assert_eq!(duel.participants(), [a, c]);
    }
}
