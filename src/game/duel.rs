//! Lifecycle of a single duel
//!
//! ```text
//! Countdown -> Active -> LootPhase ------------> Ended
//!                     -> ReturnCountdown ------> Ended
//!                     -> Ended
//! ```
//!
//! Every transition happens under the duel's state lock and is re-checked
//! there, so a timer firing late or a second death report cannot move a
//! duel backwards. World and messenger calls are made after the lock is
//! released.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Boundary, DuelPhase, DuelServices, MatchRegistry, ParticipantSnapshot};
use crate::config::LootMode;
use crate::util::time::{secs_to_ticks, TICKS_PER_SECOND};
use crate::util::TaskHandle;
use crate::world::{BlockPos, ChunkPos, EntityId, Location, ParticipantId, WorldError, AIR};
use crate::ws::protocol::{DuelParticipant, DuelSummary, ServerMsg};

/// Everything needed to construct a duel
#[derive(Debug, Clone)]
pub struct DuelSetup {
    pub participants: [ParticipantId; 2],
    /// Arena name, `None` for a natural site
    pub arena: Option<String>,
    pub center: Location,
    pub spawns: [Location; 2],
    /// Chunks claimed for a natural site
    pub chunks: Vec<ChunkPos>,
    pub lobby: Option<Location>,
}

#[derive(Default)]
struct Timers {
    countdown: Option<TaskHandle>,
    shrink: Option<TaskHandle>,
    loot: Option<TaskHandle>,
    ret: Option<TaskHandle>,
}

impl Timers {
    fn cancel_combat(&mut self) {
        for task in [self.countdown.take(), self.shrink.take()].into_iter().flatten() {
            task.cancel();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel_combat();
        for task in [self.loot.take(), self.ret.take()].into_iter().flatten() {
            task.cancel();
        }
    }
}

struct DuelState {
    phase: DuelPhase,
    countdown_remaining: u32,
    return_remaining: u32,
    winner: Option<ParticipantId>,
    loser: Option<ParticipantId>,
    started_at: Option<DateTime<Utc>>,
    placed_blocks: HashSet<BlockPos>,
    dropped_items: HashSet<EntityId>,
    spawned_entities: HashSet<EntityId>,
    /// Participants already sent home
    returned: HashSet<ParticipantId>,
    timers: Timers,
    ended: bool,
}

pub struct DuelMatch {
    id: Uuid,
    participants: [ParticipantId; 2],
    names: [String; 2],
    arena: Option<String>,
    spawns: [Location; 2],
    chunks: Vec<ChunkPos>,
    lobby: Option<Location>,
    snapshots: [Option<ParticipantSnapshot>; 2],
    boundary: Arc<Boundary>,
    services: DuelServices,
    registry: MatchRegistry,
    state: Mutex<DuelState>,
}

impl DuelMatch {
    /// Build a duel and snapshot both participants. Nothing is scheduled
    /// until [`DuelMatch::begin`].
    pub fn new(setup: DuelSetup, services: DuelServices, registry: MatchRegistry) -> Arc<Self> {
        let world = services.world.as_ref();
        let names = setup
            .participants
            .map(|p| world.display_name(p).unwrap_or_else(|| p.to_string()));
        let snapshots = setup
            .participants
            .map(|p| ParticipantSnapshot::capture(world, p));
        let boundary = Boundary::new(
            setup.center,
            services.config.boundary.clone(),
            services.world.clone(),
            services.messenger.clone(),
        );

        Arc::new(Self {
            id: Uuid::new_v4(),
            participants: setup.participants,
            names,
            arena: setup.arena,
            spawns: setup.spawns,
            chunks: setup.chunks,
            lobby: setup.lobby,
            snapshots,
            boundary,
            services,
            registry,
            state: Mutex::new(DuelState {
                phase: DuelPhase::Countdown,
                countdown_remaining: 0,
                return_remaining: 0,
                winner: None,
                loser: None,
                started_at: None,
                placed_blocks: HashSet::new(),
                dropped_items: HashSet::new(),
                spawned_entities: HashSet::new(),
                returned: HashSet::new(),
                timers: Timers::default(),
                ended: false,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn participants(&self) -> [ParticipantId; 2] {
        self.participants
    }

    pub fn involves(&self, participant: ParticipantId) -> bool {
        self.participants.contains(&participant)
    }

    pub fn opponent_of(&self, participant: ParticipantId) -> Option<ParticipantId> {
        match self.participants {
            [a, b] if a == participant => Some(b),
            [a, b] if b == participant => Some(a),
            _ => None,
        }
    }

    fn name_of(&self, participant: ParticipantId) -> &str {
        if participant == self.participants[0] {
            &self.names[0]
        } else {
            &self.names[1]
        }
    }

    pub fn arena(&self) -> Option<&str> {
        self.arena.as_deref()
    }

    pub fn center(&self) -> &Location {
        self.boundary.center()
    }

    pub fn boundary(&self) -> &Arc<Boundary> {
        &self.boundary
    }

    pub fn claimed_chunks(&self) -> &[ChunkPos] {
        &self.chunks
    }

    pub fn phase(&self) -> DuelPhase {
        self.state.lock().phase
    }

    pub fn winner(&self) -> Option<ParticipantId> {
        self.state.lock().winner
    }

    pub fn loser(&self) -> Option<ParticipantId> {
        self.state.lock().loser
    }

    pub fn summary(&self) -> DuelSummary {
        let (phase, started_at) = {
            let state = self.state.lock();
            (state.phase, state.started_at)
        };
        DuelSummary {
            duel_id: self.id,
            participants: [0, 1].map(|i| DuelParticipant {
                participant_id: self.participants[i],
                display_name: self.names[i].clone(),
            }),
            arena: self.arena.clone(),
            phase,
            started_at,
            boundary_radius: self.boundary.radius(),
        }
    }

    fn notify(&self, participant: ParticipantId, msg: ServerMsg) {
        self.services.messenger.send(participant, msg);
    }

    fn broadcast(&self, msg: ServerMsg) {
        for participant in self.participants {
            self.notify(participant, msg.clone());
        }
    }

    /// Announce the duel, move both participants to their spawns and start
    /// the countdown
    pub fn begin(self: &Arc<Self>) {
        for (i, participant) in self.participants.into_iter().enumerate() {
            self.notify(
                participant,
                ServerMsg::DuelStarting {
                    duel_id: self.id,
                    opponent: self.names[1 - i].clone(),
                    arena: self.arena.clone(),
                },
            );
        }

        let world = &self.services.world;
        let teleported = self
            .participants
            .iter()
            .zip(self.spawns.iter())
            .try_for_each(|(p, spawn)| world.teleport(*p, spawn));
        if let Err(e) = teleported {
            self.fail(e);
            return;
        }

        info!(
            duel_id = %self.id,
            arena = ?self.arena,
            a = %self.names[0],
            b = %self.names[1],
            "Duel starting"
        );
        self.start_countdown();
    }

    fn fail(self: &Arc<Self>, err: WorldError) {
        error!(duel_id = %self.id, error = %err, "Duel aborted");
        self.broadcast(ServerMsg::Notice {
            text: format!("Duel aborted: {}", err),
        });
        self.end_duel();
    }

    fn start_countdown(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.phase != DuelPhase::Countdown || state.timers.countdown.is_some() {
            return;
        }
        state.countdown_remaining = self.services.config.countdown_secs;

        let weak = Arc::downgrade(self);
        state.timers.countdown = Some(self.services.scheduler.run_repeating(
            0,
            TICKS_PER_SECOND,
            move || match weak.upgrade() {
                Some(duel) => duel.countdown_tick(),
                None => ControlFlow::Break(()),
            },
        ));
    }

    fn countdown_tick(self: &Arc<Self>) -> ControlFlow<()> {
        let remaining = {
            let mut state = self.state.lock();
            if state.phase != DuelPhase::Countdown {
                return ControlFlow::Break(());
            }
            let remaining = state.countdown_remaining;
            state.countdown_remaining = remaining.saturating_sub(1);
            remaining
        };

        if remaining == 0 {
            self.start_fight();
            return ControlFlow::Break(());
        }
        self.broadcast(ServerMsg::Countdown {
            seconds_remaining: remaining,
        });
        ControlFlow::Continue(())
    }

    fn start_fight(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.phase != DuelPhase::Countdown {
                return;
            }
            state.phase = DuelPhase::Active;
            state.started_at = Some(Utc::now());
            state.timers.countdown = None;
        }

        self.broadcast(ServerMsg::Fight);
        self.boundary
            .start(&self.services.scheduler, &self.participants);
        self.point_locators(true);

        let weak = Arc::downgrade(self);
        let grace = secs_to_ticks(self.services.config.shrink_grace.as_secs());
        let shrink = self.services.scheduler.run_later(grace, move || {
            if let Some(duel) = weak.upgrade() {
                duel.begin_shrink();
            }
        });
        {
            let mut state = self.state.lock();
            if state.ended || state.winner.is_some() {
                shrink.cancel();
            } else {
                state.timers.shrink = Some(shrink);
            }
        }
        debug!(duel_id = %self.id, "Fight started");
    }

    fn begin_shrink(&self) {
        if self.phase() != DuelPhase::Active || !self.boundary.start_shrinking() {
            return;
        }
        let config = &self.services.config.boundary;
        self.broadcast(ServerMsg::BoundaryShrinking {
            from_radius: self.boundary.radius(),
            to_radius: config.end_radius,
            duration_secs: config.shrink_duration.as_secs(),
        });
    }

    fn point_locators(&self, enable: bool) {
        if !self.services.world.capabilities().locator_target {
            return;
        }
        let [a, b] = self.participants;
        for (who, target) in [(a, b), (b, a)] {
            let target = enable.then_some(target);
            if let Err(e) = self.services.world.set_locator_target(who, target) {
                debug!(participant = %who, error = %e, "Could not update locator");
            }
        }
    }

    /// Decide the duel. Ignored once a result exists, or for anyone not in
    /// this duel.
    pub fn declare_winner(self: &Arc<Self>, winner: ParticipantId, loser: ParticipantId) -> bool {
        if winner == loser || !self.involves(winner) || !self.involves(loser) {
            return false;
        }
        {
            let mut state = self.state.lock();
            if state.ended || state.winner.is_some() {
                return false;
            }
            state.winner = Some(winner);
            state.loser = Some(loser);
            state.timers.cancel_combat();
        }

        self.boundary.stop();
        self.broadcast(ServerMsg::DuelResult {
            winner: self.name_of(winner).to_string(),
            loser: self.name_of(loser).to_string(),
            forfeit: false,
        });
        info!(duel_id = %self.id, winner = %self.name_of(winner), loser = %self.name_of(loser), "Duel decided");

        match self.services.config.loot_mode {
            LootMode::KeepInventory => {
                if let Some(snapshot) = self.snapshot_of(loser) {
                    if let Err(e) = snapshot.restore_inventory(self.services.world.as_ref()) {
                        error!(duel_id = %self.id, participant = %loser, error = %e, "Inventory restore failed");
                    }
                }
                self.finish();
            }
            LootMode::DropOnDeath => self.finish(),
            LootMode::LootPhase => self.enter_loot_phase(),
        }
        true
    }

    /// A participant left. Before a result the opponent wins; afterwards the
    /// duel simply ends.
    pub fn forfeit(self: &Arc<Self>, who: ParticipantId) -> bool {
        let Some(opponent) = self.opponent_of(who) else {
            return false;
        };
        {
            let mut state = self.state.lock();
            if state.ended {
                return false;
            }
            if state.winner.is_none() {
                state.winner = Some(opponent);
                state.loser = Some(who);
                state.timers.cancel_combat();
            } else {
                drop(state);
                self.end_duel();
                return true;
            }
        }

        self.boundary.stop();
        self.broadcast(ServerMsg::DuelResult {
            winner: self.name_of(opponent).to_string(),
            loser: self.name_of(who).to_string(),
            forfeit: true,
        });
        info!(duel_id = %self.id, forfeited_by = %self.name_of(who), "Duel forfeited");
        self.end_duel();
        true
    }

    fn finish(self: &Arc<Self>) {
        if self.services.config.return_delay_secs > 0 {
            self.enter_return_countdown();
        } else {
            self.end_duel();
        }
    }

    fn enter_loot_phase(self: &Arc<Self>) {
        let seconds = self.services.config.loot_phase_secs;
        let (winner, loser) = {
            let mut state = self.state.lock();
            if state.ended {
                return;
            }
            state.phase = DuelPhase::LootPhase;
            let loser = state.loser;
            if let Some(loser) = loser {
                state.returned.insert(loser);
            }
            (state.winner, loser)
        };

        if let Some(loser) = loser {
            self.send_home(loser);
        }
        if let Some(winner) = winner {
            self.notify(winner, ServerMsg::LootPhase { seconds });
        }

        let weak = Arc::downgrade(self);
        let timer = self
            .services
            .scheduler
            .run_later(secs_to_ticks(seconds as u64), move || {
                if let Some(duel) = weak.upgrade() {
                    duel.end_duel();
                }
            });
        let mut state = self.state.lock();
        if state.ended {
            timer.cancel();
        } else {
            state.timers.loot = Some(timer);
        }
    }

    fn enter_return_countdown(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.ended {
                return;
            }
            state.phase = DuelPhase::ReturnCountdown;
            state.return_remaining = self.services.config.return_delay_secs;
        }

        let weak = Arc::downgrade(self);
        let timer = self
            .services
            .scheduler
            .run_repeating(0, TICKS_PER_SECOND, move || match weak.upgrade() {
                Some(duel) => duel.return_tick(),
                None => ControlFlow::Break(()),
            });
        let mut state = self.state.lock();
        if state.ended {
            timer.cancel();
        } else {
            state.timers.ret = Some(timer);
        }
    }

    fn return_tick(self: &Arc<Self>) -> ControlFlow<()> {
        let (remaining, waiting) = {
            let mut state = self.state.lock();
            if state.phase != DuelPhase::ReturnCountdown {
                return ControlFlow::Break(());
            }
            let remaining = state.return_remaining;
            state.return_remaining = remaining.saturating_sub(1);
            let waiting: Vec<ParticipantId> = self
                .participants
                .into_iter()
                .filter(|p| !state.returned.contains(p))
                .collect();
            (remaining, waiting)
        };

        if remaining == 0 {
            self.end_duel();
            return ControlFlow::Break(());
        }
        for participant in waiting {
            self.notify(
                participant,
                ServerMsg::ReturnCountdown {
                    seconds_remaining: remaining,
                },
            );
        }
        ControlFlow::Continue(())
    }

    /// Skip the remaining wait. The loot-phase winner ends the duel; during
    /// a return countdown each participant goes home on their own.
    pub fn return_now(self: &Arc<Self>, who: ParticipantId) -> bool {
        let mut state = self.state.lock();
        let phase = state.phase;
        match phase {
            DuelPhase::LootPhase if state.winner == Some(who) => {
                drop(state);
                self.end_duel();
                true
            }
            DuelPhase::ReturnCountdown if self.involves(who) && !state.returned.contains(&who) => {
                state.returned.insert(who);
                let everyone = state.returned.len() == self.participants.len();
                drop(state);
                self.send_home(who);
                if everyone {
                    self.end_duel();
                }
                true
            }
            _ => false,
        }
    }

    /// End the duel: restore whoever is still here, record stats, drop it
    /// from the registry and schedule cleanup. Runs once.
    pub fn end_duel(self: &Arc<Self>) -> bool {
        let (winner, loser, returned) = {
            let mut state = self.state.lock();
            if state.ended {
                return false;
            }
            state.ended = true;
            state.phase = DuelPhase::Ended;
            state.timers.cancel_all();
            (state.winner, state.loser, state.returned.clone())
        };

        self.boundary.stop();

        if let (Some(winner), Some(loser)) = (winner, loser) {
            let stats = self.services.stats.clone();
            let duel_id = self.id;
            self.services.scheduler.spawn(async move {
                if let Err(e) = stats.record_win(winner).await {
                    warn!(%duel_id, participant = %winner, error = %e, "Failed to record win");
                }
                if let Err(e) = stats.record_loss(loser).await {
                    warn!(%duel_id, participant = %loser, error = %e, "Failed to record loss");
                }
            });
        }

        for participant in self.participants {
            if !returned.contains(&participant) && self.services.world.is_online(participant) {
                self.send_home(participant);
            }
        }

        if self.services.config.loot_mode == LootMode::KeepInventory {
            if let Some(snapshot) = winner.and_then(|w| self.snapshot_of(w)) {
                if let Err(e) = snapshot.restore_health(self.services.world.as_ref()) {
                    debug!(participant = %snapshot.participant, error = %e, "Health restore skipped");
                }
            }
        }

        self.point_locators(false);
        self.registry.remove(self.id);
        info!(duel_id = %self.id, winner = ?winner, "Duel ended");

        let duel = self.clone();
        self.services
            .scheduler
            .run_later(self.services.config.cleanup_delay_ticks, move || duel.cleanup());
        true
    }

    fn snapshot_of(&self, participant: ParticipantId) -> Option<&ParticipantSnapshot> {
        self.snapshots
            .iter()
            .flatten()
            .find(|s| s.participant == participant)
    }

    /// Teleport to the lobby, else the pre-duel location, else the spawn of
    /// the world they are in
    fn send_home(&self, participant: ParticipantId) {
        let world = &self.services.world;
        let fallback = world
            .location(participant)
            .and_then(|l| world.spawn_location(&l.world));
        let candidates = [
            self.lobby.clone(),
            self.snapshot_of(participant).map(|s| s.location.clone()),
            fallback,
        ];

        for destination in candidates.into_iter().flatten() {
            match world.teleport(participant, &destination) {
                Ok(()) => {
                    self.notify(participant, ServerMsg::Returned);
                    return;
                }
                Err(e) => debug!(%participant, error = %e, "Return destination rejected"),
            }
        }
        warn!(duel_id = %self.id, %participant, "Could not return participant");
    }

    fn cleanup(&self) {
        let (blocks, items, entities) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.placed_blocks),
                std::mem::take(&mut state.dropped_items),
                std::mem::take(&mut state.spawned_entities),
            )
        };
        let world = &self.services.world;
        let config = &self.services.config;
        let world_name = self.center().world.clone();

        if config.remove_placed_blocks {
            for pos in &blocks {
                if let Err(e) = world.set_block(&world_name, *pos, AIR) {
                    warn!(duel_id = %self.id, error = %e, "Failed to clear placed block");
                }
            }
        }

        let mut removed = 0;
        let doomed = items
            .iter()
            .filter(|_| config.remove_dropped_items)
            .chain(entities.iter().filter(|e| !self.participants.contains(*e)));
        for entity in doomed {
            if world.entity_exists(*entity) && world.remove_entity(*entity).is_ok() {
                removed += 1;
            }
        }

        let mut released = 0;
        if self.arena.is_none() {
            let occupied: HashSet<ChunkPos> = world
                .online_participants()
                .into_iter()
                .filter_map(|p| world.location(p))
                .filter(|l| l.world == world_name)
                .map(|l| l.chunk())
                .collect();
            for chunk in &self.chunks {
                if occupied.contains(chunk) {
                    continue;
                }
                match world.release_chunk(&world_name, *chunk) {
                    Ok(()) => released += 1,
                    Err(e) => warn!(duel_id = %self.id, error = %e, "Failed to release chunk"),
                }
            }
        }

        info!(
            duel_id = %self.id,
            blocks = blocks.len(),
            entities = removed,
            chunks = released,
            "Duel site cleaned up"
        );
    }

    /// Record a block placed during combat; ignored outside `Active`
    pub fn track_placed_block(&self, pos: BlockPos) -> bool {
        let mut state = self.state.lock();
        state.phase == DuelPhase::Active && state.placed_blocks.insert(pos)
    }

    pub fn track_dropped_item(&self, entity: EntityId) -> bool {
        let mut state = self.state.lock();
        state.phase == DuelPhase::Active && state.dropped_items.insert(entity)
    }

    pub fn track_spawned_entity(&self, entity: EntityId) -> bool {
        let mut state = self.state.lock();
        state.phase == DuelPhase::Active && state.spawned_entities.insert(entity)
    }
}
