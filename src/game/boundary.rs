//! Shrinking boundary around a duel
//!
//! A circle in the x/z plane centered on the duel site. Once shrinking
//! starts, the radius interpolates linearly from the start radius to the end
//! radius over the configured duration. A physics task runs once per second
//! and pushes participants who are outside back in and damages them.
//! A separate render task draws the edge as particles.

use std::collections::HashSet;
use std::f64::consts::TAU;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};

use glam::DVec3;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::BoundaryConfig;
use crate::util::time::TICKS_PER_SECOND;
use crate::util::{Scheduler, TaskHandle};
use crate::world::{Location, Messenger, ParticipantId, World, WorldError};
use crate::ws::protocol::ServerMsg;

/// Vertical component of the inward push
const KNOCKBACK_LIFT: f64 = 0.3;

/// Heights above the center the edge is drawn at
const RENDER_HEIGHTS: [f64; 3] = [0.0, 1.5, 3.0];

const MIN_RENDER_POINTS: usize = 8;
const MAX_RENDER_POINTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryPhase {
    /// Created, not yet enforcing
    Idle,
    /// Enforcing at the start radius
    Active,
    Shrinking,
    /// Stopped for good
    Stopped,
}

struct BoundaryState {
    phase: BoundaryPhase,
    radius: f64,
    shrink_started: Option<Instant>,
    tracked: Vec<ParticipantId>,
    warned: HashSet<ParticipantId>,
    physics_task: Option<TaskHandle>,
    render_task: Option<TaskHandle>,
}

pub struct Boundary {
    center: Location,
    config: BoundaryConfig,
    world: Arc<dyn World>,
    messenger: Arc<dyn Messenger>,
    state: Mutex<BoundaryState>,
}

impl Boundary {
    pub fn new(
        center: Location,
        config: BoundaryConfig,
        world: Arc<dyn World>,
        messenger: Arc<dyn Messenger>,
    ) -> Arc<Self> {
        Arc::new(Self {
            center,
            state: Mutex::new(BoundaryState {
                phase: BoundaryPhase::Idle,
                radius: config.start_radius,
                shrink_started: None,
                tracked: Vec::new(),
                warned: HashSet::new(),
                physics_task: None,
                render_task: None,
            }),
            config,
            world,
            messenger,
        })
    }

    pub fn center(&self) -> &Location {
        &self.center
    }

    pub fn radius(&self) -> f64 {
        self.state.lock().radius
    }

    pub fn phase(&self) -> BoundaryPhase {
        self.state.lock().phase
    }

    /// Begin enforcing at the start radius. Only valid once, from `Idle`.
    pub fn start(self: &Arc<Self>, scheduler: &Scheduler, participants: &[ParticipantId]) -> bool {
        let mut state = self.state.lock();
        if state.phase != BoundaryPhase::Idle {
            return false;
        }
        state.phase = BoundaryPhase::Active;
        state.tracked = participants.to_vec();

        let weak = Arc::downgrade(self);
        state.physics_task = Some(scheduler.run_repeating(
            TICKS_PER_SECOND,
            TICKS_PER_SECOND,
            move || Self::with_live(&weak, |b| b.tick_physics()),
        ));

        let weak = Arc::downgrade(self);
        state.render_task = Some(scheduler.run_repeating(
            0,
            self.config.particle_period_ticks,
            move || {
                Self::with_live(&weak, |b| {
                    b.tick_render();
                })
            },
        ));

        debug!(radius = state.radius, "Boundary started");
        true
    }

    fn with_live(weak: &Weak<Self>, f: impl FnOnce(&Boundary)) -> ControlFlow<()> {
        match weak.upgrade() {
            Some(boundary) if boundary.phase() != BoundaryPhase::Stopped => {
                f(&boundary);
                ControlFlow::Continue(())
            }
            _ => ControlFlow::Break(()),
        }
    }

    /// Start interpolating toward the end radius. Only valid from `Active`.
    pub fn start_shrinking(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != BoundaryPhase::Active {
            return false;
        }
        state.phase = BoundaryPhase::Shrinking;
        state.shrink_started = Some(Instant::now());
        true
    }

    /// Stop enforcement and rendering. Safe to call any number of times.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.phase = BoundaryPhase::Stopped;
        if let Some(task) = state.physics_task.take() {
            task.cancel();
        }
        if let Some(task) = state.render_task.take() {
            task.cancel();
        }
        state.tracked.clear();
        state.warned.clear();
    }

    /// Radius after `elapsed` of shrinking, before monotonic clamping
    pub fn radius_after(&self, elapsed: std::time::Duration) -> f64 {
        let start = self.config.start_radius;
        let end = self.config.end_radius;
        let duration = self.config.shrink_duration.as_secs_f64();
        if duration <= 0.0 {
            return end;
        }
        let t = (elapsed.as_secs_f64() / duration).clamp(0.0, 1.0);
        start + (end - start) * t
    }

    /// Advance the radius and enforce it on every tracked participant
    pub fn tick_physics(&self) {
        let (radius, tracked, mut warned) = {
            let mut state = self.state.lock();
            if matches!(state.phase, BoundaryPhase::Idle | BoundaryPhase::Stopped) {
                return;
            }
            if let Some(started) = state.shrink_started {
                let next = self.radius_after(started.elapsed());
                state.radius = next.min(state.radius).max(self.config.end_radius);
            }
            (state.radius, state.tracked.clone(), state.warned.clone())
        };

        // The world and messenger are called without the state lock held
        for participant in tracked {
            match self.enforce(&mut warned, participant, radius) {
                Ok(()) | Err(WorldError::Offline(_)) => {}
                Err(e) => warn!(%participant, error = %e, "Boundary enforcement failed"),
            }
        }

        let mut state = self.state.lock();
        if state.phase != BoundaryPhase::Stopped {
            state.warned = warned;
        }
    }

    fn enforce(
        &self,
        warned: &mut HashSet<ParticipantId>,
        participant: ParticipantId,
        radius: f64,
    ) -> Result<(), WorldError> {
        let Some(location) = self.world.location(participant) else {
            return Ok(());
        };
        if location.world != self.center.world {
            return Ok(());
        }
        let center = self.center.position();
        let distance = location.horizontal_distance(center);

        if distance > radius {
            if self.world.capabilities().knockback {
                let inward = DVec3::new(center.x - location.x, 0.0, center.z - location.z)
                    .normalize_or_zero()
                    * self.config.knockback_strength;
                self.world
                    .push(participant, DVec3::new(inward.x, KNOCKBACK_LIFT, inward.z))?;
            }
            self.world.damage(participant, self.config.damage)?;
            if warned.insert(participant) {
                self.messenger.send(participant, ServerMsg::OutsideBoundary);
            }
        } else if distance > radius - self.config.warning_distance {
            if warned.insert(participant) {
                self.messenger.send(
                    participant,
                    ServerMsg::BoundaryWarning {
                        distance: radius - distance,
                    },
                );
            }
        } else {
            warned.remove(&participant);
        }
        Ok(())
    }

    /// Draw the edge for nearby participants, returns particles shown
    pub fn tick_render(&self) -> usize {
        if !self.world.capabilities().particles {
            return 0;
        }
        let (radius, tracked) = {
            let state = self.state.lock();
            if matches!(state.phase, BoundaryPhase::Idle | BoundaryPhase::Stopped) {
                return 0;
            }
            (state.radius, state.tracked.clone())
        };

        let viewers: Vec<(ParticipantId, Location)> = tracked
            .into_iter()
            .filter_map(|p| self.world.location(p).map(|l| (p, l)))
            .filter(|(_, l)| l.world == self.center.world)
            .collect();
        if viewers.is_empty() {
            return 0;
        }

        let mut shown = 0;
        for point in Self::edge_points(self.center.position(), radius) {
            for (viewer, location) in &viewers {
                if location.horizontal_distance(point) > self.config.render_distance {
                    continue;
                }
                for height in RENDER_HEIGHTS {
                    let at = DVec3::new(point.x, point.y + height, point.z);
                    if self
                        .world
                        .show_particle(*viewer, &self.center.world, at)
                        .is_ok()
                    {
                        shown += 1;
                    }
                }
            }
        }
        shown
    }

    /// Sample points around the circle, about one every two blocks
    pub fn edge_points(center: DVec3, radius: f64) -> Vec<DVec3> {
        let count = ((TAU * radius / 2.0).ceil() as usize).clamp(MIN_RENDER_POINTS, MAX_RENDER_POINTS);
        (0..count)
            .map(|i| {
                let angle = TAU * i as f64 / count as f64;
                DVec3::new(
                    center.x + radius * angle.cos(),
                    center.y,
                    center.z + radius * angle.sin(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{MemoryWorld, MessageLog};
    use std::sync::OnceLock;
    use std::time::Duration;
    use uuid::Uuid;

    struct Fixture {
        world: Arc<MemoryWorld>,
        log: Arc<MessageLog>,
        boundary: Arc<Boundary>,
        participant: ParticipantId,
    }

    fn fixture(config: BoundaryConfig) -> Fixture {
        let world = Arc::new(MemoryWorld::new());
        let log = Arc::new(MessageLog::new());
        let participant = Uuid::new_v4();
        world.connect(participant, "Alex");
        let boundary = Boundary::new(
            Location::new("world", 0.0, 65.0, 0.0),
            config,
            world.clone(),
            log.clone(),
        );
        Fixture {
            world,
            log,
            boundary,
            participant,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_radius_shrinks_monotonically_to_end() {
        let f = fixture(BoundaryConfig::default());
        assert!(f.boundary.start(&Scheduler::current(), &[f.participant]));
        assert!(f.boundary.start_shrinking());
        assert!(!f.boundary.start_shrinking());

        let mut last = f.boundary.radius();
        assert_eq!(last, 50.0);
        for _ in 0..13 {
            tokio::time::advance(Duration::from_secs(10)).await;
            f.boundary.tick_physics();
            let radius = f.boundary.radius();
            assert!(radius <= last);
            assert!(radius >= 10.0);
            last = radius;
        }
        assert_eq!(f.boundary.radius(), 10.0);
    }

    #[test]
    fn test_radius_interpolates_linearly() {
        let f = fixture(BoundaryConfig::default());
        assert_eq!(f.boundary.radius_after(Duration::ZERO), 50.0);
        assert_eq!(f.boundary.radius_after(Duration::from_secs(60)), 30.0);
        assert_eq!(f.boundary.radius_after(Duration::from_secs(500)), 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outside_participant_is_pushed_and_damaged() {
        let f = fixture(BoundaryConfig::default());
        f.world
            .move_to(f.participant, Location::new("world", 60.0, 65.0, 0.0));
        f.boundary.start(&Scheduler::current(), &[f.participant]);

        f.boundary.tick_physics();
        let velocity = f.world.velocity(f.participant).unwrap();
        assert!(velocity.x < 0.0);
        assert_eq!(velocity.y, 0.3);
        assert_eq!(f.world.health(f.participant), Some(18.0));

        f.boundary.tick_physics();
        let outside = f
            .log
            .count_for(f.participant, |m| *m == ServerMsg::OutsideBoundary);
        assert_eq!(outside, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warning_sent_once_until_back_inside() {
        let f = fixture(BoundaryConfig::default());
        f.world
            .move_to(f.participant, Location::new("world", 47.0, 65.0, 0.0));
        f.boundary.start(&Scheduler::current(), &[f.participant]);
        let warnings = |log: &MessageLog, id| {
            log.count_for(id, |m| matches!(m, ServerMsg::BoundaryWarning { .. }))
        };

        f.boundary.tick_physics();
        f.boundary.tick_physics();
        assert_eq!(warnings(&f.log, f.participant), 1);
        assert_eq!(f.world.health(f.participant), Some(20.0));

        f.world
            .move_to(f.participant, Location::new("world", 5.0, 65.0, 0.0));
        f.boundary.tick_physics();
        f.world
            .move_to(f.participant, Location::new("world", 47.0, 65.0, 0.0));
        f.boundary.tick_physics();
        assert_eq!(warnings(&f.log, f.participant), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_knockback_without_capability() {
        let world = Arc::new(MemoryWorld::new().with_capabilities(crate::world::Capabilities {
            knockback: false,
            particles: false,
            locator_target: false,
        }));
        let log = Arc::new(MessageLog::new());
        let id = Uuid::new_v4();
        world.connect(id, "Alex");
        world.move_to(id, Location::new("world", 80.0, 65.0, 0.0));
        let boundary = Boundary::new(
            Location::new("world", 0.0, 65.0, 0.0),
            BoundaryConfig::default(),
            world.clone(),
            log,
        );
        boundary.start(&Scheduler::current(), &[id]);

        boundary.tick_physics();
        assert_eq!(world.velocity(id), Some(DVec3::ZERO));
        assert_eq!(world.health(id), Some(18.0));
        assert_eq!(boundary.tick_render(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_only_reaches_nearby_viewers() {
        let f = fixture(BoundaryConfig::default());
        f.boundary.start(&Scheduler::current(), &[f.participant]);
        // At the center, every point is 50 blocks away
        assert_eq!(f.boundary.tick_render(), 0);

        f.world
            .move_to(f.participant, Location::new("world", 40.0, 65.0, 0.0));
        assert!(f.boundary.tick_render() > 0);
    }

    #[test]
    fn test_edge_point_count_is_clamped() {
        assert_eq!(Boundary::edge_points(DVec3::ZERO, 1.0).len(), 8);
        assert_eq!(Boundary::edge_points(DVec3::ZERO, 10.0).len(), 32);
        assert_eq!(Boundary::edge_points(DVec3::ZERO, 500.0).len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_final() {
        let f = fixture(BoundaryConfig::default());
        f.boundary.start(&Scheduler::current(), &[f.participant]);
        f.boundary.stop();
        f.boundary.stop();
        assert_eq!(f.boundary.phase(), BoundaryPhase::Stopped);
        assert!(!f.boundary.start(&Scheduler::current(), &[f.participant]));
        assert!(!f.boundary.start_shrinking());

        f.world
            .move_to(f.participant, Location::new("world", 90.0, 65.0, 0.0));
        f.boundary.tick_physics();
        assert_eq!(f.world.health(f.participant), Some(20.0));
    }

    /// Reads the boundary back while delivering each message
    #[derive(Default)]
    struct RadiusEcho {
        boundary: OnceLock<Weak<Boundary>>,
        seen: Mutex<Vec<(ServerMsg, f64, BoundaryPhase)>>,
    }

    impl Messenger for RadiusEcho {
        fn send(&self, _to: ParticipantId, msg: ServerMsg) {
            if let Some(boundary) = self.boundary.get().and_then(Weak::upgrade) {
                let (radius, phase) = (boundary.radius(), boundary.phase());
                self.seen.lock().push((msg, radius, phase));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_messenger_may_query_boundary_during_enforcement() {
        let world = Arc::new(MemoryWorld::new());
        let echo = Arc::new(RadiusEcho::default());
        let id = Uuid::new_v4();
        world.connect(id, "Alex");
        world.move_to(id, Location::new("world", 70.0, 65.0, 0.0));
        let boundary = Boundary::new(
            Location::new("world", 0.0, 65.0, 0.0),
            BoundaryConfig::default(),
            world.clone(),
            echo.clone(),
        );
        echo.boundary.set(Arc::downgrade(&boundary)).unwrap();
        boundary.start(&Scheduler::current(), &[id]);

        boundary.tick_physics();
        assert_eq!(world.health(id), Some(18.0));
        assert_eq!(
            echo.seen.lock().as_slice(),
            &[(ServerMsg::OutsideBoundary, 50.0, BoundaryPhase::Active)]
        );

        // The warning state carried over, so no second notice
        boundary.tick_physics();
        assert_eq!(echo.seen.lock().len(), 1);
        assert_eq!(world.health(id), Some(16.0));
    }
}
