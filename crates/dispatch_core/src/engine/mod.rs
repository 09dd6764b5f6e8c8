//! The dispatch engine: a single task owning the world, consuming commands
//! and firing due timers. All state transitions are serialized through this
//! loop, so no transition ever observes a half-applied peer.

pub mod event;
pub mod handle;

use bevy_ecs::prelude::{Res, Schedule, World};
use bevy_ecs::schedule::{apply_deferred, IntoSystemConfigs};
use tracing::debug;

use crate::clock::{EngineClock, TimerKind};
use crate::config::DispatchConfig;
use crate::ecs::{
    ride_snapshot, ActiveParties, DriverDirectory, ReservationLedger, Ride, RideIdSeq, RideIndex,
    RideSubscriptions, RideTiming,
};
use crate::history::{CompletedRideRecord, HistorySink, RideHistory};
use crate::matching::MatchingPolicyResource;
use crate::protocol::{RideId, RideSnapshot};
use crate::registry::SharedRegistry;
use crate::spatial::DriverIndex;
use crate::systems::{
    acceptance_timeout::acceptance_timeout_system, driver_accepted::driver_accepted_system,
    driver_availability::driver_availability_system, location_update::location_update_system,
    matching::matching_system, ride_cancelled::ride_cancelled_system,
    ride_requested::ride_requested_system, subscribe_ride::subscribe_ride_system,
    trip_completed::trip_completed_system, trip_started::trip_started_system,
};

use self::event::{CurrentEvent, EngineEvent, EventKind};

pub use self::handle::{spawn_engine, spawn_engine_with, Command, DispatchHandle};

// Condition functions for each event kind
fn is_ride_requested(event: Option<Res<CurrentEvent>>) -> bool {
    event.map(|e| e.0.kind() == EventKind::RideRequested).unwrap_or(false)
}

fn is_try_match(event: Option<Res<CurrentEvent>>) -> bool {
    event.map(|e| e.0.kind() == EventKind::TryMatch).unwrap_or(false)
}

fn is_driver_accepted(event: Option<Res<CurrentEvent>>) -> bool {
    event.map(|e| e.0.kind() == EventKind::DriverAccepted).unwrap_or(false)
}

fn is_trip_started(event: Option<Res<CurrentEvent>>) -> bool {
    event.map(|e| e.0.kind() == EventKind::TripStarted).unwrap_or(false)
}

fn is_trip_completed(event: Option<Res<CurrentEvent>>) -> bool {
    event.map(|e| e.0.kind() == EventKind::TripCompleted).unwrap_or(false)
}

fn is_ride_cancelled(event: Option<Res<CurrentEvent>>) -> bool {
    event.map(|e| e.0.kind() == EventKind::RideCancelled).unwrap_or(false)
}

fn is_acceptance_timeout(event: Option<Res<CurrentEvent>>) -> bool {
    event.map(|e| e.0.kind() == EventKind::AcceptanceTimeout).unwrap_or(false)
}

fn is_driver_availability(event: Option<Res<CurrentEvent>>) -> bool {
    event.map(|e| e.0.kind() == EventKind::DriverAvailability).unwrap_or(false)
}

fn is_location_update(event: Option<Res<CurrentEvent>>) -> bool {
    event.map(|e| e.0.kind() == EventKind::LocationUpdate).unwrap_or(false)
}

fn is_subscribe_ride(event: Option<Res<CurrentEvent>>) -> bool {
    event.map(|e| e.0.kind() == EventKind::SubscribeRide).unwrap_or(false)
}

/// Builds the dispatch schedule: one system per event kind, gated on the
/// current event, plus [apply_deferred] so entities spawned by one event are
/// queryable by the next.
pub fn dispatch_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.add_systems((
        ride_requested_system.run_if(is_ride_requested),
        matching_system.run_if(is_try_match),
        driver_accepted_system.run_if(is_driver_accepted),
        trip_started_system.run_if(is_trip_started),
        trip_completed_system.run_if(is_trip_completed),
        ride_cancelled_system.run_if(is_ride_cancelled),
        acceptance_timeout_system.run_if(is_acceptance_timeout),
        driver_availability_system.run_if(is_driver_availability),
        location_update_system.run_if(is_location_update),
        subscribe_ride_system.run_if(is_subscribe_ride),
        apply_deferred,
    ));
    schedule
}

/// World plus schedule, stepped one event at a time by the engine loop.
pub struct DispatchEngine {
    world: World,
    schedule: Schedule,
}

impl DispatchEngine {
    pub fn new(
        config: DispatchConfig,
        registry: SharedRegistry,
        policy: MatchingPolicyResource,
        sink: HistorySink,
    ) -> Self {
        let epoch = config.epoch.unwrap_or_else(chrono::Utc::now);
        let mut world = World::new();
        world.insert_resource(EngineClock::new(epoch));
        world.insert_resource(registry);
        world.insert_resource(config);
        world.insert_resource(policy);
        world.insert_resource(sink);
        world.insert_resource(DriverIndex::default());
        world.insert_resource(RideIndex::default());
        world.insert_resource(DriverDirectory::default());
        world.insert_resource(ActiveParties::default());
        world.insert_resource(ReservationLedger::default());
        world.insert_resource(RideSubscriptions::default());
        world.insert_resource(RideIdSeq::default());
        world.insert_resource(RideHistory::default());

        Self { world, schedule: dispatch_schedule() }
    }

    /// Apply one external event at `now_ms`, then fire everything the event
    /// made due (an admission schedules its matching pass at the same
    /// instant).
    pub fn handle_event(&mut self, now_ms: u64, event: EngineEvent) {
        self.world.resource_mut::<EngineClock>().set_now(now_ms);
        self.step(event);
        self.drain_due_timers();
    }

    /// Advance the clock and fire all timers due at or before `now_ms`.
    pub fn advance_to(&mut self, now_ms: u64) {
        self.world.resource_mut::<EngineClock>().set_now(now_ms);
        self.drain_due_timers();
    }

    /// Deadline of the nearest pending timer.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.world.resource::<EngineClock>().next_deadline_ms()
    }

    pub fn ride(&self, id: RideId) -> Option<RideSnapshot> {
        let entity = self.world.resource::<RideIndex>().get(id)?;
        let entity_ref = self.world.entity(entity);
        let ride = entity_ref.get::<Ride>()?;
        let timing = entity_ref.get::<RideTiming>()?;
        let clock = self.world.resource::<EngineClock>();
        Some(ride_snapshot(ride, timing, clock))
    }

    pub fn history(&self) -> Vec<CompletedRideRecord> {
        self.world.resource::<RideHistory>().records().to_vec()
    }

    fn step(&mut self, event: EngineEvent) {
        debug!(kind = ?event.kind(), "engine event");
        self.world.insert_resource(CurrentEvent(event));
        self.schedule.run(&mut self.world);
    }

    fn drain_due_timers(&mut self) {
        while let Some(kind) = self.world.resource_mut::<EngineClock>().pop_due() {
            let event = match kind {
                TimerKind::TryMatch(ride) => EngineEvent::TryMatch { ride },
                TimerKind::AcceptanceTimeout { ride, driver } => {
                    EngineEvent::AcceptanceTimeout { ride, driver }
                }
            };
            self.step(event);
        }
    }
}
