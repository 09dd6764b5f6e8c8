//! Shared fixtures for system and integration tests: a fully provisioned
//! world, ride builders at each lifecycle stage, and a one-shot event
//! dispatcher.

use bevy_ecs::prelude::{Entity, Schedule, World};
use bevy_ecs::schedule::IntoSystemConfigs;
use chrono::{TimeZone, Utc};

use crate::clock::EngineClock;
use crate::config::DispatchConfig;
use crate::ecs::{
    ActiveParties, Driver, DriverDirectory, DriverStatus, IdleSince, LocationClock, MatchAttempts,
    Position, ReservationLedger, Ride, RideIdSeq, RideIndex, RideSubscriptions, RideTiming,
};
use crate::engine::event::{CurrentEvent, EngineEvent, Reply};
use crate::error::DispatchError;
use crate::history::{HistorySink, RideHistory};
use crate::matching::MatchingPolicyResource;
use crate::protocol::{Place, RideId, RideRequest, RideSnapshot, RideStatus};
use crate::registry::SharedRegistry;
use crate::spatial::{Coordinate, DriverIndex};

/// Fixture origin, at the default service-area center.
pub const BASE_COORD: Coordinate = Coordinate { lat: 52.52, lng: 13.405 };

/// A world with every engine resource installed and the clock pinned to an
/// off-peak hour, so fares carry no surge unless a test asks for one.
pub fn test_world() -> World {
    let epoch = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).single().expect("epoch");
    let config = DispatchConfig::default().with_epoch(epoch);

    let mut world = World::new();
    world.insert_resource(EngineClock::new(epoch));
    world.insert_resource(SharedRegistry::new(config.connection_capacity));
    world.insert_resource(config);
    world.insert_resource(DriverIndex::default());
    world.insert_resource(RideIndex::default());
    world.insert_resource(DriverDirectory::default());
    world.insert_resource(ActiveParties::default());
    world.insert_resource(ReservationLedger::default());
    world.insert_resource(RideSubscriptions::default());
    world.insert_resource(RideIdSeq::default());
    world.insert_resource(RideHistory::default());
    world.insert_resource(HistorySink::default());
    world.insert_resource(MatchingPolicyResource::default());
    world
}

fn place(coordinate: Coordinate, address: &str) -> Place {
    Place { lat: coordinate.lat, lng: coordinate.lng, address: address.to_owned() }
}

/// A 10 km, 20 minute trip from the fixture origin.
pub fn ride_request(customer: &str) -> RideRequest {
    RideRequest {
        customer_id: customer.into(),
        pickup: place(BASE_COORD, "Pickup Street 1"),
        dropoff: place(Coordinate::new(BASE_COORD.lat + 0.09, BASE_COORD.lng), "Dropoff Ave 2"),
        distance: 10_000.0,
        duration: 1_200,
    }
}

/// Enroll an available driver at `coordinate`, registered in the directory
/// and the spatial index.
pub fn spawn_available_driver(world: &mut World, id: &str, coordinate: Coordinate) -> Entity {
    let now = world.resource::<EngineClock>().now_ms();
    let cell = world
        .resource::<DriverIndex>()
        .cell_for(&coordinate)
        .expect("fixture coordinate maps to a cell");
    let entity = world
        .spawn((
            Driver { user_id: id.into(), status: DriverStatus::Available },
            LocationClock::default(),
            IdleSince(now),
            Position { coordinate, cell },
        ))
        .id();
    world.resource_mut::<DriverDirectory>().insert(id.into(), entity);
    world.resource_mut::<DriverIndex>().upsert(entity, cell);
    entity
}

/// Insert a `Requested` ride directly, bypassing the admission system.
pub fn requested_ride(world: &mut World, customer: &str) -> RideId {
    let id = world.resource_mut::<RideIdSeq>().next();
    let now = world.resource::<EngineClock>().now_ms();
    let request = ride_request(customer);
    let ride = Ride {
        id,
        customer: request.customer_id.clone(),
        driver: None,
        pickup: request.pickup,
        dropoff: request.dropoff,
        status: RideStatus::Requested,
        distance_m: request.distance,
        duration_s: request.duration,
        fare: None,
        cancellation_reason: None,
    };
    let timing = RideTiming { requested_at: now, ..Default::default() };
    let entity = world.spawn((ride, timing, MatchAttempts::default())).id();
    world.resource_mut::<RideIndex>().insert(id, entity);
    world.resource_mut::<ActiveParties>().customers.insert(request.customer_id, entity);
    id
}

/// A ride in `Matched`, held by a freshly spawned driver near the pickup.
pub fn matched_ride(world: &mut World, customer: &str, driver: &str) -> RideId {
    let ride_id = requested_ride(world, customer);
    let near_pickup = Coordinate::new(BASE_COORD.lat + 0.001, BASE_COORD.lng);
    let driver_entity = spawn_available_driver(world, driver, near_pickup);

    let ride_entity = world.resource::<RideIndex>().get(ride_id).expect("ride entity");
    let now = world.resource::<EngineClock>().now_ms();
    {
        let mut entry = world.entity_mut(ride_entity);
        let mut ride = entry.get_mut::<Ride>().expect("ride");
        ride.driver = Some(driver.into());
        ride.status = RideStatus::Matched;
    }
    {
        let mut entry = world.entity_mut(ride_entity);
        let mut timing = entry.get_mut::<RideTiming>().expect("timing");
        timing.matched_at = Some(now);
    }
    {
        let mut entry = world.entity_mut(ride_entity);
        let mut attempts = entry.get_mut::<MatchAttempts>().expect("attempts");
        attempts.offered.push(driver.into());
    }
    world
        .resource_mut::<ReservationLedger>()
        .reserve(&driver.into(), ride_id)
        .expect("fixture driver is unreserved");
    world.resource_mut::<ActiveParties>().drivers.insert(driver.into(), ride_entity);
    {
        let mut entry = world.entity_mut(driver_entity);
        let mut state = entry.get_mut::<Driver>().expect("driver");
        state.status = DriverStatus::Reserved;
    }
    ride_id
}

/// A ride in `Accepted`: the reservation is converted into an assignment.
pub fn accepted_ride(world: &mut World, customer: &str, driver: &str) -> RideId {
    let ride_id = matched_ride(world, customer, driver);
    let ride_entity = world.resource::<RideIndex>().get(ride_id).expect("ride entity");
    let now = world.resource::<EngineClock>().now_ms();
    {
        let mut entry = world.entity_mut(ride_entity);
        let mut ride = entry.get_mut::<Ride>().expect("ride");
        ride.status = RideStatus::Accepted;
    }
    {
        let mut entry = world.entity_mut(ride_entity);
        let mut timing = entry.get_mut::<RideTiming>().expect("timing");
        timing.accepted_at = Some(now);
    }
    world.resource_mut::<ReservationLedger>().release(&driver.into(), ride_id);
    let driver_entity = world
        .resource::<DriverDirectory>()
        .get(&driver.into())
        .expect("driver entity");
    {
        let mut entry = world.entity_mut(driver_entity);
        let mut state = entry.get_mut::<Driver>().expect("driver");
        state.status = DriverStatus::OnRide;
    }
    ride_id
}

/// A ride in `InProgress`.
pub fn in_progress_ride(world: &mut World, customer: &str, driver: &str) -> RideId {
    let ride_id = accepted_ride(world, customer, driver);
    let ride_entity = world.resource::<RideIndex>().get(ride_id).expect("ride entity");
    let now = world.resource::<EngineClock>().now_ms();
    {
        let mut entry = world.entity_mut(ride_entity);
        let mut ride = entry.get_mut::<Ride>().expect("ride");
        ride.status = RideStatus::InProgress;
    }
    {
        let mut entry = world.entity_mut(ride_entity);
        let mut timing = entry.get_mut::<RideTiming>().expect("timing");
        timing.started_at = Some(now);
    }
    ride_id
}

/// Run one system against one event and return the caller-visible outcome.
pub fn dispatch<M>(
    world: &mut World,
    system: impl IntoSystemConfigs<M>,
    make_event: impl FnOnce(Option<Reply>) -> EngineEvent,
) -> Result<RideSnapshot, DispatchError> {
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    world.insert_resource(CurrentEvent(make_event(Some(tx))));
    let mut schedule = Schedule::default();
    schedule.add_systems(system);
    schedule.run(world);
    rx.try_recv().expect("transition reply")
}
