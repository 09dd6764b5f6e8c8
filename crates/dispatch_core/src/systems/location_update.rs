use bevy_ecs::prelude::{Commands, Query, Res, ResMut};
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::ecs::{ActiveParties, Driver, DriverDirectory, DriverStatus, LocationClock, Position, Ride, RideSubscriptions};
use crate::engine::event::{CurrentEvent, EngineEvent};
use crate::protocol::{NearbyDriver, RideStatus, ServerMessage};
use crate::registry::SharedRegistry;
use crate::spatial::{Coordinate, DriverIndex};

/// Ingests one driver location sample. Stale timestamps and unparseable
/// coordinates are dropped. Accepted samples update the spatial index, then
/// either stream to the driver's active ride or refresh the idle-customer
/// map view.
///
/// Samples outside the service area still update the position; leaving the
/// area only raises an advisory warning, once per excursion.
pub fn location_update_system(
    mut commands: Commands,
    event: Res<CurrentEvent>,
    config: Res<DispatchConfig>,
    registry: Res<SharedRegistry>,
    directory: Res<DriverDirectory>,
    parties: Res<ActiveParties>,
    subscriptions: Res<RideSubscriptions>,
    mut driver_index: ResMut<DriverIndex>,
    mut drivers: Query<(&Driver, &mut LocationClock, Option<&mut Position>)>,
    rides: Query<&Ride>,
) {
    let EngineEvent::LocationUpdate { driver: driver_id, lat, lng, timestamp } = &event.0 else {
        return;
    };
    let driver_id = driver_id.clone();
    let (lat, lng, timestamp) = (*lat, *lng, *timestamp);

    let Some(entity) = directory.get(&driver_id) else {
        debug!(driver = %driver_id, "location from unenrolled driver dropped");
        return;
    };

    // The active engagement, if any, decides where this sample flows.
    let active = parties
        .drivers
        .get(&driver_id)
        .and_then(|ride_entity| rides.get(*ride_entity).ok())
        .filter(|ride| matches!(ride.status, RideStatus::Accepted | RideStatus::InProgress))
        .map(|ride| (ride.id, ride.customer.clone()));

    let Ok((driver, mut location_clock, position)) = drivers.get_mut(entity) else {
        return;
    };
    if location_clock.last_timestamp.is_some_and(|last| timestamp <= last) {
        debug!(driver = %driver_id, timestamp, "stale location sample dropped");
        return;
    }
    let coordinate = Coordinate::new(lat, lng);
    let Some(cell) = driver_index.cell_for(&coordinate) else {
        debug!(driver = %driver_id, lat, lng, "unmappable coordinate dropped");
        return;
    };
    location_clock.last_timestamp = Some(timestamp);

    let inside = config.geofence.contains(&coordinate);
    if !inside && !location_clock.outside_service_area {
        let distance_from_center_m = config.geofence.distance_from_center_m(&coordinate);
        warn!(driver = %driver_id, distance_from_center_m, "driver left the service area");
        let warning = ServerMessage::ServiceAreaWarning { lat, lng, distance_from_center_m };
        registry.send(&driver_id, warning.clone());
        if let Some((_, customer)) = &active {
            registry.send(customer, warning);
        }
    }
    location_clock.outside_service_area = !inside;

    let status = driver.status;
    let moved = driver_index.upsert(entity, cell);
    match position {
        Some(mut position) => {
            position.coordinate = coordinate;
            position.cell = cell;
        }
        None => {
            commands.entity(entity).insert(Position { coordinate, cell });
        }
    }

    if let Some((ride_id, customer)) = active {
        let message = ServerMessage::DriverLocation { ride_id, lat, lng, timestamp };
        registry.send(&customer, message.clone());
        for watcher in subscriptions.watchers(ride_id) {
            if *watcher != driver_id && *watcher != customer {
                registry.send(watcher, message.clone());
            }
        }
        return;
    }

    // Idle customers get a fresh map view whenever an available driver
    // changes cell; same-cell jitter stays local.
    if status == DriverStatus::Available && moved {
        let mut payload =
            vec![NearbyDriver { id: driver_id.clone(), lat: coordinate.lat, lng: coordinate.lng }];
        for (other, _, other_position) in drivers.iter() {
            if other.user_id == driver_id || other.status != DriverStatus::Available {
                continue;
            }
            if let Some(other_position) = other_position {
                payload.push(NearbyDriver {
                    id: other.user_id.clone(),
                    lat: other_position.coordinate.lat,
                    lng: other_position.coordinate.lng,
                });
            }
        }
        let message = ServerMessage::NearbyDrivers { drivers: payload };
        registry.broadcast(
            |user| !directory.contains(user) && !parties.customers.contains_key(user),
            &message,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::prelude::{Schedule, World};

    use crate::test_helpers::{accepted_ride, spawn_available_driver, test_world, BASE_COORD};

    fn send_location(world: &mut World, driver: &str, lat: f64, lng: f64, timestamp: u64) {
        world.insert_resource(CurrentEvent(EngineEvent::LocationUpdate {
            driver: driver.into(),
            lat,
            lng,
            timestamp,
        }));
        let mut schedule = Schedule::default();
        schedule.add_systems(location_update_system);
        schedule.run(world);
    }

    #[test]
    fn stale_samples_are_dropped() {
        let mut world = test_world();
        spawn_available_driver(&mut world, "driver-1", BASE_COORD);

        send_location(&mut world, "driver-1", BASE_COORD.lat, BASE_COORD.lng, 10);
        send_location(&mut world, "driver-1", BASE_COORD.lat + 0.01, BASE_COORD.lng, 10);

        let mut positions = world.query::<&Position>();
        let position = positions.single(&world);
        assert_eq!(position.coordinate.lat, BASE_COORD.lat);
    }

    #[test]
    fn on_ride_samples_stream_to_the_customer_only() {
        let mut world = test_world();
        let ride = accepted_ride(&mut world, "rider-1", "driver-1");

        let registry = world.resource::<SharedRegistry>().clone();
        let mut rider_rx = registry.register("rider-1".into());
        let mut bystander_rx = registry.register("rider-2".into());

        send_location(&mut world, "driver-1", BASE_COORD.lat + 0.001, BASE_COORD.lng, 50);

        match rider_rx.try_recv().expect("rider message") {
            ServerMessage::DriverLocation { ride_id, timestamp, .. } => {
                assert_eq!(ride_id, ride);
                assert_eq!(timestamp, 50);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(bystander_rx.try_recv().is_err(), "bystander saw a private stream");
    }

    #[test]
    fn leaving_the_service_area_warns_once() {
        let mut world = test_world();
        spawn_available_driver(&mut world, "driver-1", BASE_COORD);
        let registry = world.resource::<SharedRegistry>().clone();
        let mut driver_rx = registry.register("driver-1".into());

        // Roughly 110 km north of the center, well past the 50 km fence.
        send_location(&mut world, "driver-1", BASE_COORD.lat + 1.0, BASE_COORD.lng, 10);
        send_location(&mut world, "driver-1", BASE_COORD.lat + 1.0, BASE_COORD.lng + 0.001, 11);

        let mut warnings = 0;
        while let Ok(message) = driver_rx.try_recv() {
            if matches!(message, ServerMessage::ServiceAreaWarning { .. }) {
                warnings += 1;
            }
        }
        assert_eq!(warnings, 1);

        // Position still updates while outside.
        let mut positions = world.query::<&Position>();
        assert_eq!(positions.single(&world).coordinate.lat, BASE_COORD.lat + 1.0);
    }

    #[test]
    fn available_driver_movement_refreshes_idle_customers() {
        let mut world = test_world();
        spawn_available_driver(&mut world, "driver-1", BASE_COORD);
        let registry = world.resource::<SharedRegistry>().clone();
        let mut idle_customer_rx = registry.register("rider-idle".into());

        send_location(&mut world, "driver-1", BASE_COORD.lat + 0.01, BASE_COORD.lng, 20);

        match idle_customer_rx.try_recv().expect("map refresh") {
            ServerMessage::NearbyDrivers { drivers } => {
                assert_eq!(drivers.len(), 1);
                assert_eq!(drivers[0].id.as_str(), "driver-1");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
