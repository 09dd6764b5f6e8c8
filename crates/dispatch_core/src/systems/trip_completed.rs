use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::info;

use crate::clock::EngineClock;
use crate::config::DispatchConfig;
use crate::ecs::{
    ride_snapshot, ActiveParties, Driver, DriverStatus, IdleSince, Ride, RideIndex,
    RideSubscriptions, RideTiming,
};
use crate::engine::event::{CurrentEvent, EngineEvent};
use crate::error::{DispatchError, RideAction};
use crate::history::{CompletedRideRecord, HistorySink, RideHistory};
use crate::pricing::calculate_fare;
use crate::protocol::{RideStatus, Role, ServerMessage};
use crate::registry::SharedRegistry;

use super::{fan_out, respond};

/// `InProgress -> Completed`: prices the trip against demand at this instant,
/// frees the driver, and records the ride in history.
pub fn trip_completed_system(
    mut event: ResMut<CurrentEvent>,
    clock: Res<EngineClock>,
    config: Res<DispatchConfig>,
    registry: Res<SharedRegistry>,
    index: Res<RideIndex>,
    subscriptions: Res<RideSubscriptions>,
    mut parties: ResMut<ActiveParties>,
    mut history: ResMut<RideHistory>,
    sink: Res<HistorySink>,
    mut rides: Query<(&mut Ride, &mut RideTiming)>,
    mut drivers: Query<(&mut Driver, Option<&mut IdleSince>)>,
) {
    let EngineEvent::TripCompleted { caller, ride: ride_id, .. } = &event.0 else {
        return;
    };
    let caller = caller.clone();
    let ride_id = *ride_id;
    let reply = event.0.take_reply();

    let Some(entity) = index.get(ride_id) else {
        respond(reply, Err(DispatchError::UnknownRide(ride_id)));
        return;
    };
    let Ok((mut ride, mut timing)) = rides.get_mut(entity) else {
        respond(reply, Err(DispatchError::UnknownRide(ride_id)));
        return;
    };

    let is_assigned_driver =
        caller.role == Role::Driver && ride.driver.as_ref() == Some(&caller.user_id);
    if ride.status != RideStatus::InProgress || !is_assigned_driver {
        respond(
            reply,
            Err(DispatchError::InvalidTransition {
                from: ride.status,
                action: RideAction::Complete,
            }),
        );
        return;
    }

    // Demand is read before the completing ride and driver are released, so
    // the fare reflects supply at the moment the trip ended.
    let active_rides = parties.active_ride_count();
    let available_drivers = drivers
        .iter()
        .filter(|(driver, _)| driver.status == DriverStatus::Available)
        .count();
    let fare = calculate_fare(
        &config.pricing,
        ride.distance_m,
        ride.duration_s,
        active_rides,
        available_drivers,
        clock.wall_time(),
    );

    ride.status = RideStatus::Completed;
    ride.fare = Some(fare);
    timing.completed_at = Some(clock.now_ms());

    let driver_id = caller.user_id.clone();
    parties.customers.remove(&ride.customer);
    if let Some(driver_entity) = parties.drivers.remove(&driver_id) {
        if let Ok((mut driver, idle)) = drivers.get_mut(driver_entity) {
            driver.status = DriverStatus::Available;
            if let Some(mut idle) = idle {
                idle.0 = clock.now_ms();
            }
        }
    }

    let record = CompletedRideRecord {
        ride_id,
        customer_id: ride.customer.clone(),
        driver_id: Some(driver_id.clone()),
        status: RideStatus::Completed,
        fare: Some(fare),
        distance_m: ride.distance_m,
        duration_s: ride.duration_s,
        cancellation_reason: None,
        requested_at: clock.to_wall(timing.requested_at),
        ended_at: clock.wall_time(),
    };
    history.push(record.clone());
    sink.export(record);

    info!(ride = %ride_id, driver = %driver_id, fare, "trip completed");
    let snapshot = ride_snapshot(&ride, &timing, &clock);
    fan_out(
        &registry,
        &subscriptions,
        &ride,
        &ServerMessage::RideCompleted { ride: snapshot.clone() },
    );
    respond(reply, Ok(snapshot));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Caller;
    use crate::test_helpers::{dispatch, in_progress_ride, test_world};

    #[test]
    fn completion_prices_and_frees_the_driver() {
        let mut world = test_world();
        let ride = in_progress_ride(&mut world, "rider-1", "driver-1");

        let snapshot = dispatch(&mut world, trip_completed_system, |reply| {
            EngineEvent::TripCompleted { caller: Caller::driver("driver-1"), ride, reply }
        })
        .expect("complete");
        assert_eq!(snapshot.status, RideStatus::Completed);
        // Default fixture trip: 10 km, 20 min, off-peak epoch.
        assert_eq!(snapshot.fare, Some(290));

        let parties = world.resource::<ActiveParties>();
        assert!(parties.customers.is_empty());
        assert!(parties.drivers.is_empty());
        assert_eq!(world.resource::<RideHistory>().len(), 1);

        let mut drivers = world.query::<&Driver>();
        let driver = drivers.single(&world);
        assert_eq!(driver.status, DriverStatus::Available);
    }

    #[test]
    fn only_the_assigned_driver_completes() {
        let mut world = test_world();
        let ride = in_progress_ride(&mut world, "rider-1", "driver-1");

        let err = dispatch(&mut world, trip_completed_system, |reply| {
            EngineEvent::TripCompleted { caller: Caller::driver("driver-2"), ride, reply }
        })
        .expect_err("foreign driver");
        assert!(matches!(
            err,
            DispatchError::InvalidTransition {
                from: RideStatus::InProgress,
                action: RideAction::Complete
            }
        ));
        assert!(world.resource::<RideHistory>().is_empty());
    }
}
