use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::info;

use crate::clock::EngineClock;
use crate::ecs::{ride_snapshot, Ride, RideIndex, RideSubscriptions, RideTiming};
use crate::engine::event::{CurrentEvent, EngineEvent};
use crate::error::{DispatchError, RideAction};
use crate::protocol::{RideStatus, Role, ServerMessage};
use crate::registry::SharedRegistry;

use super::{fan_out, respond};

/// `Accepted -> InProgress`, reported by the assigned driver at pickup.
pub fn trip_started_system(
    mut event: ResMut<CurrentEvent>,
    clock: Res<EngineClock>,
    registry: Res<SharedRegistry>,
    index: Res<RideIndex>,
    subscriptions: Res<RideSubscriptions>,
    mut rides: Query<(&mut Ride, &mut RideTiming)>,
) {
    let EngineEvent::TripStarted { caller, ride: ride_id, .. } = &event.0 else {
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
    if ride.status != RideStatus::Accepted || !is_assigned_driver {
        respond(
            reply,
            Err(DispatchError::InvalidTransition { from: ride.status, action: RideAction::Start }),
        );
        return;
    }

    ride.status = RideStatus::InProgress;
    timing.started_at = Some(clock.now_ms());

    info!(ride = %ride_id, driver = %caller.user_id, "trip started");
    let snapshot = ride_snapshot(&ride, &timing, &clock);
    fan_out(
        &registry,
        &subscriptions,
        &ride,
        &ServerMessage::RideStarted { ride: snapshot.clone() },
    );
    respond(reply, Ok(snapshot));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Caller;
    use crate::test_helpers::{accepted_ride, dispatch, test_world};

    #[test]
    fn assigned_driver_starts_the_trip() {
        let mut world = test_world();
        let ride = accepted_ride(&mut world, "rider-1", "driver-1");

        let snapshot = dispatch(&mut world, trip_started_system, |reply| {
            EngineEvent::TripStarted { caller: Caller::driver("driver-1"), ride, reply }
        })
        .expect("start");
        assert_eq!(snapshot.status, RideStatus::InProgress);
        assert!(snapshot.started_at.is_some());
    }

    #[test]
    fn customer_cannot_start_the_trip() {
        let mut world = test_world();
        let ride = accepted_ride(&mut world, "rider-1", "driver-1");

        let err = dispatch(&mut world, trip_started_system, |reply| {
            EngineEvent::TripStarted { caller: Caller::customer("rider-1"), ride, reply }
        })
        .expect_err("customer start");
        assert!(matches!(
            err,
            DispatchError::InvalidTransition { from: RideStatus::Accepted, action: RideAction::Start }
        ));
    }

    #[test]
    fn start_requires_an_accepted_ride() {
        let mut world = test_world();
        let ride = crate::test_helpers::matched_ride(&mut world, "rider-1", "driver-1");

        let err = dispatch(&mut world, trip_started_system, |reply| {
            EngineEvent::TripStarted { caller: Caller::driver("driver-1"), ride, reply }
        })
        .expect_err("not yet accepted");
        assert!(matches!(
            err,
            DispatchError::InvalidTransition { from: RideStatus::Matched, action: RideAction::Start }
        ));
    }
}
