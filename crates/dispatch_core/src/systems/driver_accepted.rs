use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::info;

use crate::clock::EngineClock;
use crate::ecs::{
    ride_snapshot, Driver, DriverDirectory, DriverStatus, ReservationLedger, Ride, RideIndex,
    RideSubscriptions, RideTiming,
};
use crate::engine::event::{CurrentEvent, EngineEvent};
use crate::error::{DispatchError, RideAction};
use crate::protocol::{RideStatus, Role, ServerMessage};
use crate::registry::SharedRegistry;

use super::{fan_out, respond};

/// `Matched -> Accepted`, allowed only to the driver the ride was offered
/// to. Acceptance converts the reservation into an assignment.
pub fn driver_accepted_system(
    mut event: ResMut<CurrentEvent>,
    clock: Res<EngineClock>,
    registry: Res<SharedRegistry>,
    index: Res<RideIndex>,
    directory: Res<DriverDirectory>,
    subscriptions: Res<RideSubscriptions>,
    mut ledger: ResMut<ReservationLedger>,
    mut rides: Query<(&mut Ride, &mut RideTiming)>,
    mut drivers: Query<&mut Driver>,
) {
    let EngineEvent::DriverAccepted { caller, ride: ride_id, .. } = &event.0 else {
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

    let is_offered_driver =
        caller.role == Role::Driver && ride.driver.as_ref() == Some(&caller.user_id);
    if ride.status != RideStatus::Matched || !is_offered_driver {
        respond(
            reply,
            Err(DispatchError::InvalidTransition { from: ride.status, action: RideAction::Accept }),
        );
        return;
    }

    ride.status = RideStatus::Accepted;
    timing.accepted_at = Some(clock.now_ms());
    ledger.release(&caller.user_id, ride_id);
    if let Some(driver_entity) = directory.get(&caller.user_id) {
        if let Ok(mut driver) = drivers.get_mut(driver_entity) {
            driver.status = DriverStatus::OnRide;
        }
    }

    info!(ride = %ride_id, driver = %caller.user_id, "ride accepted");
    let snapshot = ride_snapshot(&ride, &timing, &clock);
    fan_out(
        &registry,
        &subscriptions,
        &ride,
        &ServerMessage::RideAccepted { ride: snapshot.clone() },
    );
    respond(reply, Ok(snapshot));
}
