use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::info;

use crate::clock::EngineClock;
use crate::ecs::{
    ride_snapshot, ActiveParties, Driver, DriverDirectory, DriverStatus, IdleSince,
    ReservationLedger, Ride, RideIndex, RideSubscriptions, RideTiming,
};
use crate::engine::event::{CurrentEvent, EngineEvent};
use crate::error::{DispatchError, RideAction};
use crate::history::{CompletedRideRecord, HistorySink, RideHistory};
use crate::protocol::{RideStatus, Role, ServerMessage};
use crate::registry::SharedRegistry;

use super::{fan_out, respond};

/// Cancels a ride before pickup. Allowed from `Requested`, `Matched`, and
/// `Accepted`, by the customer, the assigned driver, or an admin. Any held
/// or assigned driver returns to the available pool.
pub fn ride_cancelled_system(
    mut event: ResMut<CurrentEvent>,
    clock: Res<EngineClock>,
    registry: Res<SharedRegistry>,
    index: Res<RideIndex>,
    directory: Res<DriverDirectory>,
    mut parties: ResMut<ActiveParties>,
    mut ledger: ResMut<ReservationLedger>,
    mut subscriptions: ResMut<RideSubscriptions>,
    mut history: ResMut<RideHistory>,
    sink: Res<HistorySink>,
    mut rides: Query<(&mut Ride, &mut RideTiming)>,
    mut drivers: Query<(&mut Driver, Option<&mut IdleSince>)>,
) {
    let EngineEvent::RideCancelled { caller, ride: ride_id, reason, .. } = &event.0 else {
        return;
    };
    let caller = caller.clone();
    let ride_id = *ride_id;
    let reason = reason.clone();
    let reply = event.0.take_reply();

    let Some(entity) = index.get(ride_id) else {
        respond(reply, Err(DispatchError::UnknownRide(ride_id)));
        return;
    };
    let Ok((mut ride, mut timing)) = rides.get_mut(entity) else {
        respond(reply, Err(DispatchError::UnknownRide(ride_id)));
        return;
    };

    let cancellable = matches!(
        ride.status,
        RideStatus::Requested | RideStatus::Matched | RideStatus::Accepted
    );
    let authorized = match caller.role {
        Role::Customer => ride.customer == caller.user_id,
        Role::Driver => ride.driver.as_ref() == Some(&caller.user_id),
        Role::Admin => true,
    };
    if !cancellable || !authorized {
        respond(
            reply,
            Err(DispatchError::InvalidTransition { from: ride.status, action: RideAction::Cancel }),
        );
        return;
    }

    // Return the held or assigned driver to the pool. A reserved driver
    // keeps its idle clock; a driver already on the ride restarts it.
    if let Some(driver_id) = ride.driver.clone() {
        ledger.release(&driver_id, ride_id);
        parties.drivers.remove(&driver_id);
        if let Some(driver_entity) = directory.get(&driver_id) {
            if let Ok((mut driver, idle)) = drivers.get_mut(driver_entity) {
                if driver.status == DriverStatus::OnRide {
                    if let Some(mut idle) = idle {
                        idle.0 = clock.now_ms();
                    }
                }
                if matches!(driver.status, DriverStatus::Reserved | DriverStatus::OnRide) {
                    driver.status = DriverStatus::Available;
                }
            }
        }
    }

    let from = ride.status;
    ride.status = RideStatus::Cancelled;
    ride.cancellation_reason = reason.clone();
    timing.cancelled_at = Some(clock.now_ms());
    parties.customers.remove(&ride.customer);

    let record = CompletedRideRecord {
        ride_id,
        customer_id: ride.customer.clone(),
        driver_id: ride.driver.clone(),
        status: RideStatus::Cancelled,
        fare: None,
        distance_m: ride.distance_m,
        duration_s: ride.duration_s,
        cancellation_reason: reason.clone(),
        requested_at: clock.to_wall(timing.requested_at),
        ended_at: clock.wall_time(),
    };
    history.push(record.clone());
    sink.export(record);

    info!(ride = %ride_id, by = %caller.user_id, ?from, "ride cancelled");
    let snapshot = ride_snapshot(&ride, &timing, &clock);
    fan_out(
        &registry,
        &subscriptions,
        &ride,
        &ServerMessage::RideCancelled { ride: snapshot.clone(), reason },
    );
    subscriptions.clear_ride(ride_id);
    respond(reply, Ok(snapshot));
}
