use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::info;

use crate::clock::{EngineClock, TimerKind};
use crate::ecs::{
    ActiveParties, Driver, DriverDirectory, DriverStatus, ReservationLedger, Ride, RideIndex,
    RideTiming,
};
use crate::engine::event::{CurrentEvent, EngineEvent};
use crate::protocol::RideStatus;

/// The offered driver let the acceptance window lapse: release the
/// reservation and put the ride back in the matching queue. The lapsed
/// driver stays in the ride's offer history and is not offered it again.
///
/// A timeout that fires after the ride moved on (accepted, cancelled,
/// re-matched to someone else) is stale and ignored.
pub fn acceptance_timeout_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<EngineClock>,
    index: Res<RideIndex>,
    directory: Res<DriverDirectory>,
    mut parties: ResMut<ActiveParties>,
    mut ledger: ResMut<ReservationLedger>,
    mut rides: Query<(&mut Ride, &mut RideTiming)>,
    mut drivers: Query<&mut Driver>,
) {
    let EngineEvent::AcceptanceTimeout { ride: ride_id, driver: driver_id } = &event.0 else {
        return;
    };
    let ride_id = *ride_id;
    let driver_id = driver_id.clone();

    let Some(entity) = index.get(ride_id) else {
        return;
    };
    let Ok((mut ride, mut timing)) = rides.get_mut(entity) else {
        return;
    };
    if ride.status != RideStatus::Matched || ride.driver.as_ref() != Some(&driver_id) {
        return;
    }

    ledger.release(&driver_id, ride_id);
    parties.drivers.remove(&driver_id);
    if let Some(driver_entity) = directory.get(&driver_id) {
        if let Ok(mut driver) = drivers.get_mut(driver_entity) {
            if driver.status == DriverStatus::Reserved {
                driver.status = DriverStatus::Available;
            }
        }
    }

    ride.status = RideStatus::Requested;
    ride.driver = None;
    timing.matched_at = None;

    info!(ride = %ride_id, driver = %driver_id, "acceptance window lapsed, re-queueing");
    clock.schedule_in(0, TimerKind::TryMatch(ride_id));
}
