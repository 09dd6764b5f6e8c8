use bevy_ecs::prelude::{Query, Res, ResMut};
use tracing::{debug, info};

use crate::clock::{EngineClock, TimerKind};
use crate::config::DispatchConfig;
use crate::ecs::{
    ride_snapshot, ActiveParties, Driver, DriverStatus, IdleSince, MatchAttempts, Position,
    ReservationLedger, Ride, RideIndex, RideSubscriptions, RideTiming,
};
use crate::engine::event::{CurrentEvent, EngineEvent};
use crate::history::{CompletedRideRecord, HistorySink, RideHistory};
use crate::matching::{Candidate, MatchingPolicyResource};
use crate::protocol::{RideStatus, ServerMessage};
use crate::registry::SharedRegistry;
use crate::spatial::{haversine_distance_m, DriverIndex};

use super::fan_out;

/// Matching pass for one `Requested` ride: prefilter candidates through the
/// spatial index, rank them, and reserve the first driver the ledger grants.
/// A ride with no grantable candidate becomes `Unmatched`.
pub fn matching_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<EngineClock>,
    config: Res<DispatchConfig>,
    registry: Res<SharedRegistry>,
    policy: Res<MatchingPolicyResource>,
    index: Res<RideIndex>,
    mut driver_index: ResMut<DriverIndex>,
    mut parties: ResMut<ActiveParties>,
    mut ledger: ResMut<ReservationLedger>,
    mut subscriptions: ResMut<RideSubscriptions>,
    mut history: ResMut<RideHistory>,
    sink: Res<HistorySink>,
    mut rides: Query<(&mut Ride, &mut RideTiming, &mut MatchAttempts)>,
    mut drivers: Query<(&mut Driver, &Position, Option<&IdleSince>)>,
) {
    let EngineEvent::TryMatch { ride: ride_id } = event.0 else {
        return;
    };
    let Some(ride_entity) = index.get(ride_id) else {
        return;
    };
    let Ok((mut ride, mut timing, mut attempts)) = rides.get_mut(ride_entity) else {
        return;
    };
    // A timer scheduled before a cancel or accept is stale.
    if ride.status != RideStatus::Requested {
        return;
    }

    let pickup = ride.pickup.coordinate();
    let mut candidates: Vec<Candidate> = Vec::new();
    if let Some(origin) = driver_index.cell_for(&pickup) {
        for entity in driver_index.drivers_near(origin, config.search_radius_m) {
            let Ok((driver, position, idle)) = drivers.get_mut(entity) else {
                continue;
            };
            if driver.status != DriverStatus::Available {
                continue;
            }
            if ledger.held_for(&driver.user_id).is_some() {
                continue;
            }
            if attempts.offered.contains(&driver.user_id) {
                continue;
            }
            let distance_m = haversine_distance_m(&pickup, &position.coordinate);
            if distance_m > config.search_radius_m {
                continue;
            }
            candidates.push(Candidate {
                entity,
                driver_id: driver.user_id.clone(),
                distance_m,
                idle_since_ms: idle.map(|i| i.0).unwrap_or(0),
            });
        }
    }
    policy.rank(&pickup, &mut candidates);

    for candidate in candidates {
        match ledger.reserve(&candidate.driver_id, ride_id) {
            Ok(()) => {
                if let Ok((mut driver, _, _)) = drivers.get_mut(candidate.entity) {
                    driver.status = DriverStatus::Reserved;
                }
                ride.driver = Some(candidate.driver_id.clone());
                ride.status = RideStatus::Matched;
                timing.matched_at = Some(clock.now_ms());
                attempts.offered.push(candidate.driver_id.clone());
                parties.drivers.insert(candidate.driver_id.clone(), ride_entity);
                clock.schedule_in(
                    config.acceptance_timeout_ms(),
                    TimerKind::AcceptanceTimeout {
                        ride: ride_id,
                        driver: candidate.driver_id.clone(),
                    },
                );

                info!(
                    ride = %ride_id,
                    driver = %candidate.driver_id,
                    distance_m = candidate.distance_m,
                    "ride matched"
                );
                let snapshot = ride_snapshot(&ride, &timing, &clock);
                fan_out(
                    &registry,
                    &subscriptions,
                    &ride,
                    &ServerMessage::RideMatched { ride: snapshot },
                );
                return;
            }
            Err(err) => {
                debug!(%err, "candidate lost to a concurrent reservation");
            }
        }
    }

    // No grantable driver left inside the radius.
    ride.status = RideStatus::Unmatched;
    parties.customers.remove(&ride.customer);
    let snapshot = ride_snapshot(&ride, &timing, &clock);
    let record = CompletedRideRecord {
        ride_id,
        customer_id: ride.customer.clone(),
        driver_id: None,
        status: RideStatus::Unmatched,
        fare: None,
        distance_m: ride.distance_m,
        duration_s: ride.duration_s,
        cancellation_reason: None,
        requested_at: clock.to_wall(timing.requested_at),
        ended_at: clock.wall_time(),
    };
    history.push(record.clone());
    sink.export(record);

    info!(ride = %ride_id, customer = %ride.customer, "ride unmatched");
    fan_out(
        &registry,
        &subscriptions,
        &ride,
        &ServerMessage::RideUnmatched { ride: snapshot },
    );
    subscriptions.clear_ride(ride_id);
}
