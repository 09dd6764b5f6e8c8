use bevy_ecs::prelude::{Commands, ResMut};
use tracing::info;

use crate::clock::{EngineClock, TimerKind};
use crate::ecs::{ride_snapshot, ActiveParties, MatchAttempts, Ride, RideIdSeq, RideIndex, RideTiming};
use crate::engine::event::{CurrentEvent, EngineEvent};
use crate::error::DispatchError;
use crate::protocol::RideStatus;

use super::respond;

/// Admits a new ride: rejects customers who already hold a non-terminal
/// ride, otherwise spawns the ride as `Requested` and schedules an immediate
/// matching pass.
pub fn ride_requested_system(
    mut commands: Commands,
    mut event: ResMut<CurrentEvent>,
    mut clock: ResMut<EngineClock>,
    mut parties: ResMut<ActiveParties>,
    mut index: ResMut<RideIndex>,
    mut seq: ResMut<RideIdSeq>,
) {
    let EngineEvent::RideRequested { request, .. } = &event.0 else {
        return;
    };
    let request = request.clone();
    let reply = event.0.take_reply();

    if parties.customers.contains_key(&request.customer_id) {
        respond(reply, Err(DispatchError::ActiveRideExists(request.customer_id)));
        return;
    }

    let id = seq.next();
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
    let timing = RideTiming { requested_at: clock.now_ms(), ..Default::default() };
    let snapshot = ride_snapshot(&ride, &timing, &clock);

    let entity = commands.spawn((ride, timing, MatchAttempts::default())).id();
    index.insert(id, entity);
    parties.customers.insert(request.customer_id.clone(), entity);
    clock.schedule_in(0, TimerKind::TryMatch(id));

    info!(ride = %id, customer = %request.customer_id, "ride requested");
    respond(reply, Ok(snapshot));
}
