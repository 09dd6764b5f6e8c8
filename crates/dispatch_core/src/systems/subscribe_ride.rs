use bevy_ecs::prelude::{Res, ResMut};
use tracing::debug;

use crate::ecs::{RideIndex, RideSubscriptions};
use crate::engine::event::{CurrentEvent, EngineEvent};

/// Registers a watcher for a ride's notifications and location stream.
/// Subscriptions to unknown rides are dropped.
pub fn subscribe_ride_system(
    event: Res<CurrentEvent>,
    index: Res<RideIndex>,
    mut subscriptions: ResMut<RideSubscriptions>,
) {
    let EngineEvent::SubscribeRide { user, ride } = &event.0 else {
        return;
    };
    if index.get(*ride).is_none() {
        debug!(user = %user, ride = %ride, "subscription to unknown ride dropped");
        return;
    }
    subscriptions.subscribe(*ride, user.clone());
}
