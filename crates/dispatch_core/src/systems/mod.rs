//! One system per engine event, composed into the schedule by
//! [crate::engine]. Each system guards on its event, applies the transition,
//! and pushes notifications through the connection registry.

pub mod acceptance_timeout;
pub mod driver_accepted;
pub mod driver_availability;
pub mod location_update;
pub mod matching;
pub mod ride_cancelled;
pub mod ride_requested;
pub mod subscribe_ride;
pub mod trip_completed;
pub mod trip_started;

use tracing::debug;

use crate::ecs::{Ride, RideSubscriptions};
use crate::engine::event::Reply;
use crate::error::DispatchError;
use crate::protocol::{RideSnapshot, ServerMessage, UserId};
use crate::registry::ConnectionRegistry;

/// Deliver a transition outcome to the waiting caller, if one is waiting.
pub(crate) fn respond(reply: Option<Reply>, result: Result<RideSnapshot, DispatchError>) {
    if let Some(reply) = reply {
        if reply.send(result).is_err() {
            debug!("caller gone before reply");
        }
    }
}

/// Send a ride notification to everyone entitled to it: the customer, the
/// assigned driver, and any explicit watchers. Each recipient at most once.
pub(crate) fn fan_out(
    registry: &ConnectionRegistry,
    subscriptions: &RideSubscriptions,
    ride: &Ride,
    message: &ServerMessage,
) {
    let mut recipients: Vec<UserId> = vec![ride.customer.clone()];
    if let Some(driver) = &ride.driver {
        if !recipients.contains(driver) {
            recipients.push(driver.clone());
        }
    }
    for watcher in subscriptions.watchers(ride.id) {
        if !recipients.contains(watcher) {
            recipients.push(watcher.clone());
        }
    }
    for recipient in &recipients {
        registry.send(recipient, message.clone());
    }
}
