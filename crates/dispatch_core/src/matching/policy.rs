use bevy_ecs::prelude::Entity;

use crate::protocol::UserId;
use crate::spatial::Coordinate;

/// A driver eligible for an offer: available, unreserved, inside the search
/// radius, and not previously offered the same ride.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entity: Entity,
    pub driver_id: UserId,
    /// Exact haversine distance from the pickup, in meters.
    pub distance_m: f64,
    /// Engine-ms instant the driver last became available.
    pub idle_since_ms: u64,
}

/// Orders eligible candidates into offer preference.
///
/// The matcher walks the ranked list front to back and offers the ride to
/// the first driver it can reserve, so later entries are fallbacks after a
/// reservation conflict.
pub trait MatchingPolicy: Send + Sync {
    fn rank(&self, pickup: &Coordinate, candidates: &mut Vec<Candidate>);
}
