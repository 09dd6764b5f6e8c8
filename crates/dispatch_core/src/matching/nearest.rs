use super::policy::{Candidate, MatchingPolicy};
use crate::spatial::Coordinate;

/// Nearest driver first; among equidistant drivers, longest idle first.
///
/// Deterministic for a fixed candidate set, so repeated matching passes over
/// unchanged drivers produce the same offer order.
#[derive(Debug, Default)]
pub struct NearestDriver;

impl MatchingPolicy for NearestDriver {
    fn rank(&self, _pickup: &Coordinate, candidates: &mut Vec<Candidate>) {
        candidates.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.idle_since_ms.cmp(&b.idle_since_ms))
                .then_with(|| a.driver_id.as_str().cmp(b.driver_id.as_str()))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::prelude::Entity;
    use crate::protocol::UserId;

    fn candidate(id: &str, distance_m: f64, idle_since_ms: u64) -> Candidate {
        Candidate {
            entity: Entity::from_raw(1),
            driver_id: UserId::from(id),
            distance_m,
            idle_since_ms,
        }
    }

    #[test]
    fn closest_driver_ranks_first() {
        let pickup = Coordinate::new(52.52, 13.405);
        let mut candidates = vec![
            candidate("far", 3_000.0, 0),
            candidate("near", 400.0, 0),
            candidate("mid", 1_200.0, 0),
        ];
        NearestDriver.rank(&pickup, &mut candidates);
        let order: Vec<&str> = candidates.iter().map(|c| c.driver_id.as_str()).collect();
        assert_eq!(order, ["near", "mid", "far"]);
    }

    #[test]
    fn distance_ties_break_toward_longest_idle() {
        let pickup = Coordinate::new(52.52, 13.405);
        let mut candidates = vec![
            candidate("fresh", 500.0, 9_000),
            candidate("waiting", 500.0, 1_000),
        ];
        NearestDriver.rank(&pickup, &mut candidates);
        assert_eq!(candidates[0].driver_id.as_str(), "waiting");
    }
}
