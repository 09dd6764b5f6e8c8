//! Circular service-area boundary. Stateless; safe to evaluate from any
//! thread without synchronization.

use crate::spatial::{haversine_distance_m, Coordinate};

/// A circular geofence around the service area's center.
///
/// Being outside the fence is advisory: location relay and ride progression
/// continue, only a warning is emitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geofence {
    pub center: Coordinate,
    pub radius_m: f64,
}

impl Geofence {
    pub fn new(center: Coordinate, radius_m: f64) -> Self {
        Self { center, radius_m }
    }

    /// True iff `point` lies within the boundary (inclusive).
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.distance_from_center_m(point) <= self.radius_m
    }

    pub fn distance_from_center_m(&self, point: &Coordinate) -> f64 {
        haversine_distance_m(&self.center, point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_is_inside() {
        let fence = Geofence::new(Coordinate::new(52.52, 13.405), 10_000.0);
        assert!(fence.contains(&Coordinate::new(52.52, 13.405)));
    }

    #[test]
    fn boundary_is_inclusive() {
        // One degree of latitude is ~111.2 km; a point 0.05 degrees north is
        // ~5.56 km out.
        let center = Coordinate::new(0.0, 0.0);
        let fence = Geofence::new(center, 5_600.0);
        assert!(fence.contains(&Coordinate::new(0.05, 0.0)));

        let tight = Geofence::new(center, 5_500.0);
        assert!(!tight.contains(&Coordinate::new(0.05, 0.0)));
    }

    #[test]
    fn distance_from_center_matches_haversine() {
        let center = Coordinate::new(52.52, 13.405);
        let fence = Geofence::new(center, 1_000.0);
        let point = Coordinate::new(52.53, 13.41);
        assert_eq!(
            fence.distance_from_center_m(&point),
            haversine_distance_m(&center, &point)
        );
    }
}
