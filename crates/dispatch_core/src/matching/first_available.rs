use super::policy::{Candidate, MatchingPolicy};
use crate::spatial::Coordinate;

/// Offers the ride in candidate arrival order, ignoring distance.
///
/// Useful as a baseline against [`super::NearestDriver`] and in tests that
/// want full control over offer order.
#[derive(Debug, Default)]
pub struct FirstAvailable;

impl MatchingPolicy for FirstAvailable {
    fn rank(&self, _pickup: &Coordinate, _candidates: &mut Vec<Candidate>) {}
}
