//! ECS components and shared tables for rides and drivers.
//!
//! Rides and drivers are entities; the lookup tables (ride index, driver
//! directory, active-party map, reservation ledger) are resources owned by
//! the engine world, never ambient globals.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use bevy_ecs::prelude::{Component, Entity, Resource};
use h3o::CellIndex;

use crate::clock::EngineClock;
use crate::error::DispatchError;
use crate::protocol::{Place, RideId, RideSnapshot, RideStatus, UserId};
use crate::spatial::Coordinate;

/// One ride transaction, mutated only by the lifecycle systems.
#[derive(Debug, Clone, Component)]
pub struct Ride {
    pub id: RideId,
    pub customer: UserId,
    pub driver: Option<UserId>,
    pub pickup: Place,
    pub dropoff: Place,
    pub status: RideStatus,
    /// Meters, measured by the external mapping collaborator.
    pub distance_m: f64,
    /// Seconds, measured by the external mapping collaborator.
    pub duration_s: u32,
    pub fare: Option<u64>,
    pub cancellation_reason: Option<String>,
}

/// Engine-ms instants recorded at each successful transition.
#[derive(Debug, Clone, Copy, Default, Component)]
pub struct RideTiming {
    pub requested_at: u64,
    pub matched_at: Option<u64>,
    pub accepted_at: Option<u64>,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub cancelled_at: Option<u64>,
}

/// Drivers already offered this ride; excluded from later matching passes so
/// a re-queued ride makes progress.
#[derive(Debug, Clone, Default, Component)]
pub struct MatchAttempts {
    pub offered: Vec<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Available,
    /// Held for a `Matched` ride until acceptance or timeout.
    Reserved,
    OnRide,
    Offline,
}

#[derive(Debug, Clone, Component)]
pub struct Driver {
    pub user_id: UserId,
    pub status: DriverStatus,
}

/// Last-known position, set by accepted location samples.
#[derive(Debug, Clone, Copy, Component)]
pub struct Position {
    pub coordinate: Coordinate,
    pub cell: CellIndex,
}

/// Per-driver staleness clock and geofence flag for the location stream.
#[derive(Debug, Clone, Copy, Default, Component)]
pub struct LocationClock {
    pub last_timestamp: Option<u64>,
    pub outside_service_area: bool,
}

/// Engine-ms since the driver last became available; matching breaks distance
/// ties in favor of the longest-idle driver.
#[derive(Debug, Clone, Copy, Component)]
pub struct IdleSince(pub u64);

#[derive(Debug, Default, Resource)]
pub struct RideIndex(HashMap<RideId, Entity>);

impl RideIndex {
    pub fn insert(&mut self, id: RideId, entity: Entity) {
        self.0.insert(id, entity);
    }

    pub fn get(&self, id: RideId) -> Option<Entity> {
        self.0.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// User id -> driver entity for everyone who ever declared availability.
#[derive(Debug, Default, Resource)]
pub struct DriverDirectory(HashMap<UserId, Entity>);

impl DriverDirectory {
    pub fn insert(&mut self, user_id: UserId, entity: Entity) {
        self.0.insert(user_id, entity);
    }

    pub fn get(&self, user_id: &UserId) -> Option<Entity> {
        self.0.get(user_id).copied()
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.0.contains_key(user_id)
    }
}

/// Who currently holds a non-terminal ride. At most one entry per customer
/// and one per driver, by invariant.
#[derive(Debug, Default, Resource)]
pub struct ActiveParties {
    pub customers: HashMap<UserId, Entity>,
    pub drivers: HashMap<UserId, Entity>,
}

impl ActiveParties {
    /// Number of non-terminal rides (each holds exactly one customer entry).
    pub fn active_ride_count(&self) -> usize {
        self.customers.len()
    }
}

/// The one table requiring reserve-if-unreserved semantics: a driver held
/// here cannot be offered to a second concurrent request.
#[derive(Debug, Default, Resource)]
pub struct ReservationLedger(HashMap<UserId, RideId>);

impl ReservationLedger {
    /// Atomically reserve `driver` for `ride`; fails if any reservation for
    /// the driver exists.
    pub fn reserve(&mut self, driver: &UserId, ride: RideId) -> Result<(), DispatchError> {
        match self.0.entry(driver.clone()) {
            Entry::Occupied(held) => Err(DispatchError::ReservationConflict {
                driver: driver.clone(),
                ride: *held.get(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(ride);
                Ok(())
            }
        }
    }

    /// Release the reservation, but only if it is held for `ride`. Returns
    /// whether a reservation was removed.
    pub fn release(&mut self, driver: &UserId, ride: RideId) -> bool {
        match self.0.get(driver) {
            Some(held) if *held == ride => {
                self.0.remove(driver);
                true
            }
            _ => false,
        }
    }

    pub fn held_for(&self, driver: &UserId) -> Option<RideId> {
        self.0.get(driver).copied()
    }
}

/// Watchers registered through `subscribe_ride`, in addition to the ride's
/// own parties.
#[derive(Debug, Default, Resource)]
pub struct RideSubscriptions(HashMap<RideId, Vec<UserId>>);

impl RideSubscriptions {
    pub fn subscribe(&mut self, ride: RideId, user: UserId) {
        let watchers = self.0.entry(ride).or_default();
        if !watchers.contains(&user) {
            watchers.push(user);
        }
    }

    pub fn watchers(&self, ride: RideId) -> &[UserId] {
        self.0.get(&ride).map(Vec::as_slice).unwrap_or_default()
    }

    /// Drop all watchers once a ride reaches a terminal state.
    pub fn clear_ride(&mut self, ride: RideId) {
        self.0.remove(&ride);
    }
}

/// Monotonic ride id source.
#[derive(Debug, Default, Resource)]
pub struct RideIdSeq(u64);

impl RideIdSeq {
    pub fn next(&mut self) -> RideId {
        self.0 += 1;
        RideId(self.0)
    }
}

/// Boundary view of a ride, with engine instants mapped to wall time.
pub fn ride_snapshot(ride: &Ride, timing: &RideTiming, clock: &EngineClock) -> RideSnapshot {
    RideSnapshot {
        ride_id: ride.id,
        customer_id: ride.customer.clone(),
        driver_id: ride.driver.clone(),
        pickup: ride.pickup.clone(),
        dropoff: ride.dropoff.clone(),
        status: ride.status,
        distance: ride.distance_m,
        duration: ride.duration_s,
        fare: ride.fare,
        requested_at: clock.to_wall(timing.requested_at),
        matched_at: timing.matched_at.map(|t| clock.to_wall(t)),
        accepted_at: timing.accepted_at.map(|t| clock.to_wall(t)),
        started_at: timing.started_at.map(|t| clock.to_wall(t)),
        completed_at: timing.completed_at.map(|t| clock.to_wall(t)),
        cancelled_at: timing.cancelled_at.map(|t| clock.to_wall(t)),
    }
}
