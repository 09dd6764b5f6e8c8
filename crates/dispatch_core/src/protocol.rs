//! Wire protocol: identifiers, ride records as the boundary sees them, and
//! the closed set of real-time messages, keyed by a `type` field.
//!
//! Message kinds are an exhaustive enum rather than string dispatch so every
//! consumer matches the full set.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spatial::Coordinate;

/// Identity issued by the external auth collaborator. Opaque to this core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Ride identifier generated by the engine, unique for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RideId(pub u64);

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of the verified identity behind a request, as reported by the
/// external auth collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Driver,
    Admin,
}

/// A verified identity attached to a transition request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn customer(user_id: impl Into<UserId>) -> Self {
        Self { user_id: user_id.into(), role: Role::Customer }
    }

    pub fn driver(user_id: impl Into<UserId>) -> Self {
        Self { user_id: user_id.into(), role: Role::Driver }
    }

    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self { user_id: user_id.into(), role: Role::Admin }
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A labeled coordinate (pickup or dropoff).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

impl Place {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

/// Route figures computed by the external mapping collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEstimate {
    /// Meters.
    pub distance: f64,
    /// Seconds.
    pub duration: u32,
    #[serde(default)]
    pub geometry: Vec<Coordinate>,
}

/// Request-style input for creating a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub customer_id: UserId,
    pub pickup: Place,
    pub dropoff: Place,
    /// Meters, as measured by the mapping collaborator.
    pub distance: f64,
    /// Seconds, as measured by the mapping collaborator.
    pub duration: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Matched,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
    Unmatched,
}

impl RideStatus {
    /// Terminal states permit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Unmatched)
    }
}

/// A ride record as surfaced to callers and in notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSnapshot {
    pub ride_id: RideId,
    pub customer_id: UserId,
    pub driver_id: Option<UserId>,
    pub pickup: Place,
    pub dropoff: Place,
    pub status: RideStatus,
    /// Meters.
    pub distance: f64,
    /// Seconds.
    pub duration: u32,
    pub fare: Option<u64>,
    pub requested_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// One entry of a `nearby_drivers` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyDriver {
    pub id: UserId,
    pub lat: f64,
    pub lng: f64,
}

/// Messages flowing client -> core over a registered channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "location_update")]
    LocationUpdate { lat: f64, lng: f64, timestamp: u64 },
    #[serde(rename = "subscribe_ride")]
    SubscribeRide { ride_id: RideId },
    #[serde(rename = "rideRequest")]
    RideRequest {
        pickup: Place,
        destination: Place,
        route: RouteEstimate,
    },
}

/// Messages flowing core -> client over a registered channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "nearby_drivers")]
    NearbyDrivers { drivers: Vec<NearbyDriver> },
    #[serde(rename = "ride_matched")]
    RideMatched {
        #[serde(flatten)]
        ride: RideSnapshot,
    },
    #[serde(rename = "ride_unmatched")]
    RideUnmatched {
        #[serde(flatten)]
        ride: RideSnapshot,
    },
    #[serde(rename = "ride_accepted")]
    RideAccepted {
        #[serde(flatten)]
        ride: RideSnapshot,
    },
    #[serde(rename = "ride_started")]
    RideStarted {
        #[serde(flatten)]
        ride: RideSnapshot,
    },
    #[serde(rename = "ride_completed")]
    RideCompleted {
        #[serde(flatten)]
        ride: RideSnapshot,
    },
    #[serde(rename = "ride_cancelled")]
    RideCancelled {
        #[serde(flatten)]
        ride: RideSnapshot,
        reason: Option<String>,
    },
    #[serde(rename = "driver_location")]
    DriverLocation {
        ride_id: RideId,
        lat: f64,
        lng: f64,
        timestamp: u64,
    },
    #[serde(rename = "service_area_warning")]
    ServiceAreaWarning {
        lat: f64,
        lng: f64,
        distance_from_center_m: f64,
    },
}
