//! Error kinds surfaced by the dispatch core. Nothing here is fatal: every
//! failure resolves to a ride-state outcome or a dropped/retried message.

use std::fmt;

use thiserror::Error;

use crate::protocol::{RideId, RideStatus, UserId};

/// A guarded ride-state action, named in transition errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideAction {
    Accept,
    Start,
    Complete,
    Cancel,
}

impl fmt::Display for RideAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accept => "accept",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The requested `(state, action, caller)` triple is not in the allowed
    /// transition graph. The ride is unchanged.
    #[error("cannot {action} a ride in state {from:?}")]
    InvalidTransition { from: RideStatus, action: RideAction },

    /// A customer may hold at most one non-terminal ride.
    #[error("customer {0} already has an active ride")]
    ActiveRideExists(UserId),

    #[error("unknown ride {0}")]
    UnknownRide(RideId),

    /// Another request reserved the driver first. Recovered internally by
    /// retrying the next candidate; never surfaced to clients.
    #[error("driver {driver} is already reserved for ride {ride}")]
    ReservationConflict { driver: UserId, ride: RideId },

    /// The engine task has shut down and its command channel is closed.
    #[error("dispatch engine is not running")]
    EngineClosed,
}
