//! Engine events: everything that mutates ride or driver state arrives here,
//! either from a caller command or a fired timer, and is routed to exactly
//! one system per step.

use bevy_ecs::prelude::Resource;
use tokio::sync::oneshot;

use crate::error::DispatchError;
use crate::protocol::{Caller, RideId, RideRequest, RideSnapshot, UserId};

/// Channel half a caller waits on for the transition outcome.
pub type Reply = oneshot::Sender<Result<RideSnapshot, DispatchError>>;

#[derive(Debug)]
pub enum EngineEvent {
    RideRequested {
        request: RideRequest,
        reply: Option<Reply>,
    },
    /// Matching pass for a `Requested` ride; fired by the timer queue.
    TryMatch { ride: RideId },
    DriverAccepted {
        caller: Caller,
        ride: RideId,
        reply: Option<Reply>,
    },
    TripStarted {
        caller: Caller,
        ride: RideId,
        reply: Option<Reply>,
    },
    TripCompleted {
        caller: Caller,
        ride: RideId,
        reply: Option<Reply>,
    },
    RideCancelled {
        caller: Caller,
        ride: RideId,
        reason: Option<String>,
        reply: Option<Reply>,
    },
    /// The held driver let the offer expire; fired by the timer queue.
    AcceptanceTimeout { ride: RideId, driver: UserId },
    DriverAvailability { driver: UserId, available: bool },
    LocationUpdate {
        driver: UserId,
        lat: f64,
        lng: f64,
        timestamp: u64,
    },
    SubscribeRide { user: UserId, ride: RideId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RideRequested,
    TryMatch,
    DriverAccepted,
    TripStarted,
    TripCompleted,
    RideCancelled,
    AcceptanceTimeout,
    DriverAvailability,
    LocationUpdate,
    SubscribeRide,
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RideRequested { .. } => EventKind::RideRequested,
            Self::TryMatch { .. } => EventKind::TryMatch,
            Self::DriverAccepted { .. } => EventKind::DriverAccepted,
            Self::TripStarted { .. } => EventKind::TripStarted,
            Self::TripCompleted { .. } => EventKind::TripCompleted,
            Self::RideCancelled { .. } => EventKind::RideCancelled,
            Self::AcceptanceTimeout { .. } => EventKind::AcceptanceTimeout,
            Self::DriverAvailability { .. } => EventKind::DriverAvailability,
            Self::LocationUpdate { .. } => EventKind::LocationUpdate,
            Self::SubscribeRide { .. } => EventKind::SubscribeRide,
        }
    }

    /// Take the reply channel out of the event, if it carries one. Systems
    /// call this once they know the outcome.
    pub fn take_reply(&mut self) -> Option<Reply> {
        match self {
            Self::RideRequested { reply, .. }
            | Self::DriverAccepted { reply, .. }
            | Self::TripStarted { reply, .. }
            | Self::TripCompleted { reply, .. }
            | Self::RideCancelled { reply, .. } => reply.take(),
            _ => None,
        }
    }
}

/// The event the schedule is currently reacting to. Inserted by the engine
/// loop before each schedule run.
#[derive(Debug, Resource)]
pub struct CurrentEvent(pub EngineEvent);
