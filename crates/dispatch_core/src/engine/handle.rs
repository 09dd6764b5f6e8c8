//! Caller-facing handle: a cloneable command sender plus the shared
//! connection registry. The engine task behind it owns the world; callers
//! only ever see snapshots.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::info;

use crate::config::DispatchConfig;
use crate::engine::event::{EngineEvent, Reply};
use crate::engine::DispatchEngine;
use crate::error::DispatchError;
use crate::history::{CompletedRideRecord, HistorySink};
use crate::matching::MatchingPolicyResource;
use crate::protocol::{
    Caller, ClientMessage, RideId, RideRequest, RideSnapshot, ServerMessage, UserId,
};
use crate::registry::{ConnectionRegistry, SharedRegistry};

/// Commands consumed by the engine task.
#[derive(Debug)]
pub enum Command {
    Event(EngineEvent),
    GetRide {
        ride: RideId,
        reply: oneshot::Sender<Option<RideSnapshot>>,
    },
    History {
        reply: oneshot::Sender<Vec<CompletedRideRecord>>,
    },
}

/// Start an engine with the default nearest-driver policy and no history
/// export.
pub fn spawn_engine(config: DispatchConfig) -> DispatchHandle {
    spawn_engine_with(config, MatchingPolicyResource::default(), HistorySink::default())
}

pub fn spawn_engine_with(
    config: DispatchConfig,
    policy: MatchingPolicyResource,
    sink: HistorySink,
) -> DispatchHandle {
    let registry = SharedRegistry::new(config.connection_capacity);
    let (commands, inbox) = mpsc::channel(config.command_capacity);
    let engine = DispatchEngine::new(config, registry.clone(), policy, sink);
    tokio::spawn(run_engine(engine, inbox));
    DispatchHandle { commands, registry: registry.0 }
}

/// The engine loop: single consumer of the command channel, single owner of
/// the world. Sleeps until the next command or the nearest timer deadline,
/// whichever comes first.
async fn run_engine(mut engine: DispatchEngine, mut inbox: mpsc::Receiver<Command>) {
    let started = Instant::now();
    info!("dispatch engine started");
    loop {
        let wake_at = engine.next_deadline_ms().map(|ms| started + Duration::from_millis(ms));
        tokio::select! {
            command = inbox.recv() => {
                let Some(command) = command else {
                    break;
                };
                let now_ms = started.elapsed().as_millis() as u64;
                match command {
                    Command::Event(event) => engine.handle_event(now_ms, event),
                    Command::GetRide { ride, reply } => {
                        let _ = reply.send(engine.ride(ride));
                    }
                    Command::History { reply } => {
                        let _ = reply.send(engine.history());
                    }
                }
            }
            () = async {
                match wake_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                let now_ms = started.elapsed().as_millis() as u64;
                engine.advance_to(now_ms);
            }
        }
    }
    info!("dispatch engine stopped");
}

#[derive(Clone)]
pub struct DispatchHandle {
    commands: mpsc::Sender<Command>,
    registry: Arc<ConnectionRegistry>,
}

impl DispatchHandle {
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Attach a user's outbound channel; supersedes any prior registration.
    pub fn register_connection(&self, user: UserId) -> mpsc::Receiver<ServerMessage> {
        self.registry.register(user)
    }

    pub fn unregister_connection(&self, user: &UserId) {
        self.registry.unregister(user);
    }

    pub async fn request_ride(&self, request: RideRequest) -> Result<RideSnapshot, DispatchError> {
        self.transition(|reply| EngineEvent::RideRequested { request, reply }).await
    }

    pub async fn accept_ride(
        &self,
        caller: Caller,
        ride: RideId,
    ) -> Result<RideSnapshot, DispatchError> {
        self.transition(|reply| EngineEvent::DriverAccepted { caller, ride, reply }).await
    }

    pub async fn start_trip(
        &self,
        caller: Caller,
        ride: RideId,
    ) -> Result<RideSnapshot, DispatchError> {
        self.transition(|reply| EngineEvent::TripStarted { caller, ride, reply }).await
    }

    pub async fn complete_trip(
        &self,
        caller: Caller,
        ride: RideId,
    ) -> Result<RideSnapshot, DispatchError> {
        self.transition(|reply| EngineEvent::TripCompleted { caller, ride, reply }).await
    }

    pub async fn cancel_ride(
        &self,
        caller: Caller,
        ride: RideId,
        reason: Option<String>,
    ) -> Result<RideSnapshot, DispatchError> {
        self.transition(|reply| EngineEvent::RideCancelled { caller, ride, reason, reply }).await
    }

    /// Fire-and-forget availability toggle.
    pub async fn set_driver_availability(
        &self,
        driver: UserId,
        available: bool,
    ) -> Result<(), DispatchError> {
        self.send(EngineEvent::DriverAvailability { driver, available }).await
    }

    /// Feed one client stream message into the engine. Stream messages carry
    /// no reply; invalid ones are dropped inside the engine.
    pub async fn submit(&self, user: UserId, message: ClientMessage) -> Result<(), DispatchError> {
        let event = match message {
            ClientMessage::LocationUpdate { lat, lng, timestamp } => {
                EngineEvent::LocationUpdate { driver: user, lat, lng, timestamp }
            }
            ClientMessage::SubscribeRide { ride_id } => {
                EngineEvent::SubscribeRide { user, ride: ride_id }
            }
            ClientMessage::RideRequest { pickup, destination, route } => {
                EngineEvent::RideRequested {
                    request: RideRequest {
                        customer_id: user,
                        pickup,
                        dropoff: destination,
                        distance: route.distance,
                        duration: route.duration,
                    },
                    reply: None,
                }
            }
        };
        self.send(event).await
    }

    pub async fn ride(&self, ride: RideId) -> Result<Option<RideSnapshot>, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::GetRide { ride, reply: tx })
            .await
            .map_err(|_| DispatchError::EngineClosed)?;
        rx.await.map_err(|_| DispatchError::EngineClosed)
    }

    pub async fn history(&self) -> Result<Vec<CompletedRideRecord>, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::History { reply: tx })
            .await
            .map_err(|_| DispatchError::EngineClosed)?;
        rx.await.map_err(|_| DispatchError::EngineClosed)
    }

    async fn send(&self, event: EngineEvent) -> Result<(), DispatchError> {
        self.commands
            .send(Command::Event(event))
            .await
            .map_err(|_| DispatchError::EngineClosed)
    }

    async fn transition(
        &self,
        make_event: impl FnOnce(Option<Reply>) -> EngineEvent,
    ) -> Result<RideSnapshot, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Event(make_event(Some(tx))))
            .await
            .map_err(|_| DispatchError::EngineClosed)?;
        rx.await.map_err(|_| DispatchError::EngineClosed)?
    }
}
