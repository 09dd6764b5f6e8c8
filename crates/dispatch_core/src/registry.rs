//! Connection registry: one live outbound channel per user.
//!
//! Writes are best-effort and never block the caller: a full or closed
//! channel drops the message. Registering a user id again supersedes the
//! prior channel, whose consumer observes end-of-stream once buffered
//! messages drain. Operations are keyed per user; a single map lock is held
//! only for the HashMap mutation, never across a send.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bevy_ecs::prelude::Resource;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::protocol::{ServerMessage, UserId};

struct Connection {
    sender: mpsc::Sender<ServerMessage>,
    registered_at: DateTime<Utc>,
}

pub struct ConnectionRegistry {
    capacity: usize,
    inner: Mutex<HashMap<UserId, Connection>>,
}

impl ConnectionRegistry {
    /// `capacity` bounds each connection's outbound buffer.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Connection>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register `user_id`, returning the receiving half of its channel.
    /// Any prior channel for the same id is closed and discarded.
    pub fn register(&self, user_id: UserId) -> mpsc::Receiver<ServerMessage> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let connection = Connection { sender, registered_at: Utc::now() };
        if self.lock().insert(user_id.clone(), connection).is_some() {
            debug!(user = %user_id, "superseded existing connection");
        }
        receiver
    }

    /// Remove the mapping for `user_id`; no-op if absent.
    pub fn unregister(&self, user_id: &UserId) {
        self.lock().remove(user_id);
    }

    pub fn is_registered(&self, user_id: &UserId) -> bool {
        self.lock().contains_key(user_id)
    }

    pub fn registered_at(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.lock().get(user_id).map(|c| c.registered_at)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Best-effort send. Returns `true` on delivery; a missing connection or
    /// a full buffer drops the message instead of blocking.
    pub fn send(&self, user_id: &UserId, message: ServerMessage) -> bool {
        let sender = match self.lock().get(user_id) {
            Some(connection) => connection.sender.clone(),
            None => {
                debug!(user = %user_id, "no live connection, message dropped");
                return false;
            }
        };
        match sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(user = %user_id, "slow consumer, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(user = %user_id, "connection closed, message dropped");
                false
            }
        }
    }

    /// Send to every registered user satisfying `predicate`. Each recipient
    /// is attempted independently; slow or closed consumers are skipped.
    /// Returns the number of deliveries.
    pub fn broadcast<F>(&self, predicate: F, message: &ServerMessage) -> usize
    where
        F: Fn(&UserId) -> bool,
    {
        let targets: Vec<(UserId, mpsc::Sender<ServerMessage>)> = self
            .lock()
            .iter()
            .filter(|(user_id, _)| predicate(user_id))
            .map(|(user_id, connection)| (user_id.clone(), connection.sender.clone()))
            .collect();

        let mut delivered = 0;
        for (user_id, sender) in targets {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => debug!(user = %user_id, "broadcast recipient skipped"),
            }
        }
        delivered
    }
}

/// Handle shared between the engine world and connection tasks.
#[derive(Clone, Resource)]
pub struct SharedRegistry(pub Arc<ConnectionRegistry>);

impl SharedRegistry {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(ConnectionRegistry::new(capacity)))
    }
}

impl std::ops::Deref for SharedRegistry {
    type Target = ConnectionRegistry;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
