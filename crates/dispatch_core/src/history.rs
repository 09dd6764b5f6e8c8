//! Terminal-ride history: an in-world ring of finished rides plus an
//! optional export channel for downstream sinks.

use bevy_ecs::prelude::Resource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::{RideId, RideStatus, UserId};

/// Flat record of a ride that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedRideRecord {
    pub ride_id: RideId,
    pub customer_id: UserId,
    pub driver_id: Option<UserId>,
    pub status: RideStatus,
    pub fare: Option<u64>,
    pub distance_m: f64,
    pub duration_s: u32,
    pub cancellation_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    /// Instant the terminal transition happened.
    pub ended_at: DateTime<Utc>,
}

/// Completed, cancelled, and unmatched rides in terminal order.
#[derive(Debug, Default, Resource)]
pub struct RideHistory {
    records: Vec<CompletedRideRecord>,
}

impl RideHistory {
    pub fn push(&mut self, record: CompletedRideRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[CompletedRideRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Optional export channel. Sends are best-effort: a full or absent sink
/// never blocks the engine.
#[derive(Debug, Default, Resource)]
pub struct HistorySink(Option<mpsc::Sender<CompletedRideRecord>>);

impl HistorySink {
    pub fn new(sender: mpsc::Sender<CompletedRideRecord>) -> Self {
        Self(Some(sender))
    }

    pub fn export(&self, record: CompletedRideRecord) {
        if let Some(sender) = &self.0 {
            if let Err(err) = sender.try_send(record) {
                debug!(%err, "history export dropped");
            }
        }
    }
}
