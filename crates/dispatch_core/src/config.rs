//! Boundary configuration for the dispatch engine.

use std::time::Duration;

use bevy_ecs::prelude::Resource;
use chrono::{DateTime, Utc};

use crate::geofence::Geofence;
use crate::pricing::PricingConfig;
use crate::spatial::Coordinate;

/// Default dispatch search radius: 5 km around the pickup.
const DEFAULT_SEARCH_RADIUS_M: f64 = 5_000.0;

/// Default window a held driver has to accept before the reservation is
/// released and the ride re-queued.
const DEFAULT_ACCEPTANCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default service area: Berlin, Germany (approx), 50 km radius.
const DEFAULT_GEOFENCE_CENTER: Coordinate = Coordinate { lat: 52.52, lng: 13.405 };
const DEFAULT_GEOFENCE_RADIUS_M: f64 = 50_000.0;

#[derive(Debug, Clone, Resource)]
pub struct DispatchConfig {
    /// Candidates farther than this from the pickup are never offered.
    pub search_radius_m: f64,
    /// How long a `Matched` ride waits for acceptance before re-queueing.
    pub acceptance_timeout: Duration,
    pub geofence: Geofence,
    pub pricing: PricingConfig,
    /// Per-connection outbound buffer; writes beyond it are dropped.
    pub connection_capacity: usize,
    /// Engine command channel capacity.
    pub command_capacity: usize,
    /// Wall-clock instant corresponding to engine time zero. `None` means
    /// the engine captures `Utc::now()` at start.
    pub epoch: Option<DateTime<Utc>>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            search_radius_m: DEFAULT_SEARCH_RADIUS_M,
            acceptance_timeout: DEFAULT_ACCEPTANCE_TIMEOUT,
            geofence: Geofence::new(DEFAULT_GEOFENCE_CENTER, DEFAULT_GEOFENCE_RADIUS_M),
            pricing: PricingConfig::default(),
            connection_capacity: 64,
            command_capacity: 256,
            epoch: None,
        }
    }
}

impl DispatchConfig {
    pub fn with_search_radius_m(mut self, radius_m: f64) -> Self {
        self.search_radius_m = radius_m;
        self
    }

    pub fn with_acceptance_timeout(mut self, timeout: Duration) -> Self {
        self.acceptance_timeout = timeout;
        self
    }

    pub fn with_geofence(mut self, geofence: Geofence) -> Self {
        self.geofence = geofence;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingConfig) -> Self {
        self.pricing = pricing;
        self
    }

    /// Pin engine time zero to a wall-clock instant (for reproducible
    /// peak-hour behavior in tests and replays).
    pub fn with_epoch(mut self, epoch: DateTime<Utc>) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn acceptance_timeout_ms(&self) -> u64 {
        self.acceptance_timeout.as_millis() as u64
    }
}
