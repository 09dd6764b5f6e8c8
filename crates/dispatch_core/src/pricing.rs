//! Fare engine: converts measured distance, duration, and contemporaneous
//! demand into a whole-currency-unit price.
//!
//! Deterministic and side-effect-free; invoked exactly once per ride, at the
//! `InProgress -> Completed` transition.

use chrono::{DateTime, Timelike, Utc};

/// Fare constants. Defaults match the production tariff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingConfig {
    /// Flag-fall charged on every trip.
    pub base_fare: f64,
    /// Rate per kilometer traveled.
    pub per_km_rate: f64,
    /// Rate per minute of trip duration.
    pub per_minute_rate: f64,
    /// Floor applied after surge.
    pub min_fare: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_fare: 100.0,
            per_km_rate: 15.0,
            per_minute_rate: 2.0,
            min_fare: 150.0,
        }
    }
}

/// Peak windows: morning rush 07:00-10:59 and evening rush 16:00-20:59.
pub fn is_peak_hour(hour: u32) -> bool {
    (7..=10).contains(&hour) || (16..=20).contains(&hour)
}

/// Demand-based surge multiplier from the ratio of active rides to available
/// drivers. Only applied inside peak windows.
pub fn demand_multiplier(active_rides: usize, available_drivers: usize) -> f64 {
    let ratio = active_rides as f64 / available_drivers.max(1) as f64;
    if ratio > 0.8 {
        1.5
    } else if ratio > 0.6 {
        1.3
    } else if ratio > 0.4 {
        1.2
    } else {
        1.0
    }
}

/// Compute the fare for a completed trip, rounded to the nearest whole
/// currency unit and never below `min_fare`.
pub fn calculate_fare(
    config: &PricingConfig,
    distance_m: f64,
    duration_s: u32,
    active_rides: usize,
    available_drivers: usize,
    at: DateTime<Utc>,
) -> u64 {
    let distance_km = distance_m / 1_000.0;
    let duration_min = f64::from(duration_s) / 60.0;
    let base = config.base_fare
        + distance_km * config.per_km_rate
        + duration_min * config.per_minute_rate;

    let surge = if is_peak_hour(at.hour()) {
        demand_multiplier(active_rides, available_drivers)
    } else {
        1.0
    };

    (base * surge).max(config.min_fare).round() as u64
}
