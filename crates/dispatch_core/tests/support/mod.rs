//! Shared setup for engine integration tests.

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use dispatch_core::config::DispatchConfig;
use dispatch_core::engine::DispatchHandle;
use dispatch_core::protocol::ServerMessage;
use dispatch_core::test_helpers::BASE_COORD;

/// Config pinned to an off-peak hour so fares are surge-free by default.
pub fn off_peak_config() -> DispatchConfig {
    let epoch = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).single().expect("epoch");
    DispatchConfig::default().with_epoch(epoch)
}

/// Bring a driver on shift near the fixture origin. `lat_offset` separates
/// drivers by distance from the pickup.
pub async fn driver_online(handle: &DispatchHandle, id: &str, lat_offset: f64) {
    handle
        .set_driver_availability(id.into(), true)
        .await
        .expect("availability");
    handle
        .submit(
            id.into(),
            dispatch_core::protocol::ClientMessage::LocationUpdate {
                lat: BASE_COORD.lat + lat_offset,
                lng: BASE_COORD.lng,
                timestamp: 1,
            },
        )
        .await
        .expect("location");
}

/// Everything currently buffered on a connection.
pub fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

/// Wire tags of the buffered messages, for order assertions.
pub fn drain_tags(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<&'static str> {
    drain(rx)
        .iter()
        .map(|message| match message {
            ServerMessage::NearbyDrivers { .. } => "nearby_drivers",
            ServerMessage::RideMatched { .. } => "ride_matched",
            ServerMessage::RideUnmatched { .. } => "ride_unmatched",
            ServerMessage::RideAccepted { .. } => "ride_accepted",
            ServerMessage::RideStarted { .. } => "ride_started",
            ServerMessage::RideCompleted { .. } => "ride_completed",
            ServerMessage::RideCancelled { .. } => "ride_cancelled",
            ServerMessage::DriverLocation { .. } => "driver_location",
            ServerMessage::ServiceAreaWarning { .. } => "service_area_warning",
        })
        .collect()
}
