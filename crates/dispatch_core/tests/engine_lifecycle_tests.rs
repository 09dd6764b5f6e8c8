mod support;

use std::time::Duration;

use dispatch_core::engine::spawn_engine;
use dispatch_core::error::DispatchError;
use dispatch_core::protocol::{Caller, ClientMessage, RideStatus, ServerMessage};
use dispatch_core::test_helpers::ride_request;

use support::{drain, drain_tags, driver_online, off_peak_config};

#[tokio::test(start_paused = true)]
async fn full_ride_lifecycle_end_to_end() {
    let handle = spawn_engine(off_peak_config());
    let mut rider_rx = handle.register_connection("rider-1".into());
    let mut driver_rx = handle.register_connection("driver-1".into());

    driver_online(&handle, "driver-1", 0.001).await;
    // The idle rider sees the driver appear on the map.
    assert_eq!(drain_tags(&mut rider_rx), ["nearby_drivers"]);

    let requested = handle.request_ride(ride_request("rider-1")).await.expect("request");
    assert_eq!(requested.status, RideStatus::Requested);

    // Matching ran in the same engine step.
    let matched = handle.ride(requested.ride_id).await.expect("query").expect("ride");
    assert_eq!(matched.status, RideStatus::Matched);
    assert_eq!(matched.driver_id.as_ref().map(|d| d.as_str()), Some("driver-1"));

    let accepted = handle
        .accept_ride(Caller::driver("driver-1"), requested.ride_id)
        .await
        .expect("accept");
    assert_eq!(accepted.status, RideStatus::Accepted);

    // An on-ride location sample streams to the rider, not the map.
    handle
        .submit(
            "driver-1".into(),
            ClientMessage::LocationUpdate { lat: 52.5205, lng: 13.4051, timestamp: 2 },
        )
        .await
        .expect("location");

    let started = handle
        .start_trip(Caller::driver("driver-1"), requested.ride_id)
        .await
        .expect("start");
    assert_eq!(started.status, RideStatus::InProgress);

    let completed = handle
        .complete_trip(Caller::driver("driver-1"), requested.ride_id)
        .await
        .expect("complete");
    assert_eq!(completed.status, RideStatus::Completed);
    // 10 km + 20 min at the default tariff, off-peak.
    assert_eq!(completed.fare, Some(290));

    assert_eq!(
        drain_tags(&mut rider_rx),
        ["ride_matched", "ride_accepted", "driver_location", "ride_started", "ride_completed"]
    );
    // The driver gets the lifecycle too, minus its own location echo.
    assert_eq!(
        drain_tags(&mut driver_rx),
        ["ride_matched", "ride_accepted", "ride_started", "ride_completed"]
    );

    let history = handle.history().await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, RideStatus::Completed);
    assert_eq!(history[0].fare, Some(290));
}

#[tokio::test(start_paused = true)]
async fn one_driver_cannot_serve_two_rides() {
    let handle = spawn_engine(off_peak_config());
    driver_online(&handle, "driver-1", 0.001).await;

    let first = handle.request_ride(ride_request("rider-1")).await.expect("first");
    let second = handle.request_ride(ride_request("rider-2")).await.expect("second");

    let first = handle.ride(first.ride_id).await.expect("query").expect("ride");
    let second = handle.ride(second.ride_id).await.expect("query").expect("ride");
    assert_eq!(first.status, RideStatus::Matched);
    assert_eq!(second.status, RideStatus::Unmatched);
}

#[tokio::test(start_paused = true)]
async fn a_customer_holds_at_most_one_active_ride() {
    let handle = spawn_engine(off_peak_config());
    driver_online(&handle, "driver-1", 0.001).await;

    handle.request_ride(ride_request("rider-1")).await.expect("first");
    let err = handle.request_ride(ride_request("rider-1")).await.expect_err("second");
    assert!(matches!(err, DispatchError::ActiveRideExists(_)));
}

#[tokio::test(start_paused = true)]
async fn lapsed_offer_moves_to_the_next_driver() {
    let handle = spawn_engine(off_peak_config());
    driver_online(&handle, "driver-close", 0.001).await;
    driver_online(&handle, "driver-backup", 0.01).await;

    let ride = handle.request_ride(ride_request("rider-1")).await.expect("request");
    let matched = handle.ride(ride.ride_id).await.expect("query").expect("ride");
    assert_eq!(matched.driver_id.as_ref().map(|d| d.as_str()), Some("driver-close"));

    // Nobody accepts; let the 30 s window lapse.
    tokio::time::sleep(Duration::from_secs(31)).await;

    let rematched = handle.ride(ride.ride_id).await.expect("query").expect("ride");
    assert_eq!(rematched.status, RideStatus::Matched);
    assert_eq!(rematched.driver_id.as_ref().map(|d| d.as_str()), Some("driver-backup"));

    // The lapsed driver is free for other work.
    let other = handle.request_ride(ride_request("rider-2")).await.expect("request");
    let other = handle.ride(other.ride_id).await.expect("query").expect("ride");
    assert_eq!(other.driver_id.as_ref().map(|d| d.as_str()), Some("driver-close"));
}

#[tokio::test(start_paused = true)]
async fn exhausting_all_offers_ends_unmatched() {
    let handle = spawn_engine(off_peak_config());
    let mut rider_rx = handle.register_connection("rider-1".into());
    driver_online(&handle, "driver-1", 0.001).await;

    let ride = handle.request_ride(ride_request("rider-1")).await.expect("request");
    tokio::time::sleep(Duration::from_secs(31)).await;

    let unmatched = handle.ride(ride.ride_id).await.expect("query").expect("ride");
    assert_eq!(unmatched.status, RideStatus::Unmatched);

    let tags = drain_tags(&mut rider_rx);
    assert!(tags.contains(&"ride_matched"));
    assert!(tags.contains(&"ride_unmatched"));

    // Terminal rides free both parties.
    handle.request_ride(ride_request("rider-1")).await.expect("fresh request");
}

#[tokio::test(start_paused = true)]
async fn cancellation_returns_the_driver_to_the_pool() {
    let handle = spawn_engine(off_peak_config());
    driver_online(&handle, "driver-1", 0.001).await;

    let ride = handle.request_ride(ride_request("rider-1")).await.expect("request");
    let cancelled = handle
        .cancel_ride(Caller::customer("rider-1"), ride.ride_id, Some("changed plans".into()))
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, RideStatus::Cancelled);

    // The released driver serves the next request.
    let next = handle.request_ride(ride_request("rider-2")).await.expect("request");
    let next = handle.ride(next.ride_id).await.expect("query").expect("ride");
    assert_eq!(next.status, RideStatus::Matched);
    assert_eq!(next.driver_id.as_ref().map(|d| d.as_str()), Some("driver-1"));

    let history = handle.history().await.expect("history");
    assert_eq!(history[0].status, RideStatus::Cancelled);
    assert_eq!(history[0].cancellation_reason.as_deref(), Some("changed plans"));
}

#[tokio::test(start_paused = true)]
async fn watchers_receive_ride_notifications() {
    let handle = spawn_engine(off_peak_config());
    let mut watcher_rx = handle.register_connection("ops-1".into());
    driver_online(&handle, "driver-1", 0.001).await;

    let ride = handle.request_ride(ride_request("rider-1")).await.expect("request");
    handle
        .submit("ops-1".into(), ClientMessage::SubscribeRide { ride_id: ride.ride_id })
        .await
        .expect("subscribe");
    handle
        .accept_ride(Caller::driver("driver-1"), ride.ride_id)
        .await
        .expect("accept");

    let messages = drain(&mut watcher_rx);
    assert!(messages
        .iter()
        .any(|message| matches!(message, ServerMessage::RideAccepted { .. })));
}

#[tokio::test(start_paused = true)]
async fn wire_ride_request_flows_like_the_api_call() {
    let handle = spawn_engine(off_peak_config());
    let mut rider_rx = handle.register_connection("rider-1".into());
    driver_online(&handle, "driver-1", 0.001).await;
    drain(&mut rider_rx);

    let request = ride_request("rider-1");
    handle
        .submit(
            "rider-1".into(),
            ClientMessage::RideRequest {
                pickup: request.pickup.clone(),
                destination: request.dropoff.clone(),
                route: dispatch_core::protocol::RouteEstimate {
                    distance: request.distance,
                    duration: request.duration,
                    geometry: vec![],
                },
            },
        )
        .await
        .expect("wire request");

    // Serialize behind the engine before inspecting the channel.
    let history = handle.history().await.expect("history");
    assert!(history.is_empty());
    assert_eq!(drain_tags(&mut rider_rx), ["ride_matched"]);
}
