use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use traceability_bus::bus::EndpointBehavior;
use traceability_bus::topics::Route;
use traceability_bus::{ConnectionSupervisor, SessionState, SupervisorConfig};

use crate::support::{client, settle, MQTT, WS_MQTT, WS_ROOT};

#[tokio::test(start_paused = true)]
async fn connects_on_mount_and_loads_once() {
    let (broker, client) = client();

    let view = ConnectionSupervisor::new("parts", client.clone())
        .on_connected(|client| client.list_parts())
        .spawn();
    sleep(Duration::from_secs(9)).await;

    assert!(client.is_ready());
    assert_eq!(view.state(), SessionState::Connected);
    let stats = view.stop().await;
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.forced_reconnects, 0);
    assert_eq!(
        broker.published_on(Route::PartList.request_topic()).len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn stuck_connecting_forces_exactly_one_reconnect() {
    let (broker, client) = client();
    broker.set_behavior_all([WS_MQTT, WS_ROOT, MQTT], EndpointBehavior::Hang);

    let view = ConnectionSupervisor::new("stations", client.clone()).spawn();
    sleep(Duration::from_secs(30)).await;
    let stats = view.stop().await;

    assert_eq!(stats.forced_reconnects, 1);
    assert!(stats.connects > 1);
    assert_eq!(stats.loads, 0);
    assert!(!client.is_ready());
}

#[tokio::test(start_paused = true)]
async fn recovers_after_broker_drop_and_reloads() {
    let (broker, client) = client();
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let view = ConnectionSupervisor::new("movements", client.clone())
        .on_connected(move |client| {
            counter.fetch_add(1, Ordering::SeqCst);
            client.list_movements()
        })
        .spawn();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    broker.drop_connections();
    sleep(Duration::from_secs(6)).await;

    assert!(client.is_ready());
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert_eq!(broker.opened_endpoints().len(), 2);
    drop(view);
}

#[tokio::test(start_paused = true)]
async fn refresh_interval_reloads_while_connected() {
    let (broker, client) = client();
    let view = ConnectionSupervisor::new("dashboard", client.clone())
        .with_config(SupervisorConfig {
            refresh_interval: Some(Duration::from_secs(15)),
            ..SupervisorConfig::default()
        })
        .on_connected(|client| client.get_system_stats())
        .spawn();

    sleep(Duration::from_secs(41)).await;
    let stats = view.stop().await;

    assert_eq!(stats.loads, 3);
    assert_eq!(
        broker.published_on(Route::SystemStats.request_topic()).len(),
        3
    );
}

#[tokio::test(start_paused = true)]
async fn views_share_one_connection() {
    let (broker, client) = client();
    let parts = ConnectionSupervisor::new("parts", client.clone())
        .on_connected(|client| client.list_parts())
        .spawn();
    let operators = ConnectionSupervisor::new("operators", client.clone())
        .on_connected(|client| client.list_operators())
        .spawn();

    sleep(Duration::from_secs(5)).await;

    assert_eq!(broker.opened_endpoints().len(), 1);
    assert_eq!(parts.stop().await.loads, 1);
    assert_eq!(operators.stop().await.loads, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_load_is_counted_not_fatal() {
    let (_broker, client) = client();
    let view = ConnectionSupervisor::new("history", client.clone())
        .on_connected(|_| Err(traceability_bus::ClientError::NotConnected))
        .spawn();

    sleep(Duration::from_secs(5)).await;
    let stats = view.stop().await;

    assert_eq!(stats.loads, 0);
    assert_eq!(stats.load_failures, 1);
    assert!(stats.ticks >= 3);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_supervision() {
    let (broker, client) = client();
    let view = ConnectionSupervisor::new("operators", client.clone()).spawn();
    sleep(Duration::from_secs(3)).await;
    assert!(client.is_ready());

    drop(view);
    settle().await;
    broker.drop_connections();
    sleep(Duration::from_secs(20)).await;

    assert!(!client.is_ready());
    assert_eq!(broker.opened_endpoints().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn state_is_observable_from_the_handle() {
    let (_broker, client) = client();
    let view = ConnectionSupervisor::new("parts", client.clone()).spawn();
    let mut states = view.state_changes();

    states
        .wait_for(|state| *state == SessionState::Connected)
        .await
        .unwrap();
    assert_eq!(view.state(), SessionState::Connected);
}
