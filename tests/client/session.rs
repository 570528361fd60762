use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use traceability_bus::bus::{EndpointBehavior, TransportEvent};
use traceability_bus::topics::Route;
use traceability_bus::{ClientError, SessionState, TransportError};

use crate::support::{client, connected_client, settle, Recorder, MQTT, WS_MQTT, WS_ROOT};

#[tokio::test(start_paused = true)]
async fn falls_back_to_third_candidate() {
    let (broker, client) = client();
    broker.set_behavior_all([WS_MQTT, WS_ROOT], EndpointBehavior::Refuse("404".into()));
    let started = Instant::now();

    client.connect().await.unwrap();

    assert_eq!(client.state(), SessionState::Connected);
    assert!(client.is_ready());
    assert_eq!(broker.opened_endpoints(), vec![WS_MQTT, WS_ROOT, MQTT]);
    // One pause between each pair of candidates.
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn all_candidates_failing_reports_last_error() {
    let (broker, client) = client();
    broker.set_behavior_all([WS_MQTT, WS_ROOT], EndpointBehavior::Refuse("404".into()));
    broker.set_behavior(MQTT, EndpointBehavior::Refuse("connection refused".into()));

    let err = client.connect().await.unwrap_err();

    assert_eq!(
        err,
        ClientError::ConnectFailed {
            attempts: 3,
            last: TransportError::Refused("connection refused".into()),
        }
    );
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(!client.is_ready());
}

#[tokio::test(start_paused = true)]
async fn half_open_endpoint_times_out() {
    let (broker, client) = client();
    broker.set_behavior(WS_MQTT, EndpointBehavior::Hang);
    let started = Instant::now();

    client.connect().await.unwrap();

    assert_eq!(broker.opened_endpoints(), vec![WS_MQTT, WS_ROOT]);
    assert!(started.elapsed() >= Duration::from_secs(11));
    // The abandoned link was released.
    assert_eq!(broker.open_links(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_join_one_attempt() {
    let (broker, client) = client();
    broker.set_behavior(WS_MQTT, EndpointBehavior::Hang);

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    settle().await;
    assert_eq!(client.state(), SessionState::Connecting);
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });

    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(second.await.unwrap(), Ok(()));
    assert_eq!(broker.opened_endpoints(), vec![WS_MQTT, WS_ROOT]);
    assert_eq!(broker.client_ids().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_attempt() {
    let (broker, client) = client();
    broker.set_behavior_all([WS_MQTT, WS_ROOT, MQTT], EndpointBehavior::Hang);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    settle().await;
    client.disconnect();

    assert_eq!(pending.await.unwrap(), Err(ClientError::ConnectCancelled));
    assert_eq!(client.state(), SessionState::Disconnected);
    // The half-open link of the cancelled attempt was released.
    assert_eq!(broker.live_links(), 0);

    // A late CONNACK on the abandoned link changes nothing.
    broker.release_hanging(WS_MQTT);
    settle().await;
    assert!(!client.is_ready());
}

#[tokio::test(start_paused = true)]
async fn force_reconnect_keeps_subscriptions() {
    let (broker, client) = connected_client().await;
    let topic = Route::PartList.result_topic().unwrap();
    let recorder = Recorder::new();
    client.subscribe(topic, recorder.handler());

    client.force_reconnect().await.unwrap();

    assert_eq!(broker.opened_endpoints().len(), 2);
    assert_eq!(broker.open_links(), 1);
    assert_eq!(broker.deliver_json(topic, &json!([{ "part_id": "P1" }])), 1);
    settle().await;
    assert_eq!(recorder.seen(), vec![json!([{ "part_id": "P1" }])]);
}

#[tokio::test(start_paused = true)]
async fn custom_topics_are_resubscribed_after_reconnect() {
    let (broker, client) = connected_client().await;
    let recorder = Recorder::new();
    client.subscribe("plant/alarms", recorder.handler());
    assert!(broker.subscriptions().contains(&"plant/alarms".to_string()));

    broker.drop_connections();
    settle().await;
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(broker.subscriptions().is_empty());

    client.connect().await.unwrap();
    assert!(broker.subscriptions().contains(&"plant/alarms".to_string()));
    broker.deliver("plant/alarms", r#"{"level":"high"}"#);
    settle().await;
    assert_eq!(recorder.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn every_registered_topic_is_resubscribed() {
    let (broker, client) = connected_client().await;
    let recorder = Recorder::new();
    let topics: Vec<String> = (0..200).map(|i| format!("plant/line/{i}")).collect();
    for topic in &topics {
        client.subscribe(topic, recorder.handler());
    }

    broker.drop_connections();
    settle().await;
    client.connect().await.unwrap();

    let subscribed = broker.subscriptions();
    assert!(topics.iter().all(|topic| subscribed.contains(topic)));
    for topic in Route::ALL.iter().filter_map(|route| route.result_topic()) {
        assert!(subscribed.iter().any(|s| s == topic));
    }
}

#[tokio::test(start_paused = true)]
async fn transport_error_after_connect_is_not_fatal() {
    let (broker, client) = connected_client().await;
    broker.broadcast(TransportEvent::Error("ping timeout".into()));
    settle().await;
    assert!(client.is_ready());
}

#[tokio::test(start_paused = true)]
async fn reconnecting_and_offline_demote_state() {
    let (broker, client) = connected_client().await;
    broker.broadcast(TransportEvent::Reconnecting);
    settle().await;
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(!client.is_ready());

    client.connect().await.unwrap();
    broker.broadcast(TransportEvent::Offline);
    settle().await;
    assert_eq!(client.state(), SessionState::Disconnected);
    assert_eq!(broker.open_links(), 0);
}

#[tokio::test(start_paused = true)]
async fn client_ids_use_configured_prefix() {
    let (broker, _client) = connected_client().await;
    let ids = broker.client_ids();
    assert_eq!(ids.len(), 1);
    assert!(ids[0].starts_with("traceability-frontend-"));
}

#[tokio::test(start_paused = true)]
async fn state_changes_follow_the_session() {
    let (broker, client) = client();
    let mut changes = client.state_changes();

    client.connect().await.unwrap();
    assert_eq!(*changes.borrow_and_update(), SessionState::Connected);

    broker.drop_connections();
    changes.changed().await.unwrap();
    assert_eq!(*changes.borrow(), SessionState::Disconnected);
}
