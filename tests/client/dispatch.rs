use std::sync::{Arc, Mutex};

use serde_json::json;
use traceability_bus::model::{Movement, Part, SystemStats};
use traceability_bus::topics::Route;
use traceability_bus::{handler, results};

use crate::support::{connected_client, settle, Recorder};

#[tokio::test(start_paused = true)]
async fn handlers_run_once_in_registration_order() {
    let (broker, client) = connected_client().await;
    let topic = Route::StationList.result_topic().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let order = Arc::clone(&order);
        client.subscribe(
            topic,
            handler(move |_| {
                order.lock().unwrap().push(name);
                Ok(())
            }),
        );
    }

    broker.deliver(topic, r#"[{"station_id":"S1"}]"#);
    settle().await;

    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_dropped_without_blocking_later_messages() {
    let (broker, client) = connected_client().await;
    let parts = Route::PartList.result_topic().unwrap();
    let stations = Route::StationList.result_topic().unwrap();
    let on_parts = Recorder::new();
    let on_stations = Recorder::new();
    client.subscribe(parts, on_parts.handler());
    client.subscribe(stations, on_stations.handler());

    broker.deliver(parts, "{not json");
    broker.deliver(stations, "[]");
    broker.deliver(parts, "[]");
    settle().await;

    assert_eq!(on_parts.seen(), vec![json!([])]);
    assert_eq!(on_stations.count(), 1);
    let stats = client.dispatch_stats();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.delivered, 2);
    assert!(client.is_ready());
}

#[tokio::test(start_paused = true)]
async fn failing_handler_does_not_starve_the_others() {
    let (broker, client) = connected_client().await;
    let topic = Route::OperatorList.result_topic().unwrap();
    client.subscribe(topic, handler(|_| Err("view unmounted".into())));
    let recorder = Recorder::new();
    client.subscribe(topic, recorder.handler());

    broker.deliver(topic, "[]");
    settle().await;

    assert_eq!(recorder.count(), 1);
    assert_eq!(client.dispatch_stats().handler_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn part_list_reply_reaches_the_requesting_view() {
    let (broker, client) = connected_client().await;
    let parts = Arc::new(Mutex::new(Vec::<Part>::new()));
    let sink = Arc::clone(&parts);
    client.subscribe_rows::<Part, _>(Route::PartList, move |rows| {
        *sink.lock().unwrap() = rows;
    });

    client.list_parts().unwrap();
    let request = broker.published_on("coreflux/factory01/traceability/part/list");
    assert_eq!(request.len(), 1);
    assert_eq!(request[0].json(), Some(json!({})));

    broker.deliver(
        "coreflux/factory01/traceability/part/list/result",
        r#"[{"part_id":"P1","part_name":"Widget"}]"#,
    );
    settle().await;

    let parts = parts.lock().unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].part_id, "P1");
    assert_eq!(parts[0].part_name, "Widget");
}

#[tokio::test(start_paused = true)]
async fn bare_stats_object_is_one_row() {
    let (broker, client) = connected_client().await;
    let topic = "coreflux/factory01/traceability/system/stats/result";
    let raw = Recorder::new();
    client.subscribe(topic, raw.handler());
    let typed = Arc::new(Mutex::new(Vec::<SystemStats>::new()));
    let sink = Arc::clone(&typed);
    client.subscribe_rows::<SystemStats, _>(Route::SystemStats, move |rows| {
        sink.lock().unwrap().extend(rows);
    });

    let stats = json!({
        "total_parts": 12,
        "total_stations": 4,
        "total_operators": 3,
        "movements_24h": 40
    });
    broker.deliver_json(topic, &stats);
    broker.deliver_json(topic, &json!([stats.clone()]));
    settle().await;

    let seen = raw.seen();
    assert_eq!(results::normalize(&seen[0]), results::normalize(&seen[1]));
    let typed = typed.lock().unwrap();
    assert_eq!(typed.len(), 2);
    assert_eq!(typed[0], typed[1]);
    assert_eq!(typed[0].total_parts, 12);
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_handler_stops_receiving() {
    let (broker, client) = connected_client().await;
    let topic = Route::MovementList.result_topic().unwrap();
    let kept = Recorder::new();
    let removed = Recorder::new();
    let removed_handler = removed.handler();
    client.subscribe(topic, kept.handler());
    client.subscribe(topic, removed_handler.clone());

    broker.deliver(topic, "[]");
    settle().await;
    assert!(client.unsubscribe(topic, &removed_handler));
    assert!(!client.unsubscribe(topic, &removed_handler));
    broker.deliver(topic, "[]");
    settle().await;

    assert_eq!(kept.count(), 2);
    assert_eq!(removed.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn null_fields_do_not_drop_the_batch() {
    let (broker, client) = connected_client().await;
    let movements = Arc::new(Mutex::new(Vec::<Movement>::new()));
    let sink = Arc::clone(&movements);
    client.subscribe_rows::<Movement, _>(Route::MovementList, move |rows| {
        sink.lock().unwrap().extend(rows);
    });

    broker.deliver_json(
        Route::MovementList.result_topic().unwrap(),
        &json!([
            {
                "part_id": "P1",
                "from_station_id": null,
                "to_station_id": "S1",
                "movement_type": "transfer",
                "notes": null
            },
            {
                "part_id": "P1",
                "from_station_id": "S1",
                "to_station_id": "S2",
                "movement_type": "assembly",
                "notes": "torque checked"
            }
        ]),
    );
    settle().await;

    let movements = movements.lock().unwrap();
    assert_eq!(movements.len(), 2);
    assert_eq!(movements[0].from_station_id, "");
    assert_eq!(movements[0].notes, "");
    assert_eq!(movements[1].notes, "torque checked");
    assert_eq!(client.dispatch_stats().handler_failures, 0);
}
