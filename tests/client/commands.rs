use std::collections::BTreeSet;

use serde_json::json;
use traceability_bus::model::{MovementType, NewMovement, NewPart, NewStation, PartStatus};
use traceability_bus::topics::Route;
use traceability_bus::{ClientError, TraceabilityClient};

use crate::support::{client, connected_client, settle};

/// Issue every command once, returning each result.
fn issue_all(client: &TraceabilityClient) -> Vec<Result<(), ClientError>> {
    vec![
        client.create_part(&NewPart {
            part_id: "P-1".into(),
            part_name: "Bracket".into(),
            part_type: "metal".into(),
            manufacturer: "Acme".into(),
        }),
        client.list_parts(),
        client.update_part_status("P-1", PartStatus::InProduction),
        client.delete_part("P-1"),
        client.get_part_history(Some("P-1")),
        client.record_movement(&NewMovement {
            part_id: "P-1".into(),
            from_station_id: "S-1".into(),
            to_station_id: "S-2".into(),
            movement_type: MovementType::Assembly,
            operator_id: "OP-1".into(),
            notes: String::new(),
        }),
        client.list_movements(),
        client.create_station(&NewStation {
            station_id: "S-3".into(),
            station_name: "Paint".into(),
            station_type: "finishing".into(),
            location: "Hall B".into(),
        }),
        client.list_stations(),
        client.get_station_info("S-3"),
        client.get_station_activity(Some("S-3"), None),
        client.get_parts_at_station("S-3"),
        client.verify_part_at_station("P-1", "S-3"),
        client.create_operator(&Default::default()),
        client.list_operators(),
        client.get_system_stats(),
    ]
}

#[tokio::test(start_paused = true)]
async fn every_command_fails_fast_when_not_ready() {
    let (broker, client) = client();

    for result in issue_all(&client) {
        assert_eq!(result, Err(ClientError::NotConnected));
    }
    assert!(broker.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn every_command_publishes_on_its_request_topic() {
    let (broker, client) = connected_client().await;

    for result in issue_all(&client) {
        result.unwrap();
    }

    let published: BTreeSet<String> = broker.published().into_iter().map(|m| m.topic).collect();
    let expected: BTreeSet<String> = Route::ALL
        .iter()
        .map(|r| r.request_topic().to_string())
        .collect();
    assert_eq!(published, expected);
    assert_eq!(broker.published().len(), 16);
}

#[tokio::test(start_paused = true)]
async fn movement_payload_matches_wire_contract() {
    let (broker, client) = connected_client().await;
    client
        .record_movement(&NewMovement {
            part_id: "P-1".into(),
            from_station_id: "S-1".into(),
            to_station_id: "S-2".into(),
            movement_type: MovementType::QualityCheck,
            operator_id: "OP-1".into(),
            notes: "rework".into(),
        })
        .unwrap();

    let sent = broker.published_on(Route::MovementRecord.request_topic());
    assert_eq!(
        sent[0].json(),
        Some(json!({
            "part_id": "P-1",
            "from_station_id": "S-1",
            "to_station_id": "S-2",
            "movement_type": "quality_check",
            "operator_id": "OP-1",
            "notes": "rework"
        }))
    );
}

#[tokio::test(start_paused = true)]
async fn commands_fail_after_the_broker_goes_away() {
    let (broker, client) = connected_client().await;
    client.list_parts().unwrap();

    broker.drop_connections();
    settle().await;

    assert_eq!(client.list_parts(), Err(ClientError::NotConnected));
    assert_eq!(broker.published().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn commands_fail_once_liveness_goes_stale() {
    let (broker, client) = connected_client().await;

    tokio::time::advance(std::time::Duration::from_secs(91)).await;

    assert_eq!(client.get_system_stats(), Err(ClientError::NotConnected));
    assert!(broker.published().is_empty());
}
