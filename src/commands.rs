//! Command facade.
//!
//! One method per outbound intent. Each method checks readiness, encodes its
//! payload as JSON and publishes it on the route's request topic. Nothing
//! waits for a reply: results arrive later on the route's result topic, to
//! every handler subscribed at that moment. Requests carry no correlation
//! id, so two concurrent requests of the same kind cannot be told apart.

use serde::Serialize;
use tracing::debug;

use crate::client::TraceabilityClient;
use crate::error::ClientError;
use crate::model::{NewMovement, NewOperator, NewPart, NewStation, PartStatus};
use crate::topics::Route;

/// Time window sent with station activity queries when none is given.
pub const DEFAULT_ACTIVITY_PERIOD: &str = "24 hours";

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
struct PartRef<'a> {
    part_id: &'a str,
}

#[derive(Serialize)]
struct StatusUpdate<'a> {
    part_id: &'a str,
    status: PartStatus,
}

#[derive(Serialize)]
struct HistoryQuery<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    part_id: Option<&'a str>,
}

#[derive(Serialize)]
struct StationRef<'a> {
    station_id: &'a str,
}

#[derive(Serialize)]
struct ActivityQuery<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    station_id: Option<&'a str>,
    time_period: &'a str,
}

#[derive(Serialize)]
struct Verification<'a> {
    part_id: &'a str,
    station_id: &'a str,
}

impl TraceabilityClient {
    /// Publish `payload` on `route`'s request topic.
    pub fn send<T: Serialize + ?Sized>(&self, route: Route, payload: &T) -> Result<(), ClientError> {
        let topic = route.request_topic();
        debug!(?route, topic, "sending command");
        self.session().publish(topic, payload)
    }

    // Parts

    pub fn create_part(&self, part: &NewPart) -> Result<(), ClientError> {
        self.send(Route::PartCreate, part)
    }

    pub fn list_parts(&self) -> Result<(), ClientError> {
        self.send(Route::PartList, &Empty {})
    }

    pub fn update_part_status(&self, part_id: &str, status: PartStatus) -> Result<(), ClientError> {
        self.send(Route::PartUpdateStatus, &StatusUpdate { part_id, status })
    }

    pub fn delete_part(&self, part_id: &str) -> Result<(), ClientError> {
        self.send(Route::PartDelete, &PartRef { part_id })
    }

    /// History of one part, or of every part when `part_id` is `None`.
    pub fn get_part_history(&self, part_id: Option<&str>) -> Result<(), ClientError> {
        self.send(Route::PartHistory, &HistoryQuery { part_id })
    }

    // Movements

    pub fn record_movement(&self, movement: &NewMovement) -> Result<(), ClientError> {
        self.send(Route::MovementRecord, movement)
    }

    pub fn list_movements(&self) -> Result<(), ClientError> {
        self.send(Route::MovementList, &Empty {})
    }

    // Stations

    pub fn create_station(&self, station: &NewStation) -> Result<(), ClientError> {
        self.send(Route::StationCreate, station)
    }

    pub fn list_stations(&self) -> Result<(), ClientError> {
        self.send(Route::StationList, &Empty {})
    }

    /// Answered on `station/info`.
    pub fn get_station_info(&self, station_id: &str) -> Result<(), ClientError> {
        self.send(Route::StationGet, &StationRef { station_id })
    }

    /// Movements through a station (or all stations) within `time_period`,
    /// defaulting to the last 24 hours.
    pub fn get_station_activity(
        &self,
        station_id: Option<&str>,
        time_period: Option<&str>,
    ) -> Result<(), ClientError> {
        self.send(
            Route::StationActivity,
            &ActivityQuery {
                station_id,
                time_period: time_period.unwrap_or(DEFAULT_ACTIVITY_PERIOD),
            },
        )
    }

    pub fn get_parts_at_station(&self, station_id: &str) -> Result<(), ClientError> {
        self.send(Route::StationParts, &StationRef { station_id })
    }

    pub fn verify_part_at_station(&self, part_id: &str, station_id: &str) -> Result<(), ClientError> {
        self.send(
            Route::VerificationCheck,
            &Verification {
                part_id,
                station_id,
            },
        )
    }

    // Operators

    pub fn create_operator(&self, operator: &NewOperator) -> Result<(), ClientError> {
        self.send(Route::OperatorCreate, operator)
    }

    pub fn list_operators(&self) -> Result<(), ClientError> {
        self.send(Route::OperatorList, &Empty {})
    }

    // System

    pub fn get_system_stats(&self) -> Result<(), ClientError> {
        self.send(Route::SystemStats, &Empty {})
    }
}
