//! Payload types exchanged with the traceability service.
//!
//! Field names mirror the wire contract. Inbound entities default every
//! missing or `null` field so a partial row from the service still decodes.

use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle status of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    #[default]
    Created,
    InProduction,
    QualityCheck,
    Completed,
    Defective,
    #[serde(other)]
    Unknown,
}

/// Kind of movement between two stations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    #[default]
    Transfer,
    QualityCheck,
    Assembly,
    Testing,
    Packaging,
    Shipping,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Part {
    pub id: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub part_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub part_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub part_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub manufacturer: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: PartStatus,
    pub created_at: Option<String>,
}

/// Payload of `part/create`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewPart {
    pub part_id: String,
    pub part_name: String,
    pub part_type: String,
    pub manufacturer: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Movement {
    pub id: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub part_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub from_station_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub to_station_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub movement_type: MovementType,
    #[serde(deserialize_with = "null_as_default")]
    pub operator_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub notes: String,
    pub timestamp: Option<String>,
}

/// Payload of `movement/record`. Empty strings mean "not set", as the
/// service expects.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewMovement {
    pub part_id: String,
    pub from_station_id: String,
    pub to_station_id: String,
    pub movement_type: MovementType,
    pub operator_id: String,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Station {
    pub id: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub station_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub station_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub station_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub location: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    pub created_at: Option<String>,
}

/// Payload of `station/create`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewStation {
    pub station_id: String,
    pub station_name: String,
    pub station_type: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Operator {
    pub id: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub operator_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub operator_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub department: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
    pub created_at: Option<String>,
}

/// Payload of `operator/create`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewOperator {
    pub operator_id: String,
    pub operator_name: String,
    pub email: String,
    pub department: String,
}

/// System-wide counters returned on `system/stats/result`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemStats {
    #[serde(deserialize_with = "null_as_default")]
    pub total_parts: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub total_stations: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub total_operators: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub movements_24h: u64,
}

/// Station activity rows are movements touching the station.
pub type StationActivity = Movement;

/// `null` decodes as the field's default, like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
