pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ReplayError;
use crate::timeline::deserialize_utc_timestamp;

pub use store::TelemetryStore;

/// Most recent known state of one car, as measured by a single server tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarState {
    /// Car (driver) number
    pub car_id: u32,
    /// Track-map X coordinate
    pub position_x: f64,
    /// Track-map Y coordinate
    pub position_y: f64,
    /// Speed, never negative
    pub speed: f64,
    /// Race position, 0 when unknown
    pub standing: u32,
    /// Absolute time of the measurement
    pub timestamp: DateTime<Utc>,
}

/// One record of a pushed snapshot batch, as encoded by the backend.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CarStatePayload {
    driver_number: u32,
    x: f64,
    y: f64,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    position: Option<u32>,
    #[serde(deserialize_with = "deserialize_utc_timestamp")]
    timestamp: DateTime<Utc>,
}

impl From<CarStatePayload> for CarState {
    fn from(payload: CarStatePayload) -> Self {
        Self {
            car_id: payload.driver_number,
            position_x: payload.x,
            position_y: payload.y,
            speed: payload.speed.unwrap_or(0.).max(0.),
            standing: payload.position.unwrap_or(0),
            timestamp: payload.timestamp,
        }
    }
}

/// Decode the body of a pushed snapshot message. The whole batch is rejected when any record is
/// malformed, so a partially decoded tick never reaches the store.
pub fn decode_batch(body: &str) -> Result<Vec<CarState>, ReplayError> {
    let payload: Vec<CarStatePayload> =
        serde_json::from_str(body).map_err(|e| ReplayError::MalformedPush { source: e })?;
    Ok(payload.into_iter().map(CarState::from).collect())
}
