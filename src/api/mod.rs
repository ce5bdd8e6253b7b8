// Backend REST collaborators consumed at session-selection time

pub mod http;
pub mod track;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::errors::ReplayError;
use crate::laps::LapRecord;
use crate::timeline::deserialize_utc_timestamp;

pub use http::HttpRaceApi;
pub use track::{TrackBounds, TrackPoint};

/// Track outline per driver, as an ordered list of points.
pub type TrackPaths = HashMap<String, Vec<TrackPoint>>;

/// One entry of the yearly session calendar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_key: u32,
    #[serde(default)]
    pub country_name: String,
    #[serde(default)]
    pub circuit_short_name: String,
    #[serde(deserialize_with = "deserialize_utc_timestamp")]
    pub date_start: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    #[serde(default)]
    pub driver_number: Option<u32>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Drivers arrive either as a bare list or wrapped in a paged object.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum DriversPayload {
    List(Vec<DriverInfo>),
    Page { content: Vec<DriverInfo> },
}

impl DriversPayload {
    pub(crate) fn into_drivers(self) -> Vec<DriverInfo> {
        match self {
            DriversPayload::List(drivers) | DriversPayload::Page { content: drivers } => drivers,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DriverRef {
    Number(u32),
    Name(String),
}

/// Lap-start record as encoded by the backend.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LapInfoPayload {
    #[serde(alias = "driverNumber", alias = "driverId")]
    driver_name: DriverRef,
    lap_number: u32,
    #[serde(deserialize_with = "deserialize_utc_timestamp")]
    date_start: DateTime<Utc>,
    #[serde(default)]
    lap_duration: Option<f64>,
}

impl From<LapInfoPayload> for LapRecord {
    fn from(payload: LapInfoPayload) -> Self {
        Self {
            driver_id: match payload.driver_name {
                DriverRef::Number(number) => number.to_string(),
                DriverRef::Name(name) => name,
            },
            lap_number: payload.lap_number,
            start_time: payload.date_start,
            lap_duration: payload.lap_duration.unwrap_or(0.).max(0.),
        }
    }
}

#[async_trait]
pub trait RaceApi: Send + Sync {
    async fn sessions(&self, year: i32) -> Result<Vec<SessionSummary>, ReplayError>;

    /// Real start time of the session, normalized to UTC.
    async fn start_time(&self, year: i32, session_key: u32) -> Result<DateTime<Utc>, ReplayError>;

    async fn lap_info(&self, year: i32, session_key: u32) -> Result<Vec<LapRecord>, ReplayError>;

    async fn track_map(&self, year: i32, session_key: u32) -> Result<TrackPaths, ReplayError>;

    async fn drivers(&self, year: i32) -> Result<Vec<DriverInfo>, ReplayError>;
}

/// The year's sessions in chronological order.
pub async fn session_calendar(
    api: &dyn RaceApi,
    year: i32,
) -> Result<Vec<SessionSummary>, ReplayError> {
    Ok(api
        .sessions(year)
        .await?
        .into_iter()
        .sorted_by_key(|session| session.date_start)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lap_payload_accepts_numeric_driver() {
        let payload: LapInfoPayload = serde_json::from_str(
            r#"{"driverName": 1, "lapNumber": 3, "dateStart": "2024-03-02T15:06:11.120", "lapDuration": 95.2}"#,
        )
        .unwrap();
        let record = LapRecord::from(payload);
        assert_eq!(record.driver_id, "1");
        assert_eq!(record.lap_number, 3);
        assert_eq!(
            record.start_time,
            Utc.with_ymd_and_hms(2024, 3, 2, 15, 6, 11).unwrap()
                + chrono::TimeDelta::milliseconds(120)
        );
    }

    #[test]
    fn test_lap_payload_missing_duration() {
        let payload: LapInfoPayload = serde_json::from_str(
            r#"{"driverName": "VER", "lapNumber": 1, "dateStart": "2024-03-02T15:03:00Z", "lapDuration": null}"#,
        )
        .unwrap();
        let record = LapRecord::from(payload);
        assert_eq!(record.driver_id, "VER");
        assert_eq!(record.lap_duration, 0.);
    }

    #[test]
    fn test_drivers_payload_shapes() {
        let list: DriversPayload =
            serde_json::from_str(r#"[{"driverNumber": 16, "team": "Ferrari"}]"#).unwrap();
        assert_eq!(list.into_drivers().len(), 1);

        let page: DriversPayload = serde_json::from_str(
            r#"{"content": [{"driverNumber": 4, "team": "McLaren"}, {"team": "Haas"}], "totalPages": 1}"#,
        )
        .unwrap();
        let drivers = page.into_drivers();
        assert_eq!(drivers.len(), 2);
        assert_eq!(drivers[1].driver_number, None);
    }

    struct FixedCalendar;

    #[async_trait]
    impl RaceApi for FixedCalendar {
        async fn sessions(&self, _year: i32) -> Result<Vec<SessionSummary>, ReplayError> {
            Ok(serde_json::from_str(
                r#"[
                    {"sessionKey": 3, "countryName": "Japan", "circuitShortName": "Suzuka", "dateStart": "2024-04-07T05:00:00"},
                    {"sessionKey": 1, "countryName": "Bahrain", "circuitShortName": "Sakhir", "dateStart": "2024-03-02T15:00:00"},
                    {"sessionKey": 2, "countryName": "Australia", "circuitShortName": "Melbourne", "dateStart": "2024-03-24T04:00:00"}
                ]"#,
            )
            .unwrap())
        }

        async fn start_time(&self, _: i32, _: u32) -> Result<DateTime<Utc>, ReplayError> {
            unimplemented!()
        }

        async fn lap_info(&self, _: i32, _: u32) -> Result<Vec<LapRecord>, ReplayError> {
            unimplemented!()
        }

        async fn track_map(&self, _: i32, _: u32) -> Result<TrackPaths, ReplayError> {
            unimplemented!()
        }

        async fn drivers(&self, _: i32) -> Result<Vec<DriverInfo>, ReplayError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_session_calendar_is_chronological() {
        let sessions = session_calendar(&FixedCalendar, 2024).await.unwrap();
        let keys: Vec<u32> = sessions.iter().map(|s| s.session_key).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }
}
