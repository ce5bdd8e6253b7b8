use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;

use crate::errors::ReplayError;
use crate::laps::LapRecord;
use crate::timeline::parse_utc_timestamp;

use super::{
    DriverInfo, DriversPayload, LapInfoPayload, RaceApi, SessionSummary, TrackPaths,
};

/// [`RaceApi`] over the replay backend's REST routes.
#[derive(Clone, Debug)]
pub struct HttpRaceApi {
    base_url: String,
    client: Client,
}

impl HttpRaceApi {
    pub fn new(base_url: &str) -> Result<Self, ReplayError> {
        let invalid = || ReplayError::InvalidUrl {
            url: base_url.to_string(),
        };
        let parsed = Url::parse(base_url).map_err(|_| invalid())?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(invalid());
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response, ReplayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Api: GET {} {:?}", url, query);
        let response = self
            .client
            .get(&url)
            .header("Content-Type", "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Api: {} returned {}", url, status);
            return Err(ReplayError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ReplayError> {
        Ok(self.get(path, query).await?.json::<T>().await?)
    }
}

fn session_query(year: i32, session_key: u32) -> [(&'static str, String); 2] {
    [
        ("year", year.to_string()),
        ("sessionKey", session_key.to_string()),
    ]
}

#[async_trait]
impl RaceApi for HttpRaceApi {
    async fn sessions(&self, year: i32) -> Result<Vec<SessionSummary>, ReplayError> {
        self.get_json("/api/race/sessions", &[("year", year.to_string())])
            .await
    }

    async fn start_time(&self, year: i32, session_key: u32) -> Result<DateTime<Utc>, ReplayError> {
        let body = self
            .get("/race/startTime", &session_query(year, session_key))
            .await?
            .text()
            .await?;
        parse_utc_timestamp(&body)
    }

    async fn lap_info(&self, year: i32, session_key: u32) -> Result<Vec<LapRecord>, ReplayError> {
        let laps: Vec<LapInfoPayload> = self
            .get_json("/race/lapInfo", &session_query(year, session_key))
            .await?;
        Ok(laps.into_iter().map(LapRecord::from).collect())
    }

    async fn track_map(&self, year: i32, session_key: u32) -> Result<TrackPaths, ReplayError> {
        self.get_json("/api/race/track-map", &session_query(year, session_key))
            .await
    }

    async fn drivers(&self, year: i32) -> Result<Vec<DriverInfo>, ReplayError> {
        let payload: DriversPayload = self
            .get_json("/api/drivers", &[("year", year.to_string())])
            .await?;
        Ok(payload.into_drivers())
    }
}
