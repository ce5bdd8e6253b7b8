use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    api::TrackBounds,
    clock::PlaybackState,
    laps::LapRecord,
    stream::SubscriptionState,
    telemetry::CarState,
};

/// State changes published to the presentation layer, in the order they happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReplayUpdate {
    SessionLoaded {
        year: i32,
        session_key: u32,
        start_time: DateTime<Utc>,
        lap_count: usize,
        track_bounds: Option<TrackBounds>,
    },
    SessionFailed {
        year: i32,
        session_key: u32,
        reason: String,
    },
    Clock {
        virtual_time: DateTime<Utc>,
        scrubber_minutes: u32,
        playback: PlaybackState,
    },
    /// Published only when the active lap number changes.
    ActiveLap { lap: Option<LapRecord> },
    Connection { state: SubscriptionState },
    TelemetryCleared,
    TelemetryMerged { cars: Vec<CarState> },
}

/// Point-in-time copy of the controller state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReplayView {
    pub year: Option<i32>,
    pub session_key: Option<u32>,
    /// `None` until a session has been loaded
    pub virtual_time: Option<DateTime<Utc>>,
    pub scrubber_minutes: u32,
    pub playback: PlaybackState,
    pub connection: SubscriptionState,
    /// Whether pushed batches are arriving within the health window
    pub receiving: bool,
    pub active_lap: Option<LapRecord>,
    pub cars: HashMap<u32, CarState>,
}
