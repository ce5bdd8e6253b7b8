use std::{
    collections::HashSet,
    fs::File,
    io::BufWriter,
    path::Path,
    sync::mpsc::Receiver,
};

use chrono::{DateTime, Utc};
use log::warn;
use serde_jsonlines::JsonLinesWriter;

use crate::{ReplayError, replay::ReplayUpdate};

/// Append every update received on `updates` to `file` as JSON lines until the sender hangs up.
pub fn write_session_log(file: &Path, updates: Receiver<ReplayUpdate>) -> Result<(), ReplayError> {
    let log_file = File::create(file).map_err(|e| ReplayError::WriterError { source: e })?;
    let mut writer = JsonLinesWriter::new(BufWriter::new(log_file));
    for update in &updates {
        // one bad line should not end the recording
        if let Err(e) = writer.write(&update) {
            warn!("Error while writing update to session log: {}", e);
        }
    }
    writer
        .flush()
        .map_err(|e| ReplayError::WriterError { source: e })
}

pub fn read_session_log(file: &Path) -> Result<Vec<ReplayUpdate>, ReplayError> {
    serde_jsonlines::json_lines(file)
        .map_err(|e| ReplayError::SessionLogError { source: e })?
        .collect::<Result<Vec<ReplayUpdate>, std::io::Error>>()
        .map_err(|e| ReplayError::SessionLogError { source: e })
}

/// Totals for a recorded session log.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionLogSummary {
    pub updates: usize,
    pub sessions: Vec<u32>,
    pub batches: usize,
    pub cars_seen: usize,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
    pub laps_seen: Vec<u32>,
}

impl SessionLogSummary {
    pub fn from_updates(updates: &[ReplayUpdate]) -> Self {
        let mut summary = SessionLogSummary {
            updates: updates.len(),
            ..Default::default()
        };
        let mut cars = HashSet::new();
        for update in updates {
            match update {
                ReplayUpdate::SessionLoaded { session_key, .. } => {
                    summary.sessions.push(*session_key)
                }
                ReplayUpdate::TelemetryMerged { cars: batch } => {
                    summary.batches += 1;
                    cars.extend(batch.iter().map(|car| car.car_id));
                }
                ReplayUpdate::Clock { virtual_time, .. } => {
                    summary.first_time.get_or_insert(*virtual_time);
                    summary.last_time = Some(*virtual_time);
                }
                ReplayUpdate::ActiveLap { lap: Some(lap) } => {
                    summary.laps_seen.push(lap.lap_number)
                }
                _ => {}
            }
        }
        summary.cars_seen = cars.len();
        summary
    }
}
