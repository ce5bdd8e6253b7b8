// Error types for race-replay

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum ReplayError {
    // Streaming transport errors
    #[snafu(display("Transport failure: {reason}"))]
    Transport { reason: String },
    #[snafu(display("Could not decode pushed telemetry batch"))]
    MalformedPush { source: serde_json::Error },
    #[snafu(display("Could not encode snapshot request"))]
    RequestEncoding { source: serde_json::Error },

    // Backend REST errors
    #[snafu(display("HTTP request failed"))]
    Http { source: reqwest::Error },
    #[snafu(display("Backend returned {status} for {url}"))]
    HttpStatus { status: u16, url: String },
    #[snafu(display("Invalid backend URL: {url}"))]
    InvalidUrl { url: String },
    #[snafu(display("Unable to parse timestamp: {value}"))]
    InvalidTimestamp { value: String },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // Session log errors
    #[snafu(display("Error writing session log"))]
    WriterError { source: io::Error },
    #[snafu(display("Error reading session log"))]
    SessionLogError { source: io::Error },

    // Controller errors
    #[snafu(display("Replay controller is no longer running"))]
    ControllerGone,
    #[snafu(display("Session {session_key} could not be loaded: {reason}"))]
    SessionLoad { session_key: u32, reason: String },
    #[snafu(display("Could not install Ctrl-C handler"))]
    SignalHandler { source: ctrlc::Error },
}

impl From<reqwest::Error> for ReplayError {
    fn from(value: reqwest::Error) -> Self {
        ReplayError::Http { source: value }
    }
}
