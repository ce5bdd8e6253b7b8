// Library interface for race-replay
// Integration tests and the CLI drive the replay engine through these modules

pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod laps;
pub mod replay;
pub mod standings;
pub mod stream;
pub mod telemetry;
pub mod timeline;
pub mod writer;

// Re-export commonly used types
pub use api::{HttpRaceApi, RaceApi};
pub use clock::{ClockController, PlaybackState};
pub use config::ReplayConfig;
pub use errors::ReplayError;
pub use laps::{LapIndex, LapRecord};
pub use replay::{ReplayController, ReplayHandle, ReplayUpdate, ReplayView};
pub use stream::{ClientId, StompConnector, StreamSession, SubscriptionState};
pub use telemetry::{CarState, TelemetryStore};
