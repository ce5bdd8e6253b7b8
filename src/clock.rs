use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::timeline::{SCRUBBER_MAX_MINUTES, offset_minutes, time_at_offset};

/// Wall-clock period between automatic advances while playing.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Stopped,
    Playing,
}

/// Result of a [`ClockController::play`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayOutcome {
    AlreadyPlaying,
    Resumed,
    /// Playback resumed from an uncommitted scrubber preview, which is now the committed time.
    ResumedFromPreview(DateTime<Utc>),
}

/// Owner of the virtual playback clock.
///
/// The clock advances one second of race time per [`TICK_INTERVAL`] while playing. Scrubbing is
/// split in two: [`preview_seek`](Self::preview_seek) only moves the displayed time, while
/// [`commit_seek`](Self::commit_seek) finalizes it. The controller is a pure state machine; timers
/// and snapshot requests are driven by the caller.
#[derive(Clone, Debug)]
pub struct ClockController {
    session_start: DateTime<Utc>,
    current: DateTime<Utc>,
    pending_preview: Option<DateTime<Utc>>,
    state: PlaybackState,
}

impl ClockController {
    pub fn new(session_start: DateTime<Utc>) -> Self {
        Self {
            session_start,
            current: session_start,
            pending_preview: None,
            state: PlaybackState::Stopped,
        }
    }

    /// Stop and rewind to the start of a (possibly different) session.
    pub fn reset(&mut self, session_start: DateTime<Utc>) {
        *self = Self::new(session_start);
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.current
    }

    pub fn has_pending_preview(&self) -> bool {
        self.pending_preview.is_some()
    }

    /// Whole minutes elapsed since the session start; negative before it.
    pub fn offset_minutes(&self) -> i64 {
        offset_minutes(self.session_start, self.current)
    }

    /// Offset clamped to the scrubber's display range.
    pub fn scrubber_position(&self) -> u32 {
        self.offset_minutes().clamp(0, SCRUBBER_MAX_MINUTES as i64) as u32
    }

    pub fn play(&mut self) -> PlayOutcome {
        if self.is_playing() && self.pending_preview.is_none() {
            return PlayOutcome::AlreadyPlaying;
        }
        self.state = PlaybackState::Playing;
        match self.pending_preview.take() {
            Some(preview) => {
                self.current = preview;
                PlayOutcome::ResumedFromPreview(preview)
            }
            None => PlayOutcome::Resumed,
        }
    }

    /// Returns `true` when playback was running.
    pub fn pause(&mut self) -> bool {
        let was_playing = self.is_playing();
        self.state = PlaybackState::Stopped;
        was_playing
    }

    /// Advance one second of race time. Returns the new virtual time, or `None` when stopped or
    /// while a scrubber drag is in progress.
    pub fn tick(&mut self) -> Option<DateTime<Utc>> {
        if !self.is_playing() || self.pending_preview.is_some() {
            return None;
        }
        self.current += TimeDelta::seconds(1);
        Some(self.current)
    }

    /// Move the displayed time to `offset` minutes into the session without committing it.
    pub fn preview_seek(&mut self, offset: u32) -> DateTime<Utc> {
        let preview = time_at_offset(
            self.session_start,
            offset.min(SCRUBBER_MAX_MINUTES) as i64,
        );
        self.current = preview;
        self.pending_preview = Some(preview);
        preview
    }

    /// Finalize the last preview, or the current minute offset when the gesture never moved the
    /// scrubber, and return the committed virtual time.
    pub fn commit_seek(&mut self) -> DateTime<Utc> {
        let committed = self.pending_preview.take().unwrap_or_else(|| {
            time_at_offset(self.session_start, self.scrubber_position() as i64)
        });
        self.current = committed;
        committed
    }
}
