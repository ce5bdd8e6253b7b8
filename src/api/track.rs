use serde::{Deserialize, Serialize};

use super::TrackPaths;

/// Margin added around the track outline, in track-map units.
pub const DEFAULT_TRACK_PADDING: f64 = 300.;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub x: f64,
    pub y: f64,
}

/// Padded bounding box of every recorded track outline point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl TrackBounds {
    /// `None` when the map holds no points at all.
    pub fn from_paths(paths: &TrackPaths, padding: f64) -> Option<Self> {
        let mut points = paths.values().flatten();
        let first = points.next()?;
        let bounds = points.fold(
            Self {
                min_x: first.x,
                max_x: first.x,
                min_y: first.y,
                max_y: first.y,
            },
            |acc, p| Self {
                min_x: acc.min_x.min(p.x),
                max_x: acc.max_x.max(p.x),
                min_y: acc.min_y.min(p.y),
                max_y: acc.max_y.max(p.y),
            },
        );

        Some(Self {
            min_x: bounds.min_x - padding,
            max_x: bounds.max_x + padding,
            min_y: bounds.min_y - padding,
            max_y: bounds.max_y + padding,
        })
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}
