use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation from the upstream bar builder.
///
/// For range bars `duration_us` varies bar to bar and must be preserved;
/// for time bars it is constant. Features arrive pre-normalized and
/// stationary; the engine never rescales them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    /// UTC instant at which the bar closed.
    pub close_ts: DateTime<Utc>,
    /// Bar duration in microseconds (>= 0; variable for range bars).
    pub duration_us: i64,
    /// Feature vector, constant width across the stream.
    pub x: Vec<f64>,
    /// Prediction target.
    pub y: f64,
}

impl Bar {
    pub fn new(close_ts: DateTime<Utc>, duration_us: i64, x: Vec<f64>, y: f64) -> Self {
        Self {
            close_ts,
            duration_us,
            x,
            y,
        }
    }

    /// Bar duration expressed in days.
    pub fn duration_days(&self) -> f64 {
        self.duration_us as f64 / 86_400_000_000.0
    }
}
