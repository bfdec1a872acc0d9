use chrono::{DateTime, NaiveDate, Utc};

use crate::{Bar, EpochError};

/// A trained model produced by a [`ModelFactory`].
///
/// Models are local to the fold that trained them; no weights cross fold
/// boundaries.
pub trait Model: Send {
    /// Predict one target value per input bar.
    fn predict(&self, bars: &[Bar]) -> Vec<f64>;
}

/// Training capability supplied by the caller.
///
/// `fit` must be deterministic given the same seed, epoch count, and data
/// slice, and must not apply early stopping internally — the epoch count is
/// the decision variable the engine sweeps.
pub trait ModelFactory: Send + Sync {
    fn fit(&self, train: &[Bar], epochs: u32, seed: u64) -> Result<Box<dyn Model>, EpochError>;
}

/// DST-aware session capability. Implementations must resolve civil times
/// through the IANA database, never fixed UTC offsets.
pub trait Clock: Send + Sync {
    /// The London-open-to-New-York-close window for a civil date, in UTC.
    fn session_bounds_utc(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>);

    /// Whether a bar closing at this instant falls inside a tradeable
    /// session (weekends and out-of-session bars are rejected).
    fn is_tradeable(&self, close_ts: DateTime<Utc>) -> bool;
}
