use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use epoch_core::Clock;

/// DST-aware session clock: London open through New York close, resolved
/// through the IANA database per civil date. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionClock;

const LONDON_OPEN_HOUR: u32 = 8;
const NEW_YORK_CLOSE_HOUR: u32 = 17;

impl SessionClock {
    pub fn new() -> Self {
        Self
    }
}

/// Resolve a civil time in `tz` to the earliest matching instant.
///
/// Ambiguous times (clocks fall back) take the first occurrence;
/// nonexistent times (clocks spring forward) roll to the first valid
/// instant after the gap.
fn earliest_instant(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let mut probe = naive + Duration::minutes(15);
            loop {
                match tz.from_local_datetime(&probe) {
                    LocalResult::Single(dt) => return dt,
                    LocalResult::Ambiguous(earliest, _) => return earliest,
                    LocalResult::None => probe += Duration::minutes(15),
                }
            }
        }
    }
}

impl Clock for SessionClock {
    fn session_bounds_utc(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        // Fixed wall-clock hours are always valid naive times.
        let open_local = date.and_hms_opt(LONDON_OPEN_HOUR, 0, 0).unwrap();
        let close_local = date.and_hms_opt(NEW_YORK_CLOSE_HOUR, 0, 0).unwrap();

        let open = earliest_instant(chrono_tz::Europe::London, open_local).with_timezone(&Utc);
        let close = earliest_instant(chrono_tz::America::New_York, close_local).with_timezone(&Utc);
        (open, close)
    }

    fn is_tradeable(&self, close_ts: DateTime<Utc>) -> bool {
        let london = close_ts.with_timezone(&chrono_tz::Europe::London);
        let date = london.date_naive();

        if london.weekday() == Weekday::Sat || london.weekday() == Weekday::Sun {
            return false;
        }

        let (open, close) = self.session_bounds_utc(date);
        close_ts >= open && close_ts < close
    }
}
