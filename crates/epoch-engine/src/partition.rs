use chrono::Duration;

use epoch_core::{Bar, EpochError};

use crate::config::{FoldPolicy, WindowMode};
use crate::models::{FoldSpec, IndexRange};

/// The fold schedule for one run.
#[derive(Debug, Clone)]
pub struct FoldPlan {
    pub folds: Vec<FoldSpec>,
    pub requested: usize,
    /// Folds dropped because the embargo or test range ran off the stream.
    pub dropped: usize,
    /// Fewer than 30 usable folds: below the statistical-significance
    /// floor, reported but not fatal.
    pub below_significance_floor: bool,
    pub train_size: usize,
    pub step: usize,
}

/// Build fixed sliding-window folds with two time-based embargo gaps.
///
/// Every fold's train range has identical length and advances by a fixed
/// step. Each embargo absorbs all bars closing within `embargo_hours` of
/// the preceding range, with at least one bar between boundaries.
pub fn plan_folds(bars: &[Bar], policy: &FoldPolicy) -> Result<FoldPlan, EpochError> {
    // Correctness gate, not a warning: an expanding window invalidates the
    // cross-fold comparability the selector depends on.
    if policy.window == WindowMode::Expanding {
        return Err(EpochError::InvalidConfig(
            "expanding window requested: fixed sliding window required".to_string(),
        ));
    }
    if policy.embargo_hours <= 0.0 {
        return Err(EpochError::InvalidConfig(format!(
            "embargo_hours must be positive, got {}",
            policy.embargo_hours
        )));
    }
    if policy.n_folds < 2 {
        return Err(EpochError::InvalidConfig(format!(
            "at least 2 folds required, got {}",
            policy.n_folds
        )));
    }

    let total = bars.len();
    let n = policy.n_folds;

    // Window long enough that n folds advancing by one test-length each
    // still fit the stream.
    let window = total as f64 / (1.0 + (n as f64 - 1.0) * policy.test_pct);
    let train_size = (window * policy.train_pct).floor() as usize;
    let val_size = (window * policy.val_pct).floor() as usize;
    let test_size = (window * policy.test_pct).floor() as usize;
    if train_size < 2 || val_size < 2 || test_size < 2 {
        return Err(EpochError::InsufficientData(format!(
            "{} bars cannot support {} folds with proportions {:.2}/{:.2}/{:.2}",
            total, n, policy.train_pct, policy.val_pct, policy.test_pct
        )));
    }
    let step = test_size.max(1);

    let embargo = Duration::microseconds((policy.embargo_hours * 3_600_000_000.0) as i64);

    let mut folds = Vec::with_capacity(n);
    for i in 0..n {
        let train_start = i * step;
        let train_end = train_start + train_size;
        if train_end >= total {
            break;
        }

        let validation_start = match embargo_boundary(bars, train_end, embargo) {
            Some(idx) => idx,
            None => break,
        };
        let validation_end = validation_start + val_size;
        if validation_end >= total {
            break;
        }

        let test_start = match embargo_boundary(bars, validation_end, embargo) {
            Some(idx) => idx,
            None => break,
        };
        let test_end = test_start + test_size;
        if test_end > total {
            break;
        }

        folds.push(FoldSpec {
            fold_idx: folds.len(),
            train: IndexRange::new(train_start, train_end),
            embargo_a: IndexRange::new(train_end, validation_start),
            validation: IndexRange::new(validation_start, validation_end),
            embargo_b: IndexRange::new(validation_end, test_start),
            test: IndexRange::new(test_start, test_end),
        });
    }

    if folds.is_empty() {
        return Err(EpochError::InsufficientData(format!(
            "no fold satisfies the {}h embargo within {} bars",
            policy.embargo_hours, total
        )));
    }

    let usable = folds.len();
    Ok(FoldPlan {
        folds,
        requested: n,
        dropped: n - usable,
        below_significance_floor: usable < 30,
        train_size,
        step,
    })
}

/// First index at or after `from` whose bar closes at least `embargo`
/// after the last bar of the preceding range, forced past `from` so at
/// least one bar separates the boundaries.
fn embargo_boundary(bars: &[Bar], from: usize, embargo: Duration) -> Option<usize> {
    let anchor = bars[from - 1].close_ts + embargo;
    let mut idx = from;
    while idx < bars.len() && bars[idx].close_ts < anchor {
        idx += 1;
    }
    let idx = idx.max(from + 1);
    if idx >= bars.len() {
        None
    } else {
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const HOUR_US: i64 = 3_600_000_000;

    fn hourly_bars(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2021, 1, 4, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                Bar::new(
                    start + Duration::hours(i as i64 + 1),
                    HOUR_US,
                    vec![0.0],
                    0.0,
                )
            })
            .collect()
    }

    fn policy(n_folds: usize, embargo_hours: f64) -> FoldPolicy {
        FoldPolicy {
            n_folds,
            embargo_hours,
            ..FoldPolicy::default()
        }
    }

    #[test]
    fn embargoes_honor_the_time_gap() {
        let bars = hourly_bars(4000);
        let plan = plan_folds(&bars, &policy(5, 24.0)).unwrap();
        let embargo = Duration::hours(24);
        for fold in &plan.folds {
            let train_end_ts = bars[fold.train.end - 1].close_ts;
            let val_start_ts = bars[fold.validation.start].close_ts;
            assert!(val_start_ts >= train_end_ts + embargo);

            let val_end_ts = bars[fold.validation.end - 1].close_ts;
            let test_start_ts = bars[fold.test.start].close_ts;
            assert!(test_start_ts >= val_end_ts + embargo);
        }
    }

    #[test]
    fn window_is_fixed_and_advancing() {
        let bars = hourly_bars(4000);
        let plan = plan_folds(&bars, &policy(6, 12.0)).unwrap();
        let first = &plan.folds[0];
        for pair in plan.folds.windows(2) {
            assert!(pair[1].train.start > pair[0].train.start);
            assert_eq!(pair[1].train.len(), first.train.len());
        }
    }

    #[test]
    fn ranges_are_contiguous_and_ordered() {
        let bars = hourly_bars(3000);
        let plan = plan_folds(&bars, &policy(4, 6.0)).unwrap();
        for fold in &plan.folds {
            assert_eq!(fold.train.end, fold.embargo_a.start);
            assert_eq!(fold.embargo_a.end, fold.validation.start);
            assert_eq!(fold.validation.end, fold.embargo_b.start);
            assert_eq!(fold.embargo_b.end, fold.test.start);
            assert!(!fold.embargo_a.is_empty());
            assert!(!fold.embargo_b.is_empty());
        }
    }

    #[test]
    fn expanding_window_is_rejected_at_construction() {
        let bars = hourly_bars(2000);
        let mut p = policy(4, 6.0);
        p.window = WindowMode::Expanding;
        let err = plan_folds(&bars, &p).unwrap_err();
        assert!(err.to_string().contains("fixed sliding window required"));
    }

    #[test]
    fn unsatisfiable_folds_are_truncated_not_fatal() {
        // A huge embargo eats the later folds.
        let bars = hourly_bars(2500);
        let plan = plan_folds(&bars, &policy(10, 240.0)).unwrap();
        assert!(plan.folds.len() < 10);
        assert_eq!(plan.dropped, 10 - plan.folds.len());
        assert!(plan.below_significance_floor);
    }

    #[test]
    fn too_few_bars_is_an_error() {
        let bars = hourly_bars(20);
        assert!(plan_folds(&bars, &policy(10, 24.0)).is_err());
    }
}
