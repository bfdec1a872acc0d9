use serde::{Deserialize, Serialize};

use epoch_core::EpochError;

use crate::metrics::Annualization;

/// Epoch search space. The geometric constructor spreads `granularity`
/// candidates multiplicatively across `[e_min, e_max]`; an explicit list
/// is accepted as-is (and may be a single candidate).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EpochSearch {
    Geometric {
        e_min: u32,
        e_max: u32,
        granularity: usize,
    },
    Explicit {
        candidates: Vec<u32>,
    },
}

impl EpochSearch {
    /// Resolve to a sorted, deduplicated candidate list.
    pub fn candidates(&self) -> Result<Vec<u32>, EpochError> {
        match self {
            EpochSearch::Geometric {
                e_min,
                e_max,
                granularity,
            } => {
                if *granularity < 2 {
                    return Err(EpochError::InvalidConfig(format!(
                        "epoch search granularity must be >= 2, got {}",
                        granularity
                    )));
                }
                if *e_min == 0 || *e_max <= *e_min {
                    return Err(EpochError::InvalidConfig(format!(
                        "epoch search range must satisfy 0 < e_min < e_max, got [{}, {}]",
                        e_min, e_max
                    )));
                }
                let lo = *e_min as f64;
                let hi = *e_max as f64;
                let k = *granularity;
                let mut out: Vec<u32> = (0..k)
                    .map(|i| {
                        let t = i as f64 / (k - 1) as f64;
                        (lo * (hi / lo).powf(t)).round() as u32
                    })
                    .collect();
                out.sort_unstable();
                out.dedup();
                Ok(out)
            }
            EpochSearch::Explicit { candidates } => {
                if candidates.is_empty() {
                    return Err(EpochError::InvalidConfig(
                        "explicit epoch candidate list is empty".to_string(),
                    ));
                }
                if candidates.iter().any(|&e| e == 0) {
                    return Err(EpochError::InvalidConfig(
                        "epoch candidates must be positive".to_string(),
                    ));
                }
                let mut out = candidates.clone();
                out.sort_unstable();
                out.dedup();
                Ok(out)
            }
        }
    }
}

/// Walk-forward window policy. Only the fixed sliding window is legal;
/// requesting an expanding window is a construction-time error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    #[default]
    Sliding,
    Expanding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldPolicy {
    pub n_folds: usize,
    pub train_pct: f64,
    pub val_pct: f64,
    pub test_pct: f64,
    /// Embargo between ranges, in calendar hours.
    pub embargo_hours: f64,
    #[serde(default)]
    pub window: WindowMode,
}

impl Default for FoldPolicy {
    fn default() -> Self {
        Self {
            n_folds: 40,
            train_pct: 0.60,
            val_pct: 0.20,
            test_pct: 0.20,
            embargo_hours: 24.0,
            window: WindowMode::Sliding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketConvention {
    Crypto24_7,
    EquitySession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    SessionFiltered,
    AllBars,
}

/// Relative WFE improvement a frontier point must exceed before the
/// selection moves off a previously chosen epoch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StabilityMargin {
    Fixed { margin: f64 },
    /// Margin scales with observed cross-fold WFE dispersion.
    Adaptive,
}

impl Default for StabilityMargin {
    fn default() -> Self {
        StabilityMargin::Fixed { margin: 0.10 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmootherKind {
    Bayesian,
    Ema { alpha: f64 },
    Sma { window: usize },
    Median { window: usize },
}

impl Default for SmootherKind {
    fn default() -> Self {
        SmootherKind::Bayesian
    }
}

fn default_wfe_reject_threshold() -> f64 {
    0.30
}

fn default_parallel_sweep() -> bool {
    true
}

fn default_bootstrap_samples() -> usize {
    1000
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub epoch_search: EpochSearch,
    pub fold_policy: FoldPolicy,
    pub market_convention: MarketConvention,
    pub view: View,
    #[serde(default)]
    pub stability_margin: StabilityMargin,
    #[serde(default = "default_wfe_reject_threshold")]
    pub wfe_reject_threshold: f64,
    #[serde(default)]
    pub smoother: SmootherKind,
    /// Base seed forwarded to the model factory (per-fold, per-candidate
    /// seeds are derived from it).
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_parallel_sweep")]
    pub parallel_sweep: bool,
    /// Wall-clock budget in seconds; exhaustion fails the current fold and
    /// finalizes the run with whatever completed.
    #[serde(default)]
    pub budget_secs: Option<f64>,
    #[serde(default = "default_bootstrap_samples")]
    pub bootstrap_samples: usize,
}

impl EngineConfig {
    /// Fail-fast validation; no fold runs when this errors.
    pub fn validate(&self) -> Result<(), EpochError> {
        self.epoch_search.candidates()?;

        let p = &self.fold_policy;
        if p.window == WindowMode::Expanding {
            return Err(EpochError::InvalidConfig(
                "expanding window requested: fixed sliding window required".to_string(),
            ));
        }
        if p.n_folds < 2 {
            return Err(EpochError::InvalidConfig(format!(
                "at least 2 folds required, got {}",
                p.n_folds
            )));
        }
        if p.embargo_hours <= 0.0 {
            return Err(EpochError::InvalidConfig(format!(
                "embargo_hours must be positive, got {}",
                p.embargo_hours
            )));
        }
        for (name, v) in [
            ("train_pct", p.train_pct),
            ("val_pct", p.val_pct),
            ("test_pct", p.test_pct),
        ] {
            if !(v > 0.0 && v < 1.0) {
                return Err(EpochError::InvalidConfig(format!(
                    "{} must be in (0, 1), got {}",
                    name, v
                )));
            }
        }
        let total = p.train_pct + p.val_pct + p.test_pct;
        if (total - 1.0).abs() > 1e-6 {
            return Err(EpochError::InvalidConfig(format!(
                "fold proportions must sum to 1.0, got {}",
                total
            )));
        }

        if let StabilityMargin::Fixed { margin } = self.stability_margin {
            if margin < 0.0 {
                return Err(EpochError::InvalidConfig(format!(
                    "stability margin must be non-negative, got {}",
                    margin
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.wfe_reject_threshold) {
            return Err(EpochError::InvalidConfig(format!(
                "wfe_reject_threshold must be in [0, 1], got {}",
                self.wfe_reject_threshold
            )));
        }

        match self.smoother {
            SmootherKind::Ema { alpha } => {
                if !(alpha > 0.0 && alpha <= 1.0) {
                    return Err(EpochError::InvalidConfig(format!(
                        "EMA alpha must be in (0, 1], got {}",
                        alpha
                    )));
                }
            }
            SmootherKind::Sma { window } | SmootherKind::Median { window } => {
                if window == 0 {
                    return Err(EpochError::InvalidConfig(
                        "smoother window must be positive".to_string(),
                    ));
                }
            }
            SmootherKind::Bayesian => {}
        }

        Ok(())
    }

    /// Resolved candidate list (validated).
    pub fn candidates(&self) -> Result<Vec<u32>, EpochError> {
        self.epoch_search.candidates()
    }

    /// Annualization convention implied by market and view. Mixing views
    /// overstates Sharpe; the mapping is fixed here, not caller-chosen.
    pub fn annualization(&self) -> Annualization {
        match (self.market_convention, self.view) {
            (MarketConvention::Crypto24_7, View::AllBars) => Annualization::CryptoDaily,
            (MarketConvention::Crypto24_7, View::SessionFiltered) => Annualization::EquityDaily,
            (MarketConvention::EquitySession, _) => Annualization::EquityDaily,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> EngineConfig {
        EngineConfig {
            epoch_search: EpochSearch::Geometric {
                e_min: 100,
                e_max: 800,
                granularity: 4,
            },
            fold_policy: FoldPolicy::default(),
            market_convention: MarketConvention::Crypto24_7,
            view: View::AllBars,
            stability_margin: StabilityMargin::default(),
            wfe_reject_threshold: 0.30,
            smoother: SmootherKind::Bayesian,
            seed: 7,
            parallel_sweep: true,
            budget_secs: None,
            bootstrap_samples: 200,
        }
    }

    #[test]
    fn geometric_candidates_are_spaced_and_sorted() {
        let search = EpochSearch::Geometric {
            e_min: 100,
            e_max: 800,
            granularity: 4,
        };
        let c = search.candidates().unwrap();
        assert_eq!(c, vec![100, 200, 400, 800]);
    }

    #[test]
    fn geometric_granularity_below_two_is_rejected() {
        let search = EpochSearch::Geometric {
            e_min: 100,
            e_max: 800,
            granularity: 1,
        };
        assert!(search.candidates().is_err());
    }

    #[test]
    fn explicit_single_candidate_is_accepted() {
        let search = EpochSearch::Explicit {
            candidates: vec![250],
        };
        assert_eq!(search.candidates().unwrap(), vec![250]);
    }

    #[test]
    fn expanding_window_is_a_construction_error() {
        let mut cfg = base_config();
        cfg.fold_policy.window = WindowMode::Expanding;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("fixed sliding window required"));
    }

    #[test]
    fn non_positive_embargo_is_rejected() {
        let mut cfg = base_config();
        cfg.fold_policy.embargo_hours = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn session_filtered_crypto_annualizes_like_equity() {
        let mut cfg = base_config();
        cfg.view = View::SessionFiltered;
        assert_eq!(cfg.annualization().factor(), 252.0);
        cfg.view = View::AllBars;
        assert_eq!(cfg.annualization().factor(), 365.0);
    }
}
