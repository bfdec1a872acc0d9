use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Half-open index range `[start, end)` into the bar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn as_range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

/// One walk-forward fold: five contiguous, non-overlapping ranges in
/// temporal order. The train window has identical length on every fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldSpec {
    pub fold_idx: usize,
    pub train: IndexRange,
    pub embargo_a: IndexRange,
    pub validation: IndexRange,
    pub embargo_b: IndexRange,
    pub test: IndexRange,
}

/// Why a sweep row's WFE is (or is not) defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    Valid,
    IsTooLow,
    NegativeValidation,
}

/// One fold x one epoch candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSweepResult {
    pub epoch: u32,
    pub is_sharpe: f64,
    pub validation_sharpe: f64,
    /// `validation_sharpe / is_sharpe`; None when `|is_sharpe|` is below
    /// the sample-size threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wfe: Option<f64>,
    pub training_cost: f64,
    pub status: SweepStatus,
}

/// WFE quality band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WfeBand {
    Excellent,
    Acceptable,
    Investigate,
    Reject,
}

impl WfeBand {
    pub fn classify(wfe: f64) -> Self {
        if wfe >= 0.70 {
            WfeBand::Excellent
        } else if wfe >= 0.50 {
            WfeBand::Acceptable
        } else if wfe >= 0.30 {
            WfeBand::Investigate
        } else {
            WfeBand::Reject
        }
    }

    /// Label used by older report consumers.
    pub fn legacy_alias(&self) -> &'static str {
        match self {
            WfeBand::Excellent => "GOOD",
            WfeBand::Acceptable => "ACCEPTABLE",
            WfeBand::Investigate => "WARNING",
            WfeBand::Reject => "SEVERE",
        }
    }
}

/// Carried state of the Bayesian epoch smoother.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BayesianState {
    pub mean: f64,
    pub variance: f64,
    pub n_observations: usize,
}

/// Breakdown of the time-weighted Sharpe computation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SharpeTwDetails {
    pub weighted_mean: f64,
    pub weighted_std: f64,
    pub total_days: f64,
    pub n_bars: usize,
}

/// Test-slice metric bundle: primary, risk, and statistical tiers.
///
/// `bar_sharpe` is the legacy equal-weight Sharpe, kept for comparison
/// only; `sharpe_tw` is authoritative for range-bar data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestMetrics {
    // Primary tier
    pub bar_sharpe: f64,
    pub sharpe_tw: f64,
    pub sharpe_tw_details: SharpeTwDetails,
    pub hit_rate: f64,
    pub cumulative_pnl: f64,
    // Risk tier
    pub max_drawdown: f64,
    pub cvar_95: f64,
    /// Absent when non-finite (zero gross loss) or undefined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_factor: Option<f64>,
    pub calmar: f64,
    pub sortino: f64,
    // Statistical tier
    pub skewness: f64,
    pub excess_kurtosis: f64,
    pub psr: f64,
    pub dsr: f64,
    pub hac_t_stat: f64,
    pub hac_p_value: f64,
    pub n_bars: usize,
}

/// Validation-to-test performance decay for one fold, relative to the
/// validation Sharpe at the applied epoch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OosDegradation {
    pub validation_sharpe: f64,
    pub test_sharpe_tw: f64,
    pub sharpe_degradation: f64,
}

/// How a fold resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldStatus {
    /// Sweep accepted; smoother observed the validation optimum.
    Normal,
    /// No candidate produced a defined WFE; selection carried forward.
    Fallback,
    /// Selector reject gate fired; fallback selection, smoother untouched.
    Reject,
    /// Infrastructure failure (model error or budget cutoff).
    Failed,
}

/// Per-fold record; one NDJSON line each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldOutcome {
    pub fold_idx: usize,
    pub train_range: IndexRange,
    pub validation_range: IndexRange,
    pub test_range: IndexRange,
    pub selected_epoch: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_optimal_epoch: Option<u32>,
    pub posterior_mean: f64,
    pub posterior_variance: f64,
    pub sweep: Vec<EpochSweepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wfe_band: Option<WfeBand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wfe_band_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_metrics: Option<TestMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degradation: Option<OosDegradation>,
    pub status: FoldStatus,
    /// Captured error message for `Failed` folds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Cross-fold diagnostic verdicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Fraction of selections landing on a candidate-range boundary.
    pub peak_picking_fraction: f64,
    /// Fraction of folds whose selection differs from the previous fold.
    pub selection_change_rate: f64,
    /// Coefficient of variation of selected epochs.
    pub epoch_cv: f64,
    /// Lag-1 autocorrelation of the per-fold Sharpe series.
    pub fold_autocorrelation: f64,
    /// `N_folds * K^-1/2 * (1-rho)/(1+rho)`.
    pub effective_sample_size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chi_square_p_value: Option<f64>,
    pub meta_overfitting: bool,
    pub below_significance_floor: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median_sharpe_degradation: Option<f64>,
}

/// Bootstrap confidence intervals on the cross-fold Sharpe series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BootstrapIntervals {
    pub mean_sharpe_lower: f64,
    pub mean_sharpe_upper: f64,
    pub median_sharpe_lower: f64,
    pub median_sharpe_upper: f64,
    pub samples: usize,
}

/// Statistical tier of the aggregate report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateStatistics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharpe_p_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonferroni_p_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bh_p_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapIntervals>,
}

/// Quartiles of the observed WFE distribution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WfeDistribution {
    pub min: f64,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Warning,
    RejectAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    MaxWfeBelowThreshold,
    MajorityFoldsRejected,
    EffectiveSampleTooSmall,
    PeakPickingExceeded,
    MetaOverfitting,
    UnstableSelection,
    LowPositiveSharpeFraction,
    WfeMedianBelowTarget,
    BelowSignificanceFloor,
}

/// Cross-fold view of the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub n_folds: usize,
    pub n_normal: usize,
    pub n_fallback: usize,
    pub n_reject: usize,
    pub n_failed: usize,
    pub positive_sharpe_fraction: f64,
    pub sharpe_tw_median: f64,
    pub sharpe_tw_mean: f64,
    pub sharpe_tw_std: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wfe_distribution: Option<WfeDistribution>,
    /// Selected-epoch histogram (sorted by epoch for stable serialization).
    pub selection_histogram: BTreeMap<u32, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_mode: Option<u32>,
    pub diagnostics: Diagnostics,
    pub statistical: AggregateStatistics,
    pub verdict: Verdict,
    pub reasons: Vec<ReasonCode>,
}
