use std::collections::BTreeMap;

use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::models::{
    AggregateReport, AggregateStatistics, Diagnostics, FoldOutcome, FoldStatus, ReasonCode,
    Verdict, WfeDistribution,
};
use crate::statistical;

/// Cross-fold aggregation with robust (median-first) summaries and the
/// run-level diagnostics: peak-picking, selection stability, effective
/// sample size, and meta-overfitting.
pub fn aggregate_outcomes(
    outcomes: &[FoldOutcome],
    candidates: &[u32],
    below_significance_floor: bool,
    bootstrap_samples: usize,
    seed: u64,
) -> AggregateReport {
    let n_folds = outcomes.len();
    let count = |status: FoldStatus| outcomes.iter().filter(|o| o.status == status).count();
    let n_normal = count(FoldStatus::Normal);
    let n_fallback = count(FoldStatus::Fallback);
    let n_reject = count(FoldStatus::Reject);
    let n_failed = count(FoldStatus::Failed);

    let sharpes: Vec<f64> = outcomes
        .iter()
        .filter_map(|o| o.test_metrics.as_ref().map(|m| m.sharpe_tw))
        .collect();
    let positive_sharpe_fraction = if sharpes.is_empty() {
        0.0
    } else {
        sharpes.iter().filter(|&&s| s > 0.0).count() as f64 / sharpes.len() as f64
    };

    // Best defined WFE per fold is the fold's generalization quality.
    let wfes: Vec<f64> = outcomes
        .iter()
        .filter_map(|o| {
            o.sweep
                .iter()
                .filter_map(|r| r.wfe)
                .fold(None::<f64>, |acc, w| match acc {
                    Some(best) if best >= w => Some(best),
                    _ => Some(w),
                })
        })
        .collect();
    let wfe_distribution = distribution(&wfes);

    let selections: Vec<u32> = outcomes.iter().map(|o| o.selected_epoch).collect();
    let mut selection_histogram: BTreeMap<u32, usize> = BTreeMap::new();
    for &s in &selections {
        *selection_histogram.entry(s).or_insert(0) += 1;
    }
    let selection_mode = selection_histogram
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(&epoch, _)| epoch);

    let diagnostics = compute_diagnostics(
        outcomes,
        candidates,
        &sharpes,
        &selections,
        below_significance_floor,
    );

    let raw_p = statistical::sharpe_series_p_value(&sharpes);
    let corrections = raw_p.map(|p| statistical::hypothesis_correction(p, candidates.len()));
    let statistics = AggregateStatistics {
        sharpe_p_value: raw_p,
        bonferroni_p_value: corrections.map(|c| c.0),
        bh_p_value: corrections.map(|c| c.1),
        bootstrap: statistical::bootstrap_confidence_intervals(&sharpes, bootstrap_samples, seed),
    };

    let (verdict, reasons) = decide(
        n_folds,
        n_reject,
        n_failed,
        positive_sharpe_fraction,
        wfe_distribution.as_ref(),
        &diagnostics,
    );

    AggregateReport {
        n_folds,
        n_normal,
        n_fallback,
        n_reject,
        n_failed,
        positive_sharpe_fraction,
        sharpe_tw_median: median(&sharpes),
        sharpe_tw_mean: mean(&sharpes),
        sharpe_tw_std: std_dev(&sharpes),
        wfe_distribution,
        selection_histogram,
        selection_mode,
        diagnostics,
        statistical: statistics,
        verdict,
        reasons,
    }
}

fn compute_diagnostics(
    outcomes: &[FoldOutcome],
    candidates: &[u32],
    sharpes: &[f64],
    selections: &[u32],
    below_significance_floor: bool,
) -> Diagnostics {
    let n = selections.len();

    // Meaningless for a single-candidate grid: every selection is an edge.
    let peak_picking_fraction = if n == 0 || candidates.len() < 2 {
        0.0
    } else {
        let lo = *candidates.first().unwrap();
        let hi = *candidates.last().unwrap();
        selections.iter().filter(|&&s| s == lo || s == hi).count() as f64 / n as f64
    };

    let selection_change_rate = if n < 2 {
        0.0
    } else {
        selections.windows(2).filter(|w| w[0] != w[1]).count() as f64 / (n - 1) as f64
    };

    let epochs_f: Vec<f64> = selections.iter().map(|&s| s as f64).collect();
    let epoch_mean = mean(&epochs_f);
    let epoch_cv = if epoch_mean.abs() < 1e-10 {
        0.0
    } else {
        std_dev(&epochs_f) / epoch_mean
    };

    let rho = lag1_autocorrelation(sharpes).clamp(-0.99, 0.99);
    let k = candidates.len().max(1) as f64;
    let effective_sample_size =
        outcomes.len() as f64 * (1.0 / k.sqrt()) * ((1.0 - rho) / (1.0 + rho));

    let chi_square_p_value = uniformity_p_value(selections, candidates);
    let meta_overfitting =
        chi_square_p_value.map(|p| p > 0.5).unwrap_or(false) || epoch_cv > 0.5;

    let degradations: Vec<f64> = outcomes
        .iter()
        .filter_map(|o| o.degradation.map(|d| d.sharpe_degradation))
        .collect();
    let median_sharpe_degradation = if degradations.is_empty() {
        None
    } else {
        Some(median(&degradations))
    };

    Diagnostics {
        peak_picking_fraction,
        selection_change_rate,
        epoch_cv,
        fold_autocorrelation: rho,
        effective_sample_size,
        chi_square_p_value,
        meta_overfitting,
        below_significance_floor,
        median_sharpe_degradation,
    }
}

fn decide(
    n_folds: usize,
    n_reject: usize,
    n_failed: usize,
    positive_sharpe_fraction: f64,
    wfe_distribution: Option<&WfeDistribution>,
    diagnostics: &Diagnostics,
) -> (Verdict, Vec<ReasonCode>) {
    let mut reject_reasons = Vec::new();
    let mut warning_reasons = Vec::new();

    if n_folds > 0 && (n_reject + n_failed) * 2 >= n_folds {
        reject_reasons.push(ReasonCode::MajorityFoldsRejected);
    }
    match wfe_distribution {
        Some(d) if d.median < 0.30 => reject_reasons.push(ReasonCode::MaxWfeBelowThreshold),
        Some(d) if d.median < 0.50 => warning_reasons.push(ReasonCode::WfeMedianBelowTarget),
        Some(_) => {}
        // No fold produced a defined WFE at all.
        None => reject_reasons.push(ReasonCode::MaxWfeBelowThreshold),
    }
    if diagnostics.effective_sample_size < 10.0 {
        reject_reasons.push(ReasonCode::EffectiveSampleTooSmall);
    }
    if diagnostics.peak_picking_fraction > 0.5 {
        reject_reasons.push(ReasonCode::PeakPickingExceeded);
    }

    if positive_sharpe_fraction <= 0.55 {
        warning_reasons.push(ReasonCode::LowPositiveSharpeFraction);
    }
    if diagnostics.selection_change_rate >= 0.30 || diagnostics.epoch_cv >= 0.50 {
        warning_reasons.push(ReasonCode::UnstableSelection);
    }
    if diagnostics.meta_overfitting {
        warning_reasons.push(ReasonCode::MetaOverfitting);
    }
    if diagnostics.below_significance_floor {
        warning_reasons.push(ReasonCode::BelowSignificanceFloor);
    }

    if !reject_reasons.is_empty() {
        reject_reasons.extend(warning_reasons);
        (Verdict::RejectAll, reject_reasons)
    } else if !warning_reasons.is_empty() {
        (Verdict::Warning, warning_reasons)
    } else {
        (Verdict::Accept, Vec::new())
    }
}

/// Chi-square test of selection uniformity across candidates. A high
/// p-value means selections look uniform-random over the grid, which for
/// a genuine optimum is evidence of meta-overfitting.
fn uniformity_p_value(selections: &[u32], candidates: &[u32]) -> Option<f64> {
    let k = candidates.len();
    if k < 2 || selections.len() < k {
        return None;
    }
    let expected = selections.len() as f64 / k as f64;
    let stat: f64 = candidates
        .iter()
        .map(|&c| {
            let observed = selections.iter().filter(|&&s| s == c).count() as f64;
            (observed - expected).powi(2) / expected
        })
        .sum();
    let dist = ChiSquared::new((k - 1) as f64).ok()?;
    Some(1.0 - dist.cdf(stat))
}

fn lag1_autocorrelation(series: &[f64]) -> f64 {
    if series.len() < 3 {
        return 0.0;
    }
    let m = mean(series);
    let denom: f64 = series.iter().map(|x| (x - m).powi(2)).sum();
    if denom < 1e-12 {
        return 0.0;
    }
    let num: f64 = series
        .windows(2)
        .map(|w| (w[0] - m) * (w[1] - m))
        .sum();
    num / denom
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() as f64 - 1.0);
    var.sqrt()
}

fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted[sorted.len() / 2]
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn distribution(xs: &[f64]) -> Option<WfeDistribution> {
    if xs.is_empty() {
        return None;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(WfeDistribution {
        min: sorted[0],
        p25: quantile_sorted(&sorted, 0.25),
        median: quantile_sorted(&sorted, 0.50),
        p75: quantile_sorted(&sorted, 0.75),
        max: sorted[sorted.len() - 1],
    })
}
