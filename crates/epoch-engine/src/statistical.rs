use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::metrics::normal_cdf;
use crate::models::BootstrapIntervals;

/// Bootstrap confidence intervals on the cross-fold Sharpe series.
///
/// Resamples folds with replacement and produces 95% percentile
/// intervals on the mean and median. Resamples run in parallel; each
/// draws from its own seeded stream so the result is reproducible.
pub fn bootstrap_confidence_intervals(
    fold_sharpes: &[f64],
    num_samples: usize,
    seed: u64,
) -> Option<BootstrapIntervals> {
    if fold_sharpes.len() < 5 || num_samples == 0 {
        return None;
    }

    let n = fold_sharpes.len();
    let stats: Vec<(f64, f64)> = (0..num_samples)
        .into_par_iter()
        .map(|sample_idx| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(sample_idx as u64));
            let mut resampled: Vec<f64> = (0..n)
                .map(|_| fold_sharpes[rng.gen_range(0..n)])
                .collect();
            let mean = resampled.iter().sum::<f64>() / n as f64;
            resampled.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let median = resampled[n / 2];
            (mean, median)
        })
        .collect();

    let mut means: Vec<f64> = stats.iter().map(|s| s.0).collect();
    let mut medians: Vec<f64> = stats.iter().map(|s| s.1).collect();
    means.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    medians.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    Some(BootstrapIntervals {
        mean_sharpe_lower: percentile_sorted(&means, 2.5),
        mean_sharpe_upper: percentile_sorted(&means, 97.5),
        median_sharpe_lower: percentile_sorted(&medians, 2.5),
        median_sharpe_upper: percentile_sorted(&medians, 97.5),
        samples: num_samples,
    })
}

/// Two-tailed p-value for the null that the mean fold Sharpe is zero,
/// via the normal approximation to the one-sample t statistic.
pub fn sharpe_series_p_value(fold_sharpes: &[f64]) -> Option<f64> {
    if fold_sharpes.len() < 3 {
        return None;
    }
    let n = fold_sharpes.len() as f64;
    let mean = fold_sharpes.iter().sum::<f64>() / n;
    let var = fold_sharpes
        .iter()
        .map(|s| (s - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    let se = (var / n).sqrt();
    if se < 1e-10 {
        return Some(if mean.abs() > 1e-10 { 0.0 } else { 1.0 });
    }
    let z = mean / se;
    Some(2.0 * (1.0 - normal_cdf(z.abs())))
}

/// Bonferroni and Benjamini-Hochberg adjustments for `num_tests` trials.
///
/// With a single primary test the BH adjustment coincides with
/// Bonferroni; both are reported for downstream consumers.
pub fn hypothesis_correction(raw_p_value: f64, num_tests: usize) -> (f64, f64) {
    let n = num_tests.max(1) as f64;
    let bonferroni = (raw_p_value * n).min(1.0);
    let bh = (raw_p_value * n).min(1.0);
    (bonferroni, bh)
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
