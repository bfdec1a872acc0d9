use statrs::distribution::{ContinuousCDF, Normal};

use crate::models::SharpeTwDetails;

/// Annualization conventions. The factor goes under the square root of the
/// Sharpe computation; mixing session-filtered and all-bars views overstates
/// Sharpe by roughly 18%.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annualization {
    /// 24/7 markets, daily view: 365.
    CryptoDaily,
    /// 24/7 markets, weekly view: 7.
    CryptoWeekly,
    /// Session markets, daily view: 252.
    EquityDaily,
    /// Session markets, weekly view: 5.
    EquitySessionWeekly,
}

impl Annualization {
    pub fn factor(&self) -> f64 {
        match self {
            Annualization::CryptoDaily => 365.0,
            Annualization::CryptoWeekly => 7.0,
            Annualization::EquityDaily => 252.0,
            Annualization::EquitySessionWeekly => 5.0,
        }
    }
}

const MICROS_PER_DAY: f64 = 86_400_000_000.0;
const EPS_STD: f64 = 1e-10;
const EQUITY_FLOOR: f64 = 1e-10;

/// Minimum |IS Sharpe| for WFE to be defined: `max(0.1, 2/sqrt(n))`.
///
/// A fixed threshold does not adapt to sample size; this one tracks the
/// standard error of the Sharpe estimator.
pub fn is_sharpe_threshold(n: usize) -> f64 {
    if n == 0 {
        return 0.1;
    }
    (2.0 / (n as f64).sqrt()).max(0.1)
}

/// Time-weighted annualized Sharpe with per-bar duration weights.
///
/// Weights are `w_i = d_i / sum(d_j)` with `d_i` the bar duration in days.
/// Required whenever bar duration is non-uniform (range bars, ticks);
/// equal-weight Sharpe is forbidden for such data.
pub fn sharpe_tw(pnl: &[f64], duration_us: &[i64], annualization: f64) -> (f64, SharpeTwDetails) {
    let n = pnl.len().min(duration_us.len());
    let empty = SharpeTwDetails {
        weighted_mean: 0.0,
        weighted_std: 0.0,
        total_days: 0.0,
        n_bars: n,
    };
    if n == 0 {
        return (0.0, empty);
    }

    let total_days: f64 = duration_us[..n]
        .iter()
        .map(|&d| d.max(0) as f64 / MICROS_PER_DAY)
        .sum();
    if total_days <= 0.0 {
        return (0.0, empty);
    }

    let weights: Vec<f64> = duration_us[..n]
        .iter()
        .map(|&d| (d.max(0) as f64 / MICROS_PER_DAY) / total_days)
        .collect();

    let weighted_mean: f64 = weights.iter().zip(&pnl[..n]).map(|(w, p)| w * p).sum();
    let weighted_var: f64 = weights
        .iter()
        .zip(&pnl[..n])
        .map(|(w, p)| w * (p - weighted_mean).powi(2))
        .sum();
    let weighted_std = weighted_var.sqrt();

    let details = SharpeTwDetails {
        weighted_mean,
        weighted_std,
        total_days,
        n_bars: n,
    };

    if weighted_std < EPS_STD {
        return (0.0, details);
    }
    ((weighted_mean / weighted_std) * annualization.sqrt(), details)
}

/// Legacy equal-weight annualized Sharpe, kept for comparison only.
///
/// Uses the population variance so that it coincides with `sharpe_tw`
/// under constant bar durations.
pub fn bar_sharpe(pnl: &[f64], annualization: f64) -> f64 {
    if pnl.is_empty() {
        return 0.0;
    }
    let n = pnl.len() as f64;
    let mean = pnl.iter().sum::<f64>() / n;
    let var = pnl.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std < EPS_STD {
        return 0.0;
    }
    (mean / std) * annualization.sqrt()
}

/// Fraction of bars with strictly positive P&L (sign agreement).
pub fn hit_rate(pnl: &[f64]) -> f64 {
    if pnl.is_empty() {
        return 0.0;
    }
    pnl.iter().filter(|&&p| p > 0.0).count() as f64 / pnl.len() as f64
}

pub fn cumulative_pnl(pnl: &[f64]) -> f64 {
    pnl.iter().sum()
}

/// Maximum drawdown on the cumulative equity curve, as a fraction of the
/// running peak (floored at 1e-10 before division).
pub fn max_drawdown(pnl: &[f64]) -> f64 {
    let mut equity = 0.0;
    let mut peak = 0.0_f64;
    let mut max_dd = 0.0_f64;
    for p in pnl {
        equity += p;
        peak = peak.max(equity);
        let dd = (peak - equity) / peak.max(EQUITY_FLOOR);
        max_dd = max_dd.max(dd);
    }
    max_dd
}

/// Gross profit over gross loss; `+inf` when gross loss is zero and gross
/// profit is positive; 0 when both are zero.
pub fn profit_factor(pnl: &[f64]) -> f64 {
    let gross_profit: f64 = pnl.iter().filter(|&&p| p > 0.0).sum();
    let gross_loss: f64 = pnl.iter().filter(|&&p| p < 0.0).map(|p| p.abs()).sum();
    if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

/// CVaR at level `alpha`: mean of the worst `ceil(alpha * n)` P&Ls.
pub fn cvar(pnl: &[f64], alpha: f64) -> f64 {
    if pnl.is_empty() {
        return 0.0;
    }
    let mut sorted = pnl.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let k = ((alpha * sorted.len() as f64).ceil() as usize).max(1);
    let worst = &sorted[..k.min(sorted.len())];
    worst.iter().sum::<f64>() / worst.len() as f64
}

/// Annualized return over maximum drawdown.
pub fn calmar(pnl: &[f64], duration_us: &[i64], annualization: f64) -> f64 {
    let n = pnl.len().min(duration_us.len());
    if n == 0 {
        return 0.0;
    }
    let total_days: f64 = duration_us[..n]
        .iter()
        .map(|&d| d.max(0) as f64 / MICROS_PER_DAY)
        .sum();
    if total_days <= 0.0 {
        return 0.0;
    }
    let annual_return = cumulative_pnl(&pnl[..n]) * (annualization / total_days);
    annual_return / max_drawdown(&pnl[..n]).max(EQUITY_FLOOR)
}

/// Duration-weighted Sortino: weighted mean over downside deviation.
pub fn sortino(pnl: &[f64], duration_us: &[i64], annualization: f64) -> f64 {
    let (_, details) = sharpe_tw(pnl, duration_us, annualization);
    if details.total_days <= 0.0 {
        return 0.0;
    }
    let n = details.n_bars;
    let downside_var: f64 = duration_us[..n]
        .iter()
        .zip(&pnl[..n])
        .map(|(&d, &p)| {
            let w = (d.max(0) as f64 / MICROS_PER_DAY) / details.total_days;
            w * p.min(0.0).powi(2)
        })
        .sum();
    let downside_std = downside_var.sqrt();
    if downside_std < EPS_STD {
        return 0.0;
    }
    (details.weighted_mean / downside_std) * annualization.sqrt()
}

pub fn skewness(pnl: &[f64]) -> f64 {
    if pnl.len() < 3 {
        return 0.0;
    }
    let n = pnl.len() as f64;
    let mean = pnl.iter().sum::<f64>() / n;
    let m2 = pnl.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    let m3 = pnl.iter().map(|p| (p - mean).powi(3)).sum::<f64>() / n;
    if m2 < EPS_STD {
        return 0.0;
    }
    m3 / m2.powf(1.5)
}

pub fn excess_kurtosis(pnl: &[f64]) -> f64 {
    if pnl.len() < 4 {
        return 0.0;
    }
    let n = pnl.len() as f64;
    let mean = pnl.iter().sum::<f64>() / n;
    let m2 = pnl.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    let m4 = pnl.iter().map(|p| (p - mean).powi(4)).sum::<f64>() / n;
    if m2 < EPS_STD {
        return 0.0;
    }
    m4 / m2.powi(2) - 3.0
}

/// Mertens standard error of the Sharpe estimator, accounting for
/// skewness and excess kurtosis of the return distribution.
fn mertens_se(sharpe: f64, n: usize, skew: f64, excess_kurt: f64) -> f64 {
    if n < 2 {
        return 1.0;
    }
    let var_term = 1.0 - skew * sharpe + ((excess_kurt + 2.0) / 4.0) * sharpe * sharpe;
    (var_term.max(1e-12) / (n as f64 - 1.0)).sqrt()
}

/// Probabilistic Sharpe Ratio: `P(true SR > benchmark_sr)` given the
/// observed per-period Sharpe over `n` observations.
pub fn probabilistic_sharpe(
    observed_sharpe: f64,
    benchmark_sharpe: f64,
    n: usize,
    skew: f64,
    excess_kurt: f64,
) -> f64 {
    if n < 2 {
        return 0.5;
    }
    let se = mertens_se(observed_sharpe, n, skew, excess_kurt);
    if se < EPS_STD {
        return 0.5;
    }
    let z = (observed_sharpe - benchmark_sharpe) / se;
    normal_cdf(z)
}

/// Deflated Sharpe Ratio from Bailey & Lopez de Prado.
///
/// The benchmark is the Gumbel expected maximum Sharpe under `k_trials`
/// independent zero-skill trials, scaled by the Mertens standard error,
/// then fed through the probabilistic Sharpe.
pub fn deflated_sharpe(
    observed_sharpe: f64,
    n: usize,
    skew: f64,
    excess_kurt: f64,
    k_trials: usize,
) -> f64 {
    if k_trials < 2 {
        return probabilistic_sharpe(observed_sharpe, 0.0, n, skew, excess_kurt);
    }
    // Euler-Mascheroni constant
    let gamma = 0.577_215_664_9_f64;
    let k = k_trials as f64;
    let e = std::f64::consts::E;
    let expected_max =
        (1.0 - gamma) * inverse_normal_cdf(1.0 - 1.0 / k) + gamma * inverse_normal_cdf(1.0 - 1.0 / (k * e));
    let se = mertens_se(observed_sharpe, n, skew, excess_kurt);
    let benchmark = se * expected_max;
    probabilistic_sharpe(observed_sharpe, benchmark, n, skew, excess_kurt)
}

/// HAC t-test for mean P&L > 0 with a Newey-West long-run variance.
///
/// Returns `(t_stat, two_tailed_p)`.
pub fn hac_t_test(pnl: &[f64], max_lag: usize) -> (f64, f64) {
    let n = pnl.len();
    if n < 3 {
        return (0.0, 1.0);
    }
    let nf = n as f64;
    let mean = pnl.iter().sum::<f64>() / nf;

    let gamma0: f64 = pnl.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / nf;
    let lag = max_lag.min(n - 1);
    let mut lrv = gamma0;
    for l in 1..=lag {
        let cov: f64 = (l..n)
            .map(|i| (pnl[i] - mean) * (pnl[i - l] - mean))
            .sum::<f64>()
            / nf;
        let bartlett = 1.0 - l as f64 / (lag as f64 + 1.0);
        lrv += 2.0 * bartlett * cov;
    }
    // Long-run variance can go non-positive with strong negative
    // autocorrelation; fall back to the short-run variance.
    if lrv <= 0.0 {
        lrv = gamma0;
    }
    let se = (lrv / nf).sqrt();
    if se < EPS_STD {
        return (0.0, 1.0);
    }
    let t = mean / se;
    let p = 2.0 * (1.0 - normal_cdf(t.abs()));
    (t, p)
}

pub(crate) fn normal_cdf(x: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).unwrap();
    normal.cdf(x)
}

pub(crate) fn inverse_normal_cdf(p: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).unwrap();
    normal.inverse_cdf(p)
}
