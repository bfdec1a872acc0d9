use std::collections::VecDeque;

use crate::config::SmootherKind;
use crate::metrics::inverse_normal_cdf;
use crate::models::BayesianState;

/// Reliability weights are clamped to this range before entering the
/// precision update.
const WFE_CLAMP: (f64, f64) = (0.1, 2.0);

/// Polymorphic epoch smoother: carries a belief about the latent optimal
/// epoch across folds.
pub trait EpochSmoother: Send {
    /// Absorb one fold's validation-optimal epoch with its WFE weight.
    fn update(&mut self, observed_epoch: f64, wfe: f64);
    fn posterior_mean(&self) -> f64;
    /// Zero for smoothers that carry no uncertainty.
    fn posterior_variance(&self) -> f64;
    fn n_observations(&self) -> usize;
    /// Central interval at `level` (e.g. 0.95). Degenerate for smoothers
    /// without uncertainty.
    fn credible_interval(&self, level: f64) -> (f64, f64);

    fn state(&self) -> BayesianState {
        BayesianState {
            mean: self.posterior_mean(),
            variance: self.posterior_variance(),
            n_observations: self.n_observations(),
        }
    }
}

/// Integer candidate closest to `x`; ties resolve to the lower epoch.
pub fn snap_to_candidate(x: f64, candidates: &[u32]) -> u32 {
    debug_assert!(!candidates.is_empty());
    let mut best = candidates[0];
    let mut best_dist = (x - best as f64).abs();
    for &c in &candidates[1..] {
        let dist = (x - c as f64).abs();
        if dist < best_dist {
            best = c;
            best_dist = dist;
        }
    }
    best
}

/// Normal-Normal conjugate smoother over the latent optimal epoch.
///
/// The prior spans the candidate range at 95%; each observation's
/// precision is scaled by its clamped WFE, so reliable folds move the
/// posterior more.
pub struct BayesianSmoother {
    mean: f64,
    variance: f64,
    obs_variance: f64,
    n: usize,
}

impl BayesianSmoother {
    pub fn new(candidates: &[u32]) -> Self {
        let e_min = *candidates.first().unwrap_or(&1) as f64;
        let e_max = *candidates.last().unwrap_or(&1) as f64;
        let span = (e_max - e_min).max(1.0);
        let variance = (span / 3.92).powi(2);
        Self {
            mean: (e_min + e_max) / 2.0,
            variance,
            obs_variance: variance / 4.0,
            n: 0,
        }
    }
}

impl EpochSmoother for BayesianSmoother {
    fn update(&mut self, observed_epoch: f64, wfe: f64) {
        let w = wfe.clamp(WFE_CLAMP.0, WFE_CLAMP.1);
        let prior_precision = 1.0 / self.variance;
        let obs_precision = w / self.obs_variance;
        let posterior_precision = prior_precision + obs_precision;
        self.mean =
            (self.mean * prior_precision + observed_epoch * obs_precision) / posterior_precision;
        self.variance = 1.0 / posterior_precision;
        self.n += 1;
    }

    fn posterior_mean(&self) -> f64 {
        self.mean
    }

    fn posterior_variance(&self) -> f64 {
        self.variance
    }

    fn n_observations(&self) -> usize {
        self.n
    }

    fn credible_interval(&self, level: f64) -> (f64, f64) {
        let z = inverse_normal_cdf(0.5 + level / 2.0);
        let half = z * self.variance.sqrt();
        (self.mean - half, self.mean + half)
    }
}

/// Exponential moving average fallback: no WFE weighting, no uncertainty.
pub struct EmaSmoother {
    alpha: f64,
    mean: f64,
    n: usize,
}

impl EmaSmoother {
    pub fn new(alpha: f64, candidates: &[u32]) -> Self {
        Self {
            alpha,
            mean: midpoint(candidates),
            n: 0,
        }
    }
}

impl EpochSmoother for EmaSmoother {
    fn update(&mut self, observed_epoch: f64, _wfe: f64) {
        if self.n == 0 {
            self.mean = observed_epoch;
        } else {
            self.mean = self.alpha * observed_epoch + (1.0 - self.alpha) * self.mean;
        }
        self.n += 1;
    }

    fn posterior_mean(&self) -> f64 {
        self.mean
    }

    fn posterior_variance(&self) -> f64 {
        0.0
    }

    fn n_observations(&self) -> usize {
        self.n
    }

    fn credible_interval(&self, _level: f64) -> (f64, f64) {
        (self.mean, self.mean)
    }
}

/// Simple moving average over a fixed window of observations.
pub struct SmaSmoother {
    window: usize,
    buf: VecDeque<f64>,
    prior: f64,
    n: usize,
}

impl SmaSmoother {
    pub fn new(window: usize, candidates: &[u32]) -> Self {
        Self {
            window: window.max(1),
            buf: VecDeque::new(),
            prior: midpoint(candidates),
            n: 0,
        }
    }
}

impl EpochSmoother for SmaSmoother {
    fn update(&mut self, observed_epoch: f64, _wfe: f64) {
        if self.buf.len() == self.window {
            self.buf.pop_front();
        }
        self.buf.push_back(observed_epoch);
        self.n += 1;
    }

    fn posterior_mean(&self) -> f64 {
        if self.buf.is_empty() {
            self.prior
        } else {
            self.buf.iter().sum::<f64>() / self.buf.len() as f64
        }
    }

    fn posterior_variance(&self) -> f64 {
        0.0
    }

    fn n_observations(&self) -> usize {
        self.n
    }

    fn credible_interval(&self, _level: f64) -> (f64, f64) {
        let m = self.posterior_mean();
        (m, m)
    }
}

/// Rolling median over a fixed window of observations.
pub struct MedianSmoother {
    window: usize,
    buf: VecDeque<f64>,
    prior: f64,
    n: usize,
}

impl MedianSmoother {
    pub fn new(window: usize, candidates: &[u32]) -> Self {
        Self {
            window: window.max(1),
            buf: VecDeque::new(),
            prior: midpoint(candidates),
            n: 0,
        }
    }
}

impl EpochSmoother for MedianSmoother {
    fn update(&mut self, observed_epoch: f64, _wfe: f64) {
        if self.buf.len() == self.window {
            self.buf.pop_front();
        }
        self.buf.push_back(observed_epoch);
        self.n += 1;
    }

    fn posterior_mean(&self) -> f64 {
        if self.buf.is_empty() {
            return self.prior;
        }
        let mut sorted: Vec<f64> = self.buf.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        sorted[sorted.len() / 2]
    }

    fn posterior_variance(&self) -> f64 {
        0.0
    }

    fn n_observations(&self) -> usize {
        self.n
    }

    fn credible_interval(&self, _level: f64) -> (f64, f64) {
        let m = self.posterior_mean();
        (m, m)
    }
}

fn midpoint(candidates: &[u32]) -> f64 {
    let lo = *candidates.first().unwrap_or(&1) as f64;
    let hi = *candidates.last().unwrap_or(&1) as f64;
    (lo + hi) / 2.0
}

pub fn build_smoother(kind: &SmootherKind, candidates: &[u32]) -> Box<dyn EpochSmoother> {
    match kind {
        SmootherKind::Bayesian => Box::new(BayesianSmoother::new(candidates)),
        SmootherKind::Ema { alpha } => Box::new(EmaSmoother::new(*alpha, candidates)),
        SmootherKind::Sma { window } => Box::new(SmaSmoother::new(*window, candidates)),
        SmootherKind::Median { window } => Box::new(MedianSmoother::new(*window, candidates)),
    }
}
