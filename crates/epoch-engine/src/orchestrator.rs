use std::time::Instant;

use epoch_core::{Bar, Clock, EpochError, ModelFactory};

use crate::aggregate;
use crate::clock::SessionClock;
use crate::config::{EngineConfig, View};
use crate::models::{
    AggregateReport, EpochSweepResult, FoldOutcome, FoldSpec, FoldStatus, OosDegradation,
    SweepStatus, TestMetrics, WfeBand,
};
use crate::oos;
use crate::partition;
use crate::selector;
use crate::smoother::{self, EpochSmoother};
use crate::sweep;

/// Everything a run produces: the per-fold records in temporal order and
/// the aggregate view.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub outcomes: Vec<FoldOutcome>,
    pub report: AggregateReport,
}

/// Drives the fold stream. The runner is the only component holding
/// cross-fold state: the smoother, the WFE history, and the outcome list.
pub struct EpochSelectionRunner {
    config: EngineConfig,
}

impl EpochSelectionRunner {
    /// Configuration errors surface here; no fold runs after a failure.
    pub fn new(config: EngineConfig) -> Result<Self, EpochError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the full walk-forward stream over `bars`.
    ///
    /// Per fold: query the smoother (posterior as of the previous fold),
    /// retrain and evaluate out-of-sample, then sweep, select, and only
    /// then update the smoother. Statistical rejections and model
    /// failures are recorded and the stream continues.
    pub fn run(&self, bars: &[Bar], factory: &dyn ModelFactory) -> Result<RunOutput, EpochError> {
        validate_bars(bars)?;

        let session_bars: Vec<Bar>;
        let bars: &[Bar] = match self.config.view {
            View::SessionFiltered => {
                let clock = SessionClock::new();
                session_bars = bars
                    .iter()
                    .filter(|b| clock.is_tradeable(b.close_ts))
                    .cloned()
                    .collect();
                if session_bars.is_empty() {
                    return Err(EpochError::InsufficientData(
                        "no bars survive the tradeable-session mask".to_string(),
                    ));
                }
                &session_bars
            }
            View::AllBars => bars,
        };

        let candidates = self.config.candidates()?;
        let annualization = self.config.annualization().factor();

        let plan = partition::plan_folds(bars, &self.config.fold_policy)?;
        if plan.dropped > 0 {
            tracing::warn!(
                "Dropped {} of {} folds: embargo or test range ran past the stream",
                plan.dropped,
                plan.requested
            );
        }
        if plan.below_significance_floor {
            tracing::warn!(
                "Only {} usable folds: below the 30-fold significance floor",
                plan.folds.len()
            );
        }

        let mut smoother = smoother::build_smoother(&self.config.smoother, &candidates);
        let mut wfe_history: Vec<f64> = Vec::new();
        let mut prev_choice: Option<u32> = None;
        let mut past_selections: Vec<u32> = Vec::new();
        let mut outcomes: Vec<FoldOutcome> = Vec::with_capacity(plan.folds.len());
        let started = Instant::now();

        for spec in &plan.folds {
            // Selection uses the posterior from folds < i only.
            let selected = smoother::snap_to_candidate(smoother.posterior_mean(), &candidates);

            if self.budget_exhausted(&started) {
                tracing::warn!("Budget exhausted before fold {}; finalizing run", spec.fold_idx);
                outcomes.push(failed_outcome(
                    spec,
                    selected,
                    smoother.as_ref(),
                    None,
                    "budget exhausted before fold start".to_string(),
                ));
                break;
            }

            let test_metrics = match oos::apply_out_of_sample(
                factory,
                bars,
                spec,
                selected,
                annualization,
                self.config.seed,
                candidates.len(),
            ) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Fold {} OOS evaluation failed: {}", spec.fold_idx, e);
                    outcomes.push(failed_outcome(
                        spec,
                        selected,
                        smoother.as_ref(),
                        None,
                        e.to_string(),
                    ));
                    continue;
                }
            };

            if self.budget_exhausted(&started) {
                // Partial sweep results from a cancelled fold are discarded.
                tracing::warn!("Budget exhausted during fold {}; finalizing run", spec.fold_idx);
                outcomes.push(failed_outcome(
                    spec,
                    selected,
                    smoother.as_ref(),
                    Some(test_metrics),
                    "budget exhausted before sweep".to_string(),
                ));
                break;
            }

            let sweep_rows = match sweep::run_sweep(
                factory,
                bars,
                spec,
                &candidates,
                annualization,
                self.config.seed,
                self.config.parallel_sweep,
            ) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!("Fold {} sweep failed: {}", spec.fold_idx, e);
                    outcomes.push(failed_outcome(
                        spec,
                        selected,
                        smoother.as_ref(),
                        Some(test_metrics),
                        e.to_string(),
                    ));
                    continue;
                }
            };

            let decision = selector::select_epoch(
                &sweep_rows,
                prev_choice,
                &self.config.stability_margin,
                self.config.wfe_reject_threshold,
                &wfe_history,
            );
            let validation_optimal = validation_optimal(&sweep_rows);

            let mut status = FoldStatus::Fallback;
            if let Some(choice) = decision.chosen {
                if let Some((opt_epoch, opt_wfe)) = validation_optimal {
                    smoother.update(opt_epoch as f64, opt_wfe);
                    wfe_history.push(opt_wfe);
                    status = FoldStatus::Normal;
                }
                prev_choice = Some(choice);
            } else {
                if decision.band == Some(WfeBand::Reject) {
                    status = FoldStatus::Reject;
                }
                // The smoother receives no observation; carry a defensible
                // reference forward for the next fold's stability check.
                prev_choice = Some(fallback_epoch(prev_choice, &past_selections, &candidates));
            }

            let degradation = sweep_rows
                .iter()
                .find(|r| r.epoch == selected)
                .map(|row| degradation_from(row.validation_sharpe, test_metrics.sharpe_tw));

            let state = smoother.state();
            tracing::info!(
                "Fold {}: applied epoch {} (posterior {:.1}), test sharpe_tw {:.3}, status {:?}",
                spec.fold_idx,
                selected,
                state.mean,
                test_metrics.sharpe_tw,
                status
            );

            past_selections.push(selected);
            outcomes.push(FoldOutcome {
                fold_idx: spec.fold_idx,
                train_range: spec.train,
                validation_range: spec.validation,
                test_range: spec.test,
                selected_epoch: selected,
                validation_optimal_epoch: validation_optimal.map(|(e, _)| e),
                posterior_mean: state.mean,
                posterior_variance: state.variance,
                sweep: sweep_rows,
                wfe_band: decision.band,
                wfe_band_alias: decision.band.map(|b| b.legacy_alias().to_string()),
                test_metrics: Some(test_metrics),
                degradation,
                status,
                failure: None,
            });
        }

        let report = aggregate::aggregate_outcomes(
            &outcomes,
            &candidates,
            plan.below_significance_floor,
            self.config.bootstrap_samples,
            self.config.seed,
        );
        tracing::info!(
            "Run complete: {} folds, verdict {:?}, median sharpe_tw {:.3}",
            report.n_folds,
            report.verdict,
            report.sharpe_tw_median
        );

        Ok(RunOutput { outcomes, report })
    }

    fn budget_exhausted(&self, started: &Instant) -> bool {
        match self.config.budget_secs {
            Some(budget) => started.elapsed().as_secs_f64() > budget,
            None => false,
        }
    }
}

/// Validation-optimal epoch and its WFE among candidates whose WFE is
/// defined and whose validation leg is non-negative.
fn validation_optimal(rows: &[EpochSweepResult]) -> Option<(u32, f64)> {
    rows.iter()
        .filter(|r| r.status == SweepStatus::Valid)
        .max_by(|a, b| {
            a.validation_sharpe
                .partial_cmp(&b.validation_sharpe)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .and_then(|r| r.wfe.map(|w| (r.epoch, w)))
}

/// Fallback chain: prior selection, then the mode of past selections,
/// then the median candidate.
fn fallback_epoch(prev: Option<u32>, past_selections: &[u32], candidates: &[u32]) -> u32 {
    if let Some(p) = prev {
        return p;
    }
    if !past_selections.is_empty() {
        let mut counts: std::collections::BTreeMap<u32, usize> = std::collections::BTreeMap::new();
        for &s in past_selections {
            *counts.entry(s).or_insert(0) += 1;
        }
        if let Some((&epoch, _)) = counts.iter().max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0))) {
            return epoch;
        }
    }
    candidates[candidates.len() / 2]
}

fn degradation_from(validation_sharpe: f64, test_sharpe_tw: f64) -> OosDegradation {
    let sharpe_degradation = if validation_sharpe.abs() > 0.01 {
        (validation_sharpe - test_sharpe_tw) / validation_sharpe.abs()
    } else {
        0.0
    };
    OosDegradation {
        validation_sharpe,
        test_sharpe_tw,
        sharpe_degradation,
    }
}

fn failed_outcome(
    spec: &FoldSpec,
    selected: u32,
    smoother: &dyn EpochSmoother,
    test_metrics: Option<TestMetrics>,
    failure: String,
) -> FoldOutcome {
    let state = smoother.state();
    FoldOutcome {
        fold_idx: spec.fold_idx,
        train_range: spec.train,
        validation_range: spec.validation,
        test_range: spec.test,
        selected_epoch: selected,
        validation_optimal_epoch: None,
        posterior_mean: state.mean,
        posterior_variance: state.variance,
        sweep: Vec::new(),
        wfe_band: None,
        wfe_band_alias: None,
        test_metrics,
        degradation: None,
        status: FoldStatus::Failed,
        failure: Some(failure),
    }
}

/// Input-schema validation: strict temporal order, non-negative
/// durations, constant feature width, and at least two years of span.
fn validate_bars(bars: &[Bar]) -> Result<(), EpochError> {
    if bars.is_empty() {
        return Err(EpochError::InsufficientData("empty bar stream".to_string()));
    }
    let width = bars[0].x.len();
    for (i, bar) in bars.iter().enumerate() {
        if bar.duration_us < 0 {
            return Err(EpochError::InvalidData(format!(
                "bar {} has negative duration {}",
                i, bar.duration_us
            )));
        }
        if bar.x.len() != width {
            return Err(EpochError::InvalidData(format!(
                "bar {} has {} features, expected {}",
                i,
                bar.x.len(),
                width
            )));
        }
        if i > 0 && bar.close_ts <= bars[i - 1].close_ts {
            return Err(EpochError::InvalidData(format!(
                "bars are not strictly ordered at index {}",
                i
            )));
        }
    }
    let span = bars[bars.len() - 1].close_ts - bars[0].close_ts;
    if span < chrono::Duration::days(730) {
        return Err(EpochError::InsufficientData(format!(
            "data span {} days is below the 2-year minimum",
            span.num_days()
        )));
    }
    Ok(())
}
