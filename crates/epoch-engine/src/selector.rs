use crate::config::StabilityMargin;
use crate::models::{EpochSweepResult, SweepStatus, WfeBand};

/// Outcome of the frontier + stability pass for one fold.
#[derive(Debug, Clone)]
pub struct SelectionDecision {
    /// Selected epoch; None when the reject gate fired or no candidate
    /// produced a defined WFE.
    pub chosen: Option<u32>,
    /// Best defined WFE across the sweep, if any.
    pub max_wfe: Option<f64>,
    /// Quality band of `max_wfe`.
    pub band: Option<WfeBand>,
    /// Non-dominated candidates, best WFE first.
    pub frontier: Vec<u32>,
}

/// Resolve the stability margin, widening with observed WFE dispersion
/// when enough history exists.
pub fn resolve_margin(margin: &StabilityMargin, wfe_history: &[f64]) -> f64 {
    match margin {
        StabilityMargin::Fixed { margin } => *margin,
        StabilityMargin::Adaptive => {
            if wfe_history.len() < 3 {
                return 0.10;
            }
            let n = wfe_history.len() as f64;
            let mean = wfe_history.iter().sum::<f64>() / n;
            let var = wfe_history.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / (n - 1.0);
            if mean.abs() < 1e-10 {
                return 0.10;
            }
            (var.sqrt() / mean.abs()).clamp(0.10, 0.50)
        }
    }
}

/// Pick a single epoch from the sweep table.
///
/// Gate first: if the best defined WFE is under `reject_threshold` the
/// fold is rejected and the caller falls back. Otherwise build the Pareto
/// frontier over valid rows (WFE up, cost down) and keep the previous
/// selection unless some frontier point beats it by strictly more than
/// the stability margin. Ties break toward lower cost, then lower epoch.
pub fn select_epoch(
    sweep: &[EpochSweepResult],
    previous: Option<u32>,
    margin: &StabilityMargin,
    reject_threshold: f64,
    wfe_history: &[f64],
) -> SelectionDecision {
    let defined: Vec<&EpochSweepResult> = sweep.iter().filter(|r| r.wfe.is_some()).collect();
    let max_wfe = defined
        .iter()
        .filter_map(|r| r.wfe)
        .fold(None::<f64>, |acc, w| match acc {
            Some(best) if best >= w => Some(best),
            _ => Some(w),
        });

    let (max_wfe, band) = match max_wfe {
        Some(w) => (Some(w), Some(WfeBand::classify(w))),
        None => {
            // Every candidate was IS_TOO_LOW: nothing to select from.
            return SelectionDecision {
                chosen: None,
                max_wfe: None,
                band: None,
                frontier: Vec::new(),
            };
        }
    };

    if max_wfe.unwrap() < reject_threshold {
        return SelectionDecision {
            chosen: None,
            max_wfe,
            band,
            frontier: Vec::new(),
        };
    }

    let valid: Vec<&EpochSweepResult> = defined
        .into_iter()
        .filter(|r| r.status == SweepStatus::Valid)
        .collect();
    if valid.is_empty() {
        return SelectionDecision {
            chosen: None,
            max_wfe,
            band,
            frontier: Vec::new(),
        };
    }

    let mut frontier: Vec<&EpochSweepResult> = valid
        .iter()
        .filter(|a| {
            !valid.iter().any(|b| {
                let wfe_a = a.wfe.unwrap();
                let wfe_b = b.wfe.unwrap();
                let dominates = wfe_b >= wfe_a && b.training_cost <= a.training_cost;
                let strictly = wfe_b > wfe_a || b.training_cost < a.training_cost;
                dominates && strictly
            })
        })
        .copied()
        .collect();

    frontier.sort_by(|a, b| {
        b.wfe
            .partial_cmp(&a.wfe)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.training_cost
                    .partial_cmp(&b.training_cost)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.epoch.cmp(&b.epoch))
    });

    let best = frontier[0];
    let margin = resolve_margin(margin, wfe_history);

    let chosen = match previous {
        Some(prev) => match frontier.iter().find(|r| r.epoch == prev) {
            Some(prev_row) => {
                let prev_wfe = prev_row.wfe.unwrap();
                // Strict inequality: an improvement exactly at the margin
                // keeps the previous selection.
                if best.wfe.unwrap() > prev_wfe * (1.0 + margin) {
                    best.epoch
                } else {
                    prev
                }
            }
            None => best.epoch,
        },
        None => best.epoch,
    };

    SelectionDecision {
        chosen: Some(chosen),
        max_wfe,
        band,
        frontier: frontier.iter().map(|r| r.epoch).collect(),
    }
}
