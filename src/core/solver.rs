use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cancel::{CancelToken, Progress, no_progress};
use super::market;
use super::monte_carlo::{MonteCarloParams, MonteCarloSettings, run_monte_carlo_with};
use super::types::{MarketPath, RothConversion, SimulationParams};
use crate::error::EngineError;

/// Success-rate gap above which the higher rate wins outright.
pub const SUCCESS_RATE_MARGIN: f64 = 0.02;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RothCandidate {
    pub label: String,
    pub conversion: RothConversion,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RothStrategyResult {
    pub label: String,
    pub conversion: RothConversion,
    pub success_rate: f64,
    pub median_ending_real: f64,
    pub score: f64,
    pub iterations: usize,
    pub ensemble_fingerprint: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RothSearchResult {
    pub best: RothStrategyResult,
    /// Every candidate, highest success rate first.
    pub all: Vec<RothStrategyResult>,
    pub recommended_params: SimulationParams,
}

pub fn candidate_policies() -> Vec<RothCandidate> {
    let mut candidates = vec![
        RothCandidate {
            label: "No conversions".to_string(),
            conversion: RothConversion::None,
        },
        RothCandidate {
            label: "Fill standard deduction".to_string(),
            conversion: RothConversion::FillBracket {
                target_rate: 0.0,
                protect_zero_ltcg: false,
            },
        },
        RothCandidate {
            label: "Fill standard deduction, protect 0% gains".to_string(),
            conversion: RothConversion::FillBracket {
                target_rate: 0.0,
                protect_zero_ltcg: true,
            },
        },
    ];
    for rate in [0.10, 0.12, 0.22, 0.24] {
        candidates.push(RothCandidate {
            label: format!("Fill {:.0}% bracket", rate * 100.0),
            conversion: RothConversion::FillBracket {
                target_rate: rate,
                protect_zero_ltcg: false,
            },
        });
    }
    candidates
}

/// True when `challenger` should replace `incumbent`.
pub fn prefers(challenger: &RothStrategyResult, incumbent: &RothStrategyResult) -> bool {
    if (challenger.success_rate - incumbent.success_rate).abs() > SUCCESS_RATE_MARGIN {
        return challenger.success_rate > incumbent.success_rate;
    }
    challenger.score > incumbent.score
}

fn rank(a: &RothStrategyResult, b: &RothStrategyResult) -> Ordering {
    b.success_rate
        .total_cmp(&a.success_rate)
        .then(b.score.total_cmp(&a.score))
}

pub fn find_best_roth_strategy(
    base: &SimulationParams,
    settings: &MonteCarloSettings,
) -> Result<RothSearchResult, EngineError> {
    find_best_roth_strategy_with(base, settings, &CancelToken::new(), &no_progress)
}

/// Scores every candidate against one shared ensemble of market paths.
pub fn find_best_roth_strategy_with(
    base: &SimulationParams,
    settings: &MonteCarloSettings,
    cancel: &CancelToken,
    on_progress: Progress<'_>,
) -> Result<RothSearchResult, EngineError> {
    let paths = market::generate_ensemble(
        &settings.assumptions,
        settings.distribution,
        base.years(),
        settings.seed,
        settings.iterations as usize,
    );
    if paths.is_empty() {
        return Err(EngineError::EmptyEnsemble);
    }

    let candidates = candidate_policies();
    let count = candidates.len();
    info!(
        candidates = count,
        iterations = paths.len(),
        "roth strategy search started"
    );

    let mut scored = Vec::with_capacity(count);
    for (idx, candidate) in candidates.into_iter().enumerate() {
        let report = |p: f64| on_progress((idx as f64 + p / 100.0) / count as f64 * 100.0);
        let eval = evaluate_candidate(base, settings, &paths, candidate, cancel, &report)?;
        debug!(
            label = %eval.label,
            success_rate = eval.success_rate,
            median_ending_real = eval.median_ending_real,
            "roth candidate scored"
        );
        scored.push(eval);
    }

    let mut best_idx = 0;
    for idx in 1..scored.len() {
        if prefers(&scored[idx], &scored[best_idx]) {
            best_idx = idx;
        }
    }
    let best = scored[best_idx].clone();

    let mut recommended_params = base.clone();
    recommended_params.strategy.roth.conversion = best.conversion;

    scored.sort_by(rank);
    info!(
        best = %best.label,
        success_rate = best.success_rate,
        "roth strategy search finished"
    );

    Ok(RothSearchResult {
        best,
        all: scored,
        recommended_params,
    })
}

fn evaluate_candidate(
    base: &SimulationParams,
    settings: &MonteCarloSettings,
    paths: &Arc<[MarketPath]>,
    candidate: RothCandidate,
    cancel: &CancelToken,
    on_progress: Progress<'_>,
) -> Result<RothStrategyResult, EngineError> {
    let mut simulation = base.clone();
    simulation.strategy.roth.conversion = candidate.conversion;

    let params = MonteCarloParams {
        simulation,
        settings: MonteCarloSettings {
            iterations: paths.len() as u32,
            ..settings.clone()
        },
        pre_generated_paths: Some(Arc::clone(paths)),
    };
    let result = run_monte_carlo_with(&params, cancel, on_progress)?;

    Ok(RothStrategyResult {
        label: candidate.label,
        conversion: candidate.conversion,
        success_rate: result.success_rate,
        median_ending_real: result.median_ending_real,
        score: result.median_ending_real * result.success_rate,
        iterations: result.iterations,
        ensemble_fingerprint: result.ensemble_fingerprint,
    })
}
