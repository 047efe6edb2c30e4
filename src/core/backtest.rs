use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cancel::{CancelToken, Progress, no_progress};
use super::engine::run_simulation_on_path;
use super::history;
use super::stats::median;
use super::types::SimulationParams;
use crate::error::EngineError;

const CHUNK: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalRun {
    pub start_year: i32,
    pub success: bool,
    pub is_exhausted: bool,
    pub failure_year: Option<i32>,
    pub ending_net_worth: f64,
    pub lowest_real_net_worth: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalAggregateResult {
    pub runs: Vec<HistoricalRun>,
    pub success_rate: f64,
    pub worst_start_year: Option<i32>,
    pub worst_ending_net_worth: f64,
    pub best_start_year: Option<i32>,
    pub best_ending_net_worth: f64,
    pub median_ending_net_worth: f64,
}

pub fn run_historical_simulation(
    params: &SimulationParams,
) -> Result<HistoricalAggregateResult, EngineError> {
    run_historical_simulation_with(params, &CancelToken::new(), &no_progress)
}

/// Replays the plan from every historical start year whose window fits the
/// dataset. No randomness is involved.
pub fn run_historical_simulation_with(
    params: &SimulationParams,
    cancel: &CancelToken,
    on_progress: Progress<'_>,
) -> Result<HistoricalAggregateResult, EngineError> {
    let started = Instant::now();
    let years = params.years();
    let available = history::len();
    if years == 0 || years > available {
        info!(years, available, "no historical window fits the plan");
        return Ok(HistoricalAggregateResult::default());
    }

    let starts: Vec<usize> = (0..=available - years).collect();
    let mut runs = Vec::with_capacity(starts.len());
    for chunk in starts.chunks(CHUNK) {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let batch = chunk
            .par_iter()
            .filter_map(|&start| history::window(start, years).map(|path| (start, path)))
            .map(|(start, path)| {
                run_simulation_on_path(params, &path, cancel).map(|result| HistoricalRun {
                    start_year: history::FIRST_YEAR + start as i32,
                    success: result.succeeded(),
                    is_exhausted: result.is_exhausted,
                    failure_year: result.failure_year,
                    ending_net_worth: result.ending_net_worth(),
                    lowest_real_net_worth: result
                        .results
                        .iter()
                        .map(|r| r.real_net_worth())
                        .fold(f64::INFINITY, f64::min),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        runs.extend(batch);

        debug!(completed = runs.len(), total = starts.len(), "historical chunk finished");
        on_progress(runs.len() as f64 / starts.len() as f64 * 100.0);
    }

    let result = aggregate(runs);
    info!(
        windows = result.runs.len(),
        success_rate = result.success_rate,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "historical backtest finished"
    );
    Ok(result)
}

fn aggregate(runs: Vec<HistoricalRun>) -> HistoricalAggregateResult {
    if runs.is_empty() {
        return HistoricalAggregateResult::default();
    }

    let successes = runs.iter().filter(|r| r.success).count();
    // Ties go to the earlier start year.
    let worst = runs
        .iter()
        .min_by(|a, b| {
            a.ending_net_worth
                .total_cmp(&b.ending_net_worth)
                .then(a.start_year.cmp(&b.start_year))
        })
        .copied();
    let best = runs
        .iter()
        .max_by(|a, b| {
            a.ending_net_worth
                .total_cmp(&b.ending_net_worth)
                .then(b.start_year.cmp(&a.start_year))
        })
        .copied();
    let mut endings: Vec<f64> = runs.iter().map(|r| r.ending_net_worth).collect();

    HistoricalAggregateResult {
        success_rate: successes as f64 / runs.len() as f64,
        worst_start_year: worst.map(|r| r.start_year),
        worst_ending_net_worth: worst.map(|r| r.ending_net_worth).unwrap_or(0.0),
        best_start_year: best.map(|r| r.start_year),
        best_ending_net_worth: best.map(|r| r.ending_net_worth).unwrap_or(0.0),
        median_ending_net_worth: median(&mut endings),
        runs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ExpenseStream, PortfolioState};

    fn plan(years: i32, spending: f64) -> SimulationParams {
        SimulationParams {
            start_year: 2025,
            end_year: 2025 + years - 1,
            current_age: 65,
            first_year_fraction: None,
            initial_portfolio: PortfolioState {
                taxable: 500_000.0,
                taxable_basis: 300_000.0,
                pre_tax: 500_000.0,
                roth: 0.0,
                cash: 20_000.0,
                property: 0.0,
            },
            market_path: vec![],
            liabilities: vec![],
            incomes: vec![],
            expenses: vec![ExpenseStream {
                id: "living".to_string(),
                annual_amount: spending,
                start_age: None,
                end_age: None,
                inflation_adjusted: true,
            }],
            social_security: vec![],
            tax: Default::default(),
            strategy: Default::default(),
            health: Default::default(),
            milestones: vec![],
        }
    }

    #[test]
    fn every_fitting_start_year_is_replayed() {
        let result = run_historical_simulation(&plan(30, 40_000.0)).unwrap();
        assert_eq!(result.runs.len(), history::len() - 30 + 1);
        assert_eq!(result.runs[0].start_year, 1928);
        assert_eq!(result.runs.last().map(|r| r.start_year), Some(1994));
        assert!(result.runs.windows(2).all(|w| w[0].start_year + 1 == w[1].start_year));
        assert!((0.0..=1.0).contains(&result.success_rate));
    }

    #[test]
    fn repeated_calls_are_identical() {
        let params = plan(25, 55_000.0);
        let first = run_historical_simulation(&params).unwrap();
        let second = run_historical_simulation(&params).unwrap();
        assert_eq!(first, second);
        for (a, b) in first.runs.iter().zip(&second.runs) {
            assert_eq!(a.ending_net_worth.to_bits(), b.ending_net_worth.to_bits());
        }
    }

    #[test]
    fn extremes_bracket_the_median() {
        let result = run_historical_simulation(&plan(20, 45_000.0)).unwrap();
        assert!(result.worst_ending_net_worth <= result.median_ending_net_worth);
        assert!(result.median_ending_net_worth <= result.best_ending_net_worth);
        assert!(result.worst_start_year.is_some());
        for run in &result.runs {
            assert!(run.lowest_real_net_worth.is_finite());
            assert_eq!(run.success, !run.is_exhausted && run.ending_net_worth > 0.0);
        }
    }

    #[test]
    fn unaffordable_plan_fails_every_window() {
        let result = run_historical_simulation(&plan(30, 400_000.0)).unwrap();
        assert_eq!(result.success_rate, 0.0);
        assert!(result.runs.iter().all(|r| r.failure_year.is_some()));
    }

    #[test]
    fn window_longer_than_history_is_empty() {
        let result = run_historical_simulation(&plan(120, 10_000.0)).unwrap();
        assert!(result.runs.is_empty());
        assert_eq!(result.success_rate, 0.0);
    }

    #[test]
    fn cancellation_returns_error() {
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(
            run_historical_simulation_with(&plan(30, 40_000.0), &token, &no_progress),
            Err(EngineError::Cancelled)
        );
    }
}
