use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cancel::{CancelToken, Progress, no_progress};
use super::engine::run_simulation_on_path;
use super::market::{self, DistributionType, MarketAssumptions};
use super::stats::{median, percentile, rank_index};
use super::types::{MarketPath, SimulationParams, SimulationResult};
use crate::error::EngineError;

pub const BATCH_SIZE: usize = 500;
/// Age reported for a milestone that never resolves.
pub const UNRESOLVED_AGE: u32 = 999;

const BAND_PERCENTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];
const REPRESENTATIVE_PERCENTILES: [f64; 3] = [5.0, 20.0, 50.0];
const EXPLORATION_PERCENTILES: [f64; 8] = [1.0, 5.0, 10.0, 20.0, 30.0, 50.0, 75.0, 95.0];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSettings {
    pub iterations: u32,
    #[serde(default)]
    pub assumptions: MarketAssumptions,
    #[serde(default, alias = "distributionType")]
    pub distribution: DistributionType,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

impl Default for MonteCarloSettings {
    fn default() -> Self {
        Self {
            iterations: 1_000,
            assumptions: MarketAssumptions::default(),
            distribution: DistributionType::Custom,
            seed: default_seed(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloParams {
    #[serde(alias = "simulationParams")]
    pub simulation: SimulationParams,
    #[serde(default)]
    pub settings: MonteCarloSettings,
    /// Shared ensemble that overrides `settings.iterations` when present.
    #[serde(skip)]
    pub pre_generated_paths: Option<Arc<[MarketPath]>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileBand {
    pub year: i32,
    pub age: u32,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepresentativeRun {
    pub percentile: f64,
    pub iteration: usize,
    pub result: SimulationResult,
    pub stock_index: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneStats {
    pub id: String,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub resolved_fraction: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingStats {
    pub median_total_real: f64,
    pub median_total_nominal: f64,
    pub median_annual_real: f64,
    pub median_annual_nominal: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub iterations: usize,
    pub success_rate: f64,
    pub median_ending_real: f64,
    pub p10_ending_real: f64,
    pub p90_ending_real: f64,
    pub spending: SpendingStats,
    pub bands: Vec<PercentileBand>,
    pub representative: Vec<RepresentativeRun>,
    pub exploration: Vec<RepresentativeRun>,
    pub milestones: Vec<MilestoneStats>,
    pub ensemble_fingerprint: String,
}

/// What each iteration keeps once its trajectory is dropped.
#[derive(Clone, Debug)]
struct RunSummary {
    index: usize,
    success: bool,
    failure_year: Option<i32>,
    ending_real: f64,
    real_net_worth: Vec<f64>,
    spending_nominal: f64,
    spending_real: f64,
    years: usize,
    milestone_ages: Vec<u32>,
}

impl RunSummary {
    fn from_result(index: usize, params: &SimulationParams, result: &SimulationResult) -> Self {
        let mut spending_nominal = 0.0;
        let mut spending_real = 0.0;
        let mut opening_factor = 1.0_f64;
        for year in &result.results {
            spending_nominal += year.cash_flow.spending;
            spending_real += year.cash_flow.spending / opening_factor.max(1e-9);
            opening_factor = year.inflation_factor;
        }

        Self {
            index,
            success: result.succeeded(),
            failure_year: result.failure_year,
            ending_real: result.ending_real_net_worth(),
            real_net_worth: result.results.iter().map(|r| r.real_net_worth()).collect(),
            spending_nominal,
            spending_real,
            years: result.results.len(),
            milestone_ages: params
                .milestones
                .iter()
                .map(|m| {
                    result
                        .resolved_milestones
                        .get(&m.id)
                        .copied()
                        .unwrap_or(UNRESOLVED_AGE)
                })
                .collect(),
        }
    }
}

pub fn run_monte_carlo(params: &MonteCarloParams) -> Result<MonteCarloResult, EngineError> {
    run_monte_carlo_with(params, &CancelToken::new(), &no_progress)
}

pub fn run_monte_carlo_with(
    params: &MonteCarloParams,
    cancel: &CancelToken,
    on_progress: Progress<'_>,
) -> Result<MonteCarloResult, EngineError> {
    let started = Instant::now();
    let settings = &params.settings;
    let sim = &params.simulation;

    let paths = match &params.pre_generated_paths {
        Some(paths) => {
            if paths.len() != settings.iterations as usize {
                warn!(
                    requested = settings.iterations,
                    supplied = paths.len(),
                    "pre-generated paths override the requested iteration count"
                );
            }
            Arc::clone(paths)
        }
        None => market::generate_ensemble(
            &settings.assumptions,
            settings.distribution,
            sim.years(),
            settings.seed,
            settings.iterations as usize,
        ),
    };

    let n = paths.len();
    if n == 0 {
        return Err(EngineError::EmptyEnsemble);
    }
    info!(
        iterations = n,
        distribution = ?settings.distribution,
        years = sim.years(),
        "monte carlo started"
    );

    let mut summaries = Vec::with_capacity(n);
    for start in (0..n).step_by(BATCH_SIZE) {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let end = (start + BATCH_SIZE).min(n);
        let batch = (start..end)
            .into_par_iter()
            .map(|i| {
                run_simulation_on_path(sim, &paths[i], cancel)
                    .map(|result| RunSummary::from_result(i, sim, &result))
            })
            .collect::<Result<Vec<_>, _>>()?;
        summaries.extend(batch);

        debug!(completed = end, total = n, "monte carlo batch finished");
        on_progress(end as f64 / n as f64 * 100.0);
    }

    let result = aggregate(sim, &paths, &summaries, cancel)?;
    info!(
        iterations = n,
        success_rate = result.success_rate,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "monte carlo finished"
    );
    Ok(result)
}

fn aggregate(
    sim: &SimulationParams,
    paths: &[MarketPath],
    summaries: &[RunSummary],
    cancel: &CancelToken,
) -> Result<MonteCarloResult, EngineError> {
    let n = summaries.len();
    let successes = summaries.iter().filter(|s| s.success).count();

    // Earliest failures first, then by real ending wealth.
    let mut order: Vec<&RunSummary> = summaries.iter().collect();
    order.sort_by(|a, b| {
        a.failure_year
            .unwrap_or(i32::MAX)
            .cmp(&b.failure_year.unwrap_or(i32::MAX))
            .then(a.ending_real.total_cmp(&b.ending_real))
            .then(a.index.cmp(&b.index))
    });

    let mut endings: Vec<f64> = summaries.iter().map(|s| s.ending_real).collect();
    let median_ending_real = percentile(&mut endings, 50.0);
    let p10_ending_real = percentile(&mut endings, 10.0);
    let p90_ending_real = percentile(&mut endings, 90.0);

    let years = summaries.iter().map(|s| s.years).max().unwrap_or(0);
    let bands = (0..years)
        .map(|y| {
            let mut column: Vec<f64> = summaries
                .iter()
                .filter_map(|s| s.real_net_worth.get(y).copied())
                .collect();
            let [p5, p25, p50, p75, p95] = BAND_PERCENTILES.map(|p| percentile(&mut column, p));
            PercentileBand {
                year: sim.start_year + y as i32,
                age: sim.current_age + y as u32,
                p5,
                p25,
                p50,
                p75,
                p95,
            }
        })
        .collect();

    let mut cache: BTreeMap<usize, SimulationResult> = BTreeMap::new();
    let mut pick = |targets: &[f64]| -> Result<Vec<RepresentativeRun>, EngineError> {
        let mut runs = Vec::with_capacity(targets.len());
        for &p in targets {
            let Some(pos) = rank_index(n, p) else {
                continue;
            };
            let index = order[pos].index;
            let result = match cache.get(&index) {
                Some(result) => result.clone(),
                None => {
                    let result = run_simulation_on_path(sim, &paths[index], cancel)?;
                    cache.insert(index, result.clone());
                    result
                }
            };
            runs.push(RepresentativeRun {
                percentile: p,
                iteration: index,
                result,
                stock_index: market::stock_index(&paths[index]),
            });
        }
        Ok(runs)
    };
    let representative = pick(&REPRESENTATIVE_PERCENTILES)?;
    let exploration = pick(&EXPLORATION_PERCENTILES)?;

    let milestones = sim
        .milestones
        .iter()
        .enumerate()
        .map(|(j, milestone)| {
            let mut ages: Vec<f64> = summaries
                .iter()
                .map(|s| s.milestone_ages.get(j).copied().unwrap_or(UNRESOLVED_AGE) as f64)
                .collect();
            let resolved = ages
                .iter()
                .filter(|&&age| age < UNRESOLVED_AGE as f64)
                .count();
            let [p10, p25, p50, p75, p90] =
                [10.0, 25.0, 50.0, 75.0, 90.0].map(|p| percentile(&mut ages, p));
            MilestoneStats {
                id: milestone.id.clone(),
                p10,
                p25,
                p50,
                p75,
                p90,
                resolved_fraction: resolved as f64 / n as f64,
            }
        })
        .collect();

    let column = |f: fn(&RunSummary) -> f64| -> f64 {
        let mut values: Vec<f64> = summaries.iter().map(f).collect();
        median(&mut values)
    };
    let spending = SpendingStats {
        median_total_real: column(|s| s.spending_real),
        median_total_nominal: column(|s| s.spending_nominal),
        median_annual_real: column(|s| s.spending_real / s.years.max(1) as f64),
        median_annual_nominal: column(|s| s.spending_nominal / s.years.max(1) as f64),
    };

    Ok(MonteCarloResult {
        iterations: n,
        success_rate: successes as f64 / n as f64,
        median_ending_real,
        p10_ending_real,
        p90_ending_real,
        spending,
        bands,
        representative,
        exploration,
        milestones,
        ensemble_fingerprint: market::fingerprint(paths),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        ExpenseStream, Milestone, MilestoneCondition, PortfolioState, TaxConfig,
    };
    use proptest::prelude::{any, prop_assert, proptest};
    use std::cell::RefCell;

    fn plan() -> SimulationParams {
        SimulationParams {
            start_year: 2025,
            end_year: 2049,
            current_age: 62,
            first_year_fraction: Some(0.75),
            initial_portfolio: PortfolioState {
                taxable: 600_000.0,
                taxable_basis: 400_000.0,
                pre_tax: 700_000.0,
                roth: 100_000.0,
                cash: 50_000.0,
                property: 0.0,
            },
            market_path: vec![],
            liabilities: vec![],
            incomes: vec![],
            expenses: vec![ExpenseStream {
                id: "living".to_string(),
                annual_amount: 70_000.0,
                start_age: None,
                end_age: None,
                inflation_adjusted: true,
            }],
            social_security: vec![],
            tax: TaxConfig::default(),
            strategy: Default::default(),
            health: Default::default(),
            milestones: vec![Milestone {
                id: "two-million".to_string(),
                condition: MilestoneCondition::NetWorthAtLeast {
                    amount: 2_000_000.0,
                    real: false,
                },
            }],
        }
    }

    fn params(iterations: u32, seed: u64) -> MonteCarloParams {
        MonteCarloParams {
            simulation: plan(),
            settings: MonteCarloSettings {
                iterations,
                seed,
                ..MonteCarloSettings::default()
            },
            pre_generated_paths: None,
        }
    }

    #[test]
    fn same_seed_reproduces_results() {
        let first = run_monte_carlo(&params(64, 11)).unwrap();
        let second = run_monte_carlo(&params(64, 11)).unwrap();
        assert_eq!(first, second);

        let other = run_monte_carlo(&params(64, 12)).unwrap();
        assert_ne!(first.ensemble_fingerprint, other.ensemble_fingerprint);
    }

    #[test]
    fn bands_are_ordered_and_rate_is_a_fraction() {
        let result = run_monte_carlo(&params(120, 3)).unwrap();
        assert_eq!(result.bands.len(), 25);
        for band in &result.bands {
            assert!(band.p5 <= band.p25);
            assert!(band.p25 <= band.p50);
            assert!(band.p50 <= band.p75);
            assert!(band.p75 <= band.p95);
        }
        assert!((0.0..=1.0).contains(&result.success_rate));
        assert!(result.p10_ending_real <= result.median_ending_real);
        assert!(result.median_ending_real <= result.p90_ending_real);
    }

    #[test]
    fn representatives_follow_outcome_order() {
        let result = run_monte_carlo(&params(200, 5)).unwrap();
        assert_eq!(result.representative.len(), 3);
        assert_eq!(result.exploration.len(), 8);

        let key = |run: &RepresentativeRun| {
            (
                run.result.failure_year.unwrap_or(i32::MAX),
                run.result.ending_real_net_worth(),
            )
        };
        for pair in result.exploration.windows(2) {
            let (a, b) = (key(&pair[0]), key(&pair[1]));
            assert!(a.0 < b.0 || (a.0 == b.0 && a.1 <= b.1));
        }
        for run in &result.representative {
            assert_eq!(run.stock_index.len(), 26);
            assert_eq!(run.result.results.len(), 25);
        }
    }

    #[test]
    fn pre_generated_paths_set_the_iteration_count() {
        let base = params(10, 21);
        let years = base.simulation.years();
        let shared = market::generate_ensemble(
            &base.settings.assumptions,
            base.settings.distribution,
            years,
            21,
            37,
        );
        let with_paths = MonteCarloParams {
            pre_generated_paths: Some(Arc::clone(&shared)),
            ..base
        };

        let result = run_monte_carlo(&with_paths).unwrap();
        assert_eq!(result.iterations, 37);
        assert_eq!(result.ensemble_fingerprint, market::fingerprint(&shared));

        let generated = run_monte_carlo(&params(37, 21)).unwrap();
        assert_eq!(generated, result);
    }

    #[test]
    fn zero_iterations_is_an_empty_ensemble() {
        assert_eq!(
            run_monte_carlo(&params(0, 1)),
            Err(EngineError::EmptyEnsemble)
        );
    }

    #[test]
    fn cancellation_is_observed_between_batches() {
        let token = CancelToken::new();
        token.cancel();
        let outcome = run_monte_carlo_with(&params(20, 1), &token, &no_progress);
        assert_eq!(outcome, Err(EngineError::Cancelled));
    }

    #[test]
    fn progress_reaches_one_hundred() {
        let seen = RefCell::new(Vec::new());
        let report = |p: f64| seen.borrow_mut().push(p);
        run_monte_carlo_with(&params(1_200, 9), &CancelToken::new(), &report).unwrap();

        let seen = seen.into_inner();
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last().copied(), Some(100.0));
    }

    #[test]
    fn unresolved_milestones_use_sentinel_age() {
        let mut p = params(30, 4);
        p.simulation.milestones = vec![Milestone {
            id: "never".to_string(),
            condition: MilestoneCondition::AgeReached { age: 200 },
        }];
        let result = run_monte_carlo(&p).unwrap();
        let stats = &result.milestones[0];
        assert_eq!(stats.p50, 999.0);
        assert_eq!(stats.resolved_fraction, 0.0);
    }

    #[test]
    fn historical_distribution_runs() {
        let mut p = params(50, 8);
        p.settings.distribution = DistributionType::Historical;
        let result = run_monte_carlo(&p).unwrap();
        assert_eq!(result.iterations, 50);
        assert!(result.spending.median_total_nominal >= result.spending.median_annual_nominal);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(8))]

        #[test]
        fn prop_bands_monotonic_for_any_seed(seed in any::<u64>(), iterations in 5u32..40) {
            let result = run_monte_carlo(&params(iterations, seed)).unwrap();
            prop_assert!((0.0..=1.0).contains(&result.success_rate));
            for band in &result.bands {
                prop_assert!(band.p5 <= band.p25 && band.p25 <= band.p50);
                prop_assert!(band.p50 <= band.p75 && band.p75 <= band.p95);
            }
        }
    }
}
