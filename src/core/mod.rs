mod backtest;
mod cancel;
mod engine;
pub mod history;
pub mod market;
mod monte_carlo;
pub mod rmd;
pub mod social_security;
mod solver;
mod stats;
pub mod tax;
mod types;
mod withdrawal;

pub use backtest::{
    HistoricalAggregateResult, HistoricalRun, run_historical_simulation,
    run_historical_simulation_with,
};
pub use cancel::{CancelToken, Progress, no_progress};
pub use engine::{Phase, Simulator, net_worth, run_simulation, run_simulation_on_path};
pub use market::{DistributionType, MarketAssumptions};
pub use monte_carlo::{
    MilestoneStats, MonteCarloParams, MonteCarloResult, MonteCarloSettings, PercentileBand,
    RepresentativeRun, SpendingStats, UNRESOLVED_AGE, run_monte_carlo, run_monte_carlo_with,
};
pub use solver::{
    RothCandidate, RothSearchResult, RothStrategyResult, candidate_policies,
    find_best_roth_strategy, find_best_roth_strategy_with,
};
pub use stats::percentile;
pub use types::{
    AnnualResult, CashFlow, ExpenseStream, FilingStatus, HealthConfig, IncomeKind, IncomeStream,
    Liability, MarketPath, MarketYear, Milestone, MilestoneCondition, PortfolioState,
    RothConversion, RothConversionPolicy, SimulationParams, SimulationResult, SocialSecurityClaim,
    StrategyConfig, TaxConfig, TaxDetails, WithdrawalPolicy, WithdrawalStrategy, Withdrawals,
};
pub use withdrawal::{WithdrawalContext, target_withdrawal};
