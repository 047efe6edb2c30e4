use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingStatus {
    Single,
    MarriedFilingJointly,
    MarriedFilingSeparately,
    HeadOfHousehold,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStrategy {
    ConstantDollar,
    ConstantPercentage,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalPolicy {
    pub strategy: WithdrawalStrategy,
    #[serde(default)]
    pub initial_rate: f64,
    #[serde(default)]
    pub dollar_floor: f64,
    #[serde(default)]
    pub rate_floor: f64,
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        Self {
            strategy: WithdrawalStrategy::ConstantDollar,
            initial_rate: 0.0,
            dollar_floor: 0.0,
            rate_floor: 0.0,
        }
    }
}

/// How much pre-tax money to move into Roth each eligible year.
///
/// `FillBracket` with `target_rate == 0.0` fills the standard deduction only;
/// `protect_zero_ltcg` then also leaves room for realized gains so they stay
/// in the 0% capital-gains band.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RothConversion {
    None,
    FixedAmount {
        amount: f64,
    },
    FillBracket {
        target_rate: f64,
        #[serde(default)]
        protect_zero_ltcg: bool,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RothConversionPolicy {
    pub conversion: RothConversion,
    #[serde(default)]
    pub start_age: Option<u32>,
    #[serde(default)]
    pub end_age: Option<u32>,
}

impl Default for RothConversionPolicy {
    fn default() -> Self {
        Self {
            conversion: RothConversion::None,
            start_age: None,
            end_age: None,
        }
    }
}

impl RothConversionPolicy {
    pub fn applies_at(&self, age: u32) -> bool {
        if matches!(self.conversion, RothConversion::None) {
            return false;
        }
        self.start_age.is_none_or(|start| age >= start) && self.end_age.is_none_or(|end| age <= end)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    #[serde(default)]
    pub withdrawal: WithdrawalPolicy,
    #[serde(default)]
    pub roth: RothConversionPolicy,
    #[serde(default)]
    pub tax_gain_harvesting: bool,
    #[serde(default = "default_stock_allocation")]
    pub stock_allocation: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            withdrawal: WithdrawalPolicy::default(),
            roth: RothConversionPolicy::default(),
            tax_gain_harvesting: false,
            stock_allocation: default_stock_allocation(),
        }
    }
}

fn default_stock_allocation() -> f64 {
    1.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxConfig {
    pub filing_status: FilingStatus,
    #[serde(default)]
    pub state_code: String,
    #[serde(default)]
    pub state_rate_override: Option<f64>,
    #[serde(default)]
    pub pre_tax_discount: f64,
    #[serde(default)]
    pub lived_with_spouse: bool,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            filing_status: FilingStatus::Single,
            state_code: String::new(),
            state_rate_override: None,
            pre_tax_discount: 0.0,
            lived_with_spouse: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    #[serde(default = "default_enrollees")]
    pub medicare_enrollees: u32,
    #[serde(default)]
    pub include_base_premium: bool,
    #[serde(default)]
    pub medicaid_safety_net: bool,
    #[serde(default = "default_medicaid_asset_limit")]
    pub medicaid_asset_limit: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            medicare_enrollees: default_enrollees(),
            include_base_premium: false,
            medicaid_safety_net: false,
            medicaid_asset_limit: default_medicaid_asset_limit(),
        }
    }
}

fn default_enrollees() -> u32 {
    1
}

fn default_medicaid_asset_limit() -> f64 {
    2_000.0
}

/// Balances owned by a single run. Every mutation goes through `clamp` so
/// `0 <= taxable_basis <= taxable` and no bucket is negative.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioState {
    pub taxable: f64,
    pub taxable_basis: f64,
    pub pre_tax: f64,
    pub roth: f64,
    pub cash: f64,
    #[serde(default)]
    pub property: f64,
}

impl PortfolioState {
    pub fn liquid_total(&self) -> f64 {
        self.cash + self.taxable + self.pre_tax + self.roth
    }

    pub fn basis_ratio(&self) -> f64 {
        if self.taxable <= 0.0 {
            return 1.0;
        }
        (self.taxable_basis / self.taxable).clamp(0.0, 1.0)
    }

    pub fn unrealized_gain(&self) -> f64 {
        (self.taxable - self.taxable_basis).max(0.0)
    }

    pub fn clamp(&mut self) {
        self.taxable = self.taxable.max(0.0);
        self.pre_tax = self.pre_tax.max(0.0);
        self.roth = self.roth.max(0.0);
        self.cash = self.cash.max(0.0);
        self.property = self.property.max(0.0);
        self.taxable_basis = self.taxable_basis.max(0.0).min(self.taxable);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketYear {
    pub stock_return: f64,
    pub bond_return: f64,
    pub cash_return: f64,
    pub inflation: f64,
    #[serde(default)]
    pub property_return: f64,
}

impl MarketYear {
    /// Used for any year the supplied path does not cover.
    pub const FALLBACK: MarketYear = MarketYear {
        stock_return: 0.06,
        bond_return: 0.035,
        cash_return: 0.02,
        inflation: 0.025,
        property_return: 0.035,
    };
}

pub type MarketPath = Vec<MarketYear>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomeKind {
    Wages,
    Ordinary,
    TaxFree,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeStream {
    pub id: String,
    pub kind: IncomeKind,
    pub annual_amount: f64,
    #[serde(default)]
    pub start_age: u32,
    #[serde(default)]
    pub end_age: Option<u32>,
    #[serde(default)]
    pub inflation_adjusted: bool,
    #[serde(default)]
    pub pre_tax_contribution: f64,
}

impl IncomeStream {
    pub fn active_at(&self, age: u32) -> bool {
        age >= self.start_age && self.end_age.is_none_or(|end| age <= end)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseStream {
    pub id: String,
    pub annual_amount: f64,
    #[serde(default)]
    pub start_age: Option<u32>,
    #[serde(default)]
    pub end_age: Option<u32>,
    #[serde(default = "default_true")]
    pub inflation_adjusted: bool,
}

impl ExpenseStream {
    pub fn active_at(&self, age: u32) -> bool {
        self.start_age.is_none_or(|start| age >= start) && self.end_age.is_none_or(|end| age <= end)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Liability {
    pub id: String,
    pub balance: f64,
    #[serde(default)]
    pub interest_rate: f64,
    pub annual_payment: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialSecurityClaim {
    pub monthly_pia: f64,
    pub claiming_age: u32,
    pub birth_year: i32,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MilestoneCondition {
    NetWorthAtLeast {
        amount: f64,
        #[serde(default)]
        real: bool,
    },
    LiquidAssetsAtLeast {
        amount: f64,
        #[serde(default)]
        real: bool,
    },
    DebtFree,
    WithdrawalRateAtMost {
        rate: f64,
    },
    AgeReached {
        age: u32,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub condition: MilestoneCondition,
}

/// Fully-resolved input for one run. Never mutated by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParams {
    pub start_year: i32,
    pub end_year: i32,
    pub current_age: u32,
    #[serde(default)]
    pub first_year_fraction: Option<f64>,
    pub initial_portfolio: PortfolioState,
    #[serde(default)]
    pub market_path: MarketPath,
    #[serde(default)]
    pub liabilities: Vec<Liability>,
    #[serde(default)]
    pub incomes: Vec<IncomeStream>,
    #[serde(default)]
    pub expenses: Vec<ExpenseStream>,
    #[serde(default)]
    pub social_security: Vec<SocialSecurityClaim>,
    #[serde(default)]
    pub tax: TaxConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

impl SimulationParams {
    pub fn years(&self) -> usize {
        (self.end_year - self.start_year + 1).max(0) as usize
    }

    pub fn birth_year(&self) -> i32 {
        self.start_year - self.current_age as i32
    }

    pub fn first_year_fraction(&self) -> f64 {
        self.first_year_fraction.unwrap_or(1.0).clamp(0.0, 1.0)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawals {
    pub cash: f64,
    pub taxable: f64,
    pub pre_tax: f64,
    pub roth: f64,
    pub total: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlow {
    pub spending: f64,
    pub withdrawals: Withdrawals,
    pub rmd: f64,
    pub social_security: f64,
    pub other_income: f64,
    pub income_used: f64,
    pub saved_surplus: f64,
    pub taxes: f64,
    pub roth_conversion: f64,
    pub realized_gains: f64,
    pub harvested_gains: f64,
    pub unfunded: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxDetails {
    pub agi: f64,
    pub taxable_income: f64,
    pub taxable_social_security: f64,
    pub federal: f64,
    pub fica: f64,
    pub niit: f64,
    pub state: f64,
    pub medicare: f64,
    pub effective_rate: f64,
    pub marginal_rate: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnualResult {
    pub year: i32,
    pub age: u32,
    pub portfolio: PortfolioState,
    pub net_worth: f64,
    pub liabilities: f64,
    pub cash_flow: CashFlow,
    pub taxable_basis: f64,
    pub tax_details: TaxDetails,
    pub inflation_factor: f64,
}

impl AnnualResult {
    pub fn real_net_worth(&self) -> f64 {
        self.net_worth / self.inflation_factor.max(1e-9)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub results: Vec<AnnualResult>,
    pub is_exhausted: bool,
    pub failure_year: Option<i32>,
    pub failure_age: Option<u32>,
    pub resolved_milestones: BTreeMap<String, u32>,
}

impl SimulationResult {
    pub fn ending_net_worth(&self) -> f64 {
        self.results.last().map(|r| r.net_worth).unwrap_or(0.0)
    }

    pub fn ending_real_net_worth(&self) -> f64 {
        self.results
            .last()
            .map(AnnualResult::real_net_worth)
            .unwrap_or(0.0)
    }

    pub fn succeeded(&self) -> bool {
        !self.is_exhausted && self.ending_net_worth() > 0.0
    }
}
