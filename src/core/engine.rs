use std::collections::BTreeMap;

use tracing::debug;

use super::cancel::CancelToken;
use super::rmd;
use super::social_security;
use super::tax::{self, FederalTax, TaxConstants, TaxInput};
use super::types::{
    AnnualResult, CashFlow, FilingStatus, IncomeKind, MarketYear, MilestoneCondition,
    PortfolioState, RothConversion, SimulationParams, SimulationResult, TaxDetails, Withdrawals,
};
use super::withdrawal::{self, WithdrawalContext};
use crate::error::EngineError;

/// Unfunded need above this marks the year as a shortfall.
const EXHAUSTION_TOLERANCE: f64 = 0.1;
const TAX_SETTLE_TOLERANCE: f64 = 0.01;
const MAX_TAX_PASSES: usize = 64;
const MEDICARE_AGE: u32 = 65;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Year0Partial,
    FullYear(u32),
    Complete,
}

pub fn run_simulation(params: &SimulationParams) -> SimulationResult {
    let mut sim = Simulator::new(params, &params.market_path);
    while sim.step().is_some() {}
    sim.finish()
}

/// Runs `params` against `path` instead of its own market path, checking
/// `cancel` before every year.
pub fn run_simulation_on_path(
    params: &SimulationParams,
    path: &[MarketYear],
    cancel: &CancelToken,
) -> Result<SimulationResult, EngineError> {
    let mut sim = Simulator::new(params, path);
    while sim.phase() != Phase::Complete {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        sim.step();
    }
    Ok(sim.finish())
}

#[derive(Copy, Clone, Debug, Default)]
struct IncomeLedger {
    social_security: f64,
    wages: f64,
    contributions: f64,
    other_ordinary: f64,
    tax_free: f64,
    rmd: f64,
    pre_tax_withdrawals: f64,
    conversion: f64,
    realized_gains: f64,
}

impl IncomeLedger {
    /// Income that arrives as spendable money before any asset is sold.
    fn spendable(&self) -> f64 {
        self.social_security + self.wages - self.contributions
            + self.other_ordinary
            + self.tax_free
            + self.rmd
    }

    fn ordinary_excluding_benefits(&self) -> f64 {
        self.other_ordinary + self.rmd + self.pre_tax_withdrawals + self.conversion
    }
}

#[derive(Copy, Clone, Debug)]
struct TaxAssessment {
    federal: FederalTax,
    taxable_social_security: f64,
    state: f64,
    medicare: f64,
}

impl TaxAssessment {
    fn total(&self) -> f64 {
        self.federal.total + self.state + self.medicare
    }

    fn details(&self) -> TaxDetails {
        TaxDetails {
            agi: self.federal.agi,
            taxable_income: self.federal.taxable_income,
            taxable_social_security: self.taxable_social_security,
            federal: self.federal.total,
            fica: self.federal.fica,
            niit: self.federal.niit,
            state: self.state,
            medicare: self.medicare,
            effective_rate: self.federal.effective_rate,
            marginal_rate: self.federal.marginal_rate,
        }
    }
}

/// Year-by-year projection of one plan over one market path.
pub struct Simulator<'a> {
    params: &'a SimulationParams,
    path: &'a [MarketYear],
    phase: Phase,
    portfolio: PortfolioState,
    liabilities: Vec<f64>,
    age: u32,
    inflation_factor: f64,
    prior_withdrawal: Option<f64>,
    results: Vec<AnnualResult>,
    failure: Option<(i32, u32)>,
    resolved: BTreeMap<String, u32>,
}

impl<'a> Simulator<'a> {
    pub fn new(params: &'a SimulationParams, path: &'a [MarketYear]) -> Self {
        let mut portfolio = params.initial_portfolio;
        portfolio.clamp();

        let phase = if params.years() == 0 {
            Phase::Complete
        } else {
            Phase::Year0Partial
        };

        Self {
            params,
            path,
            phase,
            portfolio,
            liabilities: params.liabilities.iter().map(|l| l.balance.max(0.0)).collect(),
            age: params.current_age,
            inflation_factor: 1.0,
            prior_withdrawal: None,
            results: Vec::with_capacity(params.years()),
            failure: None,
            resolved: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Simulates the next year and returns its snapshot, or `None` once the
    /// window is complete.
    pub fn step(&mut self) -> Option<&AnnualResult> {
        let (index, fraction) = match self.phase {
            Phase::Complete => return None,
            Phase::Year0Partial => (0, self.params.first_year_fraction()),
            Phase::FullYear(t) => (t as usize, 1.0),
        };

        let market = self
            .path
            .get(index)
            .copied()
            .unwrap_or(MarketYear::FALLBACK);
        let result = self.simulate_year(index, fraction, market);
        self.resolve_milestones(&result);
        self.results.push(result);

        self.phase = if index + 1 < self.params.years() {
            Phase::FullYear(index as u32 + 1)
        } else {
            Phase::Complete
        };
        self.results.last()
    }

    pub fn finish(self) -> SimulationResult {
        SimulationResult {
            results: self.results,
            is_exhausted: self.failure.is_some(),
            failure_year: self.failure.map(|(year, _)| year),
            failure_age: self.failure.map(|(_, age)| age),
            resolved_milestones: self.resolved,
        }
    }

    fn simulate_year(&mut self, index: usize, f: f64, market: MarketYear) -> AnnualResult {
        let params = self.params;
        let status = params.tax.filing_status;
        let factor = self.inflation_factor;
        let constants = TaxConstants::base().scaled(factor);
        let year = params.start_year + index as i32;
        let age = self.age;

        let policy_amount = withdrawal::target_withdrawal(
            &params.strategy.withdrawal,
            WithdrawalContext {
                portfolio_value: self.portfolio.liquid_total(),
                prior_withdrawal: self.prior_withdrawal,
                inflation: market.inflation,
            },
        );
        self.prior_withdrawal = Some(policy_amount);

        let expenses: f64 = params
            .expenses
            .iter()
            .filter(|e| e.active_at(age))
            .map(|e| e.annual_amount.max(0.0) * indexation(e.inflation_adjusted, factor))
            .sum();
        let debt_service = self.service_liabilities(f);
        let spending = (policy_amount + expenses) * f + debt_service;

        let mut ledger = IncomeLedger {
            social_security: params
                .social_security
                .iter()
                .map(|claim| social_security::benefit_for_year(claim, year, factor))
                .sum::<f64>()
                * f,
            ..IncomeLedger::default()
        };
        for income in params.incomes.iter().filter(|i| i.active_at(age)) {
            let scale = indexation(income.inflation_adjusted, factor) * f;
            let amount = income.annual_amount.max(0.0) * scale;
            match income.kind {
                IncomeKind::Wages => {
                    ledger.wages += amount;
                    ledger.contributions +=
                        (income.pre_tax_contribution.max(0.0) * scale).min(amount);
                }
                IncomeKind::Ordinary => ledger.other_ordinary += amount,
                IncomeKind::TaxFree => ledger.tax_free += amount,
            }
        }

        let rmd = rmd::required_distribution(age, params.birth_year(), self.portfolio.pre_tax)
            .min(self.portfolio.pre_tax);
        self.portfolio.pre_tax -= rmd;
        ledger.rmd = rmd;
        self.portfolio.pre_tax += ledger.contributions;

        let mut pool = ledger.spendable().max(0.0);
        let income_for_spending = pool.min(spending);
        pool -= income_for_spending;

        let mut drawn = Withdrawals::default();
        let spending_gap = draw_waterfall(
            &mut self.portfolio,
            spending - income_for_spending,
            &mut drawn,
            &mut ledger,
        );

        let conversion = if params.strategy.roth.applies_at(age) {
            let provisional = assess_taxes(params, &ledger, &constants, f, false);
            conversion_amount(
                &params.strategy.roth.conversion,
                &provisional.federal,
                &constants,
                status,
                self.portfolio.pre_tax,
                f,
            )
        } else {
            0.0
        };
        self.portfolio.pre_tax -= conversion;
        self.portfolio.roth += conversion;
        ledger.conversion = conversion;

        let medicare_due = age >= MEDICARE_AGE
            && !(params.health.medicaid_safety_net
                && self.portfolio.liquid_total() <= params.health.medicaid_asset_limit * factor);

        // Paying tax from assets can realize more taxable income, so settle
        // until the bill stops moving. Whatever is still unpaid is unfunded.
        let mut paid = 0.0;
        let mut income_for_taxes = 0.0;
        let mut assessment = assess_taxes(params, &ledger, &constants, f, medicare_due);
        for _ in 0..MAX_TAX_PASSES {
            let due = assessment.total() - paid;
            if due <= TAX_SETTLE_TOLERANCE {
                break;
            }
            let from_income = pool.min(due);
            pool -= from_income;
            income_for_taxes += from_income;

            let short = draw_waterfall(
                &mut self.portfolio,
                due - from_income,
                &mut drawn,
                &mut ledger,
            );
            paid += due - short;
            assessment = assess_taxes(params, &ledger, &constants, f, medicare_due);
            if short > 0.0 {
                break;
            }
        }
        let unpaid_tax = assessment.total() - paid;
        let tax_gap = if unpaid_tax > TAX_SETTLE_TOLERANCE {
            unpaid_tax
        } else {
            0.0
        };

        let saved_surplus = pool;
        self.portfolio.cash += saved_surplus;

        let harvested_gains = if params.strategy.tax_gain_harvesting {
            let room = tax::zero_rate_gain_room(assessment.federal.agi, status, &constants);
            let gain = room.min(self.portfolio.unrealized_gain());
            self.portfolio.taxable_basis =
                (self.portfolio.taxable_basis + gain).min(self.portfolio.taxable);
            gain
        } else {
            0.0
        };

        self.apply_growth(&market, f);
        self.inflation_factor = (self.inflation_factor * (1.0 + prorate(market.inflation, f)))
            .max(1e-9);
        self.age += 1;

        let unfunded = spending_gap + tax_gap;
        if unfunded > EXHAUSTION_TOLERANCE && self.failure.is_none() {
            debug!(year, age, unfunded, "plan exhausted");
            self.failure = Some((year, age));
        }

        let liabilities: f64 = self.liabilities.iter().sum();
        AnnualResult {
            year,
            age,
            portfolio: self.portfolio,
            net_worth: net_worth(&self.portfolio, liabilities, params.tax.pre_tax_discount),
            liabilities,
            cash_flow: CashFlow {
                spending,
                withdrawals: drawn,
                rmd,
                social_security: ledger.social_security,
                other_income: ledger.wages + ledger.other_ordinary + ledger.tax_free,
                income_used: income_for_spending + income_for_taxes,
                saved_surplus,
                taxes: assessment.total(),
                roth_conversion: conversion,
                realized_gains: ledger.realized_gains,
                harvested_gains,
                unfunded,
            },
            taxable_basis: self.portfolio.taxable_basis,
            tax_details: assessment.details(),
            inflation_factor: self.inflation_factor,
        }
    }

    /// Accrues interest and pays each liability, returning the total paid.
    fn service_liabilities(&mut self, f: f64) -> f64 {
        let mut paid = 0.0;
        for (balance, liability) in self.liabilities.iter_mut().zip(&self.params.liabilities) {
            if *balance <= 0.0 {
                continue;
            }
            let accrued = *balance * (1.0 + prorate(liability.interest_rate, f));
            let payment = (liability.annual_payment.max(0.0) * f).min(accrued);
            *balance = (accrued - payment).max(0.0);
            paid += payment;
        }
        paid
    }

    fn apply_growth(&mut self, market: &MarketYear, f: f64) {
        let alloc = self.params.strategy.stock_allocation.clamp(0.0, 1.0);
        let invested = prorate(
            alloc * market.stock_return + (1.0 - alloc) * market.bond_return,
            f,
        );

        let p = &mut self.portfolio;
        p.taxable *= 1.0 + invested;
        p.pre_tax *= 1.0 + invested;
        p.roth *= 1.0 + invested;
        p.cash *= 1.0 + prorate(market.cash_return, f);
        p.property *= 1.0 + prorate(market.property_return, f);
        p.clamp();
    }

    fn resolve_milestones(&mut self, result: &AnnualResult) {
        for milestone in &self.params.milestones {
            if self.resolved.contains_key(&milestone.id) {
                continue;
            }
            if milestone_met(&milestone.condition, result) {
                self.resolved.insert(milestone.id.clone(), result.age);
            }
        }
    }
}

fn indexation(inflation_adjusted: bool, factor: f64) -> f64 {
    if inflation_adjusted { factor } else { 1.0 }
}

/// Rate earned over a fraction `f` of a year.
fn prorate(rate: f64, f: f64) -> f64 {
    if f >= 1.0 {
        return rate;
    }
    (1.0 + rate).max(0.0).powf(f.max(0.0)) - 1.0
}

fn take(balance: &mut f64, want: f64) -> f64 {
    let amount = want.min(*balance).max(0.0);
    *balance -= amount;
    amount
}

/// Sells from cash, then taxable, then pre-tax, then Roth. Returns the part of
/// `amount` no bucket could cover.
fn draw_waterfall(
    portfolio: &mut PortfolioState,
    amount: f64,
    drawn: &mut Withdrawals,
    ledger: &mut IncomeLedger,
) -> f64 {
    let mut remaining = amount.max(0.0);
    if remaining <= 0.0 {
        return 0.0;
    }

    let from_cash = take(&mut portfolio.cash, remaining);
    drawn.cash += from_cash;
    remaining -= from_cash;

    if remaining > 0.0 && portfolio.taxable > 0.0 {
        let gross = remaining.min(portfolio.taxable);
        ledger.realized_gains += sell_taxable(portfolio, gross);
        drawn.taxable += gross;
        remaining -= gross;
    }

    let from_pre_tax = take(&mut portfolio.pre_tax, remaining);
    drawn.pre_tax += from_pre_tax;
    ledger.pre_tax_withdrawals += from_pre_tax;
    remaining -= from_pre_tax;

    let from_roth = take(&mut portfolio.roth, remaining);
    drawn.roth += from_roth;
    remaining -= from_roth;

    drawn.total = drawn.cash + drawn.taxable + drawn.pre_tax + drawn.roth;
    portfolio.clamp();
    remaining.max(0.0)
}

/// Sells `gross` of the taxable bucket, reducing basis in proportion so the
/// basis ratio is unchanged. Returns the realized gain.
fn sell_taxable(portfolio: &mut PortfolioState, gross: f64) -> f64 {
    let value_before = portfolio.taxable;
    if gross <= 0.0 || value_before <= 0.0 {
        return 0.0;
    }

    let gross = gross.min(value_before);
    let basis_before = portfolio.taxable_basis;
    let basis_portion = (gross * portfolio.basis_ratio()).min(basis_before);

    portfolio.taxable -= gross;
    portfolio.taxable_basis = (basis_before - basis_portion)
        .max(0.0)
        .min(portfolio.taxable);
    (gross - basis_portion).max(0.0)
}

fn assess_taxes(
    params: &SimulationParams,
    ledger: &IncomeLedger,
    constants: &TaxConstants,
    f: f64,
    medicare_due: bool,
) -> TaxAssessment {
    let status = params.tax.filing_status;
    let ordinary = ledger.ordinary_excluding_benefits();
    let other_agi = ledger.wages - ledger.contributions + ordinary + ledger.realized_gains;
    let taxable_social_security = social_security::taxable_benefits(
        ledger.social_security,
        other_agi,
        status,
        params.tax.lived_with_spouse,
    );

    let input = TaxInput {
        wages: ledger.wages,
        long_term_gains: ledger.realized_gains,
        other_ordinary: ordinary + taxable_social_security,
        pre_tax_contributions: ledger.contributions,
        ..TaxInput::new(status)
    };
    let federal = tax::federal_tax(&input, constants);

    let rate = params
        .tax
        .state_rate_override
        .unwrap_or_else(|| tax::state_rate(&params.tax.state_code));
    let state = tax::state_tax(federal.agi, rate);

    let medicare = if medicare_due {
        let enrollees = params.health.medicare_enrollees;
        let base = if params.health.include_base_premium {
            tax::medicare_base_premiums(constants, enrollees)
        } else {
            0.0
        };
        (base + tax::irmaa_surcharge(federal.agi, status, constants, enrollees)) * f
    } else {
        0.0
    };

    TaxAssessment {
        federal,
        taxable_social_security,
        state,
        medicare,
    }
}

fn conversion_amount(
    conversion: &RothConversion,
    federal: &FederalTax,
    constants: &TaxConstants,
    status: FilingStatus,
    available: f64,
    f: f64,
) -> f64 {
    let amount = match *conversion {
        RothConversion::None => 0.0,
        RothConversion::FixedAmount { amount } => amount.max(0.0) * f,
        RothConversion::FillBracket {
            target_rate,
            protect_zero_ltcg,
        } => {
            let deduction = constants.table(status).standard_deduction;
            if target_rate <= 0.0 {
                let room = deduction - federal.ordinary_income;
                if protect_zero_ltcg {
                    room - federal.preferential_income
                } else {
                    room
                }
            } else {
                constants
                    .ordinary_bracket_top(status, target_rate)
                    .filter(|top| top.is_finite())
                    .map(|top| top + deduction - federal.ordinary_income)
                    .unwrap_or(0.0)
            }
        }
    };
    amount.max(0.0).min(available.max(0.0))
}

pub fn net_worth(portfolio: &PortfolioState, liabilities: f64, pre_tax_discount: f64) -> f64 {
    let discount = pre_tax_discount.clamp(0.0, 1.0);
    portfolio.taxable + portfolio.roth + portfolio.cash + portfolio.property
        + portfolio.pre_tax * (1.0 - discount)
        - liabilities
}

fn milestone_met(condition: &MilestoneCondition, result: &AnnualResult) -> bool {
    let deflate = |value: f64, real: bool| {
        if real {
            value / result.inflation_factor.max(1e-9)
        } else {
            value
        }
    };

    match *condition {
        MilestoneCondition::NetWorthAtLeast { amount, real } => {
            deflate(result.net_worth, real) >= amount
        }
        MilestoneCondition::LiquidAssetsAtLeast { amount, real } => {
            deflate(result.portfolio.liquid_total(), real) >= amount
        }
        MilestoneCondition::DebtFree => result.liabilities <= 0.01,
        MilestoneCondition::WithdrawalRateAtMost { rate } => {
            let liquid = result.portfolio.liquid_total();
            liquid > 0.0 && result.cash_flow.withdrawals.total <= rate * liquid
        }
        MilestoneCondition::AgeReached { age } => result.age >= age,
    }
}
