//! Federal, state and Medicare tax approximations.
//!
//! Dollar thresholds live in [`TaxConstants`]; projections scale a copy of the
//! base table by the cumulative inflation factor rather than indexing the
//! thresholds inline.

use std::sync::OnceLock;

use super::types::FilingStatus;

const NIIT_RATE: f64 = 0.038;
const STATE_FALLBACK_RATE: f64 = 0.05;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bracket {
    /// Upper bound of taxable income for this rate. The last bracket is open.
    pub upper: f64,
    pub rate: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FilingTable {
    pub standard_deduction: f64,
    pub ordinary: Vec<Bracket>,
    pub capital_gains: Vec<Bracket>,
    pub niit_threshold: f64,
    pub additional_medicare_threshold: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FicaParams {
    pub social_security_rate: f64,
    pub social_security_wage_base: f64,
    pub medicare_rate: f64,
    pub additional_medicare_rate: f64,
}

/// One IRMAA step. Joint filers use double the single threshold unless the
/// tier pins its own joint threshold.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IrmaaTier {
    pub threshold: f64,
    pub joint_threshold: Option<f64>,
    pub part_b_monthly: f64,
    pub part_d_monthly: f64,
}

impl IrmaaTier {
    fn threshold_for(&self, status: FilingStatus) -> f64 {
        match status {
            FilingStatus::MarriedFilingJointly => {
                self.joint_threshold.unwrap_or(self.threshold * 2.0)
            }
            _ => self.threshold,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaxConstants {
    pub tax_year: i32,
    pub single: FilingTable,
    pub married_joint: FilingTable,
    pub married_separate: FilingTable,
    pub head_of_household: FilingTable,
    pub fica: FicaParams,
    pub irmaa: Vec<IrmaaTier>,
    pub medicare_base_premium_monthly: f64,
}

fn brackets(uppers: [f64; 6], rates: [f64; 7]) -> Vec<Bracket> {
    let mut out = Vec::with_capacity(rates.len());
    for (idx, rate) in rates.iter().enumerate() {
        let upper = uppers.get(idx).copied().unwrap_or(f64::INFINITY);
        out.push(Bracket { upper, rate: *rate });
    }
    out
}

fn gains_brackets(zero_top: f64, fifteen_top: f64) -> Vec<Bracket> {
    vec![
        Bracket {
            upper: zero_top,
            rate: 0.0,
        },
        Bracket {
            upper: fifteen_top,
            rate: 0.15,
        },
        Bracket {
            upper: f64::INFINITY,
            rate: 0.20,
        },
    ]
}

const ORDINARY_RATES: [f64; 7] = [0.10, 0.12, 0.22, 0.24, 0.32, 0.35, 0.37];

impl TaxConstants {
    /// The 2024 table every projection starts from.
    pub fn base() -> &'static TaxConstants {
        static BASE: OnceLock<TaxConstants> = OnceLock::new();
        BASE.get_or_init(Self::tax_year_2024)
    }

    fn tax_year_2024() -> TaxConstants {
        TaxConstants {
            tax_year: 2024,
            single: FilingTable {
                standard_deduction: 14_600.0,
                ordinary: brackets(
                    [11_600.0, 47_150.0, 100_525.0, 191_950.0, 243_725.0, 609_350.0],
                    ORDINARY_RATES,
                ),
                capital_gains: gains_brackets(47_025.0, 518_900.0),
                niit_threshold: 200_000.0,
                additional_medicare_threshold: 200_000.0,
            },
            married_joint: FilingTable {
                standard_deduction: 29_200.0,
                ordinary: brackets(
                    [23_200.0, 94_300.0, 201_050.0, 383_900.0, 487_450.0, 731_200.0],
                    ORDINARY_RATES,
                ),
                capital_gains: gains_brackets(94_050.0, 583_750.0),
                niit_threshold: 250_000.0,
                additional_medicare_threshold: 250_000.0,
            },
            married_separate: FilingTable {
                standard_deduction: 14_600.0,
                ordinary: brackets(
                    [11_600.0, 47_150.0, 100_525.0, 191_950.0, 243_725.0, 365_600.0],
                    ORDINARY_RATES,
                ),
                capital_gains: gains_brackets(47_025.0, 291_850.0),
                niit_threshold: 125_000.0,
                additional_medicare_threshold: 125_000.0,
            },
            head_of_household: FilingTable {
                standard_deduction: 21_900.0,
                ordinary: brackets(
                    [16_550.0, 63_100.0, 100_500.0, 191_950.0, 243_700.0, 609_350.0],
                    ORDINARY_RATES,
                ),
                capital_gains: gains_brackets(63_000.0, 551_350.0),
                niit_threshold: 200_000.0,
                additional_medicare_threshold: 200_000.0,
            },
            fica: FicaParams {
                social_security_rate: 0.062,
                social_security_wage_base: 168_600.0,
                medicare_rate: 0.0145,
                additional_medicare_rate: 0.009,
            },
            irmaa: vec![
                IrmaaTier {
                    threshold: 103_000.0,
                    joint_threshold: None,
                    part_b_monthly: 69.90,
                    part_d_monthly: 12.90,
                },
                IrmaaTier {
                    threshold: 129_000.0,
                    joint_threshold: None,
                    part_b_monthly: 174.70,
                    part_d_monthly: 33.30,
                },
                IrmaaTier {
                    threshold: 161_000.0,
                    joint_threshold: None,
                    part_b_monthly: 279.50,
                    part_d_monthly: 53.80,
                },
                IrmaaTier {
                    threshold: 193_000.0,
                    joint_threshold: None,
                    part_b_monthly: 384.30,
                    part_d_monthly: 74.20,
                },
                IrmaaTier {
                    threshold: 500_000.0,
                    joint_threshold: Some(750_000.0),
                    part_b_monthly: 419.30,
                    part_d_monthly: 81.00,
                },
            ],
            medicare_base_premium_monthly: 174.70,
        }
    }

    pub fn table(&self, status: FilingStatus) -> &FilingTable {
        match status {
            FilingStatus::Single => &self.single,
            FilingStatus::MarriedFilingJointly => &self.married_joint,
            FilingStatus::MarriedFilingSeparately => &self.married_separate,
            FilingStatus::HeadOfHousehold => &self.head_of_household,
        }
    }

    /// New table with every dollar amount multiplied by `factor`. Rates are
    /// untouched, so bracket order survives any positive factor.
    pub fn scaled(&self, factor: f64) -> TaxConstants {
        let factor = factor.max(0.0);
        let scale_table = |table: &FilingTable| FilingTable {
            standard_deduction: table.standard_deduction * factor,
            ordinary: scale_brackets(&table.ordinary, factor),
            capital_gains: scale_brackets(&table.capital_gains, factor),
            niit_threshold: table.niit_threshold * factor,
            additional_medicare_threshold: table.additional_medicare_threshold * factor,
        };

        TaxConstants {
            tax_year: self.tax_year,
            single: scale_table(&self.single),
            married_joint: scale_table(&self.married_joint),
            married_separate: scale_table(&self.married_separate),
            head_of_household: scale_table(&self.head_of_household),
            fica: FicaParams {
                social_security_wage_base: self.fica.social_security_wage_base * factor,
                ..self.fica
            },
            irmaa: self
                .irmaa
                .iter()
                .map(|tier| IrmaaTier {
                    threshold: tier.threshold * factor,
                    joint_threshold: tier.joint_threshold.map(|t| t * factor),
                    part_b_monthly: tier.part_b_monthly * factor,
                    part_d_monthly: tier.part_d_monthly * factor,
                })
                .collect(),
            medicare_base_premium_monthly: self.medicare_base_premium_monthly * factor,
        }
    }

    /// Top of the ordinary bracket taxed at `rate`, if the table has one.
    pub fn ordinary_bracket_top(&self, status: FilingStatus, rate: f64) -> Option<f64> {
        self.table(status)
            .ordinary
            .iter()
            .find(|b| (b.rate - rate).abs() < 1e-9)
            .map(|b| b.upper)
    }
}

fn scale_brackets(brackets: &[Bracket], factor: f64) -> Vec<Bracket> {
    brackets
        .iter()
        .map(|b| Bracket {
            upper: b.upper * factor,
            rate: b.rate,
        })
        .collect()
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TaxInput {
    pub wages: f64,
    pub short_term_gains: f64,
    pub long_term_gains: f64,
    pub qualified_dividends: f64,
    pub other_ordinary: f64,
    pub pre_tax_contributions: f64,
    pub filing_status: FilingStatus,
}

impl TaxInput {
    pub fn new(filing_status: FilingStatus) -> Self {
        Self {
            wages: 0.0,
            short_term_gains: 0.0,
            long_term_gains: 0.0,
            qualified_dividends: 0.0,
            other_ordinary: 0.0,
            pre_tax_contributions: 0.0,
            filing_status,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FederalTax {
    pub ordinary_income: f64,
    pub preferential_income: f64,
    pub agi: f64,
    pub taxable_ordinary: f64,
    pub taxable_income: f64,
    pub ordinary_tax: f64,
    pub capital_gains_tax: f64,
    pub niit: f64,
    pub fica: f64,
    pub total: f64,
    pub effective_rate: f64,
    pub marginal_rate: f64,
}

pub fn federal_tax(input: &TaxInput, constants: &TaxConstants) -> FederalTax {
    let table = constants.table(input.filing_status);

    let wages = input.wages.max(0.0);
    let contributions = input.pre_tax_contributions.max(0.0).min(wages);
    let short_term = input.short_term_gains.max(0.0);
    let long_term = input.long_term_gains.max(0.0);
    let dividends = input.qualified_dividends.max(0.0);
    let other = input.other_ordinary.max(0.0);

    let ordinary_income = wages - contributions + short_term + other;
    let preferential_income = long_term + dividends;
    let agi = ordinary_income + preferential_income;

    let deduction = table.standard_deduction;
    let taxable_ordinary = (ordinary_income - deduction).max(0.0);
    let leftover_deduction = (deduction - ordinary_income).max(0.0);
    let taxable_preferential = (preferential_income - leftover_deduction).max(0.0);

    let ordinary_tax = bracket_tax(taxable_ordinary, &table.ordinary);
    let capital_gains_tax =
        stacked_gains_tax(taxable_ordinary, taxable_preferential, &table.capital_gains);

    let investment_income = short_term + long_term + dividends;
    let niit = NIIT_RATE * investment_income.min((agi - table.niit_threshold).max(0.0));

    let fica = fica_tax(wages, &constants.fica, table.additional_medicare_threshold);

    let income_tax = ordinary_tax + capital_gains_tax + niit;
    let effective_rate = if agi > 0.0 { income_tax / agi } else { 0.0 };

    FederalTax {
        ordinary_income,
        preferential_income,
        agi,
        taxable_ordinary,
        taxable_income: taxable_ordinary + taxable_preferential,
        ordinary_tax,
        capital_gains_tax,
        niit,
        fica,
        total: income_tax + fica,
        effective_rate,
        marginal_rate: marginal_rate(taxable_ordinary, &table.ordinary),
    }
}

fn bracket_tax(taxable: f64, brackets: &[Bracket]) -> f64 {
    let mut tax = 0.0;
    let mut lower = 0.0;
    for bracket in brackets {
        if taxable <= lower {
            break;
        }
        tax += (taxable.min(bracket.upper) - lower) * bracket.rate;
        lower = bracket.upper;
    }
    tax
}

/// Preferential income sits on top of ordinary taxable income, so the walk
/// starts at `floor` and consumes each gains bracket from there.
fn stacked_gains_tax(floor: f64, preferential: f64, brackets: &[Bracket]) -> f64 {
    let mut remaining = preferential;
    let mut position = floor;
    let mut tax = 0.0;
    for bracket in brackets {
        if remaining <= 0.0 {
            break;
        }
        if position >= bracket.upper {
            continue;
        }
        let take = remaining.min(bracket.upper - position);
        tax += take * bracket.rate;
        position += take;
        remaining -= take;
    }
    tax
}

fn marginal_rate(taxable_ordinary: f64, brackets: &[Bracket]) -> f64 {
    if taxable_ordinary <= 0.0 {
        return 0.0;
    }
    brackets
        .iter()
        .find(|b| taxable_ordinary <= b.upper)
        .or(brackets.last())
        .map(|b| b.rate)
        .unwrap_or(0.0)
}

fn fica_tax(wages: f64, fica: &FicaParams, additional_threshold: f64) -> f64 {
    if wages <= 0.0 {
        return 0.0;
    }
    let social_security = wages.min(fica.social_security_wage_base) * fica.social_security_rate;
    let medicare = wages * fica.medicare_rate;
    let additional = (wages - additional_threshold).max(0.0) * fica.additional_medicare_rate;
    social_security + medicare + additional
}

/// Flat approximation of the state's top marginal rate.
pub fn state_rate(code: &str) -> f64 {
    match code.trim().to_ascii_uppercase().as_str() {
        "" | "AK" | "FL" | "NV" | "NH" | "SD" | "TN" | "TX" | "WA" | "WY" => 0.0,
        "AZ" => 0.025,
        "CA" => 0.093,
        "CO" => 0.044,
        "GA" => 0.0549,
        "IL" => 0.0495,
        "IN" => 0.0305,
        "MA" => 0.05,
        "MI" => 0.0425,
        "NC" => 0.045,
        "NJ" => 0.0637,
        "NY" => 0.0685,
        "OH" => 0.035,
        "OR" => 0.0875,
        "PA" => 0.0307,
        "UT" => 0.0465,
        "VA" => 0.0575,
        _ => STATE_FALLBACK_RATE,
    }
}

pub fn state_tax(agi: f64, rate: f64) -> f64 {
    agi.max(0.0) * rate.max(0.0)
}

/// Annual IRMAA surcharge across all enrollees.
pub fn irmaa_surcharge(
    agi: f64,
    status: FilingStatus,
    constants: &TaxConstants,
    enrollees: u32,
) -> f64 {
    let tier = constants
        .irmaa
        .iter()
        .rev()
        .find(|tier| agi > tier.threshold_for(status));
    match tier {
        Some(t) => (t.part_b_monthly + t.part_d_monthly) * 12.0 * enrollees as f64,
        None => 0.0,
    }
}

pub fn medicare_base_premiums(constants: &TaxConstants, enrollees: u32) -> f64 {
    constants.medicare_base_premium_monthly * 12.0 * enrollees as f64
}

/// Gains that could still be realized at the 0% long-term rate given the
/// income already on the return.
pub fn zero_rate_gain_room(agi: f64, status: FilingStatus, constants: &TaxConstants) -> f64 {
    let table = constants.table(status);
    let zero_top = table
        .capital_gains
        .first()
        .filter(|b| b.rate == 0.0)
        .map(|b| b.upper)
        .unwrap_or(0.0);
    (zero_top + table.standard_deduction - agi.max(0.0)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn single() -> TaxInput {
        TaxInput::new(FilingStatus::Single)
    }

    #[test]
    fn zero_income_owes_nothing() {
        let result = federal_tax(&single(), TaxConstants::base());
        assert_close(result.total, 0.0, 1e-9);
        assert_close(result.effective_rate, 0.0, 1e-9);
        assert_close(result.marginal_rate, 0.0, 1e-9);
    }

    #[test]
    fn ordinary_brackets_accumulate_marginally() {
        let mut input = single();
        input.other_ordinary = 74_600.0;
        let result = federal_tax(&input, TaxConstants::base());

        // Taxable 60,000: 11,600 @10% + 35,550 @12% + 12,850 @22%
        let expected = 1_160.0 + 4_266.0 + 2_827.0;
        assert_close(result.taxable_ordinary, 60_000.0, 1e-9);
        assert_close(result.ordinary_tax, expected, 1e-6);
        assert_close(result.marginal_rate, 0.22, 1e-12);
        assert_close(result.fica, 0.0, 1e-12);
    }

    #[test]
    fn gains_stack_on_top_of_ordinary_income() {
        let mut input = single();
        input.other_ordinary = 54_600.0; // taxable ordinary 40,000
        input.long_term_gains = 20_000.0;
        let result = federal_tax(&input, TaxConstants::base());

        // 7,025 of the gain fits under the 0% ceiling, the rest is taxed at 15%.
        assert_close(result.capital_gains_tax, (20_000.0 - 7_025.0) * 0.15, 1e-6);
        assert_close(result.agi, 74_600.0, 1e-9);
    }

    #[test]
    fn unused_deduction_shelters_gains() {
        let mut input = single();
        input.other_ordinary = 4_600.0;
        input.long_term_gains = 60_000.0;
        let result = federal_tax(&input, TaxConstants::base());

        // 10,000 of deduction left; 50,000 taxable gains, 47,025 at 0%.
        assert_close(result.taxable_ordinary, 0.0, 1e-9);
        assert_close(result.taxable_income, 50_000.0, 1e-9);
        assert_close(result.capital_gains_tax, (50_000.0 - 47_025.0) * 0.15, 1e-6);
    }

    #[test]
    fn niit_applies_to_lesser_of_investment_income_and_excess_agi() {
        let mut input = single();
        input.other_ordinary = 180_000.0;
        input.long_term_gains = 50_000.0;
        let result = federal_tax(&input, TaxConstants::base());
        assert_close(result.niit, 0.038 * 30_000.0, 1e-6);

        input.other_ordinary = 400_000.0;
        let result = federal_tax(&input, TaxConstants::base());
        assert_close(result.niit, 0.038 * 50_000.0, 1e-6);
    }

    #[test]
    fn fica_caps_social_security_and_adds_surtax() {
        let mut input = single();
        input.wages = 250_000.0;
        input.pre_tax_contributions = 20_000.0;
        let result = federal_tax(&input, TaxConstants::base());

        let expected = 168_600.0 * 0.062 + 250_000.0 * 0.0145 + 50_000.0 * 0.009;
        assert_close(result.fica, expected, 1e-6);
        assert_close(result.ordinary_income, 230_000.0, 1e-9);
    }

    #[test]
    fn scaled_table_is_new_and_monotonic() {
        let base = TaxConstants::base();
        let scaled = base.scaled(1.5);
        assert_close(base.single.standard_deduction, 14_600.0, 1e-9);
        assert_close(scaled.single.standard_deduction, 21_900.0, 1e-9);
        for pair in scaled.married_joint.ordinary.windows(2) {
            assert!(pair[0].upper < pair[1].upper);
            assert!(pair[0].rate < pair[1].rate);
        }
        assert!(scaled.married_joint.ordinary.last().unwrap().upper.is_infinite());
        assert_close(scaled.fica.social_security_rate, 0.062, 1e-12);
    }

    #[test]
    fn scaling_thresholds_lowers_tax_on_same_income() {
        let mut input = single();
        input.other_ordinary = 120_000.0;
        let base = federal_tax(&input, TaxConstants::base());
        let scaled = federal_tax(&input, &TaxConstants::base().scaled(1.3));
        assert!(scaled.total < base.total);
    }

    #[test]
    fn irmaa_uses_doubled_joint_thresholds_except_top_tier() {
        let base = TaxConstants::base();
        assert_close(
            irmaa_surcharge(100_000.0, FilingStatus::Single, base, 1),
            0.0,
            1e-9,
        );
        assert_close(
            irmaa_surcharge(110_000.0, FilingStatus::Single, base, 1),
            (69.90 + 12.90) * 12.0,
            1e-6,
        );
        assert_close(
            irmaa_surcharge(110_000.0, FilingStatus::MarriedFilingJointly, base, 2),
            0.0,
            1e-9,
        );
        assert_close(
            irmaa_surcharge(210_000.0, FilingStatus::MarriedFilingJointly, base, 2),
            (69.90 + 12.90) * 12.0 * 2.0,
            1e-6,
        );
        // The top joint tier is pinned at 750k instead of 2 x 500k.
        assert_close(
            irmaa_surcharge(800_000.0, FilingStatus::MarriedFilingJointly, base, 1),
            (419.30 + 81.00) * 12.0,
            1e-6,
        );
    }

    #[test]
    fn state_rates_cover_no_tax_states_and_fallback() {
        assert_close(state_rate("tx"), 0.0, 1e-12);
        assert_close(state_rate("CA"), 0.093, 1e-12);
        assert_close(state_rate("ZZ"), 0.05, 1e-12);
        assert_close(state_tax(100_000.0, 0.05), 5_000.0, 1e-9);
    }

    #[test]
    fn zero_rate_room_shrinks_with_income() {
        let base = TaxConstants::base();
        let room = zero_rate_gain_room(0.0, FilingStatus::Single, base);
        assert_close(room, 47_025.0 + 14_600.0, 1e-9);
        let room = zero_rate_gain_room(50_000.0, FilingStatus::Single, base);
        assert_close(room, 11_625.0, 1e-9);
        assert_close(
            zero_rate_gain_room(500_000.0, FilingStatus::Single, base),
            0.0,
            1e-9,
        );
    }

    #[test]
    fn bracket_top_lookup_matches_table() {
        let base = TaxConstants::base();
        assert_eq!(
            base.ordinary_bracket_top(FilingStatus::MarriedFilingJointly, 0.12),
            Some(94_300.0)
        );
        assert_eq!(base.ordinary_bracket_top(FilingStatus::Single, 0.5), None);
    }
}
