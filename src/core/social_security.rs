use super::types::{FilingStatus, SocialSecurityClaim};

pub const FULL_RETIREMENT_AGE: u32 = 67;
const MAX_DELAY_MONTHS: u32 = 36;
const FIRST_REDUCTION_MONTHS: u32 = 36;

/// Monthly benefit after the early-claiming reduction or delayed credit.
pub fn adjusted_monthly_benefit(monthly_pia: f64, claiming_age: u32) -> f64 {
    let pia = monthly_pia.max(0.0);
    let factor = if claiming_age < FULL_RETIREMENT_AGE {
        let early = (FULL_RETIREMENT_AGE - claiming_age) * 12;
        let first = early.min(FIRST_REDUCTION_MONTHS) as f64;
        let beyond = early.saturating_sub(FIRST_REDUCTION_MONTHS) as f64;
        1.0 - first * (5.0 / 9.0) / 100.0 - beyond * (5.0 / 12.0) / 100.0
    } else {
        let delayed = ((claiming_age - FULL_RETIREMENT_AGE) * 12).min(MAX_DELAY_MONTHS) as f64;
        1.0 + delayed * (2.0 / 3.0) / 100.0
    };
    pia * factor.max(0.0)
}

pub fn annual_benefit(claim: &SocialSecurityClaim) -> f64 {
    adjusted_monthly_benefit(claim.monthly_pia, claim.claiming_age) * 12.0
}

pub fn benefit_start_year(claim: &SocialSecurityClaim) -> i32 {
    claim.birth_year + claim.claiming_age as i32
}

/// Nominal benefit paid in `year`, indexed by the cumulative inflation factor.
pub fn benefit_for_year(claim: &SocialSecurityClaim, year: i32, inflation_factor: f64) -> f64 {
    if year < benefit_start_year(claim) {
        return 0.0;
    }
    annual_benefit(claim) * inflation_factor.max(0.0)
}

fn provisional_thresholds(status: FilingStatus, lived_with_spouse: bool) -> (f64, f64) {
    match status {
        FilingStatus::MarriedFilingJointly => (32_000.0, 44_000.0),
        FilingStatus::MarriedFilingSeparately if lived_with_spouse => (0.0, 0.0),
        _ => (25_000.0, 34_000.0),
    }
}

/// Portion of `benefit` included in taxable income. `other_income` is every
/// other AGI component for the year.
pub fn taxable_benefits(
    benefit: f64,
    other_income: f64,
    status: FilingStatus,
    lived_with_spouse: bool,
) -> f64 {
    let benefit = benefit.max(0.0);
    if benefit <= 0.0 {
        return 0.0;
    }

    let (base, adjusted_base) = provisional_thresholds(status, lived_with_spouse);
    let provisional = other_income.max(0.0) + 0.5 * benefit;

    if provisional <= base {
        return 0.0;
    }
    if provisional <= adjusted_base {
        return (0.5 * (provisional - base)).min(0.5 * benefit);
    }

    let first_tier = (0.5 * (adjusted_base - base)).min(0.5 * benefit);
    (0.85 * (provisional - adjusted_base) + first_tier).min(0.85 * benefit)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn claiming_at_full_retirement_age_pays_pia() {
        assert_approx(adjusted_monthly_benefit(2_000.0, 67), 2_000.0);
    }

    #[test]
    fn early_claim_uses_two_reduction_rates() {
        // 36 months at 5/9% = 20%, then 24 months at 5/12% = 10%.
        assert_approx(adjusted_monthly_benefit(2_000.0, 62), 1_400.0);
        assert_approx(adjusted_monthly_benefit(2_000.0, 64), 1_600.0);
    }

    #[test]
    fn delayed_credit_stops_at_seventy() {
        assert_approx(adjusted_monthly_benefit(2_000.0, 70), 2_480.0);
        assert_approx(adjusted_monthly_benefit(2_000.0, 72), 2_480.0);
    }

    #[test]
    fn benefit_starts_in_claim_year() {
        let claim = SocialSecurityClaim {
            monthly_pia: 1_000.0,
            claiming_age: 67,
            birth_year: 1960,
        };
        assert_approx(benefit_for_year(&claim, 2026, 1.1), 0.0);
        assert_approx(benefit_for_year(&claim, 2027, 1.1), 13_200.0);
    }

    #[test]
    fn low_provisional_income_is_untaxed() {
        assert_approx(
            taxable_benefits(20_000.0, 10_000.0, FilingStatus::Single, false),
            0.0,
        );
    }

    #[test]
    fn middle_band_taxes_half_the_excess() {
        // Provisional 30,000: half of 5,000 over the base.
        assert_approx(
            taxable_benefits(20_000.0, 20_000.0, FilingStatus::Single, false),
            2_500.0,
        );
    }

    #[test]
    fn upper_band_is_capped_at_85_percent() {
        let taxable = taxable_benefits(30_000.0, 200_000.0, FilingStatus::Single, false);
        assert_approx(taxable, 25_500.0);

        // Provisional 50,000: 0.85 * 16,000 + 4,500 exceeds 85% of the benefit.
        let taxable = taxable_benefits(20_000.0, 40_000.0, FilingStatus::Single, false);
        assert_approx(taxable, 17_000.0);
    }

    #[test]
    fn separate_filers_living_together_have_zero_thresholds() {
        let taxable = taxable_benefits(
            10_000.0,
            1_000.0,
            FilingStatus::MarriedFilingSeparately,
            true,
        );
        assert_approx(taxable, 0.85 * 6_000.0);

        let apart = taxable_benefits(
            10_000.0,
            1_000.0,
            FilingStatus::MarriedFilingSeparately,
            false,
        );
        assert_approx(apart, 0.0);
    }
}
