/// IRS Uniform Lifetime Table, starting at age 72.
const UNIFORM_LIFETIME: [f64; 44] = [
    27.4, 26.5, 25.5, 24.6, 23.7, 22.9, 22.0, 21.1, 20.2, 19.4, // 72-81
    18.5, 17.7, 16.8, 16.0, 15.2, 14.4, 13.7, 12.9, 12.2, 11.5, // 82-91
    10.8, 10.1, 9.5, 8.9, 8.4, 7.8, 7.3, 6.8, 6.4, 6.0, // 92-101
    5.6, 5.2, 4.9, 4.6, 4.3, 4.1, 3.9, 3.7, 3.5, 3.4, // 102-111
    3.3, 3.1, 3.0, 2.9, // 112-115
];
const TABLE_START_AGE: u32 = 72;

pub fn distribution_period(age: u32) -> Option<f64> {
    if age < TABLE_START_AGE {
        return None;
    }
    let idx = ((age - TABLE_START_AGE) as usize).min(UNIFORM_LIFETIME.len() - 1);
    Some(UNIFORM_LIFETIME[idx])
}

pub fn rmd_start_age(birth_year: i32) -> u32 {
    if birth_year >= 1960 { 75 } else { 73 }
}

/// Required distribution for the year, from the prior year-end pre-tax balance.
pub fn required_distribution(age: u32, birth_year: i32, pre_tax_balance: f64) -> f64 {
    if age < rmd_start_age(birth_year) || pre_tax_balance <= 0.0 {
        return 0.0;
    }
    distribution_period(age)
        .map(|period| pre_tax_balance / period)
        .unwrap_or(0.0)
}
