//! U.S. annual market history, 1928 through 2023.
//!
//! Stock returns are S&P 500 total returns, yields are year-end 10-year
//! Treasury yields, inflation is CPI. All values are fractions.

use super::types::MarketYear;

pub const FIRST_YEAR: i32 = 1928;

const BOND_DURATION: f64 = 7.0;
const CASH_YIELD_SHARE: f64 = 0.8;
const PROPERTY_PREMIUM: f64 = 0.01;

#[rustfmt::skip]
const STOCK_RETURNS_PCT: [f64; 96] = [
    43.81, -8.30, -25.12, -43.84, -8.64, 49.98, -1.19, 46.74, 31.94, -35.34,
    29.28, -1.10, -10.67, -12.77, 19.17, 25.06, 19.03, 35.82, -8.43, 5.20,
    5.70, 18.30, 30.81, 23.68, 18.15, -1.21, 52.56, 32.60, 7.44, -10.46,
    43.72, 12.06, 0.34, 26.64, -8.81, 22.61, 16.42, 12.40, -9.97, 23.80,
    10.81, -8.24, 3.56, 14.22, 18.76, -14.31, -25.90, 37.00, 23.83, -6.98,
    6.51, 18.52, 31.74, -4.70, 20.42, 22.34, 6.15, 31.24, 18.49, 5.81,
    16.54, 31.48, -3.06, 30.23, 7.49, 9.97, 1.33, 37.20, 22.68, 33.10,
    28.34, 20.89, -9.03, -11.85, -21.97, 28.36, 10.74, 4.83, 15.61, 5.48,
    -36.55, 25.94, 14.82, 2.10, 15.89, 32.15, 13.52, 1.38, 11.77, 21.61,
    -4.23, 31.21, 18.02, 28.47, -18.04, 26.06,
];

/// Starts one year early (1927) so every year has a prior yield.
#[rustfmt::skip]
const TREASURY_YIELDS_PCT: [f64; 97] = [
    3.17,
    3.45, 3.36, 3.22, 3.93, 3.35, 3.53, 3.01, 2.84, 2.59, 2.73,
    2.52, 2.26, 1.94, 2.04, 2.46, 2.48, 2.46, 2.34, 2.29, 2.39,
    2.44, 2.19, 2.39, 2.70, 2.75, 2.59, 2.51, 2.96, 3.59, 3.21,
    3.86, 4.69, 3.84, 4.06, 3.86, 4.13, 4.18, 4.62, 4.84, 5.70,
    6.03, 7.65, 6.39, 5.93, 6.36, 6.74, 7.43, 8.00, 6.87, 7.69,
    9.01, 10.39, 12.84, 13.72, 10.54, 11.83, 11.50, 9.26, 7.11, 8.99,
    9.11, 7.84, 8.08, 7.09, 6.77, 5.77, 7.81, 5.71, 6.30, 5.81,
    4.65, 6.44, 5.11, 5.05, 3.81, 4.25, 4.22, 4.39, 4.70, 4.02,
    2.21, 3.84, 3.29, 1.88, 1.76, 3.04, 2.17, 2.27, 2.45, 2.41,
    2.69, 1.92, 0.93, 1.52, 3.88, 3.88,
];

#[rustfmt::skip]
const INFLATION_PCT: [f64; 96] = [
    -1.0, 0.2, -6.0, -9.5, -10.3, 0.8, 1.5, 3.0, 1.4, 2.9,
    -2.8, 0.0, 0.7, 9.9, 9.0, 3.0, 2.3, 2.2, 18.1, 8.8,
    3.0, -2.1, 5.9, 6.0, 0.8, 0.7, -0.7, 0.4, 3.0, 2.9,
    1.8, 1.7, 1.4, 0.7, 1.3, 1.6, 1.0, 1.9, 3.5, 3.0,
    4.7, 6.2, 5.6, 3.3, 3.4, 8.7, 12.3, 6.9, 4.9, 6.7,
    9.0, 13.3, 12.5, 8.9, 3.8, 3.8, 3.9, 3.8, 1.1, 4.4,
    4.4, 4.6, 6.1, 3.1, 2.9, 2.7, 2.7, 2.5, 3.3, 1.7,
    1.6, 2.7, 3.4, 1.6, 2.4, 1.9, 3.3, 3.4, 2.5, 4.1,
    0.1, 2.7, 1.5, 3.0, 1.7, 1.5, 0.8, 0.7, 2.1, 2.1,
    1.9, 2.3, 1.4, 7.0, 6.5, 3.4,
];

pub fn len() -> usize {
    STOCK_RETURNS_PCT.len()
}

pub fn last_year() -> i32 {
    FIRST_YEAR + len() as i32 - 1
}

/// Realized market year at `index` (0 = 1928).
pub fn market_year(index: usize) -> Option<MarketYear> {
    let stock = *STOCK_RETURNS_PCT.get(index)? / 100.0;
    let inflation = *INFLATION_PCT.get(index)? / 100.0;
    let prior_yield = *TREASURY_YIELDS_PCT.get(index)? / 100.0;
    let current_yield = *TREASURY_YIELDS_PCT.get(index + 1)? / 100.0;

    Some(MarketYear {
        stock_return: stock,
        bond_return: prior_yield - BOND_DURATION * (current_yield - prior_yield),
        cash_return: CASH_YIELD_SHARE * current_yield,
        inflation,
        property_return: inflation + PROPERTY_PREMIUM,
    })
}

/// `years` consecutive realized years starting at `start_index`, or `None`
/// when the window runs past the dataset.
pub fn window(start_index: usize, years: usize) -> Option<Vec<MarketYear>> {
    (start_index..start_index + years).map(market_year).collect()
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RealReturns {
    pub stock: f64,
    pub bond: f64,
    pub cash: f64,
}

/// Inflation-removed returns for one historical year.
pub fn real_returns(index: usize) -> Option<RealReturns> {
    let year = market_year(index)?;
    let deflate = |nominal: f64| (1.0 + nominal) / (1.0 + year.inflation) - 1.0;
    Some(RealReturns {
        stock: deflate(year.stock_return),
        bond: deflate(year.bond_return),
        cash: deflate(year.cash_return),
    })
}
