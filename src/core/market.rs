use std::f64::consts::PI;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::history;
use super::types::{MarketPath, MarketYear};

const PROPERTY_PREMIUM: f64 = 0.01;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAssumptions {
    pub stock_mean: f64,
    pub stock_vol: f64,
    pub bond_mean: f64,
    pub bond_vol: f64,
    pub cash_mean: f64,
    pub cash_vol: f64,
    pub inflation_mean: f64,
    pub inflation_vol: f64,
}

impl Default for MarketAssumptions {
    fn default() -> Self {
        Self {
            stock_mean: 0.07,
            stock_vol: 0.16,
            bond_mean: 0.035,
            bond_vol: 0.06,
            cash_mean: 0.02,
            cash_vol: 0.01,
            inflation_mean: 0.025,
            inflation_vol: 0.012,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionType {
    /// Independent normal draws from `MarketAssumptions`.
    #[default]
    Custom,
    /// Real returns resampled from the historical dataset.
    Historical,
}

/// Seed for path `index`. Any index maps to the same seed on every call, so
/// parallel generation does not change the ensemble.
pub fn derive_seed(base_seed: u64, index: u64) -> u64 {
    let mixed = base_seed ^ splitmix64(index);
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Box-Muller normal draws on top of any `Rng`, caching the second value.
pub struct NormalSampler<R> {
    rng: R,
    cached: Option<f64>,
}

impl<R: Rng> NormalSampler<R> {
    pub fn new(rng: R) -> Self {
        Self { rng, cached: None }
    }

    pub fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached.take() {
            return z;
        }

        let u1: f64 = self.rng.gen_range(1e-12..1.0);
        let u2: f64 = self.rng.gen_range(0.0..1.0);
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        self.cached = Some(r * theta.sin());
        r * theta.cos()
    }

    pub fn normal(&mut self, mean: f64, vol: f64) -> f64 {
        mean + vol.max(0.0) * self.standard_normal()
    }

    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

fn sample_parametric<R: Rng>(a: &MarketAssumptions, sampler: &mut NormalSampler<R>) -> MarketYear {
    let stock_return = sampler.normal(a.stock_mean, a.stock_vol).clamp(-0.95, 2.5);
    let bond_return = sampler.normal(a.bond_mean, a.bond_vol).clamp(-0.5, 1.0);
    let cash_return = sampler.normal(a.cash_mean, a.cash_vol).clamp(-0.05, 0.5);
    let inflation = sample_inflation(a, sampler);

    MarketYear {
        stock_return,
        bond_return,
        cash_return,
        inflation,
        property_return: inflation + PROPERTY_PREMIUM,
    }
}

fn sample_inflation<R: Rng>(a: &MarketAssumptions, sampler: &mut NormalSampler<R>) -> f64 {
    sampler
        .normal(a.inflation_mean, a.inflation_vol)
        .clamp(-0.03, 0.20)
}

/// Draws whole calendar years of real returns; the dataset has no monthly
/// series to roll over.
fn sample_historical<R: Rng>(a: &MarketAssumptions, sampler: &mut NormalSampler<R>) -> MarketYear {
    let inflation = sample_inflation(a, sampler);
    let years = history::len();
    let stock_year = history::real_returns(sampler.index(years));
    let fixed_year = history::real_returns(sampler.index(years));

    let nominal = |real: f64| (1.0 + real) * (1.0 + inflation) - 1.0;
    let fallback = MarketYear::FALLBACK;

    MarketYear {
        stock_return: stock_year
            .map(|r| nominal(r.stock))
            .unwrap_or(fallback.stock_return),
        bond_return: fixed_year
            .map(|r| nominal(r.bond))
            .unwrap_or(fallback.bond_return),
        cash_return: fixed_year
            .map(|r| nominal(r.cash))
            .unwrap_or(fallback.cash_return),
        inflation,
        property_return: inflation + PROPERTY_PREMIUM,
    }
}

pub fn generate_path<R: Rng>(
    assumptions: &MarketAssumptions,
    distribution: DistributionType,
    years: usize,
    rng: R,
) -> MarketPath {
    let mut sampler = NormalSampler::new(rng);
    (0..years)
        .map(|_| match distribution {
            DistributionType::Custom => sample_parametric(assumptions, &mut sampler),
            DistributionType::Historical => sample_historical(assumptions, &mut sampler),
        })
        .collect()
}

/// Path `index` of the ensemble identified by `seed`.
pub fn path_for_index(
    assumptions: &MarketAssumptions,
    distribution: DistributionType,
    years: usize,
    seed: u64,
    index: u64,
) -> MarketPath {
    let rng = ChaCha8Rng::seed_from_u64(derive_seed(seed, index));
    generate_path(assumptions, distribution, years, rng)
}

pub fn generate_ensemble(
    assumptions: &MarketAssumptions,
    distribution: DistributionType,
    years: usize,
    seed: u64,
    iterations: usize,
) -> Arc<[MarketPath]> {
    (0..iterations)
        .into_par_iter()
        .map(|i| path_for_index(assumptions, distribution, years, seed, i as u64))
        .collect::<Vec<_>>()
        .into()
}

/// FNV-1a over every value of every path, formatted as hex.
pub fn fingerprint(paths: &[MarketPath]) -> String {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET;
    let mut feed = |value: u64| {
        for byte in value.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    };

    feed(paths.len() as u64);
    for path in paths {
        feed(path.len() as u64);
        for year in path {
            feed(year.stock_return.to_bits());
            feed(year.bond_return.to_bits());
            feed(year.cash_return.to_bits());
            feed(year.inflation.to_bits());
            feed(year.property_return.to_bits());
        }
    }
    format!("{hash:016x}")
}

/// Cumulative stock index, starting at 1.0 before the first year.
pub fn stock_index(path: &[MarketYear]) -> Vec<f64> {
    let mut level = 1.0;
    let mut out = Vec::with_capacity(path.len() + 1);
    out.push(level);
    for year in path {
        level *= 1.0 + year.stock_return;
        out.push(level);
    }
    out
}
