/// Linear-interpolated percentile. Sorts `values` in place.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

pub fn median(values: &mut [f64]) -> f64 {
    percentile(values, 50.0)
}

/// Index into an already ordered list of `len` items for percentile `p`.
pub fn rank_index(len: usize, p: f64) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let pos = (p.clamp(0.0, 100.0) / 100.0 * (len - 1) as f64).round() as usize;
    Some(pos.min(len - 1))
}
