// Order statistics shared by the stream, role and section stages
// Every helper sorts a private copy so results never depend on input order

use std::cmp::Ordering;

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

/// Median of the finite values, `None` when there are none
pub fn median(values: &[f64]) -> Option<f64> {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n == 0 {
        return None;
    }

    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

/// Median, or `fallback` when no finite value exists
pub fn median_or(values: &[f64], fallback: f64) -> f64 {
    median(values).unwrap_or(fallback)
}

/// Percentile with linear interpolation between closest ranks
/// `q` is a fraction in [0, 1]
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    let sorted = sorted_finite(values);
    if sorted.is_empty() {
        return None;
    }

    let q = q.clamp(0.0, 1.0);
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }

    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Median absolute deviation around the median
pub fn mad(values: &[f64]) -> Option<f64> {
    let center = median(values)?;
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - center).abs())
        .collect();
    median(&deviations)
}

/// Population standard deviation (divides by n)
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    variance.sqrt()
}

/// Consecutive differences of a sorted time sequence
pub fn diffs(times: &[f64]) -> Vec<f64> {
    times.windows(2).map(|w| w[1] - w[0]).collect()
}
