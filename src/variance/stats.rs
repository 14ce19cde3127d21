//! Descriptive statistics and interval estimates.
//!
//! Small, allocation-light helpers over `f64` slices. Quantiles of the normal
//! and Student t distributions are computed in closed form (Acklam's rational
//! approximation and a Cornish-Fisher expansion), accurate well beyond the
//! precision a confidence interval needs.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Tukey fence multiplier.
pub const TUKEY_K: f64 = 1.5;

/// Minimum sample size for outlier detection.
pub const MIN_OUTLIER_SAMPLES: usize = 3;

/// Critical value used when the requested level cannot be resolved.
const FALLBACK_Z_95: f64 = 1.96;

/// A two-sided confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    /// Confidence level, e.g. `0.95`.
    pub level: f64,
}

impl ConfidenceInterval {
    /// Width of the interval.
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Whether `value` lies inside the interval (inclusive).
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator), 0 when `n <= 1`.
pub fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n <= 1 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (sum_sq / (n - 1) as f64).sqrt()
}

/// `std / mean`, 0 when the mean is not positive.
pub fn coefficient_of_variation(mean: f64, std: f64) -> f64 {
    if mean <= 0.0 {
        0.0
    } else {
        std / mean
    }
}

/// Sorted copy of `values`.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut keyed: Vec<OrderedFloat<f64>> = values.iter().copied().map(OrderedFloat).collect();
    keyed.sort();
    keyed.into_iter().map(|v| v.0).collect()
}

/// First and third quartiles by index split: `sorted[n/4]`, `sorted[3n/4]`.
pub fn quartiles(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let s = sorted(values);
    let n = s.len();
    Some((s[n / 4], s[(3 * n / 4).min(n - 1)]))
}

/// Tukey fences `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`, only for `n >= 3`.
pub fn tukey_fences(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < MIN_OUTLIER_SAMPLES {
        return None;
    }
    let (q1, q3) = quartiles(values)?;
    let iqr = q3 - q1;
    Some((q1 - TUKEY_K * iqr, q3 + TUKEY_K * iqr))
}

/// Indices of values outside the Tukey fences.
pub fn tukey_outliers(values: &[f64]) -> Vec<usize> {
    let Some((lower, upper)) = tukey_fences(values) else {
        return Vec::new();
    };
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| **v < lower || **v > upper)
        .map(|(i, _)| i)
        .collect()
}

/// Inverse of the standard normal CDF.
///
/// Acklam's rational approximation, relative error below 1.2e-9.
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Two-sided normal critical value for a confidence level (1.96 for 0.95).
pub fn z_critical(confidence: f64) -> f64 {
    if !(confidence > 0.0 && confidence < 1.0) {
        return FALLBACK_Z_95;
    }
    normal_quantile(1.0 - (1.0 - confidence) / 2.0)
}

/// Two-sided Student t critical value with `df` degrees of freedom.
///
/// Exact for `df` 1 and 2, Cornish-Fisher expansion above. `df == 0` falls
/// back to the normal value.
pub fn t_critical(df: usize, confidence: f64) -> f64 {
    if !(confidence > 0.0 && confidence < 1.0) || df == 0 {
        return z_critical(confidence);
    }
    let p = 1.0 - (1.0 - confidence) / 2.0;

    match df {
        1 => (std::f64::consts::PI * (p - 0.5)).tan(),
        2 => (2.0 * p - 1.0) / (2.0 * p * (1.0 - p)).sqrt(),
        _ => {
            let z = normal_quantile(p);
            let v = df as f64;
            let z3 = z.powi(3);
            let z5 = z.powi(5);
            let z7 = z.powi(7);
            let z9 = z.powi(9);
            z + (z3 + z) / (4.0 * v)
                + (5.0 * z5 + 16.0 * z3 + 3.0 * z) / (96.0 * v.powi(2))
                + (3.0 * z7 + 19.0 * z5 + 17.0 * z3 - 15.0 * z) / (384.0 * v.powi(3))
                + (79.0 * z9 + 776.0 * z7 + 1482.0 * z5 - 1920.0 * z3 - 945.0 * z)
                    / (92160.0 * v.powi(4))
        }
    }
}

/// Wilson score interval for `successes` out of `n` trials, clamped to `[0, 1]`.
///
/// Returns `[0, 0]` for `n == 0`.
pub fn wilson_interval(successes: usize, n: usize, confidence: f64) -> ConfidenceInterval {
    if n == 0 {
        return ConfidenceInterval {
            lower: 0.0,
            upper: 0.0,
            level: confidence,
        };
    }

    let z = z_critical(confidence);
    let n_f = n as f64;
    let p = successes as f64 / n_f;
    let z2 = z * z;
    let denom = 1.0 + z2 / n_f;
    let center = (p + z2 / (2.0 * n_f)) / denom;
    let margin = z * ((p * (1.0 - p) + z2 / (4.0 * n_f)) / n_f).sqrt() / denom;

    ConfidenceInterval {
        lower: (center - margin).clamp(0.0, 1.0),
        upper: (center + margin).clamp(0.0, 1.0),
        level: confidence,
    }
}

/// t-based confidence interval for the mean of a sample.
///
/// A single observation yields a zero-width interval at the value.
pub fn mean_interval(values: &[f64], confidence: f64) -> ConfidenceInterval {
    let m = mean(values);
    let n = values.len();
    if n <= 1 {
        return ConfidenceInterval {
            lower: m,
            upper: m,
            level: confidence,
        };
    }
    let margin = t_critical(n - 1, confidence) * sample_std(values) / (n as f64).sqrt();
    ConfidenceInterval {
        lower: m - margin,
        upper: m + margin,
        level: confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_mean_and_std() {
        let values = [10.0, 11.0, 12.0, 10.0, 11.0];
        assert!(approx(mean(&values), 10.8, 1e-12));
        assert!(approx(sample_std(&values), 0.836_660_026_534_075_6, 1e-12));

        assert_eq!(mean(&[]), 0.0);
        assert_eq!(sample_std(&[5.0]), 0.0);
    }

    #[test]
    fn test_coefficient_of_variation_guards_mean() {
        assert_eq!(coefficient_of_variation(0.0, 3.0), 0.0);
        assert_eq!(coefficient_of_variation(-1.0, 3.0), 0.0);
        assert!(approx(coefficient_of_variation(4.0, 1.0), 0.25, 1e-12));
    }

    #[test]
    fn test_quartiles_and_fences() {
        let values = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert_eq!(quartiles(&values), Some((2.0, 4.0)));
        assert_eq!(tukey_fences(&values), Some((-1.0, 7.0)));
        assert_eq!(tukey_outliers(&values), vec![4]);
    }

    #[test]
    fn test_tukey_requires_three_values() {
        assert!(tukey_fences(&[1.0, 100.0]).is_none());
        assert!(tukey_outliers(&[1.0, 100.0]).is_empty());
    }

    #[test]
    fn test_constant_series_has_no_outliers() {
        assert!(tukey_outliers(&[3.0, 3.0, 3.0, 3.0]).is_empty());
    }

    #[test]
    fn test_z_critical_values() {
        assert!(approx(z_critical(0.95), 1.959_964, 1e-5));
        assert!(approx(z_critical(0.99), 2.575_829, 1e-5));
        assert!(approx(z_critical(0.90), 1.644_854, 1e-5));
        assert_eq!(z_critical(1.5), 1.96);
        assert!(approx(normal_quantile(0.01), -2.326_348, 1e-5));
    }

    #[test]
    fn test_t_critical_values() {
        assert!(approx(t_critical(1, 0.95), 12.706, 1e-3));
        assert!(approx(t_critical(2, 0.95), 4.303, 1e-3));
        assert!(approx(t_critical(4, 0.95), 2.776, 0.02));
        assert!(approx(t_critical(10, 0.95), 2.228, 0.005));
        assert!(approx(t_critical(30, 0.99), 2.750, 0.005));
        assert!(t_critical(1000, 0.95) > z_critical(0.95));
    }

    #[test]
    fn test_wilson_interval() {
        let ci = wilson_interval(4, 5, 0.95);
        assert!(approx(ci.lower, 0.3755, 1e-3));
        assert!(approx(ci.upper, 0.9638, 1e-3));
        assert!(ci.contains(0.8));

        let all = wilson_interval(5, 5, 0.95);
        assert!(all.upper <= 1.0);
        assert!(all.lower > 0.5);

        let none = wilson_interval(0, 0, 0.95);
        assert_eq!((none.lower, none.upper), (0.0, 0.0));
    }

    #[test]
    fn test_mean_interval() {
        let ci = mean_interval(&[10.0, 11.0, 12.0, 10.0, 11.0], 0.95);
        assert!(ci.contains(10.8));
        assert!(approx(ci.width() / 2.0, 2.776 * 0.836_66 / 5f64.sqrt(), 0.02));

        let single = mean_interval(&[7.0], 0.95);
        assert_eq!((single.lower, single.upper), (7.0, 7.0));
    }
}
