//! Inter-run agreement diagnostics.
//!
//! Each run is treated as a rater giving a binary verdict on the same task.

use serde::{Deserialize, Serialize};

/// Agreement statistics over binary verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgreementMetrics {
    /// Number of verdicts considered.
    pub raters: usize,
    /// Fraction of passing verdicts.
    pub pass_rate: f64,
    /// Fraction of run pairs with the same verdict.
    pub pairwise_agreement: f64,
    /// Binary Fleiss' kappa, `(po - pe) / (1 - pe)`.
    pub fleiss_kappa: f64,
}

impl Default for AgreementMetrics {
    fn default() -> Self {
        Self {
            raters: 0,
            pass_rate: 0.0,
            pairwise_agreement: 1.0,
            fleiss_kappa: 1.0,
        }
    }
}

impl AgreementMetrics {
    /// Computes agreement over a set of verdicts.
    pub fn from_verdicts(verdicts: &[bool]) -> Self {
        if verdicts.is_empty() {
            return Self::default();
        }
        let passes = verdicts.iter().filter(|v| **v).count();
        Self {
            raters: verdicts.len(),
            pass_rate: passes as f64 / verdicts.len() as f64,
            pairwise_agreement: pairwise_agreement(verdicts),
            fleiss_kappa: fleiss_kappa(verdicts),
        }
    }
}

fn pairs(n: usize) -> f64 {
    (n * n.saturating_sub(1)) as f64 / 2.0
}

/// Fraction of pairs that agree. 1.0 with fewer than two verdicts.
pub fn pairwise_agreement(verdicts: &[bool]) -> f64 {
    let n = verdicts.len();
    if n < 2 {
        return 1.0;
    }
    let passes = verdicts.iter().filter(|v| **v).count();
    (pairs(passes) + pairs(n - passes)) / pairs(n)
}

/// Binary Fleiss' kappa with chance agreement `p^2 + (1 - p)^2`.
///
/// When chance agreement is 1 (every verdict identical) the statistic is
/// undefined and 1.0 is returned.
pub fn fleiss_kappa(verdicts: &[bool]) -> f64 {
    let n = verdicts.len();
    if n < 2 {
        return 1.0;
    }
    let p = verdicts.iter().filter(|v| **v).count() as f64 / n as f64;
    let po = pairwise_agreement(verdicts);
    let pe = p * p + (1.0 - p) * (1.0 - p);
    if (1.0 - pe).abs() < f64::EPSILON {
        return 1.0;
    }
    (po - pe) / (1.0 - pe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unanimous_verdicts() {
        let metrics = AgreementMetrics::from_verdicts(&[true, true, true]);
        assert_eq!(metrics.pairwise_agreement, 1.0);
        assert_eq!(metrics.fleiss_kappa, 1.0);
        assert_eq!(metrics.pass_rate, 1.0);
    }

    #[test]
    fn test_split_verdicts() {
        // 2 pass, 2 fail: 2 agreeing pairs out of 6.
        let verdicts = [true, true, false, false];
        assert!((pairwise_agreement(&verdicts) - 1.0 / 3.0).abs() < 1e-12);
        // pe = 0.5, kappa = (1/3 - 1/2) / (1/2)
        assert!((fleiss_kappa(&verdicts) + 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_mostly_agreeing() {
        let verdicts = [true, true, true, true, false];
        // 6 of 10 pairs agree.
        assert!((pairwise_agreement(&verdicts) - 0.6).abs() < 1e-12);
        let kappa = fleiss_kappa(&verdicts);
        assert!(kappa < 0.0 && kappa > -1.0);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(AgreementMetrics::from_verdicts(&[]).raters, 0);
        assert_eq!(pairwise_agreement(&[false]), 1.0);
        assert_eq!(fleiss_kappa(&[false]), 1.0);
    }
}
