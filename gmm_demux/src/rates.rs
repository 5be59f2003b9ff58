//! Multiplet rate estimates derived from the fitted loading model.

use crate::purify::DropletCounts;
use serde::Serialize;

/// Fraction of droplets holding sample cells that hold two or more of them.
///
/// With `λ = cell_num / drop_num` the number of sample cells per droplet is
/// Poisson(λ), and the rate is `P(k >= 2) / P(k >= 1) = 1 - λ e^{-λ} / (1 - e^{-λ})`.
/// A sample with no cells has no same-sample multiplets.
pub fn ssm_rate(cell_num: f64, drop_num: f64) -> f64 {
    let lambda = cell_num / drop_num;
    if !(lambda.is_finite() && lambda > 0.0) {
        return 0.0;
    }
    let occupied = -(-lambda).exp_m1();
    (1.0 - lambda * (-lambda).exp() / occupied).clamp(0.0, 1.0)
}

/// Same-sample multiplets relative to singlet-signature droplets.
///
/// Returns `None`, the undefined rate, when there are no singlet droplets.
pub fn relative_ssm_rate(ssm_rate: f64, singlet_rate: f64) -> Option<f64> {
    (singlet_rate > 0.0).then(|| (ssm_rate / singlet_rate).clamp(0.0, 1.0))
}

/// Population-level multiplet rates. Each is a fraction of all droplets, negative and
/// unclear droplets included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MultipletRates {
    /// Multi-sample multiplets: droplets with two or more samples high.
    pub msm_rate: f64,
    /// Estimated same-sample multiplets hidden among the singlet signatures.
    pub ssm_rate: f64,
    /// Droplets with exactly one sample high.
    pub singlet_rate: f64,
}

/// Combine observed counts with per-sample SSM rates.
pub fn gather_multiplet_rates(counts: &DropletCounts, ssm_rates: &[f64]) -> MultipletRates {
    assert_eq!(counts.singlets().len(), ssm_rates.len());
    let total = counts.total();
    if total == 0 {
        return MultipletRates {
            msm_rate: 0.0,
            ssm_rate: 0.0,
            singlet_rate: 0.0,
        };
    }
    let total = total as f64;
    let ssm: f64 = counts
        .singlets()
        .iter()
        .zip(ssm_rates)
        .map(|(&n, rate)| n as f64 * rate)
        .sum();
    MultipletRates {
        msm_rate: counts.multiplet_total() as f64 / total,
        ssm_rate: ssm / total,
        singlet_rate: counts.singlet_total() as f64 / total,
    }
}
