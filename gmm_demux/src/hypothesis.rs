//! Pure versus phony tests for a cluster of droplets.
//!
//! A cluster found by transcriptome clustering is either a real cell type ("pure") or
//! a group of multiplets that merge two cell types ("phony"). The two kinds differ in how
//! many of their droplets are multi-sample multiplets. Each hypothesis is tested on its
//! own with a binomial model of the cluster's MSM count, and a conclusion is only drawn
//! when exactly one of them is rejected.

use crate::errors::{ConfigError, Result};
use crate::fit::ExperimentParams;
use serde::Serialize;
use statrs::distribution::{Binomial, DiscreteCDF};
use std::fmt;

/// Significance level of both tests.
pub const SIGNIFICANCE_LEVEL: f64 = 0.01;

/// Number of cell types merged in a phony cluster.
pub const PHONY_CELL_TYPE_NUM: u32 = 2;

/// A null hypothesis about the multiplet composition of a cluster.
pub trait NullModel {
    /// Expected fraction of the cluster's droplets that are multi-sample multiplets.
    fn msm_rate(&self) -> f64;
}

fn sample_shares(cell_nums: &[f64]) -> Vec<f64> {
    let total: f64 = cell_nums.iter().sum();
    if total <= 0.0 {
        return vec![0.0; cell_nums.len()];
    }
    cell_nums.iter().map(|c| c / total).collect()
}

/// Every droplet of a phony cluster holds `cell_type_num` cells of different types, and
/// it is an MSM whenever those cells come from at least two samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PhonyNull {
    /// Fitted cells per sample.
    pub cell_nums: Vec<f64>,
    /// Cells per phony droplet.
    pub cell_type_num: u32,
}

impl NullModel for PhonyNull {
    fn msm_rate(&self) -> f64 {
        let same_sample: f64 = sample_shares(&self.cell_nums)
            .iter()
            .map(|p| p.powi(self.cell_type_num as i32))
            .sum();
        (1.0 - same_sample).clamp(0.0, 1.0)
    }
}

/// A pure cluster's droplets hold one cell of the type; they become MSMs when a cell of
/// another sample lands in the same droplet. The clustering also leaks phony droplets
/// into the cluster at `ambiguous_rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct PureNull {
    /// Fitted number of droplets.
    pub drop_num: f64,
    /// Fitted cells per sample.
    pub cell_nums: Vec<f64>,
    /// Fraction of the cluster that is leaked phony droplets.
    pub ambiguous_rate: f64,
}

impl PureNull {
    /// MSM rate of the genuine droplets of the cluster, before leakage.
    pub fn background_msm_rate(&self) -> f64 {
        let loadings: Vec<f64> = self
            .cell_nums
            .iter()
            .map(|c| c / self.drop_num)
            .collect();
        let total_loading: f64 = loadings.iter().sum();
        sample_shares(&self.cell_nums)
            .iter()
            .zip(&loadings)
            .map(|(p, l)| p * -(-(total_loading - l).max(0.0)).exp_m1())
            .sum()
    }
}

impl NullModel for PureNull {
    fn msm_rate(&self) -> f64 {
        let phony = PhonyNull {
            cell_nums: self.cell_nums.clone(),
            cell_type_num: PHONY_CELL_TYPE_NUM,
        };
        let rate = (1.0 - self.ambiguous_rate) * self.background_msm_rate()
            + self.ambiguous_rate * phony.msm_rate();
        rate.clamp(0.0, 1.0)
    }
}

fn binomial_cdf(rate: f64, gem_num: u64, x: u64) -> f64 {
    let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
    match Binomial::new(rate, gem_num) {
        Ok(dist) => dist.cdf(x),
        // unreachable for a rate in [0, 1]
        Err(_) => f64::NAN,
    }
}

/// P(X <= msm_num) under the phony null. Few multiplets reject "phony".
pub fn test_phony_hypothesis(null: &impl NullModel, msm_num: u64, gem_num: u64) -> f64 {
    binomial_cdf(null.msm_rate(), gem_num, msm_num)
}

/// P(X >= msm_num) under the pure null. Many multiplets reject "pure".
pub fn test_pure_hypothesis(null: &impl NullModel, msm_num: u64, gem_num: u64) -> f64 {
    if msm_num == 0 {
        return 1.0;
    }
    (1.0 - binomial_cdf(null.msm_rate(), gem_num, msm_num - 1)).clamp(0.0, 1.0)
}

/// Conclusion about a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    /// Phony rejected, pure not rejected.
    Pure,
    /// Pure rejected, phony not rejected.
    Phony,
    /// Both or neither rejected.
    Unclear,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClusterType::Pure => "pure",
            ClusterType::Phony => "phony",
            ClusterType::Unclear => "unclear",
        })
    }
}

/// Decision table of the two tests at [`SIGNIFICANCE_LEVEL`].
pub fn classify_cluster(phony_p_value: f64, pure_p_value: f64) -> ClusterType {
    if phony_p_value < SIGNIFICANCE_LEVEL && pure_p_value > SIGNIFICANCE_LEVEL {
        ClusterType::Pure
    } else if pure_p_value < SIGNIFICANCE_LEVEL && phony_p_value > SIGNIFICANCE_LEVEL {
        ClusterType::Phony
    } else {
        ClusterType::Unclear
    }
}

/// Everything reported about a tested cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterVerdict {
    /// Number of droplets in the cluster.
    pub gem_num: u64,
    /// Number of them that are multi-sample multiplets.
    pub msm_num: u64,
    /// MSM rate expected under the phony null.
    pub phony_msm_rate: f64,
    /// MSM rate expected under the pure null.
    pub pure_msm_rate: f64,
    /// Observed MSM rate of the cluster.
    pub observed_msm_rate: f64,
    /// p-value of the phony test.
    pub phony_p_value: f64,
    /// p-value of the pure test.
    pub pure_p_value: f64,
    /// Conclusion.
    pub cluster_type: ClusterType,
    /// Share of all droplets that belong to the cluster.
    pub cluster_fraction: f64,
}

/// Run both tests on a cluster of `gem_num` droplets, `msm_num` of which are MSMs, out of
/// `total_droplets` droplets in the experiment.
pub fn examine_cluster(
    params: &ExperimentParams,
    ambiguous_rate: f64,
    msm_num: u64,
    gem_num: u64,
    total_droplets: u64,
) -> Result<ClusterVerdict> {
    if gem_num == 0 {
        return Err(ConfigError::EmptyCluster.into());
    }
    debug_assert!(msm_num <= gem_num);
    let phony = PhonyNull {
        cell_nums: params.cell_nums.clone(),
        cell_type_num: PHONY_CELL_TYPE_NUM,
    };
    let pure = PureNull {
        drop_num: params.drop_num,
        cell_nums: params.cell_nums.clone(),
        ambiguous_rate,
    };
    let phony_p_value = test_phony_hypothesis(&phony, msm_num, gem_num);
    let pure_p_value = test_pure_hypothesis(&pure, msm_num, gem_num);
    Ok(ClusterVerdict {
        gem_num,
        msm_num,
        phony_msm_rate: phony.msm_rate(),
        pure_msm_rate: pure.msm_rate(),
        observed_msm_rate: msm_num as f64 / gem_num as f64,
        phony_p_value,
        pure_p_value,
        cluster_type: classify_cluster(phony_p_value, pure_p_value),
        cluster_fraction: gem_num as f64 / total_droplets.max(gem_num) as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fitted() -> ExperimentParams {
        // two-sample fit of 450/440/60 singlet/singlet/doublet droplets with 2000 cells
        ExperimentParams {
            drop_num: 7905.25,
            capture_rate: 0.5376,
            cell_nums: vec![1010.55, 989.45],
        }
    }

    #[test]
    fn phony_rate_of_balanced_samples() {
        let null = PhonyNull {
            cell_nums: vec![1000.0, 1000.0],
            cell_type_num: 2,
        };
        assert!((null.msm_rate() - 0.5).abs() < 1e-12);
        let four = PhonyNull {
            cell_nums: vec![1.0; 4],
            cell_type_num: 2,
        };
        assert!((four.msm_rate() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn pure_rate_mixes_in_leakage() {
        let params = fitted();
        let pure = PureNull {
            drop_num: params.drop_num,
            cell_nums: params.cell_nums.clone(),
            ambiguous_rate: 0.05,
        };
        let background = pure.background_msm_rate();
        assert!(background > 0.1 && background < 0.13, "{background}");
        let expected = 0.95 * background + 0.05 * 0.5;
        assert!((pure.msm_rate() - expected).abs() < 1e-3);
    }

    #[test]
    fn no_multiplets_is_pure() {
        let verdict = examine_cluster(&fitted(), 0.05, 0, 50, 1000).unwrap();
        assert!(verdict.phony_p_value < SIGNIFICANCE_LEVEL);
        assert!(verdict.pure_p_value > SIGNIFICANCE_LEVEL);
        assert_eq!(verdict.cluster_type, ClusterType::Pure);
        assert_eq!(verdict.cluster_fraction, 0.05);

        let verdict = examine_cluster(&fitted(), 0.05, 0, 100, 1000).unwrap();
        assert_eq!(verdict.cluster_type, ClusterType::Pure);
    }

    #[test]
    fn many_multiplets_is_phony() {
        let verdict = examine_cluster(&fitted(), 0.05, 50, 100, 1000).unwrap();
        assert!(verdict.pure_p_value < SIGNIFICANCE_LEVEL);
        assert!(verdict.phony_p_value > SIGNIFICANCE_LEVEL);
        assert_eq!(verdict.cluster_type, ClusterType::Phony);
        assert_eq!(verdict.observed_msm_rate, 0.5);
    }

    #[test]
    fn small_clusters_are_unclear() {
        let verdict = examine_cluster(&fitted(), 0.05, 1, 3, 1000).unwrap();
        assert_eq!(verdict.cluster_type, ClusterType::Unclear);
    }

    #[test]
    fn decision_table() {
        assert_eq!(classify_cluster(0.001, 0.5), ClusterType::Pure);
        assert_eq!(classify_cluster(0.5, 0.001), ClusterType::Phony);
        assert_eq!(classify_cluster(0.001, 0.001), ClusterType::Unclear);
        assert_eq!(classify_cluster(0.5, 0.5), ClusterType::Unclear);
        assert_eq!(classify_cluster(0.01, 0.5), ClusterType::Unclear);
    }

    #[test]
    fn empty_cluster() {
        assert!(examine_cluster(&fitted(), 0.05, 0, 0, 1000).is_err());
    }
}
