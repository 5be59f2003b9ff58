//! End-to-end driver: classification, purification, model fit, rates and cluster tests.
//!
//! The run is split in two so that classification outputs survive a failed fit:
//! [`Demultiplexer::classify`] never touches the loading model, and
//! [`Classified::estimate`] is where `ModelNonConvergence` can surface.

use crate::classify::{classify_droplets, ClassificationTable};
use crate::config::DemuxConfig;
use crate::errors::{ConfigError, Result};
use crate::fit::{fit_experiment_params, ExperimentParams};
use crate::hypothesis::{examine_cluster, ClusterVerdict};
use crate::purify::{count_by_signature, purify, DropletCounts, PurifiedTable};
use crate::rates::{gather_multiplet_rates, relative_ssm_rate, ssm_rate, MultipletRates};
use crate::signature::SignatureSpace;
use log::info;
use ndarray::Array2;
use serde::Serialize;

/// Droplet calls handed over by the GMM stage.
#[derive(Debug, Clone)]
pub struct DemuxInput {
    /// Sample names, in column order.
    pub sample_names: Vec<String>,
    /// Droplet barcodes, in row order.
    pub barcodes: Vec<String>,
    /// Per-droplet, per-sample posterior probability of the high component.
    pub high_probs: Array2<f64>,
}

/// Runs the engine with a validated configuration.
#[derive(Debug, Clone)]
pub struct Demultiplexer {
    config: DemuxConfig,
}

impl Demultiplexer {
    /// Validate `config` once; every later step trusts it.
    pub fn new(config: DemuxConfig) -> Result<Self> {
        config.validate()?;
        Ok(Demultiplexer { config })
    }

    /// The configuration of this run.
    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    /// Classify and purify every droplet of `input`.
    pub fn classify(&self, input: DemuxInput) -> Result<Classified> {
        let num_samples = input.high_probs.ncols();
        if input.sample_names.len() != num_samples {
            return Err(ConfigError::SampleNameMismatch {
                expected: num_samples,
                found: input.sample_names.len(),
            }
            .into());
        }
        let space = SignatureSpace::enumerate(num_samples)?;
        let table = classify_droplets(&space, &input.barcodes, input.high_probs.view())?;
        let purified = purify(&table, self.config.confidence_threshold)?;
        let counts = count_by_signature(&space, &purified);
        info!(
            "Classified {} droplets: {} singlet, {} MSM, {} negative, {} unclear",
            counts.total(),
            counts.singlet_total(),
            counts.multiplet_total(),
            counts.bad.negative,
            counts.bad.unclear
        );
        Ok(Classified {
            config: self.config.clone(),
            sample_names: input.sample_names,
            space,
            table,
            purified,
            counts,
        })
    }
}

/// Classification outputs of a run.
#[derive(Debug, Clone)]
pub struct Classified {
    config: DemuxConfig,
    /// Sample names, in signature order.
    pub sample_names: Vec<String>,
    /// All signatures over the samples.
    pub space: SignatureSpace,
    /// The full classification table.
    pub table: ClassificationTable,
    /// The table after purification.
    pub purified: PurifiedTable,
    /// Per-signature, negative and unclear counts of the purified table.
    pub counts: DropletCounts,
}

/// Population summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    /// Fitted number of generated droplets.
    pub drop_num: f64,
    /// Fitted capture rate.
    pub capture_rate: f64,
    /// Fitted total number of cells.
    pub cell_num: f64,
    /// Number of droplets classified.
    pub droplet_num: u64,
    /// Singlet-signature droplets, as a fraction of all droplets.
    pub singlet_rate: f64,
    /// Multi-sample multiplets, as a fraction of all droplets.
    pub msm_rate: f64,
    /// Estimated same-sample multiplets, as a fraction of all droplets.
    pub ssm_rate: f64,
    /// Same-sample multiplets relative to singlets; `None` when undefined.
    pub rssm_rate: Option<f64>,
    /// Droplets with no high tag.
    pub negative_num: u64,
    /// Tagged droplets below the confidence threshold.
    pub unclear_num: u64,
}

/// Per-sample summary of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleReport {
    /// Sample name.
    pub sample: String,
    /// Fitted number of cells.
    pub cell_num: f64,
    /// Same-sample droplets assigned to the sample.
    pub ssd_num: u64,
    /// Estimated fraction of the sample's droplets that are same-sample multiplets.
    pub ssm_rate: f64,
}

/// Estimation outputs of a run, available only when the loading model converged.
#[derive(Debug, Clone)]
pub struct Estimate<'a> {
    classified: &'a Classified,
    /// Fitted loading-model parameters.
    pub params: ExperimentParams,
    /// SSM rate of each sample.
    pub ssm_rates: Vec<f64>,
    /// Population multiplet rates.
    pub rates: MultipletRates,
    /// Population summary.
    pub summary: SummaryReport,
    /// Per-sample summaries, in sample order.
    pub samples: Vec<SampleReport>,
}

impl Classified {
    /// Fit the loading model, seeded with an estimate of the total number of cells, and
    /// derive the multiplet rates.
    pub fn estimate(&self, total_cells: u64) -> Result<Estimate<'_>> {
        let params =
            fit_experiment_params(&self.space, &self.counts, total_cells, &self.config.fit)?;
        let ssm_rates: Vec<f64> = params
            .cell_nums
            .iter()
            .map(|&c| ssm_rate(c, params.drop_num))
            .collect();
        let rates = gather_multiplet_rates(&self.counts, &ssm_rates);
        let rssm_rate = relative_ssm_rate(rates.ssm_rate, rates.singlet_rate);
        if rssm_rate.is_none() {
            info!("No singlet droplets; the relative SSM rate is undefined");
        }

        let summary = SummaryReport {
            drop_num: params.drop_num,
            capture_rate: params.capture_rate,
            cell_num: params.total_cells(),
            droplet_num: self.counts.total(),
            singlet_rate: rates.singlet_rate,
            msm_rate: rates.msm_rate,
            ssm_rate: rates.ssm_rate,
            rssm_rate,
            negative_num: self.counts.bad.negative,
            unclear_num: self.counts.bad.unclear,
        };
        let samples = self
            .sample_names
            .iter()
            .zip(&params.cell_nums)
            .zip(self.purified.ssd_counts(self.space.num_samples()))
            .zip(&ssm_rates)
            .map(|(((name, &cell_num), ssd_num), &ssm_rate)| SampleReport {
                sample: name.clone(),
                cell_num,
                ssd_num,
                ssm_rate,
            })
            .collect();

        Ok(Estimate {
            classified: self,
            params,
            ssm_rates,
            rates,
            summary,
            samples,
        })
    }
}

impl Estimate<'_> {
    /// Test whether the droplets listed in `barcodes` form a pure or a phony cluster.
    ///
    /// Barcodes missing from the classification table are ignored with a warning.
    pub fn examine_cluster<S: AsRef<str>>(&self, barcodes: &[S]) -> Result<ClusterVerdict> {
        let cluster = self.classified.purified.cluster_counts(barcodes);
        let verdict = examine_cluster(
            &self.params,
            self.classified.config.ambiguous_rate,
            cluster.msm_num,
            cluster.gem_num,
            self.classified.counts.total(),
        )?;
        info!(
            "Cluster of {} droplets ({} MSM) is {}",
            verdict.gem_num, verdict.msm_num, verdict.cluster_type
        );
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DemuxError;
    use crate::hypothesis::ClusterType;

    // 450 A, 440 B, 60 A+B and 50 negative droplets, all called decisively
    fn two_sample_input() -> DemuxInput {
        let groups = [
            (450, [0.99, 0.01]),
            (440, [0.01, 0.99]),
            (60, [0.99, 0.99]),
            (50, [0.01, 0.01]),
        ];
        let rows: Vec<[f64; 2]> = groups
            .iter()
            .flat_map(|(n, probs)| std::iter::repeat(*probs).take(*n))
            .collect();
        let high_probs = Array2::from_shape_fn((rows.len(), 2), |(i, j)| rows[i][j]);
        DemuxInput {
            sample_names: vec!["A".to_string(), "B".to_string()],
            barcodes: (0..rows.len()).map(|i| format!("bc{i}")).collect(),
            high_probs,
        }
    }

    fn classified() -> Classified {
        Demultiplexer::new(DemuxConfig::default())
            .unwrap()
            .classify(two_sample_input())
            .unwrap()
    }

    #[test]
    fn two_sample_scenario() {
        let classified = classified();
        assert_eq!(classified.counts.by_signature(), &[450, 440, 60]);
        assert_eq!(classified.counts.bad.negative, 50);
        assert_eq!(classified.counts.bad.unclear, 0);

        let estimate = classified.estimate(2000).unwrap();
        let summary = &estimate.summary;
        assert!((summary.singlet_rate - 0.89).abs() < 1e-12);
        assert!((summary.msm_rate - 0.06).abs() < 1e-12);
        assert!(summary.drop_num > 1000.0);
        assert!(summary.capture_rate < 1.0);
        assert_eq!(summary.droplet_num, 1000);
        assert!(summary.rssm_rate.is_some());

        assert_eq!(estimate.samples.len(), 2);
        assert_eq!(estimate.samples[0].sample, "A");
        assert_eq!(estimate.samples[0].ssd_num, 450);
        assert_eq!(estimate.samples[1].ssd_num, 440);
        for sample in &estimate.samples {
            assert!((0.0..=1.0).contains(&sample.ssm_rate));
        }
    }

    #[test]
    fn cluster_verdicts() {
        let classified = classified();
        let estimate = classified.estimate(2000).unwrap();

        let singlets: Vec<String> = (0..50).map(|i| format!("bc{i}")).collect();
        let verdict = estimate.examine_cluster(&singlets).unwrap();
        assert_eq!(verdict.gem_num, 50);
        assert_eq!(verdict.msm_num, 0);
        assert_eq!(verdict.cluster_type, ClusterType::Pure);

        // 30 singlets of A followed by 30 multiplets
        let mixed: Vec<String> = (0..30).chain(890..920).map(|i| format!("bc{i}")).collect();
        let verdict = estimate.examine_cluster(&mixed).unwrap();
        assert_eq!(verdict.msm_num, 30);
        assert_eq!(verdict.cluster_type, ClusterType::Phony);

        let unknown = ["nope"];
        assert!(matches!(
            estimate.examine_cluster(&unknown),
            Err(DemuxError::InvalidConfiguration(ConfigError::EmptyCluster))
        ));
    }

    #[test]
    fn failed_fit_keeps_classification() {
        let classified = classified();
        match classified.estimate(1000) {
            Err(DemuxError::ModelNonConvergence { .. }) => {}
            other => panic!("expected non-convergence, got {other:?}"),
        }
        assert_eq!(classified.purified.same_sample_droplets().len(), 890);
    }

    #[test]
    fn mismatched_sample_names() {
        let mut input = two_sample_input();
        input.sample_names.push("C".to_string());
        let err = Demultiplexer::new(DemuxConfig::default())
            .unwrap()
            .classify(input)
            .unwrap_err();
        assert_eq!(
            err,
            DemuxError::InvalidConfiguration(ConfigError::SampleNameMismatch {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn invalid_threshold_rejected_up_front() {
        let config = DemuxConfig {
            confidence_threshold: 0.0,
            ..Default::default()
        };
        assert!(Demultiplexer::new(config).is_err());
    }
}
