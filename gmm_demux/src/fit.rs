//! Fitting the droplet-formation model to observed signature counts.
//!
//! Cells of sample i land in droplets as a Poisson process with mean
//! `λ_i = cell_num[i] / drop_num`, and a fraction `capture_rate` of the generated
//! droplets is recovered. The expected number of droplets carrying exactly the samples
//! of signature S is
//!
//! ```text
//! drop_num * capture_rate * Π_{i in S} (1 - e^{-λ_i}) * Π_{j not in S} e^{-λ_j}
//! ```
//!
//! Only `drop_num * capture_rate` and the `λ_i` are identifiable from the counts, so the
//! cell counts are tied to the user's estimate of the total number of cells. The fit
//! folds in signatures of increasing size one stage at a time, each stage seeded with
//! the previous stage's answer.

use crate::config::FitConfig;
use crate::errors::{ConfigError, DemuxError, FitFailure, Result};
use crate::nelder_mead::NelderMead;
use crate::purify::DropletCounts;
use crate::signature::SignatureSpace;
use log::{debug, info};
use serde::Serialize;

// Floor on the per-droplet loading of a sample, keeps the log parametrisation finite
const MIN_LOADING: f64 = 1e-12;
// Initial simplex edge in log space
const INITIAL_STEP: f64 = 0.1;

/// Parameters of the droplet-formation process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentParams {
    /// Expected number of droplets generated.
    pub drop_num: f64,
    /// Fraction of generated droplets that are recovered.
    pub capture_rate: f64,
    /// Expected number of cells loaded per sample.
    pub cell_nums: Vec<f64>,
}

impl ExperimentParams {
    /// Seed for the first stage: default droplet count and capture rate, and the total
    /// cell count split across samples in proportion to their singlet counts.
    pub fn initial_guess(
        counts: &DropletCounts,
        total_cells: u64,
        config: &FitConfig,
    ) -> Result<Self> {
        if total_cells == 0 {
            return Err(ConfigError::NoCells.into());
        }
        let singlet_total = counts.singlet_total();
        if singlet_total == 0 {
            return Err(DemuxError::ModelNonConvergence {
                stage: 1,
                reason: FitFailure::NoSinglets,
            });
        }
        let cell_nums = counts
            .singlets()
            .iter()
            .map(|&n| (n as f64 * total_cells as f64 / singlet_total as f64).round())
            .collect();
        Ok(ExperimentParams {
            drop_num: config.initial_drop_num,
            capture_rate: config.initial_capture_rate,
            cell_nums,
        })
    }

    fn violation(&self) -> Option<String> {
        if !(self.drop_num.is_finite() && self.drop_num > 0.0) {
            Some(format!("drop_num must be positive, got {}", self.drop_num))
        } else if !(self.capture_rate > 0.0 && self.capture_rate <= 1.0) {
            Some(format!(
                "capture_rate must be in (0, 1], got {}",
                self.capture_rate
            ))
        } else if let Some(c) = self
            .cell_nums
            .iter()
            .find(|c| !(c.is_finite() && **c >= 0.0))
        {
            Some(format!("cell numbers must be non-negative, got {c}"))
        } else if self.total_cells() <= 0.0 {
            Some("at least one sample must have cells".to_string())
        } else {
            None
        }
    }

    /// Check drop_num > 0, 0 < capture_rate <= 1 and cell_num >= 0.
    pub fn validate(&self) -> Result<()> {
        match self.violation() {
            Some(msg) => Err(ConfigError::InvalidInitialGuess(msg).into()),
            None => Ok(()),
        }
    }

    /// Sum of the per-sample cell numbers.
    pub fn total_cells(&self) -> f64 {
        self.cell_nums.iter().sum()
    }

    /// Cell numbers rounded to whole cells.
    pub fn rounded_cell_nums(&self) -> Vec<u64> {
        self.cell_nums.iter().map(|c| c.round() as u64).collect()
    }

    /// Mean number of cells of each sample per droplet.
    pub fn loading_rates(&self) -> Vec<f64> {
        self.cell_nums.iter().map(|c| c / self.drop_num).collect()
    }
}

/// Expected droplet count of every signature with at most `max_size` samples.
pub fn expected_counts(
    space: &SignatureSpace,
    params: &ExperimentParams,
    max_size: usize,
) -> Vec<f64> {
    predict(
        space,
        params.drop_num * params.capture_rate,
        &params.loading_rates(),
        space.prefix_len(max_size),
    )
}

fn predict(space: &SignatureSpace, recovered: f64, loadings: &[f64], len: usize) -> Vec<f64> {
    let empty: Vec<f64> = loadings.iter().map(|l| (-l).exp()).collect();
    let occupied: Vec<f64> = loadings.iter().map(|l| -(-l).exp_m1()).collect();
    space.signatures()[..len]
        .iter()
        .map(|sig| {
            (0..space.num_samples()).fold(recovered, |acc, i| {
                acc * if sig.contains(i) {
                    occupied[i]
                } else {
                    empty[i]
                }
            })
        })
        .collect()
}

/// Outcome of one incremental stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageFit {
    /// The stage converged to physically valid parameters.
    Converged(ExperimentParams),
    /// The stage failed; the whole fit is abandoned.
    Failed(FitFailure),
}

// Solver coordinates: [ln(drop_num * capture_rate), ln λ_0, ..., ln λ_{N-1}]
struct LoadingModel<'a> {
    space: &'a SignatureSpace,
    observed: &'a [u64],
    total_cells: f64,
}

impl LoadingModel<'_> {
    fn encode(&self, params: &ExperimentParams) -> Vec<f64> {
        std::iter::once((params.drop_num * params.capture_rate).ln())
            .chain(
                params
                    .loading_rates()
                    .into_iter()
                    .map(|l| l.max(MIN_LOADING).ln()),
            )
            .collect()
    }

    fn decode(&self, x: &[f64]) -> ExperimentParams {
        let recovered = x[0].exp();
        let loadings: Vec<f64> = x[1..].iter().map(|v| v.exp()).collect();
        let drop_num = self.total_cells / loadings.iter().sum::<f64>();
        ExperimentParams {
            drop_num,
            capture_rate: recovered / drop_num,
            cell_nums: loadings.iter().map(|l| l * drop_num).collect(),
        }
    }

    // Squared residuals scaled by the observed count
    fn objective(&self, x: &[f64]) -> f64 {
        let loadings: Vec<f64> = x[1..].iter().map(|v| v.exp()).collect();
        predict(self.space, x[0].exp(), &loadings, self.observed.len())
            .iter()
            .zip(self.observed)
            .map(|(e, &o)| {
                let o = o as f64;
                (o - e).powi(2) / o.max(1.0)
            })
            .sum()
    }
}

/// Fit the model on all signatures with at most `max_size` samples, starting from `seed`.
pub fn fit_stage(
    space: &SignatureSpace,
    counts: &DropletCounts,
    max_size: usize,
    total_cells: u64,
    seed: &ExperimentParams,
    config: &FitConfig,
) -> StageFit {
    let model = LoadingModel {
        space,
        observed: &counts.by_signature()[..space.prefix_len(max_size)],
        total_cells: total_cells as f64,
    };
    let solver = NelderMead {
        max_iterations: config.max_iterations,
        tolerance: config.tolerance,
        max_restarts: config.max_restarts,
        initial_step: INITIAL_STEP,
    };
    let min = solver.minimize(|x| model.objective(x), &model.encode(seed));
    debug!(
        "stage {max_size}: objective {:.4e} after {} iterations",
        min.value, min.iterations
    );
    if !min.value.is_finite() || min.x.iter().any(|v| !v.is_finite()) {
        return StageFit::Failed(FitFailure::NonFinite);
    }
    if !min.converged {
        return StageFit::Failed(FitFailure::IterationLimit {
            iterations: min.iterations,
        });
    }
    let params = model.decode(&min.x);
    match params.violation() {
        None => StageFit::Converged(params),
        Some(_) if !(params.drop_num.is_finite() && params.capture_rate.is_finite()) => {
            StageFit::Failed(FitFailure::NonFinite)
        }
        Some(_) => StageFit::Failed(FitFailure::NonPhysical {
            drop_num: params.drop_num,
            capture_rate: params.capture_rate,
        }),
    }
}

/// Fit the model stage by stage, k = 1..N, starting from `seed`.
///
/// The first failing stage aborts the fit; no partial parameters are returned.
pub fn fit_from(
    space: &SignatureSpace,
    counts: &DropletCounts,
    total_cells: u64,
    seed: &ExperimentParams,
    config: &FitConfig,
) -> Result<ExperimentParams> {
    if total_cells == 0 {
        return Err(ConfigError::NoCells.into());
    }
    if seed.cell_nums.len() != space.num_samples() {
        return Err(ConfigError::InvalidInitialGuess(format!(
            "{} cell numbers for {} samples",
            seed.cell_nums.len(),
            space.num_samples()
        ))
        .into());
    }
    seed.validate()?;
    config.validate()?;

    let mut params = seed.clone();
    for max_size in 1..=space.num_samples() {
        info!(
            "Fitting the droplet formation model on {} signatures of up to {max_size} samples",
            space.prefix_len(max_size)
        );
        params = match fit_stage(space, counts, max_size, total_cells, &params, config) {
            StageFit::Converged(p) => p,
            StageFit::Failed(reason) => {
                return Err(DemuxError::ModelNonConvergence {
                    stage: max_size,
                    reason,
                })
            }
        };
    }
    info!(
        "Fitted {:.0} droplets with capture rate {:.4}",
        params.drop_num, params.capture_rate
    );
    Ok(params)
}

/// Fit the model from the default initial guess.
pub fn fit_experiment_params(
    space: &SignatureSpace,
    counts: &DropletCounts,
    total_cells: u64,
    config: &FitConfig,
) -> Result<ExperimentParams> {
    let seed = ExperimentParams::initial_guess(counts, total_cells, config)?;
    fit_from(space, counts, total_cells, &seed, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::purify::BadDropletCounts;

    macro_rules! assert_rel {
        ($x:expr, $y:expr, $d:expr) => {
            assert!(
                (($x - $y) / $y).abs() < $d,
                "{} differs from {} by more than {}",
                $x,
                $y,
                $d
            );
        };
    }

    fn two_sample_counts() -> (SignatureSpace, DropletCounts) {
        let space = SignatureSpace::enumerate(2).unwrap();
        let counts = DropletCounts::new(
            &space,
            vec![450, 440, 60],
            BadDropletCounts {
                negative: 50,
                unclear: 0,
            },
        );
        (space, counts)
    }

    #[test]
    fn two_sample_fit() {
        let (space, counts) = two_sample_counts();
        let params =
            fit_experiment_params(&space, &counts, 2000, &FitConfig::default()).unwrap();
        assert!(params.drop_num > counts.total() as f64);
        assert!(params.capture_rate < 1.0);
        // closed form: e^{-λ_A} = 440/500, e^{-λ_B} = 450/510, recovered droplets = 4250
        let lambda_a = -(440.0f64 / 500.0).ln();
        let lambda_b = -(450.0f64 / 510.0).ln();
        let drop_num = 2000.0 / (lambda_a + lambda_b);
        assert_rel!(params.drop_num, drop_num, 1e-3);
        assert_rel!(params.capture_rate, 4250.0 / drop_num, 1e-3);
        assert_rel!(params.total_cells(), 2000.0, 1e-9);
        for (e, o) in expected_counts(&space, &params, 2)
            .iter()
            .zip(counts.by_signature())
        {
            assert!((e - *o as f64).abs() < 0.5);
        }
    }

    #[test]
    fn refit_from_converged_parameters() {
        let (space, counts) = two_sample_counts();
        let config = FitConfig::default();
        let first = fit_experiment_params(&space, &counts, 2000, &config).unwrap();
        let second = fit_from(&space, &counts, 2000, &first, &config).unwrap();
        assert_rel!(second.drop_num, first.drop_num, 1e-4);
        assert_rel!(second.capture_rate, first.capture_rate, 1e-4);
        for (a, b) in second.cell_nums.iter().zip(&first.cell_nums) {
            assert_rel!(a, b, 1e-4);
        }
    }

    #[test]
    fn three_sample_recovery() {
        let space = SignatureSpace::enumerate(3).unwrap();
        let truth = ExperimentParams {
            drop_num: 50_000.0,
            capture_rate: 0.6,
            cell_nums: vec![3000.0, 5000.0, 4000.0],
        };
        let observed = expected_counts(&space, &truth, 3)
            .iter()
            .map(|e| e.round() as u64)
            .collect();
        let counts = DropletCounts::new(&space, observed, BadDropletCounts::default());
        let params =
            fit_experiment_params(&space, &counts, 12_000, &FitConfig::default()).unwrap();
        assert_rel!(params.drop_num, truth.drop_num, 0.05);
        assert_rel!(params.capture_rate, truth.capture_rate, 0.05);
        for (a, b) in params.cell_nums.iter().zip(&truth.cell_nums) {
            assert_rel!(a, b, 0.05);
        }
    }

    #[test]
    fn too_few_cells_is_not_physical() {
        // the counts need ~1075 captured cells, so 1000 loaded cells forces capture_rate > 1
        let (space, counts) = two_sample_counts();
        let err = fit_experiment_params(&space, &counts, 1000, &FitConfig::default())
            .unwrap_err();
        assert!(matches!(err, DemuxError::ModelNonConvergence { .. }), "{err}");
    }

    #[test]
    fn invalid_seed_is_rejected() {
        let (space, counts) = two_sample_counts();
        let seed = ExperimentParams {
            drop_num: -80_000.0,
            capture_rate: 0.5,
            cell_nums: vec![1000.0, 1000.0],
        };
        let err = fit_from(&space, &counts, 2000, &seed, &FitConfig::default()).unwrap_err();
        assert!(matches!(err, DemuxError::InvalidConfiguration(_)));
        let err = fit_experiment_params(&space, &counts, 0, &FitConfig::default()).unwrap_err();
        assert_eq!(err, DemuxError::InvalidConfiguration(ConfigError::NoCells));
    }

    #[test]
    fn no_singlets() {
        let space = SignatureSpace::enumerate(2).unwrap();
        let counts = DropletCounts::new(&space, vec![0, 0, 10], BadDropletCounts::default());
        let err = fit_experiment_params(&space, &counts, 100, &FitConfig::default()).unwrap_err();
        assert_eq!(
            err,
            DemuxError::ModelNonConvergence {
                stage: 1,
                reason: FitFailure::NoSinglets
            }
        );
    }

    #[test]
    fn iteration_limit_is_a_failure() {
        let (space, counts) = two_sample_counts();
        let config = FitConfig {
            max_iterations: 3,
            ..Default::default()
        };
        let err = fit_experiment_params(&space, &counts, 2000, &config).unwrap_err();
        assert!(matches!(
            err,
            DemuxError::ModelNonConvergence {
                stage: 1,
                reason: FitFailure::IterationLimit { .. }
            }
        ));
    }
}
