//! Error types returned by the demultiplexing engine.

/// Problems with the inputs or settings, detected before any computation starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The number of HTO samples is outside the supported range.
    #[error("the number of samples must be between 1 and {max}, but {num_samples} were provided")]
    InvalidSampleCount {
        /// Number of samples requested.
        num_samples: usize,
        /// Largest supported number of samples.
        max: usize,
    },

    /// A rate or threshold parameter is outside the open interval (0, 1).
    #[error("{name} must be a number in (0, 1), but {value} was provided")]
    OutOfUnitInterval {
        /// Name of the offending parameter.
        name: &'static str,
        /// The provided value.
        value: f64,
    },

    /// The droplet call matrix does not agree with the barcodes or samples.
    #[error("the call matrix has {found} {what}, expected {expected}")]
    ShapeMismatch {
        /// Which dimension disagrees ("rows" or "columns").
        what: &'static str,
        /// The expected size.
        expected: usize,
        /// The size found in the input.
        found: usize,
    },

    /// A per-tag high probability is not a finite number in [0, 1].
    #[error("droplet {row}, tag {column} has an invalid high probability {value}")]
    InvalidProbability {
        /// Droplet index.
        row: usize,
        /// Tag index.
        column: usize,
        /// The offending value.
        value: f64,
    },

    /// The number of sample names does not match the number of samples.
    #[error("{found} sample names were provided for {expected} samples")]
    SampleNameMismatch {
        /// Number of samples.
        expected: usize,
        /// Number of names.
        found: usize,
    },

    /// The estimated total cell count used to seed the fitter is zero.
    #[error("the estimated total number of cells must be positive")]
    NoCells,

    /// A seed for the loading-model fit violates the model invariants.
    #[error("invalid initial parameters: {0}")]
    InvalidInitialGuess(String),

    /// A fitter setting is unusable.
    #[error("invalid fitter setting: {0}")]
    InvalidFitSetting(String),

    /// A cluster handed to the hypothesis tester contains no known droplets.
    #[error("the cluster contains no droplets present in the classification table")]
    EmptyCluster,
}

/// Why one stage of the droplet-loading fit was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitFailure {
    /// No droplet was purified into a singlet signature, so there is nothing to seed from.
    #[error("no singlet droplets are available to seed the loading model")]
    NoSinglets,

    /// The simplex did not contract within the iteration budget.
    #[error("the solver did not converge within {iterations} iterations")]
    IterationLimit {
        /// Iterations spent.
        iterations: usize,
    },

    /// The objective or the parameters became NaN or infinite.
    #[error("the solver produced non-finite values")]
    NonFinite,

    /// The best solution violates drop_num > 0, 0 < capture_rate <= 1 or cell_num >= 0.
    #[error(
        "the best solution is not physically valid (drop_num = {drop_num:.1}, \
         capture_rate = {capture_rate:.4})"
    )]
    NonPhysical {
        /// Fitted number of droplets.
        drop_num: f64,
        /// Fitted capture rate.
        capture_rate: f64,
    },
}

/// Errors produced by the engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DemuxError {
    /// Inputs or settings were rejected at the boundary.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    /// The loading model could not be fitted; no parameters are reported.
    #[error(
        "GMM-Demux cannot find a viable solution that satisfies the droplet formation model \
         at stage {stage}: {reason}"
    )]
    ModelNonConvergence {
        /// Largest signature size folded into the failing stage.
        stage: usize,
        /// What went wrong.
        reason: FitFailure,
    },
}

/// Result alias used throughout the crate.
pub type Result<T, E = DemuxError> = std::result::Result<T, E>;
