//! Per-droplet classification of GMM high/low calls into signatures.

use crate::errors::{ConfigError, Result};
use crate::signature::{Signature, SignatureSpace};
use ndarray::ArrayView2;
use rayon::prelude::*;

/// A tag is called high when its GMM posterior probability of the high component
/// exceeds this value.
pub const HIGH_CALL_CUTOFF: f64 = 0.5;

/// Classification outcome of one droplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No tag is high.
    Negative,
    /// The droplet carries the tags of this signature.
    Tagged(Signature),
}

impl Outcome {
    /// The assigned signature, if any.
    pub fn signature(&self) -> Option<Signature> {
        match self {
            Outcome::Negative => None,
            Outcome::Tagged(sig) => Some(*sig),
        }
    }
}

/// One row of the full classification table.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRecord {
    /// Droplet barcode.
    pub barcode: String,
    /// Negative or the assigned signature.
    pub outcome: Outcome,
    /// Posterior probability of the outcome, in [0, 1].
    pub confidence: f64,
}

/// Classify one droplet from its per-tag high probabilities.
///
/// The confidence is the probability of the chosen high/low pattern when the tags are
/// treated independently, i.e. the product of `p` over high tags and `1 - p` over low
/// tags. This is also the largest such product over all 2^N patterns, so it measures how
/// decisively the assigned signature beats the alternatives.
pub fn classify_droplet(high_probs: &[f64]) -> (Outcome, f64) {
    let calls: Vec<bool> = high_probs.iter().map(|&p| p > HIGH_CALL_CUTOFF).collect();
    let confidence: f64 = high_probs
        .iter()
        .zip(&calls)
        .map(|(&p, &high)| if high { p } else { 1.0 - p })
        .product();
    let outcome = match Signature::from_calls(&calls) {
        Some(sig) => Outcome::Tagged(sig),
        None => Outcome::Negative,
    };
    (outcome, confidence)
}

/// Classify one droplet from hard high/low calls. Hard calls carry full confidence.
pub fn classify_calls(calls: &[bool]) -> (Outcome, f64) {
    let probs: Vec<f64> = calls.iter().map(|&c| if c { 1.0 } else { 0.0 }).collect();
    classify_droplet(&probs)
}

/// The full classification table: one record per droplet, in input order.
#[derive(Debug, Clone)]
pub struct ClassificationTable {
    records: Vec<ClassificationRecord>,
}

impl ClassificationTable {
    /// Build a table from existing records.
    pub fn from_records(records: Vec<ClassificationRecord>) -> Self {
        ClassificationTable { records }
    }

    /// All records.
    pub fn records(&self) -> &[ClassificationRecord] {
        &self.records
    }

    /// Number of droplets.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the table holds no droplets.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Classify every droplet of a barcodes x tags probability matrix.
///
/// Columns must follow the sample order of `space`. Every value must be a finite number
/// in [0, 1].
pub fn classify_droplets(
    space: &SignatureSpace,
    barcodes: &[String],
    high_probs: ArrayView2<'_, f64>,
) -> Result<ClassificationTable> {
    let (rows, cols) = high_probs.dim();
    if rows != barcodes.len() {
        return Err(ConfigError::ShapeMismatch {
            what: "rows",
            expected: barcodes.len(),
            found: rows,
        }
        .into());
    }
    if cols != space.num_samples() {
        return Err(ConfigError::ShapeMismatch {
            what: "columns",
            expected: space.num_samples(),
            found: cols,
        }
        .into());
    }
    if let Some(((row, column), &value)) = high_probs
        .indexed_iter()
        .find(|(_, p)| !(p.is_finite() && (0.0..=1.0).contains(*p)))
    {
        return Err(ConfigError::InvalidProbability { row, column, value }.into());
    }

    let records = (0..rows)
        .into_par_iter()
        .map(|i| {
            let probs: Vec<f64> = high_probs.row(i).to_vec();
            let (outcome, confidence) = classify_droplet(&probs);
            ClassificationRecord {
                barcode: barcodes[i].clone(),
                outcome,
                confidence,
            }
        })
        .collect();
    Ok(ClassificationTable { records })
}
