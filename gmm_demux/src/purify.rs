//! Purification of the classification table and per-signature aggregation.

use crate::classify::{ClassificationTable, Outcome};
use crate::errors::{ConfigError, Result};
use crate::signature::{Signature, SignatureSpace};
use log::warn;
use std::collections::HashMap;

/// Label used for negative droplets in reports.
pub const NEGATIVE_LABEL: &str = "negative";
/// Label used for low-confidence droplets in reports.
pub const UNCLEAR_LABEL: &str = "unclear";
/// Label used for multi-sample multiplets in the simplified report.
pub const MSM_LABEL: &str = "MSM";

pub(crate) fn check_unit_interval(name: &'static str, value: f64) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitInterval { name, value }.into())
    }
}

/// Final assignment of a droplet after purification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// No tag is high.
    Negative,
    /// Tagged, but with a confidence below the threshold.
    Unclear,
    /// Tagged with enough confidence.
    Tagged(Signature),
}

impl Assignment {
    /// Label in the simplified report: the sample name for singlets, `MSM` for
    /// multiplets, `negative` or `unclear` otherwise.
    pub fn simplified_label(&self, sample_names: &[String]) -> String {
        match self {
            Assignment::Negative => NEGATIVE_LABEL.to_string(),
            Assignment::Unclear => UNCLEAR_LABEL.to_string(),
            Assignment::Tagged(sig) => match sig.singlet_sample() {
                Some(sample) => sample_names[sample].clone(),
                None => MSM_LABEL.to_string(),
            },
        }
    }

    /// Label in the full report: member sample names of the signature joined by `-`.
    pub fn full_label(&self, sample_names: &[String]) -> String {
        match self {
            Assignment::Negative => NEGATIVE_LABEL.to_string(),
            Assignment::Unclear => UNCLEAR_LABEL.to_string(),
            Assignment::Tagged(sig) => sig.label(sample_names),
        }
    }
}

/// A droplet after purification.
#[derive(Debug, Clone, PartialEq)]
pub struct PurifiedRecord {
    /// Droplet barcode.
    pub barcode: String,
    /// Final assignment.
    pub assignment: Assignment,
    /// Confidence carried over from classification.
    pub confidence: f64,
}

/// Negative and unclear droplet counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BadDropletCounts {
    /// Droplets with no high tag.
    pub negative: u64,
    /// Tagged droplets below the confidence threshold.
    pub unclear: u64,
}

/// Droplet counts per signature, aligned to the canonical signature order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropletCounts {
    by_signature: Vec<u64>,
    num_samples: usize,
    /// Negative and unclear droplets, excluded from the per-signature counts.
    pub bad: BadDropletCounts,
}

impl DropletCounts {
    /// Build counts from a vector aligned with `space`.
    pub fn new(space: &SignatureSpace, by_signature: Vec<u64>, bad: BadDropletCounts) -> Self {
        assert_eq!(by_signature.len(), space.len());
        DropletCounts {
            by_signature,
            num_samples: space.num_samples(),
            bad,
        }
    }

    /// Per-signature counts in canonical order.
    pub fn by_signature(&self) -> &[u64] {
        &self.by_signature
    }

    /// Singlet counts; entry i is sample i.
    pub fn singlets(&self) -> &[u64] {
        &self.by_signature[..self.num_samples]
    }

    /// Number of droplets on a singlet signature.
    pub fn singlet_total(&self) -> u64 {
        self.singlets().iter().sum()
    }

    /// Number of droplets on a multi-sample signature.
    pub fn multiplet_total(&self) -> u64 {
        self.by_signature[self.num_samples..].iter().sum()
    }

    /// Number of droplets, including negative and unclear ones.
    pub fn total(&self) -> u64 {
        self.by_signature.iter().sum::<u64>() + self.bad.negative + self.bad.unclear
    }
}

/// The purified table: one record per droplet, in input order.
#[derive(Debug, Clone)]
pub struct PurifiedTable {
    records: Vec<PurifiedRecord>,
    threshold: f64,
}

/// Drop tagged droplets whose confidence is below `threshold` into `Unclear`.
///
/// Negative droplets remain negative regardless of their confidence.
pub fn purify(table: &ClassificationTable, threshold: f64) -> Result<PurifiedTable> {
    check_unit_interval("confidence threshold", threshold)?;
    let records = table
        .records()
        .iter()
        .map(|rec| {
            let assignment = match rec.outcome {
                Outcome::Negative => Assignment::Negative,
                Outcome::Tagged(_) if rec.confidence < threshold => Assignment::Unclear,
                Outcome::Tagged(sig) => Assignment::Tagged(sig),
            };
            PurifiedRecord {
                barcode: rec.barcode.clone(),
                assignment,
                confidence: rec.confidence,
            }
        })
        .collect();
    Ok(PurifiedTable { records, threshold })
}

/// Count negative droplets and tagged droplets below `threshold`.
pub fn count_bad(table: &ClassificationTable, threshold: f64) -> Result<BadDropletCounts> {
    check_unit_interval("confidence threshold", threshold)?;
    Ok(table
        .records()
        .iter()
        .fold(BadDropletCounts::default(), |mut acc, rec| {
            match rec.outcome {
                Outcome::Negative => acc.negative += 1,
                Outcome::Tagged(_) if rec.confidence < threshold => acc.unclear += 1,
                Outcome::Tagged(_) => {}
            }
            acc
        }))
}

/// Count purified droplets per signature.
pub fn count_by_signature(space: &SignatureSpace, table: &PurifiedTable) -> DropletCounts {
    let mut by_signature = vec![0u64; space.len()];
    let mut bad = BadDropletCounts::default();
    for rec in &table.records {
        match rec.assignment {
            Assignment::Negative => bad.negative += 1,
            Assignment::Unclear => bad.unclear += 1,
            Assignment::Tagged(sig) => {
                let idx = space
                    .index_of(&sig)
                    .expect("signature from a different signature space");
                by_signature[idx] += 1;
            }
        }
    }
    DropletCounts::new(space, by_signature, bad)
}

/// Multiplet tally of a cluster of droplets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCounts {
    /// Number of cluster droplets found in the table.
    pub gem_num: u64,
    /// Of those, droplets assigned to a multi-sample signature.
    pub msm_num: u64,
    /// Cluster barcodes absent from the table.
    pub missing: Vec<String>,
}

impl PurifiedTable {
    /// All records.
    pub fn records(&self) -> &[PurifiedRecord] {
        &self.records
    }

    /// The confidence threshold used for purification.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Number of droplets.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the table holds no droplets.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Indices of same-sample droplets (SSDs): droplets on a singlet signature, which
    /// are free of multi-sample multiplets.
    pub fn same_sample_droplets(&self) -> Vec<usize> {
        self.positions(|sig| sig.is_singlet())
    }

    /// Per-sample SSD counts.
    pub fn ssd_counts(&self, num_samples: usize) -> Vec<u64> {
        let mut counts = vec![0u64; num_samples];
        for rec in &self.records {
            if let Assignment::Tagged(sig) = rec.assignment {
                if let Some(sample) = sig.singlet_sample() {
                    counts[sample] += 1;
                }
            }
        }
        counts
    }

    /// Indices of droplets on a two-sample signature, the doublet candidates removed
    /// when filtering outputs.
    pub fn doublet_candidates(&self) -> Vec<usize> {
        self.positions(|sig| sig.size() == 2)
    }

    /// Count the droplets of a cluster and how many of them are multi-sample multiplets.
    pub fn cluster_counts<S: AsRef<str>>(&self, barcodes: &[S]) -> ClusterCounts {
        let by_barcode: HashMap<&str, &PurifiedRecord> = self
            .records
            .iter()
            .map(|rec| (rec.barcode.as_str(), rec))
            .collect();
        let mut counts = ClusterCounts {
            gem_num: 0,
            msm_num: 0,
            missing: Vec::new(),
        };
        for barcode in barcodes {
            match by_barcode.get(barcode.as_ref()) {
                Some(rec) => {
                    counts.gem_num += 1;
                    if matches!(rec.assignment, Assignment::Tagged(sig) if sig.is_multiplet()) {
                        counts.msm_num += 1;
                    }
                }
                None => counts.missing.push(barcode.as_ref().to_string()),
            }
        }
        if !counts.missing.is_empty() {
            warn!(
                "{} of {} cluster barcodes are not in the classification table",
                counts.missing.len(),
                barcodes.len()
            );
        }
        counts
    }

    fn positions(&self, keep: impl Fn(&Signature) -> bool) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter_map(|(i, rec)| match rec.assignment {
                Assignment::Tagged(ref sig) if keep(sig) => Some(i),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify_droplet, ClassificationRecord};
    use proptest::collection::vec;
    use proptest::{prop_assert, prop_assert_eq, proptest};

    fn table_from_probs(rows: &[Vec<f64>]) -> ClassificationTable {
        ClassificationTable::from_records(
            rows.iter()
                .enumerate()
                .map(|(i, probs)| {
                    let (outcome, confidence) = classify_droplet(probs);
                    ClassificationRecord {
                        barcode: format!("BC{i}-1"),
                        outcome,
                        confidence,
                    }
                })
                .collect(),
        )
    }

    #[test]
    fn unclear_droplets() {
        let table = table_from_probs(&[
            vec![0.99, 0.01],
            vec![0.7, 0.2],
            vec![0.1, 0.1],
            vec![0.95, 0.99],
        ]);
        let purified = purify(&table, 0.8).unwrap();
        let assignments: Vec<_> = purified.records().iter().map(|r| r.assignment).collect();
        assert_eq!(assignments[1], Assignment::Unclear);
        assert_eq!(assignments[2], Assignment::Negative);
        assert_eq!(
            count_bad(&table, 0.8).unwrap(),
            BadDropletCounts {
                negative: 1,
                unclear: 1
            }
        );

        let space = SignatureSpace::enumerate(2).unwrap();
        let counts = count_by_signature(&space, &purified);
        assert_eq!(counts.by_signature(), &[1, 0, 1]);
        assert_eq!(counts.total(), 4);
        assert_eq!(purified.same_sample_droplets(), vec![0]);
        assert_eq!(purified.doublet_candidates(), vec![3]);
        assert_eq!(purified.ssd_counts(2), vec![1, 0]);
    }

    #[test]
    fn threshold_is_validated() {
        let table = table_from_probs(&[vec![0.9]]);
        assert!(purify(&table, 0.0).is_err());
        assert!(purify(&table, 1.0).is_err());
        assert!(count_bad(&table, 1.2).is_err());
    }

    #[test]
    fn labels() {
        let names = vec!["A".to_string(), "B".to_string()];
        let ab = Assignment::Tagged(Signature::from_members(2, [0, 1]));
        let b = Assignment::Tagged(Signature::from_members(2, [1]));
        assert_eq!(ab.simplified_label(&names), "MSM");
        assert_eq!(ab.full_label(&names), "A-B");
        assert_eq!(b.simplified_label(&names), "B");
        assert_eq!(Assignment::Unclear.full_label(&names), "unclear");
    }

    #[test]
    fn cluster_counts_skip_unknown_barcodes() {
        let table = table_from_probs(&[vec![0.99, 0.01], vec![0.99, 0.99], vec![0.01, 0.99]]);
        let purified = purify(&table, 0.8).unwrap();
        let counts = purified.cluster_counts(&["BC0-1", "BC1-1", "NOPE-1"]);
        assert_eq!(counts.gem_num, 2);
        assert_eq!(counts.msm_num, 1);
        assert_eq!(counts.missing, vec!["NOPE-1".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_counts_cover_every_droplet(
            rows in vec(vec(0.0f64..=1.0, 3), 0..200),
            threshold in 0.01f64..0.99,
        ) {
            let table = table_from_probs(&rows);
            let space = SignatureSpace::enumerate(3).unwrap();
            let purified = purify(&table, threshold).unwrap();
            let counts = count_by_signature(&space, &purified);
            prop_assert_eq!(counts.total(), rows.len() as u64);
            prop_assert_eq!(counts.bad, count_bad(&table, threshold).unwrap());
        }

        #[test]
        fn prop_unclear_grows_with_threshold(
            rows in vec(vec(0.0f64..=1.0, 3), 0..200),
            low in 0.01f64..0.5,
            delta in 0.0f64..0.49,
        ) {
            let table = table_from_probs(&rows);
            let lower = count_bad(&table, low).unwrap();
            let higher = count_bad(&table, low + delta).unwrap();
            prop_assert!(higher.unclear >= lower.unclear);
            prop_assert_eq!(higher.negative, lower.negative);
        }
    }
}
