//! Tag-presence signatures and their canonical enumeration.
//!
//! A signature is the non-empty set of samples whose HTO is called high in a droplet.
//! Every component that indexes per-signature data (the classifier, the aggregator and
//! the loading-model fitter) uses the ordering produced by [`SignatureSpace::enumerate`]:
//! signatures are grouped by size, singlets first, and ordered lexicographically by
//! member indices within a size.

use crate::errors::{ConfigError, Result};
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Largest number of samples supported. The signature space has 2^N - 1 members.
pub const MAX_SAMPLES: usize = 16;

/// A non-empty subset of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    mask: u32,
    num_samples: u8,
}

impl Signature {
    /// Build a signature over `num_samples` samples from member indices.
    ///
    /// Panics if no member is given or a member is out of range.
    pub fn from_members(num_samples: usize, members: impl IntoIterator<Item = usize>) -> Self {
        assert!(num_samples <= MAX_SAMPLES);
        let mask = members.into_iter().fold(0u32, |acc, i| {
            assert!(i < num_samples, "sample {i} out of range for {num_samples} samples");
            acc | (1 << i)
        });
        assert!(mask != 0, "a signature must contain at least one sample");
        Signature {
            mask,
            num_samples: num_samples as u8,
        }
    }

    /// The signature of a droplet's high/low calls, or `None` when no sample is high.
    pub fn from_calls(calls: &[bool]) -> Option<Self> {
        assert!(calls.len() <= MAX_SAMPLES);
        let mask = calls
            .iter()
            .enumerate()
            .filter(|(_, &high)| high)
            .fold(0u32, |acc, (i, _)| acc | (1 << i));
        (mask != 0).then_some(Signature {
            mask,
            num_samples: calls.len() as u8,
        })
    }

    /// Number of samples in the experiment this signature belongs to.
    pub fn num_samples(&self) -> usize {
        self.num_samples as usize
    }

    /// Number of samples in the signature.
    pub fn size(&self) -> usize {
        self.mask.count_ones() as usize
    }

    /// Whether `sample` is part of the signature.
    pub fn contains(&self, sample: usize) -> bool {
        sample < self.num_samples() && self.mask & (1 << sample) != 0
    }

    /// Member sample indices in ascending order.
    pub fn members(&self) -> impl Iterator<Item = usize> {
        let mask = self.mask;
        (0..self.num_samples()).filter(move |&i| mask & (1 << i) != 0)
    }

    /// True for a single-sample signature.
    pub fn is_singlet(&self) -> bool {
        self.size() == 1
    }

    /// True for a multi-sample multiplet (two or more samples).
    pub fn is_multiplet(&self) -> bool {
        self.size() >= 2
    }

    /// The sample of a singlet signature.
    pub fn singlet_sample(&self) -> Option<usize> {
        self.is_singlet()
            .then(|| self.mask.trailing_zeros() as usize)
    }

    /// The signature as a boolean high/low vector.
    pub fn to_calls(&self) -> Vec<bool> {
        (0..self.num_samples()).map(|i| self.contains(i)).collect()
    }

    /// Human readable name, member sample names joined by `-`.
    pub fn label(&self, sample_names: &[String]) -> String {
        self.members().map(|i| sample_names[i].as_str()).join("-")
    }
}

impl Ord for Signature {
    fn cmp(&self, other: &Self) -> Ordering {
        self.size()
            .cmp(&other.size())
            .then_with(|| self.members().cmp(other.members()))
            .then(self.num_samples.cmp(&other.num_samples))
    }
}

impl PartialOrd for Signature {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// All 2^N - 1 signatures of an experiment in canonical order.
#[derive(Debug, Clone)]
pub struct SignatureSpace {
    num_samples: usize,
    signatures: Vec<Signature>,
    index: HashMap<Signature, usize>,
    // size_offsets[k] is the position of the first signature of size k + 1
    size_offsets: Vec<usize>,
}

impl SignatureSpace {
    /// Enumerate the signature space for `num_samples` samples.
    pub fn enumerate(num_samples: usize) -> Result<Self> {
        if num_samples == 0 || num_samples > MAX_SAMPLES {
            return Err(ConfigError::InvalidSampleCount {
                num_samples,
                max: MAX_SAMPLES,
            }
            .into());
        }
        let mut signatures = Vec::with_capacity((1 << num_samples) - 1);
        let mut size_offsets = Vec::with_capacity(num_samples + 1);
        for size in 1..=num_samples {
            size_offsets.push(signatures.len());
            signatures.extend(
                (0..num_samples)
                    .combinations(size)
                    .map(|members| Signature::from_members(num_samples, members)),
            );
        }
        size_offsets.push(signatures.len());
        let index = signatures
            .iter()
            .enumerate()
            .map(|(i, &sig)| (sig, i))
            .collect();
        Ok(SignatureSpace {
            num_samples,
            signatures,
            index,
            size_offsets,
        })
    }

    /// Number of samples.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Number of signatures, 2^N - 1.
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Always false; a valid space has at least one signature.
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// All signatures in canonical order.
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// Iterate over signatures in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.signatures.iter()
    }

    /// The signature at a canonical position.
    pub fn get(&self, idx: usize) -> Option<Signature> {
        self.signatures.get(idx).copied()
    }

    /// Canonical position of a signature, `None` if it belongs to another space.
    pub fn index_of(&self, signature: &Signature) -> Option<usize> {
        self.index.get(signature).copied()
    }

    /// Signatures with exactly `size` members.
    pub fn of_size(&self, size: usize) -> &[Signature] {
        if size == 0 || size > self.num_samples {
            return &[];
        }
        &self.signatures[self.size_offsets[size - 1]..self.size_offsets[size]]
    }

    /// The N singlet signatures; singlet i is sample i.
    pub fn singlets(&self) -> &[Signature] {
        self.of_size(1)
    }

    /// Number of signatures with at most `size` members.
    pub fn prefix_len(&self, size: usize) -> usize {
        self.size_offsets[size.min(self.num_samples)]
    }

    /// Check that another sequence of signatures uses this space's canonical order.
    pub fn is_aligned_with(&self, other: &[Signature]) -> bool {
        other.len() <= self.len() && self.signatures.iter().zip(other).all(|(a, b)| a == b)
    }
}
