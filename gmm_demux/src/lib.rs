//! gmm_demux
//!
//! Demultiplexing of hashtag-labelled single-cell droplets. Per-droplet tag calls from a
//! Gaussian mixture model are turned into sample signatures, filtered by confidence, and
//! used to fit a droplet-formation model that estimates multi-sample and same-sample
//! multiplet rates. A cluster of droplets can then be tested for being a real cell type
//! or a merge of multiplets.

#![deny(missing_docs)]

pub mod classify;
pub mod config;
pub mod errors;
pub mod fit;
pub mod hypothesis;
mod nelder_mead;
pub mod pipeline;
pub mod purify;
pub mod rates;
pub mod signature;

pub use config::{DemuxConfig, FitConfig};
pub use errors::{ConfigError, DemuxError, FitFailure, Result};
pub use fit::ExperimentParams;
pub use hypothesis::{ClusterType, ClusterVerdict};
pub use pipeline::{Classified, DemuxInput, Demultiplexer, Estimate, SampleReport, SummaryReport};
pub use signature::{Signature, SignatureSpace};
