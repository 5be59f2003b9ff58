//! gmm_demux
#![deny(missing_docs)]

mod io;
mod params;

use anyhow::{ensure, Context, Result};
use chrono::Local;
use clap::Parser;
use env_logger::Builder;
use gmm_demux::{
    ClusterVerdict, DemuxConfig, DemuxError, Demultiplexer, SampleReport, SummaryReport,
};
use log::{error, info, LevelFilter};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Demultiplex hashtag-labelled droplets and estimate multiplet rates.
#[derive(Parser, Debug)]
#[clap(name = "gmm_demux", version)]
struct Args {
    /// CSV of per-droplet tag high probabilities: a barcode column followed by one
    /// column per tag.
    #[clap(value_name = "CSV")]
    input: PathBuf,

    /// Names of the HTO tags, separated by ','.
    #[clap(value_name = "TAGS")]
    tags: String,

    /// Estimated total number of cells across all HTO samples.
    #[clap(value_name = "CELL_NUM")]
    cell_num: u64,

    /// Write the full classification report to this CSV.
    #[clap(short, long, value_name = "CSV")]
    full: Option<PathBuf>,

    /// Write the simplified classification report to this CSV.
    #[clap(short, long, value_name = "CSV")]
    simplified: Option<PathBuf>,

    /// Write the same-sample droplets to this CSV.
    #[clap(short, long, value_name = "CSV", default_value = "GMM_Demux_SSD.csv")]
    output: PathBuf,

    /// Write the summary report to this JSON file.
    #[clap(short, long, value_name = "JSON")]
    report: Option<PathBuf>,

    /// Confidence threshold, a number in (0, 1). Default 0.8.
    #[clap(short, long)]
    threshold: Option<f64>,

    /// CSV listing the barcodes of a cluster to test, in its first column.
    #[clap(short, long, value_name = "CSV")]
    examine: Option<PathBuf>,

    /// Chance that the clustering puts a phony droplet into a pure cluster, a number
    /// in (0, 1). Default 0.05.
    #[clap(short, long)]
    ambiguous: Option<f64>,

    /// TOML file overriding the default run settings.
    #[clap(long, value_name = "TOML")]
    params: Option<PathBuf>,
}

#[derive(Serialize)]
struct Report<'a> {
    config: &'a DemuxConfig,
    summary: &'a SummaryReport,
    samples: &'a [SampleReport],
    cluster: Option<&'a ClusterVerdict>,
}

fn setup_logging() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn percent(rate: f64) -> String {
    format!("{:5.2}", rate * 100.0)
}

fn log_summary(summary: &SummaryReport, samples: &[SampleReport]) {
    let droplets = summary.droplet_num.max(1) as f64;
    info!("Full report:");
    info!("  #Drops        {:.0}", summary.drop_num);
    info!("  Capture rate  {}", percent(summary.capture_rate));
    info!("  #Cells        {:.0}", summary.cell_num);
    info!("  Singlet       {}", percent(summary.singlet_rate));
    info!("  MSM           {}", percent(summary.msm_rate));
    info!("  SSM           {}", percent(summary.ssm_rate));
    match summary.rssm_rate {
        Some(rate) => info!("  RSSM          {}", percent(rate)),
        None => info!("  RSSM          undefined"),
    }
    info!(
        "  Negative      {}",
        percent(summary.negative_num as f64 / droplets)
    );
    info!(
        "  Unclear       {}",
        percent(summary.unclear_num as f64 / droplets)
    );
    info!("Per sample report:");
    for sample in samples {
        info!(
            "  {}: #Cells {:.0}, #SSDs {}, SSM {}",
            sample.sample,
            sample.cell_num,
            sample.ssd_num,
            percent(sample.ssm_rate)
        );
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = params::load_params(args.params.as_deref())?;
    if let Some(threshold) = args.threshold {
        config.confidence_threshold = threshold;
    }
    if let Some(ambiguous) = args.ambiguous {
        config.ambiguous_rate = ambiguous;
    }

    let tags: Vec<String> = args
        .tags
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    ensure!(!tags.is_empty(), "at least one HTO tag name is required");

    let demux = Demultiplexer::new(config)?;
    let input = io::read_high_probs(&args.input, &tags)?;
    info!(
        "Read {} droplets over {} tags from {}",
        input.barcodes.len(),
        tags.len(),
        args.input.display()
    );
    let classified = demux.classify(input)?;

    if let Some(path) = &args.full {
        io::write_full(path, &classified.table, &classified.sample_names)?;
        info!("Full classification result is stored in {}", path.display());
    }
    if let Some(path) = &args.simplified {
        io::write_simplified(path, &classified.purified, &classified.sample_names)?;
        info!("Simplified classification result is stored in {}", path.display());
    }
    io::write_same_sample_droplets(&args.output, &classified.purified, &classified.sample_names)?;
    info!("MSM-free droplets are stored in {}", args.output.display());

    let estimate = match classified.estimate(args.cell_num) {
        Ok(estimate) => estimate,
        Err(err @ DemuxError::ModelNonConvergence { .. }) => {
            error!("SSM rate estimation terminated: {err}");
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };
    log_summary(&estimate.summary, &estimate.samples);

    let verdict = match &args.examine {
        Some(path) => {
            let barcodes = io::read_cell_list(path)?;
            let verdict = estimate.examine_cluster(&barcodes)?;
            info!(
                "GEM count: {} | MSM count: {}",
                verdict.gem_num, verdict.msm_num
            );
            info!("Phony-type testing. P-value: {:e}", verdict.phony_p_value);
            info!("Pure-type testing. P-value: {:e}", verdict.pure_p_value);
            info!("Conclusion: the cluster is {}", verdict.cluster_type);
            Some(verdict)
        }
        None => None,
    };

    if let Some(path) = &args.report {
        let report = Report {
            config: demux.config(),
            summary: &estimate.summary,
            samples: &estimate.samples,
            cluster: verdict.as_ref(),
        };
        let mut writer = BufWriter::new(
            File::create(path).with_context(|| path.display().to_string())?,
        );
        serde_json::to_writer_pretty(&mut writer, &report)?;
        writer.flush()?;
        info!("Summary report is stored in {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    setup_logging();
    run(Args::parse())
}
