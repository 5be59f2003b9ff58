//! CSV input and output of the command-line tool.

use anyhow::{ensure, Context, Result};
use gmm_demux::classify::{ClassificationTable, Outcome};
use gmm_demux::purify::{PurifiedTable, NEGATIVE_LABEL};
use gmm_demux::DemuxInput;
use itertools::Itertools;
use ndarray::Array2;
use serde::Serialize;
use std::path::Path;

/// Read per-droplet high probabilities.
///
/// The first column holds the barcodes; `tags` selects and orders the sample columns.
pub(crate) fn read_high_probs(path: &Path, tags: &[String]) -> Result<DemuxInput> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| path.display().to_string())?;

    let headers = reader.headers()?.clone();
    let duplicates: Vec<_> = tags.iter().duplicates().collect();
    ensure!(
        duplicates.is_empty(),
        "tag names must be unique, but {} appear more than once",
        duplicates.iter().join(", ")
    );
    let columns = tags
        .iter()
        .map(|tag| {
            headers
                .iter()
                .skip(1)
                .position(|h| h == tag.as_str())
                .map(|i| i + 1)
                .with_context(|| {
                    format!(
                        "tag {tag} is not a column of {}; found {}",
                        path.display(),
                        headers.iter().skip(1).join(", ")
                    )
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut barcodes = Vec::new();
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| path.display().to_string())?;
        barcodes.push(record[0].to_string());
        for &col in &columns {
            let value: f64 = record[col].trim().parse().with_context(|| {
                format!(
                    "{}: row {} column {} is not a number: {:?}",
                    path.display(),
                    line + 1,
                    &headers[col],
                    &record[col]
                )
            })?;
            values.push(value);
        }
    }
    let high_probs = Array2::from_shape_vec((barcodes.len(), columns.len()), values)?;
    Ok(DemuxInput {
        sample_names: tags.to_vec(),
        barcodes,
        high_probs,
    })
}

/// Read a cluster's barcodes from the first column of a CSV file with a header.
pub(crate) fn read_cell_list(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| path.display().to_string())?;
    let mut barcodes = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| path.display().to_string())?;
        if let Some(barcode) = record.get(0).map(str::trim).filter(|b| !b.is_empty()) {
            barcodes.push(barcode.to_string());
        }
    }
    Ok(barcodes)
}

#[derive(Serialize)]
struct AssignmentRow<'a> {
    barcode: &'a str,
    assignment: String,
    confidence: f64,
}

fn write_rows<'a>(path: &Path, rows: impl Iterator<Item = AssignmentRow<'a>>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| path.display().to_string())?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().with_context(|| path.display().to_string())?;
    Ok(())
}

/// Write every droplet with its signature, before purification.
pub(crate) fn write_full(
    path: &Path,
    table: &ClassificationTable,
    sample_names: &[String],
) -> Result<()> {
    write_rows(
        path,
        table.records().iter().map(|rec| AssignmentRow {
            barcode: &rec.barcode,
            assignment: match rec.outcome {
                Outcome::Negative => NEGATIVE_LABEL.to_string(),
                Outcome::Tagged(sig) => sig.label(sample_names),
            },
            confidence: rec.confidence,
        }),
    )
}

/// Write every droplet with its sample, `MSM`, `negative` or `unclear`.
pub(crate) fn write_simplified(
    path: &Path,
    purified: &PurifiedTable,
    sample_names: &[String],
) -> Result<()> {
    write_rows(
        path,
        purified.records().iter().map(|rec| AssignmentRow {
            barcode: &rec.barcode,
            assignment: rec.assignment.simplified_label(sample_names),
            confidence: rec.confidence,
        }),
    )
}

/// Write the same-sample droplets, the MSM-free droplets of each sample.
pub(crate) fn write_same_sample_droplets(
    path: &Path,
    purified: &PurifiedTable,
    sample_names: &[String],
) -> Result<()> {
    let records = purified.records();
    write_rows(
        path,
        purified
            .same_sample_droplets()
            .into_iter()
            .map(|i| AssignmentRow {
                barcode: &records[i].barcode,
                assignment: records[i].assignment.simplified_label(sample_names),
                confidence: records[i].confidence,
            }),
    )
}
