//! CSV export of aggregated rows.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::models::AggregatedRow;

pub const CSV_HEADER: [&str; 5] = [
    "prefix",
    "label",
    "distanceKm",
    "estimatedMinutes",
    "sampleCount",
];

/// Write `rows` in emission order, one record per row.
pub fn write_csv<W: Write>(rows: &[AggregatedRow], writer: W) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    wtr.write_record(CSV_HEADER)?;
    for row in rows {
        wtr.write_record([
            row.prefix.clone(),
            row.label.clone(),
            row.distance_km.to_string(),
            row.estimated_minutes.to_string(),
            row.sample_count.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Render rows to an in-memory CSV document.
pub fn to_csv_string(rows: &[AggregatedRow]) -> Result<String> {
    let mut buf = Vec::new();
    write_csv(rows, &mut buf)?;
    String::from_utf8(buf).context("CSV output is not UTF-8")
}

/// Write rows to `path`, creating parent directories.
pub fn write_csv_file(rows: &[AggregatedRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file =
        fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    write_csv(rows, file)?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}
