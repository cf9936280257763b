//! Command-line postal-code scan.
//!
//! Runs one scan with a progress bar and writes the CSV export.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cepscan::export::write_csv_file;
use cepscan::{orchestrator_from_config, AggregatedRow, Config, ProgressEvent};
use cepscan::{ScanRequest, Strategy};

#[derive(Parser, Debug)]
#[command(name = "scan")]
#[command(about = "Measure distances from an origin CEP to a range of CEP prefixes")]
struct Args {
    /// Origin postal code (8 digits, hyphen allowed)
    origin: String,

    /// First prefix of the range (5 digits)
    prefix_start: String,

    /// Last prefix of the range, defaults to the first
    prefix_end: Option<String>,

    /// Sampling strategy: fast or detailed
    #[arg(short, long, default_value = "detailed")]
    strategy: Strategy,

    /// TOML configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CSV output path
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = Config::load_or_default(args.config.as_ref())?;
    let orchestrator = Arc::new(orchestrator_from_config(&config));

    let prefix_end = args.prefix_end.clone().unwrap_or_else(|| args.prefix_start.clone());
    let request = ScanRequest::new(&args.origin, &args.prefix_start, &prefix_end, args.strategy);
    info!("Starting {} scan from {}", args.strategy, args.origin);

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );

    let mut rx = orchestrator.spawn(request);
    let mut outcome: Option<Result<Vec<AggregatedRow>, String>> = None;

    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Log {
                message,
                progress_percent,
            } => {
                if let Some(p) = progress_percent {
                    pb.set_position(p as u64);
                }
                pb.set_message(message);
            }
            ProgressEvent::Origin {
                postal_code,
                neighborhood,
                point,
            } => {
                pb.println(format!(
                    "Origin {} ({}) at {:.5}, {:.5}",
                    postal_code,
                    neighborhood.as_deref().unwrap_or("-"),
                    point.latitude,
                    point.longitude
                ));
            }
            ProgressEvent::Progress {
                prefix,
                completed,
                total,
                progress_percent,
            } => {
                pb.set_position(progress_percent as u64);
                pb.set_message(format!("{} {}/{}", prefix, completed, total));
            }
            ProgressEvent::Prefix { prefix, rows } => {
                pb.println(format!("Prefix {} done: {} rows", prefix, rows.len()));
            }
            ProgressEvent::Result { rows } => outcome = Some(Ok(rows)),
            ProgressEvent::Error { message } => outcome = Some(Err(message)),
        }
    }
    pb.finish_and_clear();

    let rows = match outcome {
        Some(Ok(rows)) => rows,
        Some(Err(message)) => {
            error!("Scan failed: {}", message);
            anyhow::bail!(message);
        }
        None => anyhow::bail!("Scan ended without a result"),
    };

    for row in &rows {
        println!(
            "{}\t{:<40}\t{:>8} km\t{:>6} min\t{} samples",
            row.prefix, row.label, row.distance_km, row.estimated_minutes, row.sample_count
        );
    }

    let output = args.output.unwrap_or_else(|| {
        PathBuf::from("resultados").join(format!(
            "resultado_{}.csv",
            Local::now().format("%Y%m%d_%H%M%S")
        ))
    });
    if let Err(e) = write_csv_file(&rows, &output) {
        warn!("Export failed: {:?}", e);
        return Err(e);
    }
    println!("Saved {}", output.display());

    Ok(())
}
