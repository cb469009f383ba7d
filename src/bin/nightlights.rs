use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use nightlights::config::PipelineConfig;
use nightlights::core::{assemble, assemble_location, BatchRunner, CalibrationTable, ExportOrchestrator};
use nightlights::io::{load_locations, HttpImageryService};
use nightlights::Location;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "nightlights", about = "export and assemble calibrated night-light time series")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// run export jobs for every sample location and year
    Export {
        /// pipeline configuration (JSON); defaults to <config dir>/nightlights/config.json
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// CSV with lat,lng columns
        #[arg(long, short)]
        samples: PathBuf,
        /// only export the first N locations
        #[arg(long)]
        limit: Option<usize>,
        /// write the batch summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// stack exported rasters of a folder into a time series
    Assemble {
        dir: PathBuf,
        #[arg(long, default_value = "stable_lights")]
        band: String,
        #[arg(long, allow_hyphen_values = true, requires = "lon")]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lon: Option<f64>,
    },
    /// print calibration coefficients for an image id and year
    Lookup {
        #[arg(long, short)]
        table: PathBuf,
        id: String,
        year: i32,
    },
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nightlights").join("config.json"))
}

async fn export(config: Option<PathBuf>, samples: PathBuf, limit: Option<usize>, summary_path: Option<PathBuf>) -> Result<()> {
    let path = config.or_else(|| default_config_path().filter(|p| p.is_file()));
    let config = match path {
        Some(path) => PipelineConfig::from_json_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            log::warn!("No configuration file found, using night-lights defaults");
            PipelineConfig::night_lights()
        }
    };
    config.validate()?;

    let mut locations = load_locations(&samples)?;
    if let Some(n) = limit {
        locations.truncate(n);
    }

    let table = if config.calibrate {
        let path = config
            .calibration_table
            .as_ref()
            .ok_or_else(|| anyhow!("calibration requested without a calibration table"))?;
        Some(Arc::new(CalibrationTable::from_path(path, config.strict_calibration_table)?))
    } else {
        None
    };

    let service = Arc::new(HttpImageryService::new(&config.service)?);
    let mut orchestrator = ExportOrchestrator::new(service, table, config.export_settings());

    if config.projection().is_none() {
        if let Some(reference) = &config.reference_collection {
            let projection = orchestrator.resolve_projection(reference).await?;
            orchestrator.set_projection(projection);
        }
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, abandoning remaining exports");
            ctrl_c.cancel();
        }
    });

    let runner = BatchRunner::new(orchestrator, config.years(), config.target_folder.clone())
        .with_max_concurrent_locations(config.max_concurrent_locations);
    let summary = runner.run(&locations, &cancel).await;

    for skipped in &summary.skipped {
        println!("skipped {} {}: {}", skipped.location, skipped.year, skipped.reason);
    }
    println!("{} exports completed, {} skipped", summary.completed.len(), summary.skipped.len());

    if let Some(path) = summary_path {
        std::fs::write(&path, serde_json::to_string_pretty(&summary)?)?;
    }
    Ok(())
}

fn assemble_dir(dir: PathBuf, band: String, lat: Option<f64>, lon: Option<f64>) -> Result<()> {
    let dataset = match (lat, lon) {
        (Some(lat), Some(lon)) => assemble_location(&dir, Location::new(lat, lon), &band)?,
        _ => assemble(&dir, &band)?,
    };

    let (rows, cols) = dataset.frame_shape();
    println!("{}: {} frames of {}x{}", dataset.band_name, dataset.len(), rows, cols);
    for (year, frame) in dataset.frames() {
        let max = frame.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        println!("  {}  max {:.2}", year, max);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Export { config, samples, limit, summary } => export(config, samples, limit, summary).await,
        Command::Assemble { dir, band, lat, lon } => assemble_dir(dir, band, lat, lon),
        Command::Lookup { table, id, year } => {
            let table = CalibrationTable::from_path(&table, false)?;
            let c = table.lookup_for_source_id(&id, year)?;
            println!("c0={} c1={} c2={}", c.c0, c.c1, c.c2);
            Ok(())
        }
    }
}
