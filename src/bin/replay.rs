use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Parser;
use env_logger::Env;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;

use activity_tracker_rs::statistics::{activity_totals, format_duration};
use activity_tracker_rs::{
    AccelData, ClassifierLoader, DenseModelLoader, GestureLabel, GestureRecord, GyroData,
    InferenceAdapter, ModelDescriptor, PipelineConfig, SampleAssembler, SlidingWindow,
};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a recorded session (*.json or *.json.gz)
    #[arg(long, conflicts_with = "log_dir")]
    log: Option<PathBuf>,

    /// Directory of recordings to batch replay
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Dense classifier weights (JSON)
    #[arg(long)]
    model: PathBuf,

    /// Pipeline configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Deserialize)]
struct Reading {
    timestamp: f64,
    accel: Option<AccelData>,
    gyro: Option<GyroData>,
}

#[derive(Deserialize)]
struct LogFile {
    readings: Vec<Reading>,
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let gz = GzDecoder::new(file);
        let reader = BufReader::new(gz);
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn to_datetime(timestamp: f64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis((timestamp * 1000.0) as i64).unwrap_or_else(Utc::now)
}

/// Replays one recording on sensor time: a prediction cycle runs every
/// `prediction_period_ms` of recorded timestamps.
fn run_once(path: &Path, config: &PipelineConfig, adapter: &InferenceAdapter) -> anyhow::Result<serde_json::Value> {
    let log = load_log(path)?;
    let mut assembler = SampleAssembler::new(config.cutoff_hz, config.sample_rate_hz);
    let mut window = SlidingWindow::new(config.window_size);
    let period = config.prediction_period_ms as f64 / 1000.0;

    let mut next_cycle = log.readings.first().map(|r| r.timestamp + period);
    let mut cycles = 0u64;
    let mut predictions: Vec<GestureRecord> = Vec::new();

    for reading in &log.readings {
        if let Some(gyro) = &reading.gyro {
            assembler.feed_gyro(gyro);
        }
        if let Some(accel) = &reading.accel {
            window.append(assembler.feed_accel(accel));
        }

        while let Some(due) = next_cycle.filter(|due| reading.timestamp >= *due) {
            cycles += 1;
            let label = adapter
                .infer(&window.snapshot())
                .and_then(GestureLabel::from_index);
            if let Some(label) = label {
                window.trim(config.retain_after_inference);
                predictions.push(GestureRecord {
                    id: predictions.len() as u64 + 1,
                    label,
                    timestamp: to_datetime(due),
                });
            }
            next_cycle = Some(due + period);
        }
    }

    let totals = activity_totals(&predictions, config.seconds_per_prediction);
    for total in &totals {
        log::info!(
            "{}: {} {}",
            path.display(),
            total.label,
            format_duration(total.seconds)
        );
    }

    Ok(json!({
        "file": path.display().to_string(),
        "readings": log.readings.len(),
        "accel_samples": assembler.accel_count(),
        "gyro_samples": assembler.gyro_count(),
        "cycles": cycles,
        "predictions": predictions.len(),
        "totals": totals,
        "timeline": predictions
            .iter()
            .map(|p| json!({ "timestamp": p.timestamp, "label": p.label }))
            .collect::<Vec<_>>(),
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let classifier = DenseModelLoader.load(&ModelDescriptor::new(&args.model))?;
    let adapter = InferenceAdapter::with_classifier(&config, classifier);

    let mut results = Vec::new();
    if let Some(dir) = args.log_dir.as_ref() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !(name.ends_with(".json") || name.ends_with(".json.gz")) {
                continue;
            }
            match run_once(&path, &config, &adapter) {
                Ok(res) => results.push(res),
                Err(e) => eprintln!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &config, &adapter)?);
    } else {
        anyhow::bail!("Provide --log or --log-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
