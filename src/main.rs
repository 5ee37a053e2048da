use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use env_logger::Env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, sleep, Duration, Instant};

use activity_tracker_rs::geolocation::PositionLogger;
use activity_tracker_rs::live_status::LiveStatus;
use activity_tracker_rs::statistics::{activity_totals, format_duration};
use activity_tracker_rs::{
    DenseModelLoader, GestureStore, HandoffStore, InferenceAdapter, JsonFileStore, MockSensorHub,
    ModelDescriptor, PipelineConfig, PredictionFeed, PredictionScheduler, SensorHub,
    StorageObserver, TermuxSensorHub, TrackerError,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Source {
    /// Synthetic walking signal
    Mock,
    /// termux-sensor / termux-location
    Termux,
}

#[derive(Parser, Debug)]
#[command(name = "activity_tracker")]
#[command(about = "Live activity recognition from accelerometer + gyroscope", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Pipeline configuration (JSON); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dense classifier weights (JSON)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Sensor source
    #[arg(long, value_enum, default_value = "mock")]
    source: Source,

    /// Output directory for the store, hand-off window and live status
    #[arg(long, default_value = "activity_sessions")]
    output_dir: PathBuf,

    /// Do not log positions
    #[arg(long)]
    no_positions: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    println!("[{}] Activity Tracker RS Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Source: {:?}", args.source);
    println!("  Output Dir: {}", args.output_dir.display());

    std::fs::create_dir_all(&args.output_dir)?;

    let hub: Arc<dyn SensorHub> = match args.source {
        Source::Mock => Arc::new(MockSensorHub::new()),
        Source::Termux => Arc::new(TermuxSensorHub),
    };

    let adapter = Arc::new(InferenceAdapter::new(&config));
    match &args.model {
        Some(path) => {
            adapter.load_if_absent(&DenseModelLoader, &ModelDescriptor::new(path))?;
            log::info!("Model loaded from {}", path.display());
        }
        None => log::warn!("No --model given; windows will fill but nothing is classified"),
    }

    let store = Arc::new(JsonFileStore::open(args.output_dir.join("store.json"))?);
    let feed = Arc::new(PredictionFeed::new());
    let scheduler = PredictionScheduler::new(config.clone(), hub.clone(), adapter.clone())
        .with_handoff(HandoffStore::new(args.output_dir.join("window.json")));
    scheduler.observers().add(Arc::new(StorageObserver::new(store.clone())))?;
    scheduler.observers().add(feed.clone())?;

    scheduler.start()?;

    let positions = PositionLogger::new(hub, store.clone(), config.position_interval());
    if !args.no_positions {
        match positions.start() {
            Ok(_) => {}
            Err(TrackerError::SensorPermissionDenied(what)) => {
                log::warn!("Position logging disabled: {} permission denied", what)
            }
            Err(e) => return Err(e.into()),
        }
    }

    let start = Instant::now();
    let deadline = sleep(if args.duration > 0 {
        Duration::from_secs(args.duration)
    } else {
        Duration::MAX
    });
    tokio::pin!(deadline);
    let mut status_tick = interval(Duration::from_secs(2));
    let status_path = args.output_dir.join("live_status.json");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            _ = &mut deadline => {
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
            _ = status_tick.tick() => {
                snapshot_status(&scheduler, &feed, &positions, start).save_or_warn(&status_path);
            }
        }
    }

    scheduler.stop()?;
    positions.stop()?;

    snapshot_status(&scheduler, &feed, &positions, start)
        .save_or_warn(args.output_dir.join("live_status_final.json"));

    println!("\n=== Session Summary ===");
    println!("Predictions: {}", feed.emitted());
    println!("Positions: {}", positions.positions_logged());
    let totals = activity_totals(&store.get_gestures()?, config.seconds_per_prediction);
    for total in totals {
        println!("  {:<20} {}", total.label, format_duration(total.seconds));
    }

    Ok(())
}

fn snapshot_status(
    scheduler: &PredictionScheduler,
    feed: &PredictionFeed,
    positions: &PositionLogger,
    start: Instant,
) -> LiveStatus {
    let mut status = LiveStatus::new(scheduler.window().capacity());
    status.uptime_seconds = start.elapsed().as_secs();
    status.running = scheduler.is_running();
    status.model_loaded = scheduler.adapter().is_loaded();
    status.window_len = scheduler.window().len().unwrap_or(0);
    status.predictions_emitted = feed.emitted();
    if let Some(last) = feed.latest() {
        status.last_label = Some(last.label);
        status.last_prediction_at = Some(last.timestamp);
    }
    status.positions_logged = positions.positions_logged();
    status
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
