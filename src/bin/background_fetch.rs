use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;
use std::sync::Arc;

use activity_tracker_rs::{
    BackgroundFetchResult, BackgroundPredictor, DenseModelLoader, HandoffStore, InferenceAdapter,
    JsonFileStore, ModelDescriptor, PipelineConfig, StorageObserver,
};

/// One background prediction over the window left by the foreground session.
///
/// Prints the fetch result (`"newData"`, `"noData"` or `"failed"`) as JSON on
/// stdout for the invoking task runner.
#[derive(Parser, Debug)]
#[command(name = "background_fetch")]
struct Args {
    /// Dense classifier weights (JSON)
    #[arg(long)]
    model: PathBuf,

    /// Pipeline configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session directory shared with `activity_tracker`
    #[arg(long, default_value = "activity_sessions")]
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let adapter = Arc::new(InferenceAdapter::new(&config));
    let predictor = BackgroundPredictor::new(
        adapter,
        HandoffStore::new(args.output_dir.join("window.json")),
    );

    let result = match prepare(&predictor, &args) {
        Ok(()) => predictor.run_once(),
        Err(e) => {
            log::error!("Background fetch setup failed: {:#}", e);
            BackgroundFetchResult::Failed
        }
    };

    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

fn prepare(predictor: &BackgroundPredictor, args: &Args) -> Result<()> {
    predictor
        .prepare(&DenseModelLoader, &ModelDescriptor::new(&args.model))
        .with_context(|| format!("loading model {}", args.model.display()))?;
    let store = JsonFileStore::open(args.output_dir.join("store.json"))?;
    predictor
        .observers()
        .add(Arc::new(StorageObserver::new(Arc::new(store))))?;
    Ok(())
}
