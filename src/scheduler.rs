use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::assembler::SampleAssembler;
use crate::config::PipelineConfig;
use crate::error::{lock_poisoned, InferenceError, Result, TrackerError};
use crate::handoff::HandoffStore;
use crate::inference::InferenceAdapter;
use crate::sensors::{subscribe_accel, subscribe_gyro, SensorHub, SensorKind, Subscription};
use crate::storage::GestureStore;
use crate::types::{AccelData, BackgroundFetchResult, GestureLabel, GyroData, PredictionEvent};
use crate::window::SharedWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Stopped,
    Running,
}

// ─── Observers ───────────────────────────────────────────────────────────────

/// Receives every emitted prediction, in emission order.
pub trait PredictionObserver: Send + Sync {
    fn on_prediction(&self, event: &PredictionEvent) -> Result<()>;
}

/// Fan-out list of observers. A failing observer is logged and skipped.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Arc<Mutex<Vec<Arc<dyn PredictionObserver>>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn PredictionObserver>) -> Result<()> {
        let mut observers = self.observers.lock().map_err(|_| lock_poisoned("observer"))?;
        observers.push(observer);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.observers.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every observer; returns how many accepted it.
    pub fn notify(&self, event: &PredictionEvent) -> usize {
        // Clone the list so observers may register others without deadlocking
        let observers = match self.observers.lock() {
            Ok(o) => o.clone(),
            Err(_) => {
                log::error!("Failed to acquire observer lock, dropping {}", event.label);
                return 0;
            }
        };

        let mut delivered = 0;
        for observer in observers {
            match observer.on_prediction(event) {
                Ok(()) => delivered += 1,
                Err(e) => log::warn!("Observer rejected {} prediction: {}", event.label, e),
            }
        }
        delivered
    }
}

/// Appends every prediction to a `GestureStore`.
pub struct StorageObserver {
    store: Arc<dyn GestureStore>,
}

impl StorageObserver {
    pub fn new(store: Arc<dyn GestureStore>) -> Self {
        Self { store }
    }
}

impl PredictionObserver for StorageObserver {
    fn on_prediction(&self, event: &PredictionEvent) -> Result<()> {
        self.store.add_gesture(event.label, Some(event.timestamp))?;
        Ok(())
    }
}

/// Latest-value state store for UI consumers.
pub struct PredictionFeed {
    tx: watch::Sender<Option<PredictionEvent>>,
    emitted: AtomicU64,
}

impl PredictionFeed {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            emitted: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PredictionEvent>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<PredictionEvent> {
        self.tx.borrow().clone()
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for PredictionFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictionObserver for PredictionFeed {
    fn on_prediction(&self, event: &PredictionEvent) -> Result<()> {
        self.tx.send_replace(Some(event.clone()));
        self.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ─── Prediction cycle ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum CycleOutcome {
    Emitted(PredictionEvent),
    Skipped,
    Failed,
}

impl From<CycleOutcome> for BackgroundFetchResult {
    fn from(outcome: CycleOutcome) -> Self {
        match outcome {
            CycleOutcome::Emitted(_) => BackgroundFetchResult::NewData,
            CycleOutcome::Skipped => BackgroundFetchResult::NoData,
            CycleOutcome::Failed => BackgroundFetchResult::Failed,
        }
    }
}

/// Everything one snapshot → infer → trim → emit pass needs.
#[derive(Clone)]
struct Cycle {
    window: SharedWindow,
    recent: SharedWindow,
    adapter: Arc<InferenceAdapter>,
    observers: ObserverSet,
    handoff: Option<HandoffStore>,
    retain: usize,
    gate: Arc<Mutex<u64>>,
}

impl Cycle {
    /// `epoch` is the session that scheduled this cycle; `None` runs ungated.
    ///
    /// The gate is held from the epoch check through emission and hand-off,
    /// so a cycle of a stopped session has no effect at all.
    fn run(&self, epoch: Option<u64>) -> CycleOutcome {
        let classified = self.classify();

        let active = match self.gate.lock() {
            Ok(active) => active,
            Err(_) => {
                log::error!("Failed to acquire epoch lock, dropping cycle");
                return CycleOutcome::Failed;
            }
        };
        if let Some(epoch) = epoch {
            if *active != epoch {
                log::debug!("Discarding cycle from stopped session (epoch {})", epoch);
                return CycleOutcome::Skipped;
            }
        }

        let outcome = match classified {
            Ok(label) => {
                if let Err(e) = self.window.trim(self.retain) {
                    log::error!("Window trim failed: {}", e);
                }
                let event = PredictionEvent::new(label);
                let delivered = self.observers.notify(&event);
                log::info!("Prediction: {} ({} observers)", label, delivered);
                CycleOutcome::Emitted(event)
            }
            Err(outcome) => outcome,
        };
        self.persist();
        outcome
    }

    fn classify(&self) -> std::result::Result<GestureLabel, CycleOutcome> {
        let snapshot = self.window.snapshot().map_err(|e| {
            log::error!("Window snapshot failed: {}", e);
            CycleOutcome::Failed
        })?;

        let index = match self.adapter.try_infer(&snapshot) {
            Ok(index) => index,
            Err(e) if e.is_transient() => {
                log::debug!("No prediction: {}", e);
                return Err(CycleOutcome::Skipped);
            }
            Err(e) => {
                log::warn!("Prediction failed: {}", e);
                return Err(CycleOutcome::Failed);
            }
        };

        GestureLabel::from_index(index).ok_or_else(|| {
            log::warn!(
                "Prediction failed: {}",
                InferenceError::InvalidClassifierOutput(format!("class index {} out of range", index))
            );
            CycleOutcome::Failed
        })
    }

    /// Save the latest untrimmed vectors for a background run.
    fn persist(&self) {
        let Some(handoff) = &self.handoff else {
            return;
        };
        let saved = self.recent.snapshot().and_then(|snapshot| handoff.save(&snapshot));
        if let Err(e) = saved {
            log::warn!("Window hand-off failed: {}", e);
        }
    }
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

struct Control {
    state: RunState,
    epoch: u64,
    tasks: Vec<JoinHandle<()>>,
    subscriptions: Vec<Subscription>,
}

/// Owns a listening session: sensor subscriptions, sample ingestion and the
/// periodic prediction timer.
///
/// Each `start` opens a new epoch. `stop` clears the active epoch under the
/// same lock a cycle holds while it emits, so once `stop` returns no cycle of
/// that session can emit or overwrite the hand-off. Observers run under that
/// lock and must not call `start` or `stop`.
///
/// Besides the inference window, which is trimmed after every prediction, the
/// scheduler keeps the most recent `window_size` vectors untrimmed; that copy
/// is what gets handed off to background runs.
pub struct PredictionScheduler {
    config: PipelineConfig,
    hub: Arc<dyn SensorHub>,
    window: SharedWindow,
    recent: SharedWindow,
    adapter: Arc<InferenceAdapter>,
    observers: ObserverSet,
    handoff: Option<HandoffStore>,
    gate: Arc<Mutex<u64>>,
    control: Mutex<Control>,
}

impl PredictionScheduler {
    pub fn new(config: PipelineConfig, hub: Arc<dyn SensorHub>, adapter: Arc<InferenceAdapter>) -> Self {
        Self {
            window: SharedWindow::new(config.window_size),
            recent: SharedWindow::new(config.window_size),
            config,
            hub,
            adapter,
            observers: ObserverSet::new(),
            handoff: None,
            gate: Arc::new(Mutex::new(0)),
            control: Mutex::new(Control {
                state: RunState::Stopped,
                epoch: 0,
                tasks: Vec::new(),
                subscriptions: Vec::new(),
            }),
        }
    }

    /// Persist the latest full window after every cycle and on stop.
    pub fn with_handoff(mut self, handoff: HandoffStore) -> Self {
        self.handoff = Some(handoff);
        self
    }

    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    pub fn window(&self) -> &SharedWindow {
        &self.window
    }

    pub fn adapter(&self) -> &Arc<InferenceAdapter> {
        &self.adapter
    }

    pub fn is_running(&self) -> bool {
        self.gate.lock().map(|active| *active != 0).unwrap_or(false)
    }

    pub fn state(&self) -> Result<RunState> {
        let control = self.control.lock().map_err(|_| lock_poisoned("scheduler"))?;
        Ok(control.state)
    }

    /// Stopped → Running. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut control = self.control.lock().map_err(|_| lock_poisoned("scheduler"))?;
        if control.state == RunState::Running {
            return Err(TrackerError::AlreadyRunning);
        }

        let runtime = Handle::try_current()
            .map_err(|e| TrackerError::Internal(format!("No tokio runtime: {}", e)))?;
        self.hub.check_permission(SensorKind::Accelerometer)?;
        self.hub.check_permission(SensorKind::Gyroscope)?;

        self.window.clear()?;
        self.recent.clear()?;
        control.epoch += 1;
        let epoch = control.epoch;

        let (accel_tx, accel_rx) = mpsc::channel(self.config.channel_capacity);
        let (gyro_tx, gyro_rx) = mpsc::channel(self.config.channel_capacity);
        let assembler = SampleAssembler::new(self.config.cutoff_hz, self.config.sample_rate_hz);

        control.tasks.push(runtime.spawn(ingest(
            accel_rx,
            gyro_rx,
            assembler,
            self.window.clone(),
            self.recent.clone(),
        )));
        control
            .subscriptions
            .push(subscribe_gyro(self.hub.clone(), self.config.sensor_interval(), gyro_tx));
        control
            .subscriptions
            .push(subscribe_accel(self.hub.clone(), self.config.sensor_interval(), accel_tx));

        let cycle = self.cycle();
        let period = self.config.prediction_period();
        control.tasks.push(runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cycle.run(Some(epoch));
            }
        }));

        *self.gate.lock().map_err(|_| lock_poisoned("epoch"))? = epoch;
        control.state = RunState::Running;
        log::info!(
            "Listening started (epoch {}, prediction every {:?})",
            epoch,
            period
        );
        Ok(())
    }

    /// Running → Stopped. No event is emitted after this returns.
    pub fn stop(&self) -> Result<()> {
        let mut control = self.control.lock().map_err(|_| lock_poisoned("scheduler"))?;
        if control.state == RunState::Stopped {
            return Err(TrackerError::NotRunning);
        }

        *self.gate.lock().map_err(|_| lock_poisoned("epoch"))? = 0;
        for task in control.tasks.drain(..) {
            task.abort();
        }
        control.subscriptions.clear();
        control.state = RunState::Stopped;

        self.cycle().persist();
        log::info!("Listening stopped (epoch {})", control.epoch);
        Ok(())
    }

    /// One prediction cycle on the current window, whether or not a session is running.
    pub fn run_once(&self) -> BackgroundFetchResult {
        self.cycle().run(None).into()
    }

    fn cycle(&self) -> Cycle {
        Cycle {
            window: self.window.clone(),
            recent: self.recent.clone(),
            adapter: self.adapter.clone(),
            observers: self.observers.clone(),
            handoff: self.handoff.clone(),
            retain: self.config.retain_after_inference,
            gate: self.gate.clone(),
        }
    }
}

impl Drop for PredictionScheduler {
    fn drop(&mut self) {
        if let Ok(control) = self.control.get_mut() {
            for task in control.tasks.drain(..) {
                task.abort();
            }
        }
    }
}

async fn ingest(
    mut accel_rx: mpsc::Receiver<AccelData>,
    mut gyro_rx: mpsc::Receiver<GyroData>,
    mut assembler: SampleAssembler,
    window: SharedWindow,
    recent: SharedWindow,
) {
    loop {
        tokio::select! {
            biased;
            Some(gyro) = gyro_rx.recv() => assembler.feed_gyro(&gyro),
            accel = accel_rx.recv() => {
                let Some(accel) = accel else {
                    break;
                };
                let appended = assembler
                    .feed_accel_into(&accel, &window)
                    .and_then(|vector| recent.append(vector));
                if let Err(e) = appended {
                    log::error!("Dropping sample stream: {}", e);
                    break;
                }
            }
        }
    }
    log::debug!(
        "Ingestion finished after {} accel / {} gyro samples",
        assembler.accel_count(),
        assembler.gyro_count()
    );
}
