use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::error::{lock_poisoned, Result};
use crate::sensors::{SensorHub, SensorKind};
use crate::storage::GestureStore;

/// Periodically records the device position into the store.
pub struct PositionLogger {
    hub: Arc<dyn SensorHub>,
    store: Arc<dyn GestureStore>,
    period: Duration,
    logged: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PositionLogger {
    pub fn new(hub: Arc<dyn SensorHub>, store: Arc<dyn GestureStore>, period: Duration) -> Self {
        Self {
            hub,
            store,
            period,
            logged: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Log one position now and then every period. Returns `false` if already logging.
    pub fn start(&self) -> Result<bool> {
        let mut task = self.task.lock().map_err(|_| lock_poisoned("position logger"))?;
        if task.is_some() {
            return Ok(false);
        }
        self.hub.check_permission(SensorKind::Location)?;

        let hub = self.hub.clone();
        let store = self.store.clone();
        let logged = self.logged.clone();
        let period = self.period;
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(fix) = hub.read_position() else {
                    log::debug!("No position fix available");
                    continue;
                };
                match store.add_position(fix.latitude, fix.longitude, None) {
                    Ok(record) => {
                        logged.fetch_add(1, Ordering::Relaxed);
                        log::debug!(
                            "Position #{}: {:.6}, {:.6}",
                            record.id,
                            record.latitude,
                            record.longitude
                        );
                    }
                    Err(e) => log::warn!("Failed to store position: {}", e),
                }
            }
        }));
        log::info!("Position logging started (every {:?})", period);
        Ok(true)
    }

    /// Returns `false` if it was not logging.
    pub fn stop(&self) -> Result<bool> {
        let mut task = self.task.lock().map_err(|_| lock_poisoned("position logger"))?;
        match task.take() {
            Some(handle) => {
                handle.abort();
                log::info!("Position logging stopped");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().map(|t| t.is_some()).unwrap_or(false)
    }

    pub fn positions_logged(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }
}

impl Drop for PositionLogger {
    fn drop(&mut self) {
        if let Ok(task) = self.task.get_mut() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::sensors::MockSensorHub;
    use crate::storage::JsonFileStore;
    use tokio::time::sleep;

    fn logger(hub: MockSensorHub) -> (PositionLogger, Arc<JsonFileStore>) {
        let store = Arc::new(JsonFileStore::in_memory());
        let logger = PositionLogger::new(Arc::new(hub), store.clone(), Duration::from_millis(5000));
        (logger, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_logs_immediately_then_periodically() {
        let (logger, store) = logger(MockSensorHub::new());
        assert!(logger.start().unwrap());

        sleep(Duration::from_millis(10)).await;
        assert_eq!(store.get_all_positions().unwrap().len(), 1);

        sleep(Duration::from_millis(10_000)).await;
        // Ticks at 0, 5 s and 10 s
        assert_eq!(store.get_all_positions().unwrap().len(), 3);
        assert_eq!(logger.positions_logged(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_noop() {
        let (logger, store) = logger(MockSensorHub::new());
        assert!(logger.start().unwrap());
        assert!(!logger.start().unwrap());

        sleep(Duration::from_millis(10)).await;
        assert_eq!(store.get_all_positions().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_logging() {
        let (logger, store) = logger(MockSensorHub::new());
        logger.start().unwrap();
        sleep(Duration::from_millis(10)).await;

        assert!(logger.stop().unwrap());
        assert!(!logger.stop().unwrap());
        sleep(Duration::from_secs(60)).await;
        assert_eq!(store.get_all_positions().unwrap().len(), 1);
        assert!(!logger.is_running());
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let (logger, _store) = logger(MockSensorHub::new().deny_location());
        assert!(matches!(
            logger.start(),
            Err(TrackerError::SensorPermissionDenied(_))
        ));
        assert!(!logger.is_running());
    }
}
