use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::error::{Result, TrackerError};
use crate::types::{AccelData, GpsData, GyroData};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    Location,
}

impl SensorKind {
    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Gyroscope => "gyroscope",
            SensorKind::Location => "location",
        }
    }
}

/// Device sensors. Reads are non-blocking snapshots of the latest value.
pub trait SensorHub: Send + Sync {
    fn check_permission(&self, kind: SensorKind) -> Result<()>;
    fn read_accel(&self) -> Option<AccelData>;
    fn read_gyro(&self) -> Option<GyroData>;
    fn read_position(&self) -> Option<GpsData>;
}

/// A running sensor listener. Dropping it unsubscribes.
pub struct Subscription {
    kind: SensorKind,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn remove(self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn subscribe_accel(hub: Arc<dyn SensorHub>, period: Duration, tx: Sender<AccelData>) -> Subscription {
    let handle = tokio::spawn(sample_loop(SensorKind::Accelerometer, period, tx, move || hub.read_accel()));
    Subscription {
        kind: SensorKind::Accelerometer,
        handle,
    }
}

pub fn subscribe_gyro(hub: Arc<dyn SensorHub>, period: Duration, tx: Sender<GyroData>) -> Subscription {
    let handle = tokio::spawn(sample_loop(SensorKind::Gyroscope, period, tx, move || hub.read_gyro()));
    Subscription {
        kind: SensorKind::Gyroscope,
        handle,
    }
}

async fn sample_loop<T, F>(kind: SensorKind, period: Duration, tx: Sender<T>, mut read: F)
where
    T: Send + 'static,
    F: FnMut() -> Option<T> + Send + 'static,
{
    let mut interval = interval(period);
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;

        let Some(sample) = read() else {
            continue;
        };

        // Awaited send: a slow consumer delays readings, it never drops them
        if tx.send(sample).await.is_err() {
            log::debug!("[{}] Channel closed after {} samples", kind.name(), sample_count);
            break;
        }
        sample_count += 1;
        if sample_count % 500 == 0 {
            log::trace!("[{}] {} samples", kind.name(), sample_count);
        }
    }
}

// ─── Synthetic sensors ───────────────────────────────────────────────────────

/// Synthetic walking-like signals, for demos and tests.
pub struct MockSensorHub {
    accel_ticks: AtomicU64,
    gyro_ticks: AtomicU64,
    gps_ticks: AtomicU64,
    motion_allowed: AtomicBool,
    location_allowed: AtomicBool,
}

impl MockSensorHub {
    pub fn new() -> Self {
        Self {
            accel_ticks: AtomicU64::new(0),
            gyro_ticks: AtomicU64::new(0),
            gps_ticks: AtomicU64::new(0),
            motion_allowed: AtomicBool::new(true),
            location_allowed: AtomicBool::new(true),
        }
    }

    pub fn deny_motion(self) -> Self {
        self.motion_allowed.store(false, Ordering::SeqCst);
        self
    }

    pub fn deny_location(self) -> Self {
        self.location_allowed.store(false, Ordering::SeqCst);
        self
    }

    pub fn accel_reads(&self) -> u64 {
        self.accel_ticks.load(Ordering::SeqCst)
    }
}

impl Default for MockSensorHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorHub for MockSensorHub {
    fn check_permission(&self, kind: SensorKind) -> Result<()> {
        let allowed = match kind {
            SensorKind::Accelerometer | SensorKind::Gyroscope => &self.motion_allowed,
            SensorKind::Location => &self.location_allowed,
        };
        if allowed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TrackerError::SensorPermissionDenied(kind.name().to_string()))
        }
    }

    fn read_accel(&self) -> Option<AccelData> {
        use std::f64::consts::PI;
        let t = self.accel_ticks.fetch_add(1, Ordering::Relaxed) as f64 * 0.02;

        // Expo-style units (g): gravity on z plus a ~2 Hz gait component
        Some(AccelData {
            timestamp: current_timestamp(),
            x: (t * 2.0 * 2.0 * PI).sin() * 0.25,
            y: (t * 2.0 * PI).cos() * 0.15,
            z: 1.0 + (t * 2.0 * 2.0 * PI).sin() * 0.1,
        })
    }

    fn read_gyro(&self) -> Option<GyroData> {
        let t = self.gyro_ticks.fetch_add(1, Ordering::Relaxed) as f64 * 0.02;

        Some(GyroData {
            timestamp: current_timestamp(),
            x: (t * 0.5).sin() * 0.05,
            y: (t * 0.3).cos() * 0.03,
            z: (t * 1.0).sin() * 0.1,
        })
    }

    fn read_position(&self) -> Option<GpsData> {
        let seq = self.gps_ticks.fetch_add(1, Ordering::Relaxed) as f64;

        Some(GpsData {
            timestamp: current_timestamp(),
            latitude: 48.8566 + seq * 0.00001,
            longitude: 2.3522 + seq * 0.00001,
            speed: 1.4,
            bearing: 45.0,
            accuracy: 5.0 + (seq * 0.1).sin() * 2.0,
        })
    }
}

// ─── Termux:API sensors ──────────────────────────────────────────────────────

/// Reads sensors through the `termux-sensor` / `termux-location` CLIs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TermuxSensorHub;

impl SensorHub for TermuxSensorHub {
    fn check_permission(&self, kind: SensorKind) -> Result<()> {
        let program = match kind {
            SensorKind::Accelerometer | SensorKind::Gyroscope => "termux-sensor",
            SensorKind::Location => "termux-location",
        };
        match Command::new(program).arg("-h").output() {
            Ok(_) => Ok(()),
            Err(e) => Err(TrackerError::SensorPermissionDenied(format!(
                "{} unavailable: {}",
                kind.name(),
                e
            ))),
        }
    }

    fn read_accel(&self) -> Option<AccelData> {
        let text = termux_sensor("accelerometer")?;
        let (x, y, z) = parse_xyz(&text)?;
        Some(AccelData { timestamp: current_timestamp(), x, y, z })
    }

    fn read_gyro(&self) -> Option<GyroData> {
        let text = termux_sensor("gyroscope")?;
        let (x, y, z) = parse_xyz(&text)?;
        Some(GyroData { timestamp: current_timestamp(), x, y, z })
    }

    fn read_position(&self) -> Option<GpsData> {
        let output = Command::new("termux-location")
            .arg("-p")
            .arg("gps")
            .arg("-r")
            .arg("once")
            .output()
            .ok()?;
        parse_location(&String::from_utf8_lossy(&output.stdout))
    }
}

fn termux_sensor(name: &str) -> Option<String> {
    let output = Command::new("termux-sensor")
        .arg("-n")
        .arg("1")
        .arg("-s")
        .arg(name)
        .output()
        .ok()?;
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parses `"... x=0.5, y=0.3, z=9.8, accuracy=0, ..."`. All three axes are required.
fn parse_xyz(output: &str) -> Option<(f64, f64, f64)> {
    let mut x = None;
    let mut y = None;
    let mut z = None;

    for part in output.split(|c: char| c == ',' || c == ':') {
        let part = part.trim();
        if let Some(val_str) = part.strip_prefix("x=") {
            x = Some(val_str.trim().parse().ok()?);
        } else if let Some(val_str) = part.strip_prefix("y=") {
            y = Some(val_str.trim().parse().ok()?);
        } else if let Some(val_str) = part.strip_prefix("z=") {
            z = Some(val_str.trim().parse().ok()?);
        }
    }

    Some((x?, y?, z?))
}

fn parse_location(output: &str) -> Option<GpsData> {
    #[derive(serde::Deserialize)]
    struct Location {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        speed: f64,
        #[serde(default)]
        bearing: f64,
        #[serde(default)]
        accuracy: f64,
    }

    let loc: Location = serde_json::from_str(output.trim()).ok()?;
    Some(GpsData {
        timestamp: current_timestamp(),
        latitude: loc.latitude,
        longitude: loc.longitude,
        speed: loc.speed,
        bearing: loc.bearing,
        accuracy: loc.accuracy,
    })
}

pub fn current_timestamp() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_parse_xyz() {
        let text = "Accelerometer event: x=0.5, y=0.3, z=9.8, accuracy=0, timestamp=1234567890";
        assert_eq!(parse_xyz(text), Some((0.5, 0.3, 9.8)));
    }

    #[test]
    fn test_parse_xyz_missing_axis() {
        assert_eq!(parse_xyz("x=0.5, y=0.3"), None);
        assert_eq!(parse_xyz("x=abc, y=0.3, z=1.0"), None);
    }

    #[test]
    fn test_parse_location() {
        let json = r#"{"latitude": 48.85, "longitude": 2.35, "accuracy": 4.0, "speed": 1.2}"#;
        let gps = parse_location(json).unwrap();
        assert_eq!(gps.latitude, 48.85);
        assert_eq!(gps.speed, 1.2);
        assert_eq!(gps.bearing, 0.0);
        assert!(parse_location("not json").is_none());
    }

    #[test]
    fn test_mock_permissions() {
        let hub = MockSensorHub::new().deny_location();
        assert!(hub.check_permission(SensorKind::Accelerometer).is_ok());
        assert!(matches!(
            hub.check_permission(SensorKind::Location),
            Err(TrackerError::SensorPermissionDenied(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_delivers_at_interval() {
        let hub: Arc<dyn SensorHub> = Arc::new(MockSensorHub::new());
        let (tx, mut rx) = mpsc::channel(500);
        let sub = subscribe_accel(hub, Duration::from_millis(20), tx);

        tokio::time::sleep(Duration::from_millis(1010)).await;
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        // Ticks at 0, 20, ..., 1000 ms
        assert!((50..=51).contains(&received), "received {}", received);
        assert_eq!(sub.kind(), SensorKind::Accelerometer);
        sub.remove();
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_stops_delivery() {
        let hub: Arc<dyn SensorHub> = Arc::new(MockSensorHub::new());
        let (tx, mut rx) = mpsc::channel(500);
        let sub = subscribe_gyro(hub, Duration::from_millis(20), tx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        sub.remove();
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_millis(500)).await;
        // Sender dropped with the aborted task
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
