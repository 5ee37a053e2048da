//! Aggregates over stored predictions and positions: time per activity,
//! per-day histories and the position trail behind the map view.
//!
//! Each prediction is credited with a fixed number of seconds
//! (`PipelineConfig::seconds_per_prediction`). Calendar days are UTC.

use chrono::{DateTime, Days, NaiveDate, Utc};
use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::storage::{GestureRecord, PositionRecord};
use crate::types::GestureLabel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTotal {
    pub label: GestureLabel,
    pub predictions: usize,
    pub seconds: u64,
}

/// Time per activity, longest first. Labels never predicted are omitted.
pub fn activity_totals(gestures: &[GestureRecord], seconds_per_prediction: u64) -> Vec<ActivityTotal> {
    let mut counts: BTreeMap<GestureLabel, usize> = BTreeMap::new();
    for gesture in gestures {
        *counts.entry(gesture.label).or_default() += 1;
    }

    let mut totals: Vec<ActivityTotal> = counts
        .into_iter()
        .map(|(label, predictions)| ActivityTotal {
            label,
            predictions,
            seconds: predictions as u64 * seconds_per_prediction,
        })
        .collect();
    // Stable: equal durations keep label order
    totals.sort_by(|a, b| b.seconds.cmp(&a.seconds));
    totals
}

/// Split ranked totals into the first `n` and the rest.
pub fn split_podium(mut totals: Vec<ActivityTotal>, n: usize) -> (Vec<ActivityTotal>, Vec<ActivityTotal>) {
    let rest = totals.split_off(n.min(totals.len()));
    (totals, rest)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
}

impl Period {
    pub fn days(self) -> u64 {
        match self {
            Period::Day => 1,
            Period::Week => 7,
            Period::Month => 30,
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "1d" => Ok(Period::Day),
            "week" | "7d" => Ok(Period::Week),
            "month" | "30d" => Ok(Period::Month),
            other => Err(format!("unknown period: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyDuration {
    pub date: NaiveDate,
    pub seconds: u64,
}

/// One entry per day of `period` ending at `today`, oldest first. Days
/// without predictions are kept with zero seconds.
pub fn daily_durations(
    gestures: &[GestureRecord],
    label: GestureLabel,
    period: Period,
    today: NaiveDate,
    seconds_per_prediction: u64,
) -> Vec<DailyDuration> {
    (0..period.days())
        .rev()
        .filter_map(|back| today.checked_sub_days(Days::new(back)))
        .map(|date| {
            let count = gestures
                .iter()
                .filter(|g| g.label == label && g.timestamp.date_naive() == date)
                .count();
            DailyDuration {
                date,
                seconds: count as u64 * seconds_per_prediction,
            }
        })
        .collect()
}

/// `"1h 30m 0s"`; hours and minutes are left out when zero.
pub fn format_duration(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;

    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h ", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m ", m));
    }
    out.push_str(&format!("{}s", s));
    out
}

/// Position recorded nearest in time to `at`; the earliest-listed wins ties.
pub fn closest_position(at: DateTime<Utc>, positions: &[PositionRecord]) -> Option<&PositionRecord> {
    let gap = |p: &PositionRecord| (p.timestamp - at).num_milliseconds().unsigned_abs();
    positions.iter().fold(None, |best, candidate| match best {
        Some(current) if gap(candidate) >= gap(current) => Some(current),
        _ => Some(candidate),
    })
}

/// A prediction pinned to the position logged closest to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailPoint {
    pub label: GestureLabel,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Predictions made on `day`, each placed at the closest position from that
/// same day. Empty when no position was logged that day.
pub fn activity_trail(
    gestures: &[GestureRecord],
    positions: &[PositionRecord],
    day: NaiveDate,
) -> Vec<TrailPoint> {
    let same_day: Vec<PositionRecord> = positions
        .iter()
        .filter(|p| p.timestamp.date_naive() == day)
        .cloned()
        .collect();

    gestures
        .iter()
        .filter(|g| g.timestamp.date_naive() == day)
        .filter_map(|g| {
            closest_position(g.timestamp, &same_day).map(|p| TrailPoint {
                label: g.label,
                timestamp: g.timestamp,
                latitude: p.latitude,
                longitude: p.longitude,
            })
        })
        .collect()
}

/// Metres travelled per activity; each leg is credited to the activity at its start.
pub fn distance_by_activity(trail: &[TrailPoint]) -> Vec<(GestureLabel, f64)> {
    let mut meters: BTreeMap<GestureLabel, f64> = BTreeMap::new();
    for leg in trail.windows(2) {
        let from = Point::new(leg[0].longitude, leg[0].latitude);
        let to = Point::new(leg[1].longitude, leg[1].latitude);
        *meters.entry(leg[0].label).or_default() += from.haversine_distance(&to);
    }
    meters.into_iter().collect()
}
