//! Call-volume aggregation around outage windows.
//!
//! This is the data the dashboards plot: time-binned volume, an
//! hour-of-day histogram, and how far each window rises above the volume
//! seen outside every window.

use crate::catalog::EventCatalog;
use crate::error::{Result, SynthError};
use crate::types::{datetime_format, TimestampAssignment};
use chrono::{Duration, NaiveDateTime, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;

/// Bin width used by the outage volume plots
pub const DEFAULT_BIN_MINUTES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeBin {
    #[serde(with = "datetime_format")]
    pub start: NaiveDateTime,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSurge {
    pub event_id: u32,
    pub window_minutes: i64,
    /// Every record whose instant falls in the window
    pub in_window: usize,
    /// Records labelled with this event
    pub labelled: usize,
    pub calls_per_bin: f64,
    /// `calls_per_bin` over the baseline; `None` when there is no baseline
    pub surge_ratio: Option<f64>,
    /// Occupied bins of the calls labelled with this event, in time order
    pub series: Vec<VolumeBin>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurgeSummary {
    pub bin_minutes: u32,
    pub total: usize,
    pub bins: Vec<VolumeBin>,
    pub peak: Option<VolumeBin>,
    pub by_hour: Vec<usize>,
    /// Mean count of bins that touch no outage window
    pub baseline_per_bin: f64,
    pub events: Vec<EventSurge>,
}

fn floor_to_bin(instant: NaiveDateTime, bin_seconds: i64) -> NaiveDateTime {
    // NaiveDateTime::default() is the Unix epoch
    let epoch = NaiveDateTime::default();
    let secs = (instant - epoch).num_seconds();
    epoch + Duration::seconds(secs.div_euclid(bin_seconds) * bin_seconds)
}

fn bin_counts<'a>(
    assignments: impl Iterator<Item = &'a TimestampAssignment>,
    bin_seconds: i64,
) -> BTreeMap<NaiveDateTime, usize> {
    let mut counts = BTreeMap::new();
    for a in assignments {
        *counts.entry(floor_to_bin(a.instant, bin_seconds)).or_default() += 1;
    }
    counts
}

impl SurgeSummary {
    pub fn from_assignments(
        assignments: &[TimestampAssignment],
        catalog: &EventCatalog,
        bin_minutes: u32,
    ) -> Result<Self> {
        if bin_minutes == 0 {
            return Err(SynthError::Config("bin_minutes must be positive".to_string()));
        }
        let bin = Duration::minutes(i64::from(bin_minutes));
        let bin_seconds = bin.num_seconds();

        let counts = bin_counts(assignments.iter(), bin_seconds);
        let mut by_hour = vec![0usize; 24];
        for a in assignments {
            by_hour[a.instant.hour() as usize] += 1;
        }

        // Dense bins from the first to the last occupied bin
        let mut bins = Vec::new();
        if let (Some(&first), Some(&last)) = (counts.keys().next(), counts.keys().next_back()) {
            let mut cursor = first;
            while cursor <= last {
                bins.push(VolumeBin {
                    start: cursor,
                    count: counts.get(&cursor).copied().unwrap_or(0),
                });
                cursor += bin;
            }
        }

        let touches_window = |start: NaiveDateTime| {
            catalog
                .events()
                .iter()
                .any(|e| start <= e.window_end() && start + bin > e.window_start())
        };
        let quiet: Vec<usize> = bins
            .iter()
            .filter(|b| !touches_window(b.start))
            .map(|b| b.count)
            .collect();
        let baseline_per_bin = if quiet.is_empty() {
            0.0
        } else {
            quiet.iter().sum::<usize>() as f64 / quiet.len() as f64
        };

        let events = catalog
            .events()
            .iter()
            .map(|e| {
                let in_window = assignments.iter().filter(|a| e.contains(a.instant)).count();
                let series: Vec<VolumeBin> = bin_counts(
                    assignments.iter().filter(|a| a.event_id == Some(e.event_id())),
                    bin_seconds,
                )
                .into_iter()
                .map(|(start, count)| VolumeBin { start, count })
                .collect();
                let labelled = series.iter().map(|b| b.count).sum();
                let window_minutes = e.duration().num_minutes();
                let bins_in_window = (window_minutes as f64 / f64::from(bin_minutes)).max(1.0);
                let calls_per_bin = in_window as f64 / bins_in_window;
                EventSurge {
                    event_id: e.event_id(),
                    window_minutes,
                    in_window,
                    labelled,
                    calls_per_bin,
                    surge_ratio: (baseline_per_bin > 0.0).then(|| calls_per_bin / baseline_per_bin),
                    series,
                }
            })
            .collect();

        let peak = bins.iter().max_by_key(|b| b.count).cloned();

        Ok(Self {
            bin_minutes,
            total: assignments.len(),
            bins,
            peak,
            by_hour,
            baseline_per_bin,
            events,
        })
    }
}
