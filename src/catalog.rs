use crate::error::{Result, SynthError};
use crate::geo_key::GeoKey;
use crate::types::datetime_format;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// A configured service outage affecting a set of geo-keys for a fixed window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutageEvent {
    event_id: u32,
    geo_keys: BTreeSet<GeoKey>,
    #[serde(with = "datetime_format")]
    window_start: NaiveDateTime,
    #[serde(with = "datetime_format")]
    window_end: NaiveDateTime,
}

impl OutageEvent {
    pub fn new<I, K>(
        event_id: u32,
        geo_keys: I,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        if event_id == 0 {
            return Err(SynthError::InvalidEvent {
                event_id,
                message: "event id must be positive".to_string(),
            });
        }
        if window_end <= window_start {
            return Err(SynthError::InvalidEvent {
                event_id,
                message: format!("window end {} is not after start {}", window_end, window_start),
            });
        }

        let geo_keys: BTreeSet<GeoKey> = geo_keys
            .into_iter()
            .map(|k| GeoKey::normalize(k.as_ref()))
            .filter(|k| !k.is_empty())
            .collect();

        Ok(Self {
            event_id,
            geo_keys,
            window_start,
            window_end,
        })
    }

    pub fn event_id(&self) -> u32 {
        self.event_id
    }

    pub fn geo_keys(&self) -> &BTreeSet<GeoKey> {
        &self.geo_keys
    }

    pub fn window_start(&self) -> NaiveDateTime {
        self.window_start
    }

    pub fn window_end(&self) -> NaiveDateTime {
        self.window_end
    }

    pub fn duration(&self) -> Duration {
        self.window_end - self.window_start
    }

    /// Inclusive on both ends
    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        self.window_start <= instant && instant <= self.window_end
    }
}

/// Immutable registry of the outage events for one run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventCatalog {
    events: Vec<OutageEvent>,
}

impl EventCatalog {
    pub fn new(events: Vec<OutageEvent>) -> Result<Self> {
        let mut seen = HashSet::new();
        for event in &events {
            if !seen.insert(event.event_id) {
                return Err(SynthError::Config(format!(
                    "event id {} is declared more than once",
                    event.event_id
                )));
            }
        }
        Ok(Self { events })
    }

    pub fn events(&self) -> &[OutageEvent] {
        &self.events
    }

    pub fn get(&self, event_id: u32) -> Option<&OutageEvent> {
        self.events.iter().find(|e| e.event_id == event_id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether the instant falls inside any event window (inclusive)
    pub fn in_any_window(&self, instant: NaiveDateTime) -> bool {
        self.events.iter().any(|e| e.contains(instant))
    }
}

/// Compile-time instant in November 2025; an invalid literal fails the build
const fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    match (
        NaiveDate::from_ymd_opt(2025, 11, day),
        NaiveTime::from_hms_opt(hour, minute, 0),
    ) {
        (Some(date), Some(time)) => NaiveDateTime::new(date, time),
        _ => panic!("invalid built-in timestamp"),
    }
}

/// Raw definition of a built-in outage event
#[derive(Debug, Clone, Copy)]
pub struct DefaultEvent {
    pub event_id: u32,
    pub geo_keys: &'static [&'static str],
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// The five outage events of the November 2025 demo dataset
pub const DEFAULT_EVENTS: [DefaultEvent; 5] = [
    DefaultEvent { event_id: 1, geo_keys: &["75201", "75234", "75219", "75232"], start: at(16, 10, 15), end: at(16, 11, 32) },
    DefaultEvent { event_id: 2, geo_keys: &["06673", "06604"], start: at(18, 13, 11), end: at(18, 14, 21) },
    DefaultEvent { event_id: 3, geo_keys: &["75209", "75228", "75230"], start: at(19, 10, 32), end: at(19, 12, 1) },
    DefaultEvent { event_id: 4, geo_keys: &["06611", "06606"], start: at(20, 14, 20), end: at(20, 15, 25) },
    DefaultEvent { event_id: 5, geo_keys: &["75217", "75252"], start: at(21, 11, 5), end: at(21, 12, 20) },
];

/// Default global range for background timestamps
pub const DEFAULT_BACKGROUND_START: NaiveDateTime = at(16, 8, 0);
pub const DEFAULT_BACKGROUND_END: NaiveDateTime = at(21, 20, 0);

/// Validated catalog of [`DEFAULT_EVENTS`]
pub fn default_catalog() -> Result<EventCatalog> {
    let events = DEFAULT_EVENTS
        .iter()
        .map(|e| OutageEvent::new(e.event_id, e.geo_keys.iter(), e.start, e.end))
        .collect::<Result<Vec<_>>>()?;
    EventCatalog::new(events)
}
