use crate::catalog::EventCatalog;
use crate::error::{Result, SynthError};
use chrono::{Duration, NaiveDateTime};
use rand::Rng;
use tracing::warn;

/// Default rejection-sampling attempt cap
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10_000;

/// Uniform draws over a global range that never land inside an outage window
#[derive(Debug, Clone)]
pub struct BackgroundSampler {
    range_start: NaiveDateTime,
    range_end: NaiveDateTime,
    windows: Vec<(NaiveDateTime, NaiveDateTime)>,
    max_attempts: u32,
}

impl BackgroundSampler {
    pub fn new(
        range_start: NaiveDateTime,
        range_end: NaiveDateTime,
        catalog: &EventCatalog,
        max_attempts: u32,
    ) -> Result<Self> {
        if range_end < range_start {
            return Err(SynthError::Config(format!(
                "background range end {} is before start {}",
                range_end, range_start
            )));
        }
        if max_attempts == 0 {
            return Err(SynthError::Config(
                "background max_attempts must be at least 1".to_string(),
            ));
        }

        let windows = catalog
            .events()
            .iter()
            .map(|e| (e.window_start(), e.window_end()))
            .collect();
        let sampler = Self {
            range_start,
            range_end,
            windows,
            max_attempts,
        };

        if sampler.free_seconds() == 0 {
            return Err(SynthError::Config(
                "outage windows cover the whole background range".to_string(),
            ));
        }
        Ok(sampler)
    }

    pub fn range(&self) -> (NaiveDateTime, NaiveDateTime) {
        (self.range_start, self.range_end)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn in_window(&self, instant: NaiveDateTime) -> bool {
        self.windows
            .iter()
            .any(|(start, end)| *start <= instant && instant <= *end)
    }

    /// Draw whole-second instants from the closed range until one falls
    /// outside every window, giving up after `max_attempts`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<NaiveDateTime> {
        let total = (self.range_end - self.range_start).num_seconds();
        for _ in 0..self.max_attempts {
            let candidate = self.range_start + Duration::seconds(rng.gen_range(0..=total));
            if !self.in_window(candidate) {
                return Ok(candidate);
            }
        }
        warn!(
            "Background sampler exhausted {} attempts without leaving outage windows",
            self.max_attempts
        );
        Err(SynthError::BackgroundExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Number of whole-second candidates in the range that no window covers
    pub fn free_seconds(&self) -> i64 {
        let total = (self.range_end - self.range_start).num_seconds();

        let mut covered: Vec<(i64, i64)> = self
            .windows
            .iter()
            .map(|(start, end)| {
                (
                    (*start - self.range_start).num_seconds().max(0),
                    (*end - self.range_start).num_seconds().min(total),
                )
            })
            .filter(|(s, e)| s <= e)
            .collect();
        covered.sort_unstable();

        let mut merged: Vec<(i64, i64)> = Vec::with_capacity(covered.len());
        for (s, e) in covered {
            match merged.last_mut() {
                Some(last) if s <= last.1 + 1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }

        let covered_seconds: i64 = merged.iter().map(|(s, e)| e - s + 1).sum();
        total + 1 - covered_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{default_catalog, OutageEvent};
    use crate::types::datetime_format;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ts(s: &str) -> NaiveDateTime {
        datetime_format::parse(s).unwrap()
    }

    fn default_sampler() -> BackgroundSampler {
        BackgroundSampler::new(
            ts("2025-11-16 08:00:00"),
            ts("2025-11-21 20:00:00"),
            &default_catalog().unwrap(),
            DEFAULT_MAX_ATTEMPTS,
        )
        .unwrap()
    }

    #[test]
    fn test_background_never_lands_in_a_window() {
        let catalog = default_catalog().unwrap();
        let sampler = default_sampler();
        let (start, end) = sampler.range();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20_000 {
            let t = sampler.sample(&mut rng).unwrap();
            assert!(start <= t && t <= end);
            for event in catalog.events() {
                assert!(!event.contains(t), "{t} fell inside event {}", event.event_id());
            }
        }
    }

    #[test]
    fn test_fully_covered_range_is_rejected_up_front() {
        let event = OutageEvent::new(1, ["1"], ts("2025-11-16 08:00:00"), ts("2025-11-16 09:00:00")).unwrap();
        let catalog = EventCatalog::new(vec![event]).unwrap();
        let err = BackgroundSampler::new(
            ts("2025-11-16 08:10:00"),
            ts("2025-11-16 08:50:00"),
            &catalog,
            100,
        )
        .unwrap_err();
        assert!(matches!(err, SynthError::Config(_)));
    }

    #[test]
    fn test_attempt_cap_surfaces_an_error() {
        // One free second out of an hour: a single attempt almost never finds it
        let event = OutageEvent::new(1, ["1"], ts("2025-11-16 08:00:01"), ts("2025-11-16 09:00:00")).unwrap();
        let catalog = EventCatalog::new(vec![event]).unwrap();
        let sampler = BackgroundSampler::new(
            ts("2025-11-16 08:00:00"),
            ts("2025-11-16 09:00:00"),
            &catalog,
            1,
        )
        .unwrap();
        assert_eq!(sampler.free_seconds(), 1);

        let mut rng = StdRng::seed_from_u64(1);
        let failures = (0..200)
            .filter(|_| matches!(sampler.sample(&mut rng), Err(SynthError::BackgroundExhausted { attempts: 1 })))
            .count();
        assert!(failures > 150);
    }

    #[test]
    fn test_invalid_construction() {
        let catalog = default_catalog().unwrap();
        assert!(BackgroundSampler::new(
            ts("2025-11-21 20:00:00"),
            ts("2025-11-16 08:00:00"),
            &catalog,
            10
        )
        .is_err());
        assert!(BackgroundSampler::new(
            ts("2025-11-16 08:00:00"),
            ts("2025-11-21 20:00:00"),
            &catalog,
            0
        )
        .is_err());
    }

    #[test]
    fn test_free_seconds_merges_overlapping_windows() {
        let a = OutageEvent::new(1, ["1"], ts("2025-11-16 08:00:00"), ts("2025-11-16 08:30:00")).unwrap();
        let b = OutageEvent::new(2, ["2"], ts("2025-11-16 08:20:00"), ts("2025-11-16 08:40:00")).unwrap();
        let catalog = EventCatalog::new(vec![a, b]).unwrap();
        let sampler = BackgroundSampler::new(
            ts("2025-11-16 08:00:00"),
            ts("2025-11-16 09:00:00"),
            &catalog,
            10,
        )
        .unwrap();
        // 3601 candidates, 08:00:00..=08:40:00 covered
        assert_eq!(sampler.free_seconds(), 3601 - 2401);
    }
}
