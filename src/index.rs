use crate::catalog::{EventCatalog, OutageEvent};
use crate::error::{Result, SynthError};
use crate::geo_key::GeoKey;
use std::collections::HashMap;
use tracing::debug;

/// Geo-key to owning outage event lookup, built once per run.
///
/// The index owns its copy of the events and is never mutated after
/// [`EventIndex::build`], so it can be shared behind an `Arc` by any number
/// of workers.
#[derive(Debug, Clone)]
pub struct EventIndex {
    events: Vec<OutageEvent>,
    by_key: HashMap<GeoKey, usize>,
}

impl EventIndex {
    /// Flatten every event's keys into the lookup.
    ///
    /// A key claimed by two different events is a configuration bug and is
    /// reported instead of letting the later event win.
    pub fn build(catalog: &EventCatalog) -> Result<Self> {
        let events = catalog.events().to_vec();
        let mut by_key: HashMap<GeoKey, usize> = HashMap::new();

        for (position, event) in events.iter().enumerate() {
            for key in event.geo_keys() {
                if let Some(&owner) = by_key.get(key) {
                    return Err(SynthError::DuplicateGeoKey {
                        key: key.to_string(),
                        first: events[owner].event_id(),
                        second: event.event_id(),
                    });
                }
                by_key.insert(key.clone(), position);
            }
        }

        debug!(
            "Built event index: {} keys across {} events",
            by_key.len(),
            events.len()
        );
        Ok(Self { events, by_key })
    }

    pub fn lookup(&self, key: &GeoKey) -> Option<&OutageEvent> {
        self.by_key.get(key).map(|&i| &self.events[i])
    }

    /// Normalize a raw key and look it up
    pub fn lookup_raw(&self, raw: &str) -> Option<&OutageEvent> {
        self.lookup(&GeoKey::normalize(raw))
    }

    pub fn event(&self, event_id: u32) -> Option<&OutageEvent> {
        self.events.iter().find(|e| e.event_id() == event_id)
    }

    pub fn events(&self) -> &[OutageEvent] {
        &self.events
    }

    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use crate::types::datetime_format;

    #[test]
    fn test_lookup_across_representations() {
        let index = EventIndex::build(&default_catalog().unwrap()).unwrap();
        assert_eq!(index.key_count(), 13);
        assert_eq!(index.lookup_raw("6604").unwrap().event_id(), 2);
        assert_eq!(index.lookup_raw("06604").unwrap().event_id(), 2);
        assert_eq!(index.lookup_raw("6604.0").unwrap().event_id(), 2);
        assert_eq!(index.lookup_raw(" 75252 ").unwrap().event_id(), 5);
    }

    #[test]
    fn test_unknown_and_malformed_keys_miss() {
        let index = EventIndex::build(&default_catalog().unwrap()).unwrap();
        assert!(index.lookup_raw("98101").is_none());
        assert!(index.lookup_raw("not-a-zip").is_none());
        assert!(index.lookup_raw("").is_none());
    }

    #[test]
    fn test_duplicate_ownership_is_reported() {
        let start = datetime_format::parse("2025-11-16 10:00:00").unwrap();
        let end = datetime_format::parse("2025-11-16 11:00:00").unwrap();
        let a = OutageEvent::new(1, ["75201", "75234"], start, end).unwrap();
        let b = OutageEvent::new(2, ["75234.0"], start, end).unwrap();
        let catalog = EventCatalog::new(vec![a, b]).unwrap();

        match EventIndex::build(&catalog) {
            Err(SynthError::DuplicateGeoKey { key, first, second }) => {
                assert_eq!(key, "75234");
                assert_eq!((first, second), (1, 2));
            }
            other => panic!("expected duplicate key error, got {other:?}"),
        }
    }

    #[test]
    fn test_index_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EventIndex>();
    }
}
