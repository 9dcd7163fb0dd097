use crate::catalog::OutageEvent;
use crate::error::{Result, SynthError};
use crate::index::EventIndex;
use crate::rng::derive_seed;
use crate::sampler::{BackgroundSampler, BucketSampler};
use crate::types::{CategoryFlag, InputRecord, TimestampAssignment};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Which sampler a record is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Outage(&'a OutageEvent),
    Background,
}

/// Resolves each record to an outage event (or none) and draws its timestamp
#[derive(Debug, Clone)]
pub struct RecordCorrelator {
    index: Arc<EventIndex>,
    bucket: BucketSampler,
    background: BackgroundSampler,
}

impl RecordCorrelator {
    pub fn new(index: Arc<EventIndex>, bucket: BucketSampler, background: BackgroundSampler) -> Self {
        Self {
            index,
            bucket,
            background,
        }
    }

    pub fn index(&self) -> &EventIndex {
        &self.index
    }

    pub fn background_range(&self) -> (chrono::NaiveDateTime, chrono::NaiveDateTime) {
        self.background.range()
    }

    /// Outage path only for outage-related records whose key an event owns
    pub fn route(&self, record: &InputRecord) -> Route<'_> {
        let event = record
            .geo_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .and_then(|k| self.index.lookup(k));

        match (record.category, event) {
            (CategoryFlag::OutageRelated, Some(event)) => Route::Outage(event),
            _ => Route::Background,
        }
    }

    fn assign<R: Rng + ?Sized>(&self, record: &InputRecord, rng: &mut R) -> Result<TimestampAssignment> {
        let (instant, event_id) = match self.route(record) {
            Route::Outage(event) => (self.bucket.sample(event, rng), Some(event.event_id())),
            Route::Background => (self.background.sample(rng)?, None),
        };
        Ok(TimestampAssignment {
            record_id: record.record_id.clone(),
            instant,
            event_id,
        })
    }

    /// One assignment per record, in input order, from a single draw stream
    #[instrument(skip(self, records, rng), fields(records = records.len()))]
    pub fn correlate<R: Rng + ?Sized>(
        &self,
        records: &[InputRecord],
        rng: &mut R,
    ) -> Result<Vec<TimestampAssignment>> {
        records.iter().map(|r| self.assign(r, rng)).collect()
    }

    /// Cohort variant: each event's bucket indices are drawn in one call.
    ///
    /// Outage cohorts are resolved in order of first appearance, then the
    /// background records in input order. The output is still in input order.
    #[instrument(skip(self, records, rng), fields(records = records.len()))]
    pub fn correlate_batched<R: Rng + ?Sized>(
        &self,
        records: &[InputRecord],
        rng: &mut R,
    ) -> Result<Vec<TimestampAssignment>> {
        let mut cohorts: Vec<(&OutageEvent, Vec<usize>)> = Vec::new();
        let mut cohort_of: HashMap<u32, usize> = HashMap::new();
        let mut background = Vec::new();

        for (position, record) in records.iter().enumerate() {
            match self.route(record) {
                Route::Outage(event) => {
                    let slot = *cohort_of.entry(event.event_id()).or_insert_with(|| {
                        cohorts.push((event, Vec::new()));
                        cohorts.len() - 1
                    });
                    cohorts[slot].1.push(position);
                }
                Route::Background => background.push(position),
            }
        }

        let mut slots: Vec<Option<TimestampAssignment>> = vec![None; records.len()];

        for (event, positions) in &cohorts {
            debug!("Event {} cohort: {} records", event.event_id(), positions.len());
            let instants = self.bucket.sample_batch(event, positions.len(), rng);
            for (&position, instant) in positions.iter().zip(instants) {
                slots[position] = Some(TimestampAssignment {
                    record_id: records[position].record_id.clone(),
                    instant,
                    event_id: Some(event.event_id()),
                });
            }
        }

        for position in background {
            slots[position] = Some(TimestampAssignment {
                record_id: records[position].record_id.clone(),
                instant: self.background.sample(rng)?,
                event_id: None,
            });
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Worker-pool variant.
    ///
    /// The input is split into `workers` contiguous chunks; chunk `i` draws
    /// from its own generator seeded with `derive_seed(seed, i)`. Results are
    /// concatenated in chunk order, so the output depends only on the seed,
    /// the input and the worker count.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn correlate_parallel(
        self: Arc<Self>,
        records: Arc<Vec<InputRecord>>,
        seed: u64,
        workers: usize,
    ) -> Result<Vec<TimestampAssignment>> {
        let workers = workers.max(1);
        let chunk_size = records.len().div_ceil(workers).max(1);

        let mut handles = Vec::with_capacity(workers);
        for (chunk, start) in (0..records.len()).step_by(chunk_size).enumerate() {
            let correlator = Arc::clone(&self);
            let records = Arc::clone(&records);
            let end = (start + chunk_size).min(records.len());
            handles.push(tokio::task::spawn_blocking(move || {
                let mut rng = StdRng::seed_from_u64(derive_seed(seed, chunk as u64));
                correlator.correlate(&records[start..end], &mut rng)
            }));
        }

        let mut out = Vec::with_capacity(records.len());
        for handle in handles {
            let chunk = handle.await.map_err(|e| SynthError::Worker {
                message: e.to_string(),
            })??;
            out.extend(chunk);
        }
        Ok(out)
    }
}

/// Routing counts for a batch of records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationStats {
    pub records: usize,
    pub outage_path: usize,
    pub background_path: usize,
    pub missing_key: usize,
    pub unowned_key: usize,
    pub per_event: Vec<(u32, usize)>,
}

impl CorrelationStats {
    pub fn collect(correlator: &RecordCorrelator, records: &[InputRecord]) -> Self {
        let mut stats = CorrelationStats {
            records: records.len(),
            ..Default::default()
        };
        let mut per_event: HashMap<u32, usize> = HashMap::new();

        for record in records {
            match record.geo_key.as_ref().filter(|k| !k.is_empty()) {
                None => stats.missing_key += 1,
                Some(key) if correlator.index().lookup(key).is_none() => stats.unowned_key += 1,
                Some(_) => {}
            }
            match correlator.route(record) {
                Route::Outage(event) => {
                    stats.outage_path += 1;
                    *per_event.entry(event.event_id()).or_default() += 1;
                }
                Route::Background => stats.background_path += 1,
            }
        }

        stats.per_event = per_event.into_iter().collect();
        stats.per_event.sort_unstable();
        stats
    }
}
