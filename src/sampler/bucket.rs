use crate::catalog::OutageEvent;
use crate::error::{Result, SynthError};
use chrono::{Duration, NaiveDateTime};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Allowed distance of the weight total from 1.0
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// A sub-interval of an outage window, relative to the window start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub start_minutes: u32,
    /// `None` runs until the end of the outage window
    #[serde(default)]
    pub end_minutes: Option<u32>,
    pub weight: f64,
}

impl TimeBucket {
    pub fn bounded(start_minutes: u32, end_minutes: u32, weight: f64) -> Self {
        Self {
            start_minutes,
            end_minutes: Some(end_minutes),
            weight,
        }
    }

    pub fn open_ended(start_minutes: u32, weight: f64) -> Self {
        Self {
            start_minutes,
            end_minutes: None,
            weight,
        }
    }

    /// Absolute `[start, end)` of this bucket inside the event window.
    ///
    /// The end is clamped to the window end, and so is a start that lies
    /// past it, so the range never leaves the window.
    pub fn absolute_range(&self, event: &OutageEvent) -> (NaiveDateTime, NaiveDateTime) {
        let window_start = event.window_start();
        let window_end = event.window_end();

        let start = (window_start + Duration::minutes(i64::from(self.start_minutes))).min(window_end);
        let end = match self.end_minutes {
            Some(end) => (window_start + Duration::minutes(i64::from(end))).min(window_end),
            None => window_end,
        };
        (start, end)
    }
}

/// Validated, ordered bucket table with precomputed cumulative weights
#[derive(Debug, Clone, PartialEq)]
pub struct BucketTable {
    buckets: Vec<TimeBucket>,
    cumulative: Vec<f64>,
}

impl BucketTable {
    /// Validate the table. Weights that do not sum to 1.0 are rejected, never
    /// renormalized.
    pub fn new(buckets: Vec<TimeBucket>) -> Result<Self> {
        if buckets.is_empty() {
            return Err(SynthError::Config("bucket table is empty".to_string()));
        }

        for (i, bucket) in buckets.iter().enumerate() {
            if !(bucket.weight > 0.0 && bucket.weight <= 1.0) {
                return Err(SynthError::Config(format!(
                    "bucket {} weight {} is outside (0, 1]",
                    i, bucket.weight
                )));
            }
            if i > 0 && bucket.start_minutes <= buckets[i - 1].start_minutes {
                return Err(SynthError::Config(format!(
                    "bucket {} starts at minute {} which is not after bucket {}",
                    i,
                    bucket.start_minutes,
                    i - 1
                )));
            }
        }

        let open_ended = buckets.iter().filter(|b| b.end_minutes.is_none()).count();
        if open_ended != 1 || buckets.last().map_or(true, |b| b.end_minutes.is_some()) {
            return Err(SynthError::Config(
                "exactly one open-ended bucket is required and it must be last".to_string(),
            ));
        }

        let total: f64 = buckets.iter().map(|b| b.weight).sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(SynthError::Config(format!(
                "bucket weights sum to {total}, expected 1.0"
            )));
        }

        let cumulative = buckets
            .iter()
            .scan(0.0, |acc, b| {
                *acc += b.weight;
                Some(*acc)
            })
            .collect();

        Ok(Self { buckets, cumulative })
    }

    pub fn buckets(&self) -> &[TimeBucket] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Weighted choice of a bucket index
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let total = self.cumulative.last().copied().unwrap_or(1.0);
        let u = rng.gen::<f64>() * total;
        self.cumulative
            .partition_point(|&c| c <= u)
            .min(self.buckets.len() - 1)
    }

    /// Draw `n` bucket indices in one go
    pub fn choose_many<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        (0..n).map(|_| self.choose(rng)).collect()
    }
}

impl Default for BucketTable {
    /// 40/30/20/7/3 split over 0-15, 15-30, 30-45, 45-60 and 60+ minutes
    fn default() -> Self {
        let buckets = vec![
            TimeBucket::bounded(0, 15, 0.40),
            TimeBucket::bounded(15, 30, 0.30),
            TimeBucket::bounded(30, 45, 0.20),
            TimeBucket::bounded(45, 60, 0.07),
            TimeBucket::open_ended(60, 0.03),
        ];
        let cumulative = vec![0.40, 0.70, 0.90, 0.97, 1.0];
        Self { buckets, cumulative }
    }
}

/// Draws outage-path timestamps skewed towards the start of the window
#[derive(Debug, Clone, Default)]
pub struct BucketSampler {
    table: BucketTable,
}

impl BucketSampler {
    pub fn new(table: BucketTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &BucketTable {
        &self.table
    }

    pub fn sample<R: Rng + ?Sized>(&self, event: &OutageEvent, rng: &mut R) -> NaiveDateTime {
        let bucket_index = self.table.choose(rng);
        self.resolve(event, bucket_index, rng)
    }

    /// Uniform instant inside an already chosen bucket.
    ///
    /// Zero-length or inverted buckets return the bucket start.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        event: &OutageEvent,
        bucket_index: usize,
        rng: &mut R,
    ) -> NaiveDateTime {
        let bucket = &self.table.buckets[bucket_index.min(self.table.buckets.len() - 1)];
        let (start, end) = bucket.absolute_range(event);

        if end <= start {
            return start;
        }
        let span = (end - start).num_seconds();
        if span <= 0 {
            return start;
        }
        start + Duration::seconds(rng.gen_range(0..span))
    }

    /// Cohort variant: all bucket indices are drawn before any instant
    pub fn sample_batch<R: Rng + ?Sized>(
        &self,
        event: &OutageEvent,
        n: usize,
        rng: &mut R,
    ) -> Vec<NaiveDateTime> {
        let indices = self.table.choose_many(n, rng);
        indices
            .into_iter()
            .map(|i| self.resolve(event, i, rng))
            .collect()
    }
}
