//! Timestamp samplers: weighted buckets inside an outage window, and
//! uniform background draws that stay clear of every window.

pub mod background;
pub mod bucket;

pub use background::BackgroundSampler;
pub use bucket::{BucketSampler, BucketTable, TimeBucket};
