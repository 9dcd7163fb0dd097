pub mod catalog;
pub mod config;
pub mod correlator;
pub mod directory;
pub mod error;
pub mod geo_key;
pub mod identity;
pub mod index;
pub mod logging;
pub mod pipeline;
pub mod rng;
pub mod sampler;
pub mod surge;
pub mod types;

pub use catalog::{EventCatalog, OutageEvent};
pub use config::{SynthConfig, SynthContext};
pub use correlator::{CorrelationStats, RecordCorrelator};
pub use directory::{Customer, CustomerDirectory};
pub use error::{Result, SynthError};
pub use geo_key::GeoKey;
pub use identity::IdentityAllocator;
pub use index::EventIndex;
pub use pipeline::SynthesisPipeline;
