use crate::catalog::{
    EventCatalog, OutageEvent, DEFAULT_BACKGROUND_END, DEFAULT_BACKGROUND_START, DEFAULT_EVENTS,
};
use crate::correlator::RecordCorrelator;
use crate::error::{Result, SynthError};
use crate::geo_key::GeoKey;
use crate::identity::{
    AllocatorOptions, EventPlan, IdentityAllocator, PairingScope, RestrictedDraw, ShortfallPolicy,
    DEFAULT_REPEAT_PROBABILITY, DEFAULT_TARGET_CALLS,
};
use crate::index::EventIndex;
use crate::rng::DEFAULT_SEED;
use crate::sampler::background::DEFAULT_MAX_ATTEMPTS;
use crate::sampler::{BackgroundSampler, BucketSampler, BucketTable, TimeBucket};
use crate::surge::DEFAULT_BIN_MINUTES;
use crate::types::{datetime_format, InputRecord, TimestampAssignment, OUTAGE_CALL_REASON};
use chrono::NaiveDateTime;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Config file read when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "synth.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    #[serde(with = "datetime_format")]
    pub start: NaiveDateTime,
    #[serde(with = "datetime_format")]
    pub end: NaiveDateTime,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    pub event_id: u32,
    pub geo_keys: Vec<GeoKey>,
    #[serde(with = "datetime_format")]
    pub start: NaiveDateTime,
    #[serde(with = "datetime_format")]
    pub end: NaiveDateTime,
    #[serde(default)]
    pub target_calls: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub restricted_draw: RestrictedDraw,
    pub shortfall: ShortfallPolicy,
    pub repeat_probability: f64,
    pub pairing_scope: PairingScope,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            restricted_draw: RestrictedDraw::default(),
            shortfall: ShortfallPolicy::default(),
            repeat_probability: DEFAULT_REPEAT_PROBABILITY,
            pairing_scope: PairingScope::default(),
        }
    }
}

/// Static configuration for one synthesis run, as read from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub seed: u64,
    pub outage_call_reason: String,
    /// Correlation workers; 1 keeps a single sequential draw stream
    pub workers: usize,
    /// Draw bucket indices per event cohort instead of per record
    pub batched: bool,
    pub bin_minutes: u32,
    pub background: BackgroundConfig,
    pub buckets: Vec<TimeBucket>,
    pub events: Vec<EventConfig>,
    pub identity: IdentityConfig,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for SynthConfig {
    fn default() -> Self {
        let targets: HashMap<u32, usize> = DEFAULT_TARGET_CALLS.into_iter().collect();
        let events = DEFAULT_EVENTS
            .iter()
            .map(|e| EventConfig {
                event_id: e.event_id,
                geo_keys: e.geo_keys.iter().map(|k| GeoKey::normalize(k)).collect(),
                start: e.start,
                end: e.end,
                target_calls: targets.get(&e.event_id).copied().unwrap_or(0),
            })
            .collect();

        Self {
            seed: DEFAULT_SEED,
            outage_call_reason: OUTAGE_CALL_REASON.to_string(),
            workers: 1,
            batched: true,
            bin_minutes: DEFAULT_BIN_MINUTES,
            background: BackgroundConfig {
                start: DEFAULT_BACKGROUND_START,
                end: DEFAULT_BACKGROUND_END,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
            },
            buckets: BucketTable::default().buckets().to_vec(),
            events,
            identity: IdentityConfig::default(),
        }
    }
}

impl SynthConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from an explicit path, then `SYNTH_CONFIG`, then `synth.toml` if
    /// it exists, else defaults. `SYNTH_SEED` overrides the seed either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var("SYNTH_CONFIG").ok().map(PathBuf::from);
        let mut config = match path.or(from_env.as_deref()) {
            Some(path) => Self::read(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::read(Path::new(DEFAULT_CONFIG_PATH))?,
            None => {
                debug!("No config file, using built-in defaults");
                Self::default()
            }
        };

        if let Ok(raw) = std::env::var("SYNTH_SEED") {
            config.seed = raw
                .trim()
                .parse()
                .map_err(|e| SynthError::Config(format!("SYNTH_SEED '{}' is not a u64: {}", raw, e)))?;
            info!("Seed overridden from environment: {}", config.seed);
        }
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SynthError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate everything and build the immutable run context. Fails fast.
    pub fn build(&self) -> Result<SynthContext> {
        if self.workers == 0 {
            return Err(SynthError::Config("workers must be at least 1".to_string()));
        }
        if self.bin_minutes == 0 {
            return Err(SynthError::Config("bin_minutes must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.identity.repeat_probability) {
            return Err(SynthError::Config(format!(
                "repeat_probability {} is outside [0, 1]",
                self.identity.repeat_probability
            )));
        }

        let events = self
            .events
            .iter()
            .map(|e| OutageEvent::new(e.event_id, e.geo_keys.iter().map(GeoKey::as_str), e.start, e.end))
            .collect::<Result<Vec<_>>>()?;
        let catalog = EventCatalog::new(events)?;
        let index = Arc::new(EventIndex::build(&catalog)?);
        let table = BucketTable::new(self.buckets.clone())?;
        let background = BackgroundSampler::new(
            self.background.start,
            self.background.end,
            &catalog,
            self.background.max_attempts,
        )?;

        let targets: HashMap<u32, usize> = self.events.iter().map(|e| (e.event_id, e.target_calls)).collect();
        let plans = EventPlan::from_catalog(&catalog, &targets);
        let allocator = IdentityAllocator::new(AllocatorOptions {
            restricted_draw: self.identity.restricted_draw,
            shortfall: self.identity.shortfall,
        });

        info!(
            "Configuration valid: {} events, {} geo-keys, {} buckets, seed {}",
            catalog.len(),
            index.key_count(),
            table.len(),
            self.seed
        );

        Ok(SynthContext {
            correlator: Arc::new(RecordCorrelator::new(index, BucketSampler::new(table), background)),
            catalog,
            plans,
            allocator,
            seed: self.seed,
            workers: self.workers,
            batched: self.batched,
            bin_minutes: self.bin_minutes,
            outage_call_reason: self.outage_call_reason.clone(),
            repeat_probability: self.identity.repeat_probability,
            pairing_scope: self.identity.pairing_scope,
        })
    }
}

/// Validated, immutable components for a run
#[derive(Debug, Clone)]
pub struct SynthContext {
    pub catalog: EventCatalog,
    pub correlator: Arc<RecordCorrelator>,
    pub plans: Vec<EventPlan>,
    pub allocator: IdentityAllocator,
    pub seed: u64,
    pub workers: usize,
    pub batched: bool,
    pub bin_minutes: u32,
    pub outage_call_reason: String,
    pub repeat_probability: f64,
    pub pairing_scope: PairingScope,
}

impl SynthContext {
    /// Timestamp records with the configured strategy.
    ///
    /// With more than one worker the chunks draw from generators derived from
    /// the seed and `rng` is left untouched.
    pub async fn correlate<R: Rng + ?Sized>(
        &self,
        records: &[InputRecord],
        rng: &mut R,
    ) -> Result<Vec<TimestampAssignment>> {
        if self.workers > 1 {
            debug!("Correlating with {} workers", self.workers);
            Arc::clone(&self.correlator)
                .correlate_parallel(Arc::new(records.to_vec()), self.seed, self.workers)
                .await
        } else if self.batched {
            self.correlator.correlate_batched(records, rng)
        } else {
            self.correlator.correlate(records, rng)
        }
    }
}
