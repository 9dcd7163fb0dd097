use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid outage event {event_id}: {message}")]
    InvalidEvent { event_id: u32, message: String },

    #[error("Geo-key {key} is owned by both event {first} and event {second}")]
    DuplicateGeoKey { key: String, first: u32, second: u32 },

    #[error("Background sampler found no instant outside outage windows after {attempts} attempts")]
    BackgroundExhausted { attempts: u32 },

    #[error("Restricted identity pool for event {event_id} is exhausted ({shortfall} draws short)")]
    RestrictedPoolExhausted { event_id: u32, shortfall: usize },

    #[error("Identity pool is empty")]
    EmptyIdentityPool,

    #[error("Join error: {message}")]
    Join { message: String },

    #[error("Worker failed: {message}")]
    Worker { message: String },
}

pub type Result<T> = std::result::Result<T, SynthError>;
