use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical digit width for postal-code style keys
pub const CANONICAL_WIDTH: usize = 5;

/// A geographic key (postal code) in canonical form.
///
/// Construction always goes through [`GeoKey::normalize`], so two keys that
/// compare equal are guaranteed to refer to the same area regardless of how
/// the source encoded them (`"6604"`, `"06604"`, `"6604.0"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawGeoKey", into = "String")]
pub struct GeoKey(String);

/// Any encoding a geo-key arrives in from JSON or TOML
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawGeoKey {
    Text(String),
    Integer(u64),
    Float(f64),
}

impl GeoKey {
    /// Normalize a raw key. Never fails: unrecognised forms pass through.
    pub fn normalize(raw: &str) -> Self {
        Self(normalize_str(raw))
    }

    /// Normalize a numeric key, e.g. a ZIP column that was read as a float.
    pub fn from_number(raw: f64) -> Self {
        if raw.is_finite() && raw.fract() == 0.0 && raw >= 0.0 && raw < u64::MAX as f64 {
            Self::normalize(&format!("{}", raw as u64))
        } else {
            Self::normalize(&raw.to_string())
        }
    }

    /// Normalize an optional raw key, treating blank input as absent.
    pub fn parse_optional(raw: Option<&str>) -> Option<Self> {
        raw.map(Self::normalize).filter(|k| !k.0.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn normalize_str(raw: &str) -> String {
    let trimmed = raw.trim();
    let integral = match trimmed.find('.') {
        Some(pos) => &trimmed[..pos],
        None => trimmed,
    };

    let all_digits = !integral.is_empty() && integral.bytes().all(|b| b.is_ascii_digit());
    if all_digits && integral.len() < CANONICAL_WIDTH {
        format!("{:0>width$}", integral, width = CANONICAL_WIDTH)
    } else {
        integral.to_string()
    }
}

/// Deserialize an optional key, treating a blank one as absent.
///
/// Use with `#[serde(default, deserialize_with = "crate::geo_key::blank_as_none")]`.
pub fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<GeoKey>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let key = Option::<GeoKey>::deserialize(deserializer)?;
    Ok(key.filter(|k| !k.is_empty()))
}

impl From<RawGeoKey> for GeoKey {
    fn from(raw: RawGeoKey) -> Self {
        match raw {
            RawGeoKey::Text(s) => Self::normalize(&s),
            RawGeoKey::Integer(n) => Self::normalize(&n.to_string()),
            RawGeoKey::Float(f) => Self::from_number(f),
        }
    }
}

impl From<String> for GeoKey {
    fn from(raw: String) -> Self {
        Self::normalize(&raw)
    }
}

impl From<&str> for GeoKey {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}

impl From<GeoKey> for String {
    fn from(key: GeoKey) -> Self {
        key.0
    }
}

impl fmt::Display for GeoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
