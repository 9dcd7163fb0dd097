use crate::geo_key::GeoKey;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Call reason that marks a record as outage related
pub const OUTAGE_CALL_REASON: &str = "technical_support";

/// Whether a record may be caused by an outage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFlag {
    OutageRelated,
    Other,
}

impl CategoryFlag {
    /// Map a free-form call reason onto a category flag
    pub fn from_call_reason(reason: &str, outage_reason: &str) -> Self {
        if reason.trim().eq_ignore_ascii_case(outage_reason) {
            CategoryFlag::OutageRelated
        } else {
            CategoryFlag::Other
        }
    }
}

/// A record handed to the correlator by the ingestion collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    pub record_id: String,
    #[serde(default, deserialize_with = "crate::geo_key::blank_as_none")]
    pub geo_key: Option<GeoKey>,
    pub category: CategoryFlag,
}

impl InputRecord {
    pub fn new(record_id: impl Into<String>, geo_key: Option<&str>, category: CategoryFlag) -> Self {
        Self {
            record_id: record_id.into(),
            geo_key: GeoKey::parse_optional(geo_key),
            category,
        }
    }
}

/// A call transcript record before it has been given an owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub call_reason: String,
}

/// Timestamp chosen for a single record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampAssignment {
    pub record_id: String,
    #[serde(with = "datetime_format")]
    pub instant: NaiveDateTime,
    pub event_id: Option<u32>,
}

/// Identity (customer) chosen for a single record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAssignment {
    pub record_id: String,
    pub identity_token: String,
    /// Event whose target this draw counted towards, if any
    pub event_id: Option<u32>,
}

/// Anything the identity allocator can hand a token to
pub trait Categorized {
    fn record_id(&self) -> &str;
    fn category(&self) -> CategoryFlag;
}

impl Categorized for InputRecord {
    fn record_id(&self) -> &str {
        &self.record_id
    }

    fn category(&self) -> CategoryFlag {
        self.category
    }
}

/// Call records classified with a fixed outage call reason
#[derive(Debug, Clone)]
pub struct ClassifiedCall<'a> {
    pub call: &'a CallRecord,
    pub category: CategoryFlag,
}

impl<'a> ClassifiedCall<'a> {
    pub fn classify(calls: &'a [CallRecord], outage_reason: &str) -> Vec<Self> {
        calls
            .iter()
            .map(|call| ClassifiedCall {
                call,
                category: CategoryFlag::from_call_reason(&call.call_reason, outage_reason),
            })
            .collect()
    }
}

impl Categorized for ClassifiedCall<'_> {
    fn record_id(&self) -> &str {
        &self.call.call_id
    }

    fn category(&self) -> CategoryFlag {
        self.category
    }
}

/// `%Y-%m-%d %H:%M:%S` (de)serialization for wall-clock instants
pub mod datetime_format {
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Accepts both `2025-11-16 10:15:00` and `2025-11-16T10:15:00`, seconds optional
    pub fn parse(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        let s = s.trim();
        NaiveDateTime::parse_from_str(s, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_call_reason() {
        assert_eq!(
            CategoryFlag::from_call_reason("technical_support", OUTAGE_CALL_REASON),
            CategoryFlag::OutageRelated
        );
        assert_eq!(
            CategoryFlag::from_call_reason(" Technical_Support ", OUTAGE_CALL_REASON),
            CategoryFlag::OutageRelated
        );
        assert_eq!(
            CategoryFlag::from_call_reason("billing_inquiry", OUTAGE_CALL_REASON),
            CategoryFlag::Other
        );
    }

    #[test]
    fn test_input_record_missing_key_is_explicit_none() {
        let json = r#"[{"record_id":"a","category":"other"},
                       {"record_id":"b","geo_key":"6604.0","category":"outage_related"}]"#;
        let records: Vec<InputRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(records[0].geo_key, None);
        assert_eq!(records[1].geo_key.as_ref().unwrap().as_str(), "06604");
        assert_eq!(records[1].category, CategoryFlag::OutageRelated);
    }

    #[test]
    fn test_input_record_blank_key_is_none() {
        let json = r#"[{"record_id":"a","geo_key":"","category":"outage_related"},
                       {"record_id":"b","geo_key":"   ","category":"other"},
                       {"record_id":"c","geo_key":null,"category":"other"}]"#;
        let records: Vec<InputRecord> = serde_json::from_str(json).unwrap();
        assert!(records.iter().all(|r| r.geo_key.is_none()));
    }

    #[test]
    fn test_timestamp_assignment_serializes_wall_clock() {
        let assignment = TimestampAssignment {
            record_id: "CALL_1".to_string(),
            instant: datetime_format::parse("2025-11-16 10:15:00").unwrap(),
            event_id: Some(1),
        };
        let json = serde_json::to_string(&assignment).unwrap();
        assert!(json.contains("\"2025-11-16 10:15:00\""));
        let back: TimestampAssignment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, assignment);
    }

    #[test]
    fn test_parse_accepts_iso_and_minute_forms() {
        let a = datetime_format::parse("2025-11-16T08:00:00").unwrap();
        let b = datetime_format::parse("2025-11-16 08:00").unwrap();
        assert_eq!(a, b);
    }
}
