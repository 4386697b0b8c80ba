use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The only payload schema version this pipeline understands.
pub const SCHEMA_VERSION: u64 = 1;

/// One observed dimension. The wire keys are single letters for historical
/// reasons; the enum names what they mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Posture quality (P0 best .. P4 worst).
    Posture,
    /// Insufficient ambient light.
    LowLight,
    /// Excess screen brightness.
    Brightness,
    /// Break-schedule compliance.
    Breaks,
}

impl Metric {
    /// All metrics, in wire order. A submission must carry exactly these.
    pub const ALL: [Metric; 4] = [
        Metric::Posture,
        Metric::LowLight,
        Metric::Brightness,
        Metric::Breaks,
    ];

    /// Wire key for this metric.
    pub fn key(self) -> &'static str {
        match self {
            Metric::Posture => "P",
            Metric::LowLight => "L",
            Metric::Brightness => "B",
            Metric::Breaks => "C",
        }
    }

    /// The fixed bucket enumeration for this metric.
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            Metric::Posture => &["P0", "P1", "P2", "P3", "P4"],
            Metric::LowLight => &["L0", "L1", "L2", "L3", "L4"],
            Metric::Brightness => &["B0", "B1", "B2", "B3"],
            Metric::Breaks => &["C0", "C1", "C2", "C3", "C4"],
        }
    }

    fn from_key(key: &str) -> Option<Metric> {
        Metric::ALL.iter().copied().find(|m| m.key() == key)
    }
}

/// Validation failure, naming the offending field.
///
/// Never mutates any state; a submission failing any single check is
/// rejected wholesale.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid top-level keys")]
    TopLevelKeys,
    #[error("unsupported schema version")]
    SchemaVersion,
    #[error("invalid date format")]
    DayFormat,
    #[error("invalid bucket keys")]
    BucketKeys,
    #[error("invalid value for {metric}: {value}")]
    BucketValue { metric: &'static str, value: String },
}

/// One validated observation record. Constructed only by [`validate`]; never
/// persisted in raw form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    schema_version: u64,
    day: String,
    buckets: BTreeMap<String, String>,
}

impl Submission {
    /// The observation day, `YYYY-MM-DD` shaped.
    pub fn day(&self) -> &str {
        &self.day
    }

    /// The bucket label recorded for one metric.
    pub fn bucket(&self, metric: Metric) -> &str {
        // Validation guarantees every metric key is present.
        &self.buckets[metric.key()]
    }
}

/// Acknowledgement body for one uploaded submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadAck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadAck {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Checks the strict `\d{4}-\d{2}-\d{2}` day shape.
///
/// Calendrical validity (month 13, day 40) is deliberately not checked;
/// aggregation keys on the literal string.
pub fn valid_day(day: &str) -> bool {
    let b = day.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && [0, 1, 2, 3, 5, 6, 8, 9]
            .iter()
            .all(|&i| b[i].is_ascii_digit())
}

/// Validates one decoded payload against the submission contract.
///
/// Checks run in a fixed order and the first failure aborts: exact top-level
/// keys, schema version, day shape, exact bucket keys, then per-metric label
/// membership. Both the outbox gateway and the aggregation service call this
/// same function, so the two sides of the trust boundary cannot drift apart.
pub fn validate(payload: &Value) -> Result<Submission, SchemaError> {
    let obj = payload.as_object().ok_or(SchemaError::TopLevelKeys)?;

    if obj.len() != 3
        || !["schema_version", "day", "buckets"]
            .iter()
            .all(|k| obj.contains_key(*k))
    {
        return Err(SchemaError::TopLevelKeys);
    }

    if obj["schema_version"].as_u64() != Some(SCHEMA_VERSION) {
        return Err(SchemaError::SchemaVersion);
    }

    let day = obj["day"].as_str().filter(|d| valid_day(d));
    let day = day.ok_or(SchemaError::DayFormat)?;

    let buckets = obj["buckets"].as_object().ok_or(SchemaError::BucketKeys)?;

    if buckets.len() != Metric::ALL.len()
        || !buckets.keys().all(|k| Metric::from_key(k).is_some())
    {
        return Err(SchemaError::BucketKeys);
    }

    let mut validated = BTreeMap::new();
    for metric in Metric::ALL {
        let raw = &buckets[metric.key()];
        let label = raw.as_str().filter(|v| metric.labels().contains(v));
        let label = label.ok_or_else(|| SchemaError::BucketValue {
            metric: metric.key(),
            value: match raw.as_str() {
                Some(s) => s.to_string(),
                None => raw.to_string(),
            },
        })?;
        validated.insert(metric.key().to_string(), label.to_string());
    }

    Ok(Submission {
        schema_version: SCHEMA_VERSION,
        day: day.to_string(),
        buckets: validated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn good_payload() -> Value {
        json!({
            "schema_version": 1,
            "day": "2024-06-01",
            "buckets": {"P": "P3", "L": "L1", "B": "B0", "C": "C4"}
        })
    }

    #[test]
    fn test_valid_submission_accepted() {
        let sub = validate(&good_payload()).expect("valid payload");
        assert_eq!(sub.day(), "2024-06-01");
        assert_eq!(sub.bucket(Metric::Posture), "P3");
        assert_eq!(sub.bucket(Metric::LowLight), "L1");
        assert_eq!(sub.bucket(Metric::Brightness), "B0");
        assert_eq!(sub.bucket(Metric::Breaks), "C4");
    }

    #[test]
    fn test_extra_top_level_key_rejected() {
        let mut payload = good_payload();
        payload["worker_id"] = json!("w-17");
        assert_eq!(validate(&payload), Err(SchemaError::TopLevelKeys));
    }

    #[test]
    fn test_missing_top_level_key_rejected() {
        let mut payload = good_payload();
        payload.as_object_mut().expect("object").remove("day");
        assert_eq!(validate(&payload), Err(SchemaError::TopLevelKeys));
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert_eq!(validate(&json!([1, 2, 3])), Err(SchemaError::TopLevelKeys));
    }

    #[test]
    fn test_wrong_schema_version_rejected() {
        let mut payload = good_payload();
        payload["schema_version"] = json!(2);
        assert_eq!(validate(&payload), Err(SchemaError::SchemaVersion));
    }

    #[test]
    fn test_malformed_day_rejected() {
        for day in ["2024-6-01", "20240601", "2024-06-01T00", "yyyy-mm-dd"] {
            let mut payload = good_payload();
            payload["day"] = json!(day);
            assert_eq!(validate(&payload), Err(SchemaError::DayFormat), "{day}");
        }
    }

    #[test]
    fn test_calendrically_invalid_day_accepted() {
        // Shape check only; month 13 passes by design.
        let mut payload = good_payload();
        payload["day"] = json!("2024-13-40");
        assert!(validate(&payload).is_ok());
    }

    #[test]
    fn test_extra_bucket_key_rejected() {
        let mut payload = good_payload();
        payload["buckets"]["X"] = json!("X0");
        assert_eq!(validate(&payload), Err(SchemaError::BucketKeys));
    }

    #[test]
    fn test_missing_bucket_key_rejected() {
        let mut payload = good_payload();
        payload["buckets"]
            .as_object_mut()
            .expect("object")
            .remove("C");
        assert_eq!(validate(&payload), Err(SchemaError::BucketKeys));
    }

    #[test]
    fn test_out_of_enumeration_label_rejected() {
        let mut payload = good_payload();
        payload["buckets"]["P"] = json!("P9");
        assert_eq!(
            validate(&payload),
            Err(SchemaError::BucketValue {
                metric: "P",
                value: "P9".to_string()
            })
        );
    }

    #[test]
    fn test_label_from_wrong_metric_rejected() {
        // B3 is a valid brightness label but not a posture label.
        let mut payload = good_payload();
        payload["buckets"]["P"] = json!("B3");
        assert!(matches!(
            validate(&payload),
            Err(SchemaError::BucketValue { metric: "P", .. })
        ));
    }

    #[test]
    fn test_non_string_label_rejected() {
        let mut payload = good_payload();
        payload["buckets"]["C"] = json!(4);
        assert_eq!(
            validate(&payload),
            Err(SchemaError::BucketValue {
                metric: "C",
                value: "4".to_string()
            })
        );
    }

    #[test]
    fn test_submission_serializes_to_wire_shape() {
        let sub = validate(&good_payload()).expect("valid payload");
        let wire = serde_json::to_value(&sub).expect("serialize");
        assert_eq!(wire, good_payload());
    }

    #[test]
    fn test_valid_day_shapes() {
        assert!(valid_day("2024-06-01"));
        assert!(valid_day("0000-00-00"));
        assert!(!valid_day(""));
        assert!(!valid_day("2024-06-010"));
        assert!(!valid_day("2024_06_01"));
    }
}
