//! Scan samples and aggregated output rows.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::GeoPoint;

/// One successful measurement for one queried code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    pub postal_code: String,
    /// Neighborhood as reported by the resolver, possibly blank
    pub neighborhood: Option<String>,
    /// Distance to the origin, rounded to two decimals
    pub distance_km: f64,
    pub point: GeoPoint,
}

/// Kind of aggregated row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Summary,
    Neighborhood,
    Error,
}

impl std::fmt::Display for RowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowKind::Summary => write!(f, "summary"),
            RowKind::Neighborhood => write!(f, "neighborhood"),
            RowKind::Error => write!(f, "error"),
        }
    }
}

/// Numeric cell that serializes as `"-"` when absent
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    Value(f64),
    Missing,
}

impl Metric {
    pub fn value(&self) -> Option<f64> {
        match self {
            Metric::Value(v) => Some(*v),
            Metric::Missing => None,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Value(v) => f.pad(&v.to_string()),
            Metric::Missing => f.pad("-"),
        }
    }
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Metric::Value(v) => serializer.serialize_f64(*v),
            Metric::Missing => serializer.serialize_str("-"),
        }
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Metric::Value)
                .ok_or_else(|| serde::de::Error::custom("metric out of range")),
            _ => Ok(Metric::Missing),
        }
    }
}

/// One output row for a prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedRow {
    pub row_kind: RowKind,
    pub prefix: String,
    pub label: String,
    pub distance_km: Metric,
    pub estimated_minutes: Metric,
    pub sample_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub representative_point: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_code: Option<String>,
}

/// Round to two decimals (distances)
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to one decimal (travel minutes)
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
