//! Provider output shapes.

use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// Address components returned by CEP enrichment services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighborhood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl AddressInfo {
    /// Build from raw provider fields, dropping blank values.
    pub fn new(
        street: Option<String>,
        neighborhood: Option<String>,
        city: Option<String>,
        region: Option<String>,
    ) -> Self {
        Self {
            street: non_blank(street),
            neighborhood: non_blank(neighborhood),
            city: non_blank(city),
            region: non_blank(region),
        }
    }

    /// True when the address names a neighborhood or a city.
    pub fn is_usable(&self) -> bool {
        self.neighborhood.is_some() || self.city.is_some()
    }

    /// Free-text geocoding query: street, neighborhood, city, region, code.
    pub fn geocode_query(&self, postal_code: &str, country: Option<&str>) -> String {
        [
            self.street.as_deref(),
            self.neighborhood.as_deref(),
            self.city.as_deref(),
            self.region.as_deref(),
            Some(postal_code),
            country,
        ]
        .iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// One parsed provider response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderRecord {
    pub address: AddressInfo,
    pub point: Option<GeoPoint>,
}

/// Best-effort coordinate result for one queried postal code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLocation {
    pub point: GeoPoint,
    pub neighborhood: Option<String>,
    pub source_code: String,
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
