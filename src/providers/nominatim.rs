//! Nominatim free-text and reverse geocoding.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::fetch_json;
use super::parse::{first_nominatim_place, parse_nominatim_reverse};
use crate::config::GeocoderConfig;
use crate::models::{AddressInfo, GeoPoint};

/// Geocoding service used for the precision and validation stages
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Country suffix appended to free-text queries, if any
    fn country(&self) -> Option<&str> {
        None
    }

    /// Resolve a free-text address to a point.
    async fn geocode(&self, query: &str) -> Option<GeoPoint>;

    /// Administrative area containing a point.
    async fn reverse(&self, point: GeoPoint) -> Option<AddressInfo>;
}

pub struct NominatimGeocoder {
    config: GeocoderConfig,
    client: Client,
}

impl NominatimGeocoder {
    pub fn new(config: GeocoderConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn build_url(&self, base: &str, params: &[(&str, String)]) -> Option<Url> {
        match Url::parse_with_params(base, params) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Invalid geocoder url {}: {}", base, e);
                None
            }
        }
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    fn country(&self) -> Option<&str> {
        self.config.country.as_deref()
    }

    async fn geocode(&self, query: &str) -> Option<GeoPoint> {
        let url = self.build_url(
            &self.config.search_url,
            &[
                ("q", query.to_string()),
                ("format", "json".to_string()),
                ("limit", "1".to_string()),
            ],
        )?;
        let body = fetch_json(&self.client, "nominatim", url, self.config.timeout()).await?;

        let point = first_nominatim_place(body).and_then(|p| p.point());
        match point {
            Some(p) => debug!("Geocoded '{}' to ({}, {})", query, p.latitude, p.longitude),
            None => warn!("Geocoder found nothing for '{}'", query),
        }
        point
    }

    async fn reverse(&self, point: GeoPoint) -> Option<AddressInfo> {
        let url = self.build_url(
            &self.config.reverse_url,
            &[
                ("lat", point.latitude.to_string()),
                ("lon", point.longitude.to_string()),
                ("format", "json".to_string()),
                ("zoom", "16".to_string()),
            ],
        )?;
        let body = fetch_json(&self.client, "nominatim", url, self.config.timeout()).await?;

        let address = parse_nominatim_reverse(body);
        if address.is_none() {
            warn!(
                "Reverse geocoding failed at ({}, {})",
                point.latitude, point.longitude
            );
        }
        address
    }
}
