//! Postal-code provider adapters.
//!
//! Adapters hide provider-specific URL templates and field names behind
//! [`PostalCodeProvider`]. Every failure (network error, timeout,
//! non-200 status, not-found marker, unparsable body) is logged and
//! collapses to `None`; adapters never raise to the caller.

mod nominatim;
mod parse;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::{Config, ProviderDescriptor};
use crate::models::{ProviderRecord, ResolvedLocation};

pub use nominatim::{Geocoder, NominatimGeocoder};
pub use parse::ResponseFormat;

/// A source that can look up one postal code
#[async_trait]
pub trait PostalCodeProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Raw parsed record: address fields plus an optional coordinate.
    async fn lookup(&self, postal_code: &str) -> Option<ProviderRecord>;

    /// Coordinate result for the code, `None` when the provider has no point.
    async fn resolve_postal_code(&self, postal_code: &str) -> Option<ResolvedLocation> {
        let record = self.lookup(postal_code).await?;
        let point = record.point?;
        Some(ResolvedLocation {
            point,
            neighborhood: record.address.neighborhood,
            source_code: postal_code.to_string(),
        })
    }
}

/// Build the shared HTTP client carrying the identification header.
pub fn build_client(user_agent: &str) -> Client {
    Client::builder()
        .user_agent(user_agent)
        .build()
        .expect("Failed to create HTTP client")
}

/// GET a JSON body, logging and swallowing every failure.
pub(crate) async fn fetch_json(
    client: &Client,
    provider: &str,
    url: Url,
    timeout: Duration,
) -> Option<Value> {
    let response = match client.get(url.clone()).timeout(timeout).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!("Provider {} request to {} failed: {}", provider, url, e);
            return None;
        }
    };

    let status = response.status();
    if status != StatusCode::OK {
        warn!("Provider {} returned status {} for {}", provider, status, url);
        return None;
    }

    match response.json::<Value>().await {
        Ok(body) => Some(body),
        Err(e) => {
            warn!("Failed to parse {} response from {}: {}", provider, url, e);
            None
        }
    }
}

/// Provider reached through a `{cep}` URL template
pub struct HttpProvider {
    descriptor: ProviderDescriptor,
    client: Client,
}

impl HttpProvider {
    pub fn new(descriptor: ProviderDescriptor, client: Client) -> Self {
        Self { descriptor, client }
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn url_for(&self, postal_code: &str) -> Option<Url> {
        let raw = self.descriptor.url.replace("{cep}", postal_code);
        match Url::parse(&raw) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Provider {} has an invalid url {}: {}", self.descriptor.name, raw, e);
                None
            }
        }
    }
}

#[async_trait]
impl PostalCodeProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    async fn lookup(&self, postal_code: &str) -> Option<ProviderRecord> {
        let url = self.url_for(postal_code)?;
        let body = fetch_json(&self.client, self.name(), url, self.descriptor.timeout()).await?;

        let record = self.descriptor.format.parse(body);
        if record.is_none() {
            warn!("Provider {} has no usable data for {}", self.name(), postal_code);
        } else {
            debug!("Provider {} answered for {}", self.name(), postal_code);
        }
        record
    }
}

/// Concrete provider set built from configuration
pub struct ProviderSet {
    pub enrichment: Vec<Arc<dyn PostalCodeProvider>>,
    pub fallback: Vec<Arc<dyn PostalCodeProvider>>,
    pub geocoder: Option<Arc<dyn Geocoder>>,
}

impl ProviderSet {
    pub fn from_config(config: &Config) -> Self {
        let client = build_client(&config.http.user_agent);
        let http = |d: &ProviderDescriptor| -> Arc<dyn PostalCodeProvider> {
            Arc::new(HttpProvider::new(d.clone(), client.clone()))
        };

        let geocoder_config = &config.providers.geocoder;
        let geocoder = geocoder_config.enabled.then(|| {
            Arc::new(NominatimGeocoder::new(geocoder_config.clone(), client.clone()))
                as Arc<dyn Geocoder>
        });

        Self {
            enrichment: config.providers.enrichment.iter().map(http).collect(),
            fallback: config.providers.fallback.iter().map(http).collect(),
            geocoder,
        }
    }
}
