//! Staged coordinate resolution for a single postal code.
//!
//! Enrichment services are good at neighborhood names but imprecise about
//! coordinates; geocoders are the opposite. The resolver combines them:
//!
//! 1. address enrichment (ordered providers, first usable address wins,
//!    any coordinate seen is kept as a weak candidate)
//! 2. precision geocode of the free-text address
//! 3. optional reverse check of the geocoded point against the address
//! 4. the weak candidate from stage 1
//! 5. a shuffled pool of general-purpose providers

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{AddressInfo, GeoPoint, ResolvedLocation};
use crate::providers::{Geocoder, PostalCodeProvider, ProviderSet};

/// Anything that can turn a postal code into a located sample
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, postal_code: &str) -> Option<ResolvedLocation>;
}

pub struct CoordinateResolver {
    enrichment: Vec<Arc<dyn PostalCodeProvider>>,
    geocoder: Option<Arc<dyn Geocoder>>,
    fallback: Vec<Arc<dyn PostalCodeProvider>>,
    validate: bool,
}

/// What stage 1 learned about a code
#[derive(Debug, Default)]
struct Enrichment {
    address: Option<AddressInfo>,
    weak_point: Option<GeoPoint>,
}

impl CoordinateResolver {
    pub fn new(
        enrichment: Vec<Arc<dyn PostalCodeProvider>>,
        geocoder: Option<Arc<dyn Geocoder>>,
        fallback: Vec<Arc<dyn PostalCodeProvider>>,
        validate: bool,
    ) -> Self {
        Self {
            enrichment,
            geocoder,
            fallback,
            validate,
        }
    }

    pub fn from_providers(providers: ProviderSet, validate: bool) -> Self {
        Self::new(
            providers.enrichment,
            providers.geocoder,
            providers.fallback,
            validate,
        )
    }

    async fn enrich(&self, postal_code: &str) -> Enrichment {
        let mut found = Enrichment::default();

        for provider in &self.enrichment {
            let Some(record) = provider.lookup(postal_code).await else {
                continue;
            };
            if found.weak_point.is_none() {
                found.weak_point = record.point;
            }
            if found.address.is_none() && record.address.is_usable() {
                found.address = Some(record.address);
            }
            if found.address.is_some() && found.weak_point.is_some() {
                break;
            }
        }

        found
    }

    async fn precise_point(&self, postal_code: &str, address: &AddressInfo) -> Option<GeoPoint> {
        let geocoder = self.geocoder.as_ref()?;
        let query = address.geocode_query(postal_code, geocoder.country());
        let point = geocoder.geocode(&query).await?;

        if !self.validate {
            return Some(point);
        }

        match geocoder.reverse(point).await {
            Some(found) if address_matches(address, &found) => Some(point),
            Some(found) => {
                warn!(
                    "Geocoded point for {} lies in {:?}/{:?}, expected {:?}/{:?}",
                    postal_code, found.neighborhood, found.city, address.neighborhood, address.city
                );
                None
            }
            // Inconclusive check keeps the geocoded point
            None => Some(point),
        }
    }

    async fn last_resort(&self, postal_code: &str) -> Option<ResolvedLocation> {
        info!("Running fallback pool for {}", postal_code);

        let mut pool: Vec<&Arc<dyn PostalCodeProvider>> = self.fallback.iter().collect();
        pool.shuffle(&mut rand::thread_rng());

        for provider in pool {
            if let Some(location) = provider.resolve_postal_code(postal_code).await {
                debug!("Fallback {} resolved {}", provider.name(), postal_code);
                return Some(location);
            }
        }

        warn!("Every provider failed for {}", postal_code);
        None
    }
}

#[async_trait]
impl LocationResolver for CoordinateResolver {
    async fn resolve(&self, postal_code: &str) -> Option<ResolvedLocation> {
        let Enrichment {
            address,
            weak_point,
        } = self.enrich(postal_code).await;

        let neighborhood = address.as_ref().and_then(|a| a.neighborhood.clone());
        let located = |point: GeoPoint| ResolvedLocation {
            point,
            neighborhood: neighborhood.clone(),
            source_code: postal_code.to_string(),
        };

        if let Some(address) = &address {
            if let Some(point) = self.precise_point(postal_code, address).await {
                return Some(located(point));
            }
        }

        if let Some(point) = weak_point {
            debug!("Using enrichment coordinate for {}", postal_code);
            return Some(located(point));
        }

        self.last_resort(postal_code).await
    }
}

/// Reverse-geocoded area agrees with the enrichment city or neighborhood.
fn address_matches(expected: &AddressInfo, found: &AddressInfo) -> bool {
    fn same(a: &Option<String>, b: &Option<String>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => {
                let (a, b) = (a.trim().to_lowercase(), b.trim().to_lowercase());
                a == b || a.contains(&b) || b.contains(&a)
            }
            _ => false,
        }
    }

    same(&expected.city, &found.city) || same(&expected.neighborhood, &found.neighborhood)
}
