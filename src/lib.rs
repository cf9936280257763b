//! Cepscan - postal-code (CEP) distance scanning over Brazilian geocoders
//!
//! This library resolves CEPs to coordinates through several providers,
//! samples every code prefix in a range, and aggregates per-neighborhood
//! distances from an origin. The `server` and `scan` binaries are thin
//! front ends over [`stream::Orchestrator`].

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod models;
pub mod providers;
pub mod resolver;
pub mod sampler;
pub mod stream;

pub use config::Config;
pub use error::ScanError;
pub use models::{AggregatedRow, GeoPoint, ProgressEvent, RowKind};
pub use resolver::{CoordinateResolver, LocationResolver};
pub use sampler::Strategy;
pub use stream::{Orchestrator, ScanRequest};

use std::sync::Arc;

/// Build an orchestrator wired to the configured HTTP providers.
pub fn orchestrator_from_config(config: &Config) -> Orchestrator {
    let providers = providers::ProviderSet::from_config(config);
    let resolver = CoordinateResolver::from_providers(providers, config.providers.geocoder.validate);
    Orchestrator::new(Arc::new(resolver), config.scan.clone())
}
