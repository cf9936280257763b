//! Runtime configuration loaded from TOML.
//!
//! Every section has defaults, so a missing or empty file yields the
//! built-in provider set and scan tuning.

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::providers::ResponseFormat;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub http: HttpConfig,
    pub providers: ProvidersConfig,
    pub scan: ScanSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    /// Client identification header sent on every provider call
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "CalculadoraDistancia/1.0 (Projeto Pessoal)".to_string(),
        }
    }
}

/// One configured postal-code provider
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProviderDescriptor {
    pub name: String,
    /// URL template containing `{cep}`
    pub url: String,
    pub format: ResponseFormat,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl ProviderDescriptor {
    pub fn new(name: &str, url: &str, format: ResponseFormat, timeout_secs: u64) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            format,
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider_timeout() -> u64 {
    10
}

/// Accepted per-call timeout, in seconds
pub const TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 3..=10;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Address enrichment, queried in order
    pub enrichment: Vec<ProviderDescriptor>,
    /// Last-resort pool, queried in random order
    pub fallback: Vec<ProviderDescriptor>,
    pub geocoder: GeocoderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            enrichment: vec![
                ProviderDescriptor::new(
                    "brasilapi",
                    "https://brasilapi.com.br/api/cep/v2/{cep}",
                    ResponseFormat::BrasilApi,
                    5,
                ),
                ProviderDescriptor::new(
                    "viacep",
                    "https://viacep.com.br/ws/{cep}/json/",
                    ResponseFormat::ViaCep,
                    5,
                ),
            ],
            fallback: vec![
                ProviderDescriptor::new(
                    "viacep",
                    "https://viacep.com.br/ws/{cep}/json/",
                    ResponseFormat::ViaCep,
                    10,
                ),
                ProviderDescriptor::new(
                    "brasilapi",
                    "https://brasilapi.com.br/api/cep/v2/{cep}",
                    ResponseFormat::BrasilApi,
                    10,
                ),
                ProviderDescriptor::new(
                    "nominatim",
                    "https://nominatim.openstreetmap.org/search?postalcode={cep}&country=Brasil&format=json",
                    ResponseFormat::Nominatim,
                    10,
                ),
                ProviderDescriptor::new(
                    "opencep",
                    "https://opencep.com/v1/{cep}",
                    ResponseFormat::ViaCep,
                    10,
                ),
                ProviderDescriptor::new(
                    "awesomeapi",
                    "https://cep.awesomeapi.com.br/json/{cep}",
                    ResponseFormat::AwesomeApi,
                    10,
                ),
            ],
            geocoder: GeocoderConfig::default(),
        }
    }
}

/// Free-text geocoder used for the precision and validation stages
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocoderConfig {
    pub enabled: bool,
    pub search_url: String,
    pub reverse_url: String,
    /// Appended to every free-text query
    pub country: Option<String>,
    pub timeout_secs: u64,
    /// Reverse-check geocoded points against the enrichment address
    pub validate: bool,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_url: "https://nominatim.openstreetmap.org/search".to_string(),
            reverse_url: "https://nominatim.openstreetmap.org/reverse".to_string(),
            country: Some("Brasil".to_string()),
            timeout_secs: 10,
            validate: true,
        }
    }
}

impl GeocoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Sampling, concurrency and aggregation tuning
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ScanSettings {
    /// Group members farther than this from the group mean are outliers
    pub outlier_radius_km: f64,
    /// Groups smaller than this are never filtered
    pub min_group_for_filter: usize,
    /// Suffixes taken from each ten-block under the detailed strategy
    pub dense_suffixes: Vec<u16>,
    pub fast_concurrency: usize,
    pub detailed_concurrency: usize,
    /// Emit a progress event every N completed queries
    pub progress_every: usize,
    /// Linear travel-time heuristic
    pub minutes_per_km: f64,
    /// Reject prefix-wide outliers before grouping
    pub root_filter: bool,
    /// Samples beyond mean + k·σ of distance-to-centroid are left out of the robust centroid
    pub root_sigma_factor: f64,
    /// Samples farther than this from the robust centroid are discarded
    pub root_max_radius_km: f64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            outlier_radius_km: 3.0,
            min_group_for_filter: 3,
            dense_suffixes: vec![0, 1, 2],
            fast_concurrency: 10,
            detailed_concurrency: 20,
            progress_every: 10,
            minutes_per_km: 2.0,
            root_filter: true,
            root_sigma_factor: 2.0,
            root_max_radius_km: 10.0,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let scan = &self.scan;
        ensure!(!scan.dense_suffixes.is_empty(), "dense_suffixes must not be empty");
        ensure!(
            scan.dense_suffixes.iter().all(|s| *s < 10),
            "dense_suffixes must be digits 0-9"
        );
        let mut sorted = scan.dense_suffixes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        ensure!(
            sorted.len() == scan.dense_suffixes.len(),
            "dense_suffixes must not repeat"
        );
        ensure!(
            scan.fast_concurrency > 0 && scan.detailed_concurrency > 0,
            "concurrency must be non-zero"
        );
        ensure!(scan.progress_every > 0, "progress_every must be non-zero");
        ensure!(
            scan.outlier_radius_km > 0.0,
            "outlier_radius_km must be positive"
        );
        if scan.root_filter {
            ensure!(
                scan.root_sigma_factor > 0.0 && scan.root_max_radius_km > 0.0,
                "root_sigma_factor and root_max_radius_km must be positive"
            );
        }
        ensure!(
            TIMEOUT_RANGE_SECS.contains(&self.providers.geocoder.timeout_secs),
            "geocoder timeout_secs must be within {:?}",
            TIMEOUT_RANGE_SECS
        );

        for p in self
            .providers
            .enrichment
            .iter()
            .chain(self.providers.fallback.iter())
        {
            ensure!(
                p.url.contains("{cep}"),
                "provider '{}' url has no {{cep}} placeholder",
                p.name
            );
            ensure!(
                TIMEOUT_RANGE_SECS.contains(&p.timeout_secs),
                "provider '{}' timeout_secs must be within {:?}",
                p.name,
                TIMEOUT_RANGE_SECS
            );
        }
        Ok(())
    }
}
