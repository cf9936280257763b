//! Per-provider response parsers.
//!
//! Each parser turns one provider's JSON body into a fixed-shape
//! [`ProviderRecord`], or `None` when the body is a not-found marker or
//! carries nothing usable. All field-name fallbacks live here.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::models::{AddressInfo, GeoPoint, ProviderRecord};

/// Response schema of a configured provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// BrasilAPI `/api/cep/v2`
    BrasilApi,
    /// ViaCEP and OpenCEP (same field names)
    ViaCep,
    /// AwesomeAPI CEP
    AwesomeApi,
    /// Nominatim `/search` result list
    Nominatim,
}

impl ResponseFormat {
    pub fn parse(&self, body: Value) -> Option<ProviderRecord> {
        match self {
            ResponseFormat::BrasilApi => parse_brasil_api(body),
            ResponseFormat::ViaCep => parse_via_cep(body),
            ResponseFormat::AwesomeApi => parse_awesome_api(body),
            ResponseFormat::Nominatim => parse_nominatim_search(body),
        }
    }
}

/// Accept a coordinate given as a JSON number or a numeric string.
fn lenient_coord<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// ViaCEP says `"erro": true`, older deployments `"erro": "true"`.
fn error_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

fn point_of(lat: Option<f64>, lon: Option<f64>) -> Option<GeoPoint> {
    GeoPoint::new(lat?, lon?)
}

#[derive(Debug, Deserialize)]
struct BrasilApiBody {
    cep: Option<String>,
    street: Option<String>,
    neighborhood: Option<String>,
    city: Option<String>,
    state: Option<String>,
    location: Option<BrasilApiLocation>,
}

#[derive(Debug, Deserialize)]
struct BrasilApiLocation {
    coordinates: Option<BrasilApiCoordinates>,
}

#[derive(Debug, Deserialize)]
struct BrasilApiCoordinates {
    #[serde(default, deserialize_with = "lenient_coord")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coord")]
    longitude: Option<f64>,
}

fn parse_brasil_api(body: Value) -> Option<ProviderRecord> {
    let body: BrasilApiBody = serde_json::from_value(body).ok()?;
    // Error payloads (`CepPromiseError`) carry no cep
    body.cep.as_ref()?;

    let point = body
        .location
        .and_then(|l| l.coordinates)
        .and_then(|c| point_of(c.latitude, c.longitude));

    Some(ProviderRecord {
        address: AddressInfo::new(body.street, body.neighborhood, body.city, body.state),
        point,
    })
}

#[derive(Debug, Deserialize)]
struct ViaCepBody {
    #[serde(default, deserialize_with = "error_flag")]
    erro: bool,
    #[serde(alias = "street")]
    logradouro: Option<String>,
    #[serde(alias = "neighborhood", alias = "district")]
    bairro: Option<String>,
    #[serde(alias = "city")]
    localidade: Option<String>,
    #[serde(alias = "state")]
    uf: Option<String>,
    #[serde(default, alias = "latitude", deserialize_with = "lenient_coord")]
    lat: Option<f64>,
    #[serde(default, alias = "longitude", alias = "lon", deserialize_with = "lenient_coord")]
    lng: Option<f64>,
}

fn parse_via_cep(body: Value) -> Option<ProviderRecord> {
    let body: ViaCepBody = serde_json::from_value(body).ok()?;
    if body.erro {
        return None;
    }

    let record = ProviderRecord {
        address: AddressInfo::new(body.logradouro, body.bairro, body.localidade, body.uf),
        point: point_of(body.lat, body.lng),
    };
    (record.address.is_usable() || record.point.is_some()).then_some(record)
}

#[derive(Debug, Deserialize)]
struct AwesomeApiBody {
    /// Only present on error payloads (`not_found`, `invalid`)
    code: Option<String>,
    address: Option<String>,
    #[serde(alias = "neighborhood")]
    district: Option<String>,
    city: Option<String>,
    state: Option<String>,
    #[serde(default, alias = "latitude", deserialize_with = "lenient_coord")]
    lat: Option<f64>,
    #[serde(default, alias = "longitude", deserialize_with = "lenient_coord")]
    lng: Option<f64>,
}

fn parse_awesome_api(body: Value) -> Option<ProviderRecord> {
    let body: AwesomeApiBody = serde_json::from_value(body).ok()?;
    if body.code.is_some() {
        return None;
    }

    let record = ProviderRecord {
        address: AddressInfo::new(body.address, body.district, body.city, body.state),
        point: point_of(body.lat, body.lng),
    };
    (record.address.is_usable() || record.point.is_some()).then_some(record)
}

#[derive(Debug, Deserialize)]
pub(crate) struct NominatimPlace {
    #[serde(default, deserialize_with = "lenient_coord")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coord")]
    pub lon: Option<f64>,
    pub display_name: Option<String>,
}

impl NominatimPlace {
    pub fn point(&self) -> Option<GeoPoint> {
        point_of(self.lat, self.lon)
    }
}

/// First hit of a Nominatim `/search` list.
pub(crate) fn first_nominatim_place(body: Value) -> Option<NominatimPlace> {
    let places: Vec<NominatimPlace> = serde_json::from_value(body).ok()?;
    places.into_iter().find(|p| p.point().is_some())
}

fn parse_nominatim_search(body: Value) -> Option<ProviderRecord> {
    let place = first_nominatim_place(body)?;
    let point = place.point();

    // "Rua X, Bela Vista, São Paulo, ..." -> second component is the neighborhood
    let neighborhood = place
        .display_name
        .as_deref()
        .and_then(|name| name.split(',').nth(1))
        .map(|s| s.trim().to_string());

    Some(ProviderRecord {
        address: AddressInfo::new(None, neighborhood, None, None),
        point,
    })
}

#[derive(Debug, Deserialize)]
struct NominatimReverseBody {
    error: Option<String>,
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    road: Option<String>,
    suburb: Option<String>,
    neighbourhood: Option<String>,
    quarter: Option<String>,
    city_district: Option<String>,
    city: Option<String>,
    town: Option<String>,
    municipality: Option<String>,
    village: Option<String>,
    state: Option<String>,
}

/// Parse a Nominatim `/reverse` body into address components.
pub(crate) fn parse_nominatim_reverse(body: Value) -> Option<AddressInfo> {
    let body: NominatimReverseBody = serde_json::from_value(body).ok()?;
    if body.error.is_some() {
        return None;
    }
    let a = body.address?;

    Some(AddressInfo::new(
        a.road,
        a.suburb.or(a.neighbourhood).or(a.quarter).or(a.city_district),
        a.city.or(a.town).or(a.municipality).or(a.village),
        a.state,
    ))
}
