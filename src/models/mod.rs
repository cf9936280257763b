//! Core data models for postal-code scanning.

pub mod event;
pub mod location;
pub mod point;
pub mod row;

pub use event::ProgressEvent;
pub use location::{AddressInfo, ProviderRecord, ResolvedLocation};
pub use point::{centroid, distance_km, GeoPoint};
pub use row::{round1, round2, AggregatedRow, Metric, RawSample, RowKind};
