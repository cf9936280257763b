//! Outlier rejection and per-neighborhood aggregation for one prefix.
//!
//! An optional prefix-wide pass runs first. Samples whose distance to the
//! naive centroid exceeds mean + k·σ are left out of a robust centroid, and
//! every sample farther than a fixed radius from that robust centroid is
//! discarded. The survivors are grouped by neighborhood label. Groups above
//! a minimum size drop members farther than `outlier_radius_km` from the
//! group mean (reverting if that would empty the group). Each group is represented by
//! its most central member, the sample nearest the filtered group mean.
//! A summary row averages the distance over every raw sample.
//!
//! The output is a pure function of the input.

use std::collections::BTreeMap;

use crate::config::ScanSettings;
use crate::models::{
    centroid, distance_km, round1, round2, AggregatedRow, Metric, RawSample, RowKind,
};

pub const UNIDENTIFIED_LABEL: &str = "Bairro não identificado";
pub const SUMMARY_LABEL: &str = "MÉDIA GERAL DA RAIZ";
pub const EMPTY_PREFIX_LABEL: &str = "NENHUM CEP VÁLIDO ENCONTRADO";

/// Prefix-wide outlier rejection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootFilterParams {
    pub sigma_factor: f64,
    pub max_radius_km: f64,
}

/// Aggregation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationParams {
    pub outlier_radius_km: f64,
    pub min_group_for_filter: usize,
    pub minutes_per_km: f64,
    /// `None` skips the prefix-wide pass
    pub root_filter: Option<RootFilterParams>,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self::from(&ScanSettings::default())
    }
}

impl From<&ScanSettings> for AggregationParams {
    fn from(s: &ScanSettings) -> Self {
        Self {
            outlier_radius_km: s.outlier_radius_km,
            min_group_for_filter: s.min_group_for_filter,
            minutes_per_km: s.minutes_per_km,
            root_filter: s.root_filter.then_some(RootFilterParams {
                sigma_factor: s.root_sigma_factor,
                max_radius_km: s.root_max_radius_km,
            }),
        }
    }
}

impl AggregationParams {
    fn minutes(&self, distance_km: f64) -> Metric {
        Metric::Value(round1(distance_km * self.minutes_per_km))
    }
}

/// Normalized grouping label for a sample
pub fn neighborhood_label(sample: &RawSample) -> &str {
    sample
        .neighborhood
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(UNIDENTIFIED_LABEL)
}

/// Sample discarded by the prefix-wide pass
#[derive(Debug, Clone, PartialEq)]
pub struct DiscardedSample {
    pub postal_code: String,
    pub distance_from_center_km: f64,
}

/// Rows for one prefix plus the samples the prefix-wide pass dropped
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixAggregate {
    pub rows: Vec<AggregatedRow>,
    pub discarded: Vec<DiscardedSample>,
}

/// Sample mean and standard deviation (n - 1). σ is zero below two values.
fn mean_and_stdev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// Split samples into those kept and those discarded by the prefix-wide pass.
///
/// Keeps everything when the pass would discard every sample.
pub fn reject_root_outliers<'a>(
    samples: &'a [RawSample],
    filter: &RootFilterParams,
) -> (Vec<&'a RawSample>, Vec<DiscardedSample>) {
    let all: Vec<&RawSample> = samples.iter().collect();
    let Some(naive) = centroid(samples.iter().map(|s| s.point)) else {
        return (all, Vec::new());
    };

    let to_naive: Vec<f64> = samples.iter().map(|s| distance_km(s.point, naive)).collect();
    let (mean, stdev) = mean_and_stdev(&to_naive);
    let preliminary: Vec<&RawSample> = if stdev > 0.0 {
        let limit = mean + filter.sigma_factor * stdev;
        samples
            .iter()
            .zip(&to_naive)
            .filter(|(_, d)| **d <= limit)
            .map(|(s, _)| s)
            .collect()
    } else {
        all.clone()
    };

    let Some(robust) = centroid(preliminary.iter().map(|s| s.point)) else {
        return (all, Vec::new());
    };

    let mut kept = Vec::with_capacity(samples.len());
    let mut discarded = Vec::new();
    for sample in samples {
        let d = distance_km(sample.point, robust);
        if d <= filter.max_radius_km {
            kept.push(sample);
        } else {
            discarded.push(DiscardedSample {
                postal_code: sample.postal_code.clone(),
                distance_from_center_km: d,
            });
        }
    }

    if kept.is_empty() {
        (all, Vec::new())
    } else {
        (kept, discarded)
    }
}

/// Group samples by neighborhood label. Every sample lands in exactly one group.
pub fn group_by_neighborhood<'a>(
    samples: impl IntoIterator<Item = &'a RawSample>,
) -> BTreeMap<&'a str, Vec<&'a RawSample>> {
    let mut groups: BTreeMap<&str, Vec<&RawSample>> = BTreeMap::new();
    for sample in samples {
        groups.entry(neighborhood_label(sample)).or_default().push(sample);
    }
    groups
}

/// Drop members farther than the radius from the group mean.
///
/// Never returns an empty group for a non-empty input.
pub fn filter_outliers<'a>(
    group: &[&'a RawSample],
    params: &AggregationParams,
) -> Vec<&'a RawSample> {
    if group.len() < params.min_group_for_filter {
        return group.to_vec();
    }
    let Some(mean) = centroid(group.iter().map(|s| s.point)) else {
        return group.to_vec();
    };

    let kept: Vec<&RawSample> = group
        .iter()
        .copied()
        .filter(|s| distance_km(s.point, mean) <= params.outlier_radius_km)
        .collect();

    if kept.is_empty() {
        group.to_vec()
    } else {
        kept
    }
}

/// Member nearest the group mean. Ties keep the earliest sample.
pub fn most_central<'a>(group: &[&'a RawSample]) -> Option<&'a RawSample> {
    let mean = centroid(group.iter().map(|s| s.point))?;
    group.iter().copied().min_by(|a, b| {
        distance_km(a.point, mean).total_cmp(&distance_km(b.point, mean))
    })
}

/// Build the rows for one prefix from its raw samples.
pub fn aggregate_prefix(
    prefix: &str,
    samples: &[RawSample],
    params: &AggregationParams,
) -> PrefixAggregate {
    if samples.is_empty() {
        let rows = vec![AggregatedRow {
            row_kind: RowKind::Error,
            prefix: prefix.to_string(),
            label: EMPTY_PREFIX_LABEL.to_string(),
            distance_km: Metric::Missing,
            estimated_minutes: Metric::Missing,
            sample_count: 0,
            representative_point: None,
            reference_code: None,
        }];
        return PrefixAggregate {
            rows,
            discarded: Vec::new(),
        };
    }

    let (reliable, discarded) = match &params.root_filter {
        Some(filter) => reject_root_outliers(samples, filter),
        None => (samples.iter().collect(), Vec::new()),
    };

    let mut neighborhoods: Vec<AggregatedRow> = group_by_neighborhood(reliable)
        .into_iter()
        .filter_map(|(label, members)| {
            let filtered = filter_outliers(&members, params);
            let center = most_central(&filtered)?;
            Some(AggregatedRow {
                row_kind: RowKind::Neighborhood,
                prefix: prefix.to_string(),
                label: label.to_string(),
                distance_km: Metric::Value(center.distance_km),
                estimated_minutes: params.minutes(center.distance_km),
                sample_count: filtered.len(),
                representative_point: Some(center.point),
                reference_code: Some(center.postal_code.clone()),
            })
        })
        .collect();

    // Stable: equal distances keep label order
    neighborhoods.sort_by(|a, b| compare_distance(&a.distance_km, &b.distance_km));

    let mean = round2(samples.iter().map(|s| s.distance_km).sum::<f64>() / samples.len() as f64);
    let mut rows = Vec::with_capacity(neighborhoods.len() + 1);
    rows.push(AggregatedRow {
        row_kind: RowKind::Summary,
        prefix: prefix.to_string(),
        label: SUMMARY_LABEL.to_string(),
        distance_km: Metric::Value(mean),
        estimated_minutes: params.minutes(mean),
        sample_count: samples.len(),
        representative_point: None,
        reference_code: None,
    });
    rows.extend(neighborhoods);
    PrefixAggregate { rows, discarded }
}

/// Ascending by distance, non-numeric last.
fn compare_distance(a: &Metric, b: &Metric) -> std::cmp::Ordering {
    match (a.value(), b.value()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}
