//! End-to-end scans over an in-memory resolver.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use cepscan::aggregate::{EMPTY_PREFIX_LABEL, SUMMARY_LABEL};
use cepscan::config::ScanSettings;
use cepscan::models::{Metric, ResolvedLocation};
use cepscan::{
    AggregatedRow, GeoPoint, LocationResolver, Orchestrator, ProgressEvent, RowKind, ScanRequest,
    Strategy,
};

const ORIGIN_CODE: &str = "01310100";
const ORIGIN: (f64, f64) = (-23.5614, -46.6558);

type Lookup = dyn Fn(&str) -> Option<(f64, f64, Option<&'static str>)> + Send + Sync;

/// Resolver backed by a function over the code, counting every call
struct TableResolver {
    calls: AtomicUsize,
    delay: Duration,
    lookup: Box<Lookup>,
}

impl TableResolver {
    fn new(
        lookup: impl Fn(&str) -> Option<(f64, f64, Option<&'static str>)> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::slow(Duration::ZERO, lookup)
    }

    fn slow(
        delay: Duration,
        lookup: impl Fn(&str) -> Option<(f64, f64, Option<&'static str>)> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            lookup: Box::new(lookup),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationResolver for TableResolver {
    async fn resolve(&self, postal_code: &str) -> Option<ResolvedLocation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if postal_code == ORIGIN_CODE {
            return Some(ResolvedLocation {
                point: GeoPoint::new(ORIGIN.0, ORIGIN.1)?,
                neighborhood: Some("Bela Vista".into()),
                source_code: postal_code.to_string(),
            });
        }
        let (lat, lon, neighborhood) = (self.lookup)(postal_code)?;
        Some(ResolvedLocation {
            point: GeoPoint::new(lat, lon)?,
            neighborhood: neighborhood.map(str::to_string),
            source_code: postal_code.to_string(),
        })
    }
}

fn suffix(code: &str) -> u32 {
    code[5..].parse().unwrap()
}

async fn run_scan(resolver: Arc<TableResolver>, request: ScanRequest) -> Vec<ProgressEvent> {
    let orchestrator = Arc::new(Orchestrator::new(resolver, ScanSettings::default()));
    let mut rx = orchestrator.spawn(request);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn result_rows(events: &[ProgressEvent]) -> &[AggregatedRow] {
    match events.last() {
        Some(ProgressEvent::Result { rows }) => rows,
        other => panic!("expected result event last, got {:?}", other),
    }
}

fn error_message(events: &[ProgressEvent]) -> &str {
    match events {
        [ProgressEvent::Error { message }] => message,
        other => panic!("expected a single error event, got {:?}", other),
    }
}

fn distance(row: &AggregatedRow) -> f64 {
    row.distance_km.value().unwrap()
}

#[tokio::test]
async fn test_detailed_single_neighborhood() {
    // Every code a few hundred meters north of the origin
    let resolver = TableResolver::new(|code| {
        let offset = suffix(code) as f64 * 0.000004;
        Some((ORIGIN.0 + 0.002 + offset, ORIGIN.1, Some("Bela Vista")))
    });

    let request = ScanRequest::new(ORIGIN_CODE, "01310", "01310", Strategy::Detailed);
    let events = run_scan(resolver.clone(), request).await;
    let rows = result_rows(&events);

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].row_kind, RowKind::Summary);
    assert_eq!(rows[0].label, SUMMARY_LABEL);
    assert_eq!(rows[0].sample_count, 300);
    assert_eq!(rows[1].row_kind, RowKind::Neighborhood);
    assert_eq!(rows[1].label, "Bela Vista");
    assert_eq!(rows[1].sample_count, 300);
    assert!(distance(&rows[1]) < 1.0);
    assert!(rows[1].reference_code.as_deref().unwrap().starts_with("01310"));

    // Origin plus every sampled code
    assert_eq!(resolver.calls(), 301);

    assert!(matches!(
        &events[0],
        ProgressEvent::Origin { postal_code, .. } if postal_code == ORIGIN_CODE
    ));
}

#[tokio::test]
async fn test_inverted_range_is_rejected_without_queries() {
    let resolver = TableResolver::new(|_| None);
    let request = ScanRequest::new(ORIGIN_CODE, "01320", "01310", Strategy::Fast);
    let events = run_scan(resolver.clone(), request).await;

    let message = error_message(&events);
    assert!(message.contains("01320"));
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn test_short_origin_is_rejected_without_queries() {
    let resolver = TableResolver::new(|_| None);
    let request = ScanRequest::new("0131010", "01310", "01310", Strategy::Fast);
    let events = run_scan(resolver.clone(), request).await;

    assert!(error_message(&events).contains("8 digits"));
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn test_unlocatable_origin_fails_scan() {
    let resolver = TableResolver::new(|_| None);
    let request = ScanRequest::new("99999999", "01310", "01310", Strategy::Fast);
    let events = run_scan(resolver.clone(), request).await;

    assert!(error_message(&events).contains("99999999"));
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test]
async fn test_partial_failures_two_neighborhoods() {
    // Odd codes fail; the rest split between a near and a far neighborhood
    let resolver = TableResolver::new(|code| {
        let n = suffix(code);
        if n % 2 == 1 {
            return None;
        }
        if n < 500 {
            Some((ORIGIN.0 + 0.009, ORIGIN.1, Some("Liberdade")))
        } else {
            Some((ORIGIN.0 + 0.036, ORIGIN.1, Some("Aclimação")))
        }
    });

    let request = ScanRequest::new(ORIGIN_CODE, "04000", "04000", Strategy::Detailed);
    let events = run_scan(resolver, request).await;
    let rows = result_rows(&events);

    assert_eq!(rows.len(), 3);
    let summary = &rows[0];
    assert_eq!(summary.row_kind, RowKind::Summary);
    assert_eq!(summary.sample_count, 200);

    assert_eq!(rows[1].label, "Liberdade");
    assert_eq!(rows[2].label, "Aclimação");
    assert_eq!(rows[1].sample_count, 100);
    assert_eq!(rows[2].sample_count, 100);
    assert!(distance(&rows[1]) < distance(&rows[2]));

    let midpoint = (distance(&rows[1]) + distance(&rows[2])) / 2.0;
    assert!((distance(summary) - midpoint).abs() < 0.011);
    assert_eq!(
        summary.estimated_minutes,
        Metric::Value((distance(summary) * 2.0 * 10.0).round() / 10.0)
    );
}

#[tokio::test]
async fn test_prefix_events_are_ordered() {
    let resolver = TableResolver::new(|code| {
        let lat = if code.starts_with("01310") { 0.01 } else { 0.02 };
        Some((ORIGIN.0 + lat, ORIGIN.1, Some("Centro")))
    });

    let request = ScanRequest::new(ORIGIN_CODE, "01310", "01311", Strategy::Fast);
    let events = run_scan(resolver, request).await;

    let first_done = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::Prefix { prefix, .. } if prefix == "01310"))
        .unwrap();
    let second_started = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::Progress { prefix, .. } if prefix == "01311"))
        .unwrap();
    assert!(first_done < second_started);

    assert!(events[..events.len() - 1].iter().all(|e| !e.is_terminal()));

    let mut streamed = Vec::new();
    for event in &events {
        if let ProgressEvent::Prefix { rows, .. } = event {
            streamed.extend(rows.iter().cloned());
        }
    }
    let rows = result_rows(&events);
    assert_eq!(rows, streamed.as_slice());
    assert_eq!(rows.iter().filter(|r| r.row_kind == RowKind::Summary).count(), 2);
    assert_eq!(rows[0].prefix, "01310");
    assert_eq!(rows[rows.len() - 1].prefix, "01311");
}

#[tokio::test]
async fn test_empty_prefix_yields_error_row_and_continues() {
    let resolver = TableResolver::new(|code| {
        if code.starts_with("05000") {
            None
        } else {
            Some((ORIGIN.0 + 0.05, ORIGIN.1, None))
        }
    });

    let request = ScanRequest::new(ORIGIN_CODE, "05000", "05001", Strategy::Fast);
    let events = run_scan(resolver, request).await;
    let rows = result_rows(&events);

    assert_eq!(rows[0].row_kind, RowKind::Error);
    assert_eq!(rows[0].prefix, "05000");
    assert_eq!(rows[0].label, EMPTY_PREFIX_LABEL);
    assert_eq!(rows[0].sample_count, 0);
    assert_eq!(rows[0].distance_km, Metric::Missing);

    assert_eq!(rows[1].row_kind, RowKind::Summary);
    assert_eq!(rows[1].prefix, "05001");
    assert_eq!(rows[1].sample_count, 10);
    assert_eq!(rows[2].label, "Bairro não identificado");
}

#[tokio::test]
async fn test_progress_reaches_completion() {
    let resolver = TableResolver::new(|_| Some((ORIGIN.0 + 0.01, ORIGIN.1, Some("Sé"))));
    let request = ScanRequest::new(ORIGIN_CODE, "01000", "01001", Strategy::Fast);
    let events = run_scan(resolver, request).await;

    let percents: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Progress {
                progress_percent, ..
            } => Some(*progress_percent),
            _ => None,
        })
        .collect();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last().copied(), Some(100.0));
}

#[tokio::test]
async fn test_disconnected_consumer_stops_scan() {
    let resolver = TableResolver::new(|_| Some((ORIGIN.0 + 0.01, ORIGIN.1, Some("Sé"))));
    let orchestrator = Orchestrator::new(resolver.clone(), ScanSettings::default());

    let (tx, rx) = mpsc::channel(8);
    drop(rx);
    let request = ScanRequest::new(ORIGIN_CODE, "01000", "01009", Strategy::Fast);
    orchestrator.run(request, tx).await;

    // Only the origin was resolved before the loss was noticed
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test]
async fn test_disconnect_mid_prefix_stops_dispatch() {
    let resolver = TableResolver::slow(Duration::from_millis(5), |_| {
        Some((ORIGIN.0 + 0.01, ORIGIN.1, Some("Sé")))
    });
    let settings = ScanSettings::default();
    let concurrency = settings.detailed_concurrency;
    let orchestrator = Orchestrator::new(resolver.clone(), settings);

    let (tx, mut rx) = mpsc::channel(64);
    let request = ScanRequest::new(ORIGIN_CODE, "01310", "01310", Strategy::Detailed);
    let scan = tokio::spawn(async move { orchestrator.run(request, tx).await });

    while let Some(event) = rx.recv().await {
        if matches!(event, ProgressEvent::Progress { .. }) {
            break;
        }
    }
    let calls_at_drop = resolver.calls();
    drop(rx);
    scan.await.unwrap();

    let calls_after = resolver.calls();
    assert!(
        calls_after <= calls_at_drop + concurrency,
        "dispatched {} more queries after disconnect",
        calls_after - calls_at_drop
    );
    assert!(calls_after < 301);
}
