//! Progress stream orchestration for a scan over a prefix range.
//!
//! One invocation walks `ValidatingInput -> ResolvingOrigin ->
//! ProcessingPrefix(n) -> Done | Failed` and pushes [`ProgressEvent`]s into a
//! channel. Parallelism exists only inside a prefix batch; rows for prefix N
//! are always sent before any event for prefix N+1. The stream always ends
//! with exactly one terminal `result` or `error` event.

use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::{aggregate_prefix, AggregationParams};
use crate::config::ScanSettings;
use crate::engine::QueryBatch;
use crate::error::ScanError;
use crate::models::{distance_km, round2, AggregatedRow, GeoPoint, ProgressEvent, RawSample};
use crate::resolver::LocationResolver;
use crate::sampler::{sample_codes, sample_len, Strategy};

/// Buffered events between the orchestrator and its consumer
const EVENT_BUFFER: usize = 64;

/// Inbound scan request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub origin_postal_code: String,
    pub prefix_start: String,
    pub prefix_end: String,
    #[serde(default)]
    pub strategy: Strategy,
}

impl ScanRequest {
    pub fn new(origin: &str, prefix_start: &str, prefix_end: &str, strategy: Strategy) -> Self {
        Self {
            origin_postal_code: origin.to_string(),
            prefix_start: prefix_start.to_string(),
            prefix_end: prefix_end.to_string(),
            strategy,
        }
    }
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub origin: String,
    pub prefixes: std::ops::RangeInclusive<u32>,
    pub strategy: Strategy,
}

impl ValidatedRequest {
    pub fn prefix_count(&self) -> usize {
        (self.prefixes.end() - self.prefixes.start() + 1) as usize
    }
}

/// Strip hyphens and whitespace: `01310-100` becomes `01310100`.
pub fn normalize_code(code: &str) -> String {
    code.chars().filter(|c| *c != '-' && !c.is_whitespace()).collect()
}

fn is_digits(code: &str, len: usize) -> bool {
    code.len() == len && code.bytes().all(|b| b.is_ascii_digit())
}

pub fn validate(request: &ScanRequest) -> Result<ValidatedRequest, ScanError> {
    let origin = normalize_code(&request.origin_postal_code);
    if !is_digits(&origin, 8) {
        return Err(ScanError::InvalidOrigin(request.origin_postal_code.clone()));
    }

    let parse_prefix = |raw: &str| -> Result<u32, ScanError> {
        let prefix = normalize_code(raw);
        if !is_digits(&prefix, 5) {
            return Err(ScanError::InvalidPrefix(raw.to_string()));
        }
        prefix
            .parse()
            .map_err(|_| ScanError::InvalidPrefix(raw.to_string()))
    };
    let start = parse_prefix(&request.prefix_start)?;
    let end = parse_prefix(&request.prefix_end)?;

    if start > end {
        return Err(ScanError::InvertedRange {
            start: request.prefix_start.clone(),
            end: request.prefix_end.clone(),
        });
    }

    Ok(ValidatedRequest {
        origin,
        prefixes: start..=end,
        strategy: request.strategy,
    })
}

/// Channel wrapper that stops sending once the consumer is gone
struct EventSink {
    tx: mpsc::Sender<ProgressEvent>,
    detached: bool,
}

impl EventSink {
    /// Mark the sink detached if the consumer has gone away.
    fn poll_detached(&mut self) -> bool {
        if !self.detached && self.tx.is_closed() {
            warn!("Event consumer disconnected, discarding remaining events");
            self.detached = true;
        }
        self.detached
    }

    async fn emit(&mut self, event: ProgressEvent) {
        if self.detached {
            return;
        }
        if self.tx.send(event).await.is_err() {
            warn!("Event consumer disconnected, discarding remaining events");
            self.detached = true;
        }
    }
}

/// Overall progress across the whole prefix range
struct Progress {
    done: usize,
    total: usize,
}

impl Progress {
    fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        round2(self.done as f64 / self.total as f64 * 100.0)
    }
}

pub struct Orchestrator {
    resolver: Arc<dyn LocationResolver>,
    settings: ScanSettings,
}

impl Orchestrator {
    pub fn new(resolver: Arc<dyn LocationResolver>, settings: ScanSettings) -> Self {
        Self { resolver, settings }
    }

    /// Run the scan on a background task; events arrive on the receiver.
    pub fn spawn(self: &Arc<Self>, request: ScanRequest) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();
        tokio::spawn(async move { this.run(request, tx).await });
        rx
    }

    /// Run the scan, pushing events into `events` until a terminal one.
    pub async fn run(&self, request: ScanRequest, events: mpsc::Sender<ProgressEvent>) {
        let span = info_span!("scan", run_id = %Uuid::new_v4());
        async move {
            let mut sink = EventSink {
                tx: events,
                detached: false,
            };
            let terminal = match self.execute(&request, &mut sink).await {
                Ok(rows) => {
                    info!("Scan finished with {} rows", rows.len());
                    ProgressEvent::Result { rows }
                }
                Err(e) => {
                    warn!("Scan failed: {}", e);
                    ProgressEvent::error(e.to_string())
                }
            };
            sink.emit(terminal).await;
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        request: &ScanRequest,
        sink: &mut EventSink,
    ) -> Result<Vec<AggregatedRow>, ScanError> {
        let valid = validate(request)?;
        info!(
            "Scanning prefixes {:05}..={:05} from {} ({})",
            valid.prefixes.start(),
            valid.prefixes.end(),
            valid.origin,
            valid.strategy
        );

        let origin = self
            .resolver
            .resolve(&valid.origin)
            .await
            .ok_or_else(|| ScanError::OriginNotFound(valid.origin.clone()))?;
        sink.emit(ProgressEvent::Origin {
            postal_code: valid.origin.clone(),
            neighborhood: origin.neighborhood.clone(),
            point: origin.point,
        })
        .await;

        let per_prefix = sample_len(valid.strategy, &self.settings.dense_suffixes);
        let mut progress = Progress {
            done: 0,
            total: per_prefix * valid.prefix_count(),
        };

        let mut rows = Vec::new();
        for prefix in valid.prefixes.clone() {
            if sink.detached {
                break;
            }
            let prefix = format!("{:05}", prefix);
            let prefix_rows = self
                .scan_prefix(origin.point, &prefix, valid.strategy, sink, &mut progress)
                .await;
            sink.emit(ProgressEvent::Prefix {
                prefix,
                rows: prefix_rows.clone(),
            })
            .await;
            rows.extend(prefix_rows);
        }

        Ok(rows)
    }

    async fn scan_prefix(
        &self,
        origin: GeoPoint,
        prefix: &str,
        strategy: Strategy,
        sink: &mut EventSink,
        progress: &mut Progress,
    ) -> Vec<AggregatedRow> {
        let codes = sample_codes(prefix, strategy, &self.settings.dense_suffixes);
        let total = codes.len();
        let concurrency = match strategy {
            Strategy::Fast => self.settings.fast_concurrency,
            Strategy::Detailed => self.settings.detailed_concurrency,
        };

        sink.emit(ProgressEvent::Log {
            message: format!("Scanning prefix {} ({} codes, {})", prefix, total, strategy),
            progress_percent: Some(progress.percent()),
        })
        .await;

        let mut batch = QueryBatch::start(self.resolver.clone(), codes, concurrency);
        let mut samples = Vec::new();
        let mut completed = 0usize;

        while let Some(done) = batch.next_completed().await {
            completed += 1;
            progress.done += 1;

            if sink.poll_detached() {
                let skipped = batch.stop_dispatch();
                if skipped > 0 {
                    info!(
                        "Prefix {}: {} codes not dispatched after disconnect",
                        prefix, skipped
                    );
                }
                continue;
            }

            match done.location {
                Some(location) => {
                    let distance = round2(distance_km(origin, location.point));
                    debug!(
                        "[OK] {} -> {:?} at {} km",
                        done.postal_code, location.neighborhood, distance
                    );
                    samples.push(RawSample {
                        postal_code: done.postal_code,
                        neighborhood: location.neighborhood,
                        distance_km: distance,
                        point: location.point,
                    });
                }
                None => debug!("[FAIL] {} could not be located", done.postal_code),
            }

            if completed % self.settings.progress_every.max(1) == 0 || completed == total {
                sink.emit(ProgressEvent::Progress {
                    prefix: prefix.to_string(),
                    completed,
                    total,
                    progress_percent: progress.percent(),
                })
                .await;
            }
        }
        // Batch is drained; aggregation never sees in-flight queries
        drop(batch);
        if sink.detached {
            return Vec::new();
        }

        // Completion order is nondeterministic; aggregation input is not
        samples.sort_by(|a, b| a.postal_code.cmp(&b.postal_code));

        sink.emit(ProgressEvent::log(format!(
            "Prefix {}: {}/{} codes located",
            prefix,
            samples.len(),
            total
        )))
        .await;

        let params = AggregationParams::from(&self.settings);
        let aggregate = aggregate_prefix(prefix, &samples, &params);
        for outlier in &aggregate.discarded {
            sink.emit(ProgressEvent::log(format!(
                "Outlier discarded: {} is {:.1} km from the prefix center",
                outlier.postal_code, outlier.distance_from_center_km
            )))
            .await;
        }
        if !aggregate.discarded.is_empty() {
            sink.emit(ProgressEvent::log(format!(
                "Prefix {}: {} reliable samples",
                prefix,
                samples.len() - aggregate.discarded.len()
            )))
            .await;
        }
        aggregate.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_hyphenated_origin() {
        let req = ScanRequest::new("01310-100", "01310", "01311", Strategy::Fast);
        let valid = validate(&req).unwrap();
        assert_eq!(valid.origin, "01310100");
        assert_eq!(valid.prefixes, 1310..=1311);
        assert_eq!(valid.prefix_count(), 2);
    }

    #[test]
    fn test_validate_rejects_short_origin() {
        let req = ScanRequest::new("0131010", "01310", "01310", Strategy::Fast);
        let err = validate(&req).unwrap_err();
        assert_eq!(err, ScanError::InvalidOrigin("0131010".into()));
        assert!(err.to_string().contains("8 digits"));
    }

    #[test]
    fn test_validate_rejects_bad_prefixes() {
        let req = ScanRequest::new("01310100", "0131", "01310", Strategy::Fast);
        assert!(matches!(validate(&req), Err(ScanError::InvalidPrefix(_))));

        let req = ScanRequest::new("01310100", "01310", "0131a", Strategy::Fast);
        assert!(matches!(validate(&req), Err(ScanError::InvalidPrefix(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let req = ScanRequest::new("01310100", "01320", "01310", Strategy::Detailed);
        assert!(matches!(
            validate(&req),
            Err(ScanError::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_request_from_json() {
        let req: ScanRequest = serde_json::from_str(
            r#"{"originPostalCode":"01310100","prefixStart":"01310","prefixEnd":"01310","strategy":"fast"}"#,
        )
        .unwrap();
        assert_eq!(req.strategy, Strategy::Fast);

        let req: ScanRequest = serde_json::from_str(
            r#"{"originPostalCode":"01310100","prefixStart":"01310","prefixEnd":"01310"}"#,
        )
        .unwrap();
        assert_eq!(req.strategy, Strategy::Detailed);
    }
}
