//! Events streamed to the caller while a scan runs.

use serde::{Deserialize, Serialize};

use super::{AggregatedRow, GeoPoint};

/// One streamed record. `Result` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProgressEvent {
    /// Human-readable status line
    Log {
        message: String,
        #[serde(
            rename = "progressPercent",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        progress_percent: Option<f64>,
    },
    /// The origin code resolved
    Origin {
        #[serde(rename = "postalCode")]
        postal_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        neighborhood: Option<String>,
        point: GeoPoint,
    },
    /// Throttled query completion counter for the current prefix
    Progress {
        prefix: String,
        completed: usize,
        total: usize,
        #[serde(rename = "progressPercent")]
        progress_percent: f64,
    },
    /// Rows for one finished prefix
    Prefix {
        prefix: String,
        rows: Vec<AggregatedRow>,
    },
    /// Full result set across the range
    Result { rows: Vec<AggregatedRow> },
    /// Fatal failure
    Error { message: String },
}

impl ProgressEvent {
    pub fn log(message: impl Into<String>) -> Self {
        ProgressEvent::Log {
            message: message.into(),
            progress_percent: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Result { .. } | ProgressEvent::Error { .. })
    }

    /// Serialize as one newline-delimited JSON unit (no trailing newline).
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
