//! Postal codes to probe for a 5-digit prefix.

use serde::{Deserialize, Serialize};

/// Codes within one prefix
pub const PREFIX_RANGE: u16 = 1000;

/// How densely a prefix is probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One code per hundred-block
    #[serde(alias = "rapida")]
    Fast,
    /// A fixed suffix subset of every ten-block
    #[default]
    #[serde(alias = "detalhada")]
    Detailed,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" | "rapida" => Ok(Strategy::Fast),
            "detailed" | "detalhada" => Ok(Strategy::Detailed),
            other => Err(format!("unknown strategy '{}'", other)),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Fast => write!(f, "fast"),
            Strategy::Detailed => write!(f, "detailed"),
        }
    }
}

/// Ordered 8-digit codes to query for `prefix`.
///
/// `dense_suffixes` are the last digits taken from each ten-block under
/// [`Strategy::Detailed`]; they are ignored for [`Strategy::Fast`].
pub fn sample_codes(prefix: &str, strategy: Strategy, dense_suffixes: &[u16]) -> Vec<String> {
    let offsets: Vec<u16> = match strategy {
        Strategy::Fast => (0..PREFIX_RANGE).step_by(100).collect(),
        Strategy::Detailed => (0..PREFIX_RANGE)
            .step_by(10)
            .flat_map(|block| {
                dense_suffixes
                    .iter()
                    .filter(|s| **s < 10)
                    .map(move |s| block + s)
            })
            .collect(),
    };

    offsets
        .into_iter()
        .map(|offset| format!("{}{:03}", prefix, offset))
        .collect()
}

/// Number of codes [`sample_codes`] yields, without building them.
pub fn sample_len(strategy: Strategy, dense_suffixes: &[u16]) -> usize {
    match strategy {
        Strategy::Fast => (PREFIX_RANGE / 100) as usize,
        Strategy::Detailed => {
            (PREFIX_RANGE / 10) as usize * dense_suffixes.iter().filter(|s| **s < 10).count()
        }
    }
}
