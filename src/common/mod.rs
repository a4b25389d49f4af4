//! Input files: scenario configuration, node topology and noise traces.

pub mod noise;
pub mod scenario;
pub mod topology;

use thiserror::Error;

/// Why a line of a line-oriented input file was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LineError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: &'static str, found: usize },
    #[error("invalid number {token:?}")]
    InvalidNumber { token: String },
}

/// Iterate over the meaningful lines of a text file, with 1-based line numbers.
///
/// Blank lines and lines starting with `#` are skipped.
pub(crate) fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

pub(crate) fn parse_number(token: &str) -> Result<f64, LineError> {
    token.parse::<f64>().map_err(|_| LineError::InvalidNumber {
        token: token.to_string(),
    })
}
