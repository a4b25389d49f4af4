//! Ambient noise trace.
//!
//! Line-oriented text, `#` starts a comment line, one dBm sample per line.
//! Sample `i` applies to simulated millisecond `i`; the trace repeats when
//! the simulation outlasts it.

use anyhow::Context;
use std::fs;
use std::path::Path;

use super::{LineError, content_lines, parse_number};
use crate::simulation::arbitrator::DEFAULT_NOISE_DBM;

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseTrace {
    samples: Vec<f64>,
}

impl Default for NoiseTrace {
    fn default() -> Self {
        Self::constant(DEFAULT_NOISE_DBM)
    }
}

impl NoiseTrace {
    pub fn constant(dbm: f64) -> Self {
        NoiseTrace { samples: vec![dbm] }
    }

    pub fn from_samples(samples: Vec<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        NoiseTrace { samples }
    }

    /// Parse trace text. Malformed lines are logged and skipped; an empty
    /// trace falls back to the default constant.
    pub fn parse(text: &str) -> Self {
        let mut samples = Vec::new();
        for (number, line) in content_lines(text) {
            match parse_line(line) {
                Ok(sample) => samples.push(sample),
                Err(e) => log::warn!("Skipping noise line {}: {} ({:?})", number, e, line),
            }
        }
        Self::from_samples(samples)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read noise file: {}", path.display()))?;
        let trace = Self::parse(&text);
        log::info!("Loaded {} noise samples from {}", trace.len(), path.display());
        Ok(trace)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Noise at simulated millisecond `millis`, in dBm.
    pub fn sample(&self, millis: u64) -> f64 {
        match self.samples.len() {
            0 => DEFAULT_NOISE_DBM,
            1 => self.samples[0],
            n => self.samples[(millis % n as u64) as usize],
        }
    }
}

fn parse_line(line: &str) -> Result<f64, LineError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 1 {
        return Err(LineError::FieldCount {
            expected: "1",
            found: tokens.len(),
        });
    }
    parse_number(tokens[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_constant_floor() {
        let trace = NoiseTrace::default();
        assert_eq!(trace.sample(0), -95.0);
        assert_eq!(trace.sample(123_456), -95.0);
    }

    #[test]
    fn samples_cycle_by_millisecond() {
        let trace = NoiseTrace::parse("# lab capture\n-98\n-97\n-96\n");
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.sample(0), -98.0);
        assert_eq!(trace.sample(2), -96.0);
        assert_eq!(trace.sample(3), -98.0);
        assert_eq!(trace.sample(10), -97.0);
    }

    #[test]
    fn bad_lines_skipped_and_empty_trace_defaults() {
        let trace = NoiseTrace::parse("-90\nloud\n-91 -92\n");
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.sample(7), -90.0);
        assert_eq!(NoiseTrace::parse("# nothing\n"), NoiseTrace::default());
    }
}
