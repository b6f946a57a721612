//! Logarithmic round-trip latency histogram.
//!
//! Bucket `i` counts inter-arrival times in `[2^i, 2^(i+1))` nanoseconds.
//! The last bucket also absorbs everything larger.

use crate::error::{Error, Result};
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

pub const BUCKETS: usize = 30;

/// Bucket index for an elapsed time: `floor(log2(ns))` clamped to the
/// last bucket. Zero lands in bucket 0.
pub fn bucket_index(elapsed_ns: u64) -> usize {
    match elapsed_ns.checked_ilog2() {
        Some(log) => (log as usize).min(BUCKETS - 1),
        None => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyHistogram {
    buckets: [u64; BUCKETS],
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: [0; BUCKETS],
        }
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed_ns: u64) {
        self.buckets[bucket_index(elapsed_ns)] += 1;
    }

    pub fn buckets(&self) -> &[u64; BUCKETS] {
        &self.buckets
    }

    /// Total number of recorded samples.
    pub fn samples(&self) -> u64 {
        self.buckets.iter().sum()
    }

    /// Lower bound in nanoseconds of the bucket holding quantile `q`.
    pub fn quantile_floor(&self, q: f64) -> Option<u64> {
        let total = self.samples();
        if total == 0 {
            return None;
        }
        let rank = ((q.clamp(0.0, 1.0) * total as f64).ceil() as u64).max(1);
        let mut seen = 0;
        for (i, &count) in self.buckets.iter().enumerate() {
            seen += count;
            if seen >= rank {
                return Some(1u64 << i);
            }
        }
        Some(1u64 << (BUCKETS - 1))
    }
}

impl AddAssign<&LatencyHistogram> for LatencyHistogram {
    fn add_assign(&mut self, other: &LatencyHistogram) {
        for (mine, theirs) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            *mine += theirs;
        }
    }
}

/// Outcome of one worker, or of a whole run after merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunResult {
    /// Completed round trips, including each connection's first one.
    pub round_trips: u64,
    pub histogram: LatencyHistogram,
}

impl RunResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Element-wise sum of all results.
    pub fn merge<'a, I>(results: I) -> RunResult
    where
        I: IntoIterator<Item = &'a RunResult>,
    {
        let mut total = RunResult::new();
        for result in results {
            total += result;
        }
        total
    }
}

impl AddAssign<&RunResult> for RunResult {
    fn add_assign(&mut self, other: &RunResult) {
        self.round_trips += other.round_trips;
        self.histogram += &other.histogram;
    }
}

/// Wire form: `<round_trips> <bucket_0> ... <bucket_29>`.
impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.round_trips)?;
        for count in self.histogram.buckets.iter() {
            write!(f, " {count}")?;
        }
        Ok(())
    }
}

impl FromStr for RunResult {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != BUCKETS + 1 {
            return Err(Error::Parse(format!(
                "expected {} fields, got {}",
                BUCKETS + 1,
                fields.len()
            )));
        }

        let parse = |field: &str| {
            field
                .parse::<u64>()
                .map_err(|e| Error::Parse(format!("invalid count '{field}': {e}")))
        };

        let mut result = RunResult::new();
        result.round_trips = parse(fields[0])?;
        for (slot, field) in result.histogram.buckets.iter_mut().zip(&fields[1..]) {
            *slot = parse(field)?;
        }
        Ok(result)
    }
}
