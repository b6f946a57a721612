//! Control client: submit one request and collect the histogram.

use super::protocol::format_request;
use crate::error::{Error, Result};
use crate::loadgen::{RunResult, TestParameters, BUCKETS};
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::net::TcpStream;
use tracing::debug;

/// Send `params` to the control endpoint at `control` and wait for the result.
///
/// The endpoint answers only after the whole run, so this blocks for at
/// least the requested duration.
pub fn request(control: &str, params: &TestParameters) -> Result<RunResult> {
    let mut stream = TcpStream::connect(control).map_err(|e| Error::socket("connect", e))?;
    stream.write_all(format_request(params).as_bytes())?;
    debug!(control, "Request sent");

    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    if response.is_empty() {
        return Err(Error::Parse(
            "control endpoint closed without a response".into(),
        ));
    }
    response.parse()
}

/// Human-readable rendering of a run result.
pub fn summary(result: &RunResult, params: &TestParameters) -> String {
    let mut out = String::new();
    let secs = params.duration_secs.max(1) as f64;
    let _ = writeln!(
        out,
        "{} round trips over {} connections ({:.0}/s)",
        result.round_trips,
        params.connections,
        result.round_trips as f64 / secs
    );

    let measured = result.histogram.samples();
    for (i, &count) in result.histogram.buckets().iter().enumerate() {
        if count == 0 {
            continue;
        }
        let upper = if i == BUCKETS - 1 {
            "inf".to_string()
        } else {
            format!("{}", 1u64 << (i + 1))
        };
        let _ = writeln!(
            out,
            "  [{:>10}, {:>10}) ns  {:>10}  {:5.1}%",
            1u64 << i,
            upper,
            count,
            count as f64 * 100.0 / measured as f64
        );
    }

    for (label, q) in [("p50", 0.5), ("p99", 0.99)] {
        if let Some(floor) = result.histogram.quantile_floor(q) {
            let _ = writeln!(out, "  {label} >= {floor} ns");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lists_populated_buckets() {
        let params = TestParameters {
            target_ip: "127.0.0.1".into(),
            target_port: 9000,
            connections: 2,
            duration_secs: 2,
            timeout_secs: 5,
            message_size: 64,
        };
        let mut result = RunResult::new();
        result.round_trips = 10;
        for _ in 0..8 {
            result.histogram.record(3_000);
        }

        let text = summary(&result, &params);
        assert!(text.starts_with("10 round trips over 2 connections (5/s)"));
        assert!(text.contains("2048"));
        assert!(text.contains("100.0%"));
        assert!(text.contains("p50 >= 2048 ns"));
        assert_eq!(text.lines().count(), 4);
    }
}
