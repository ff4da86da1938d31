//! Scaling signal catalogue and samples.

use crate::error::{ControlError, Result};
use crate::ids::PoolId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named scaling signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    /// Sum of input tokens of pending requests.
    TokensQueued,
    /// 95th percentile time-to-first-token.
    TtftP95,
    /// Sessions with activity in the window.
    ConcurrentSessions,
    /// Output token rate currently served.
    TokensPerSecond,
    /// Pending request count.
    QueueDepth,
    /// Moving average of input+output tokens per request.
    ContextLength,
    /// Tool invocations per minute.
    ToolCallRate,
    /// Fraction of requests failing.
    ErrorRate,
}

/// Unit a signal's values and targets are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalUnit {
    /// Token counts.
    Tokens,
    /// Milliseconds.
    Millis,
    /// Plain counts.
    Count,
    /// Tokens per second.
    TokensPerSec,
    /// Events per minute.
    PerMinute,
    /// Dimensionless ratio.
    Ratio,
}

impl Signal {
    /// Unit of the signal's base representation.
    pub fn unit(self) -> SignalUnit {
        match self {
            Signal::TokensQueued | Signal::ContextLength => SignalUnit::Tokens,
            Signal::TtftP95 => SignalUnit::Millis,
            Signal::ConcurrentSessions | Signal::QueueDepth => SignalUnit::Count,
            Signal::TokensPerSecond => SignalUnit::TokensPerSec,
            Signal::ToolCallRate => SignalUnit::PerMinute,
            Signal::ErrorRate => SignalUnit::Ratio,
        }
    }

    /// Informational signals never govern a scaling decision.
    pub fn informational(self) -> bool {
        matches!(self, Signal::ContextLength)
    }

    /// Parse a target string into the signal's base unit.
    ///
    /// Duration targets accept `ms` and `s` suffixes, rate targets accept
    /// `/min` and `/s`; bare numbers are taken in the base unit.
    pub fn parse_target(self, raw: &str) -> Result<f64> {
        let raw = raw.trim();
        let parse = |s: &str| -> Result<f64> {
            s.trim()
                .parse::<f64>()
                .map_err(|_| ControlError::Validation(format!("invalid target value: {raw:?}")))
        };
        let value = match self.unit() {
            SignalUnit::Millis => {
                if let Some(stripped) = raw.strip_suffix("ms") {
                    parse(stripped)?
                } else if let Some(stripped) = raw.strip_suffix('s') {
                    parse(stripped)? * 1000.0
                } else {
                    parse(raw)?
                }
            }
            SignalUnit::PerMinute => {
                if let Some(stripped) = raw.strip_suffix("/min") {
                    parse(stripped)?
                } else if let Some(stripped) = raw.strip_suffix("/s") {
                    parse(stripped)? * 60.0
                } else {
                    parse(raw)?
                }
            }
            SignalUnit::TokensPerSec => {
                if let Some(stripped) = raw.strip_suffix("/s") {
                    parse(stripped)?
                } else {
                    parse(raw)?
                }
            }
            _ => parse(raw)?,
        };
        if !value.is_finite() || value <= 0.0 {
            return Err(ControlError::Validation(format!(
                "target must be a positive finite number, got {raw:?}"
            )));
        }
        Ok(value)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::TokensQueued => "tokens-queued",
            Signal::TtftP95 => "ttft-p95",
            Signal::ConcurrentSessions => "concurrent-sessions",
            Signal::TokensPerSecond => "tokens-per-second",
            Signal::QueueDepth => "queue-depth",
            Signal::ContextLength => "context-length",
            Signal::ToolCallRate => "tool-call-rate",
            Signal::ErrorRate => "error-rate",
        };
        f.write_str(name)
    }
}

impl FromStr for Signal {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tokens-queued" => Ok(Signal::TokensQueued),
            "ttft-p95" => Ok(Signal::TtftP95),
            "concurrent-sessions" => Ok(Signal::ConcurrentSessions),
            "tokens-per-second" => Ok(Signal::TokensPerSecond),
            "queue-depth" => Ok(Signal::QueueDepth),
            "context-length" => Ok(Signal::ContextLength),
            "tool-call-rate" => Ok(Signal::ToolCallRate),
            "error-rate" => Ok(Signal::ErrorRate),
            other => Err(ControlError::Validation(format!(
                "unknown signal name: {other:?}"
            ))),
        }
    }
}

/// A signal value, or the explicit stale-or-missing sentinel. The reader
/// never substitutes zero for a missing value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    /// Windowed aggregate.
    Value(f64),
    /// No fresh data inside the window.
    Stale,
}

impl MetricValue {
    /// Whether the value is the stale sentinel.
    pub fn is_stale(&self) -> bool {
        matches!(self, MetricValue::Stale)
    }

    /// Numeric value, if fresh.
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Value(v) => Some(*v),
            MetricValue::Stale => None,
        }
    }
}

/// One windowed observation of a signal for a pool. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Pool the sample belongs to.
    pub pool_ref: PoolId,
    /// Signal name.
    pub signal: Signal,
    /// Value or stale sentinel.
    pub value: MetricValue,
    /// End of the averaging window.
    pub window_end: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Signal::TtftP95, "500ms" => 500.0)]
    #[test_case(Signal::TtftP95, "2s" => 2000.0)]
    #[test_case(Signal::TtftP95, "750" => 750.0)]
    #[test_case(Signal::ToolCallRate, "12/min" => 12.0)]
    #[test_case(Signal::ToolCallRate, "1/s" => 60.0)]
    #[test_case(Signal::TokensQueued, "100" => 100.0)]
    #[test_case(Signal::TokensPerSecond, "50/s" => 50.0)]
    fn target_parsing(signal: Signal, raw: &str) -> f64 {
        signal.parse_target(raw).unwrap()
    }

    #[test]
    fn target_rejects_garbage_and_non_positive() {
        assert!(Signal::TokensQueued.parse_target("abc").is_err());
        assert!(Signal::TokensQueued.parse_target("0").is_err());
        assert!(Signal::TtftP95.parse_target("-5ms").is_err());
    }

    #[test]
    fn signal_name_round_trip() {
        for signal in [
            Signal::TokensQueued,
            Signal::TtftP95,
            Signal::ConcurrentSessions,
            Signal::TokensPerSecond,
            Signal::QueueDepth,
            Signal::ContextLength,
            Signal::ToolCallRate,
            Signal::ErrorRate,
        ] {
            assert_eq!(signal.to_string().parse::<Signal>().unwrap(), signal);
        }
    }
}
