//! # Resilience Metrics
//!
//! Metrics emission and snapshot types for circuit breaker operations.
//!
//! Two complementary surfaces:
//!
//! - **Emission**: counters, histograms, and gauges published through the
//!   [`metrics`] facade. The embedding application installs whatever recorder
//!   it wants (Prometheus exporter, statsd, tests); this module only defines
//!   the contract of what is emitted.
//! - **Snapshots**: [`CircuitSnapshot`] for programmatic inspection of a
//!   single circuit's counters and derived rates, used by health endpoints
//!   and tests.

use super::circuit_breaker::CircuitState;
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome label attached to the request counter and duration histogram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Operation completed successfully (possibly after retries)
    Success,
    /// Operation failed after exhausting retries
    Failure,
    /// Fast-failed without invoking the operation (circuit open)
    Rejected,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Rejected => "rejected",
        }
    }
}

/// Error classification label for the error counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Circuit was open; no call was attempted
    CircuitOpen,
    /// A retry sequence ended with a timed-out attempt
    Timeout,
    /// A retry sequence ended with the operation's own error
    Operation,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::CircuitOpen => "circuit_open",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Operation => "operation",
        }
    }
}

/// Record a completed (or rejected) call for a service
pub(crate) fn record_request(service: &str, outcome: CallOutcome, duration: Duration) {
    counter!(
        "tradenav_requests_total",
        "service" => service.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);

    histogram!(
        "tradenav_request_duration_seconds",
        "service" => service.to_string(),
        "outcome" => outcome.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record a fast-failed call (circuit open, operation never invoked)
///
/// Rejected calls have no meaningful duration, so they are counted but not
/// recorded in the duration histogram.
pub(crate) fn record_rejected(service: &str) {
    counter!(
        "tradenav_requests_total",
        "service" => service.to_string(),
        "outcome" => CallOutcome::Rejected.as_str()
    )
    .increment(1);
}

/// Record a classified error for a service
pub(crate) fn record_error(service: &str, class: ErrorClass) {
    counter!(
        "tradenav_errors_total",
        "service" => service.to_string(),
        "classification" => class.as_str()
    )
    .increment(1);
}

/// Publish the current circuit state gauge for a service
///
/// Gauge values: closed=0, half_open=1, open=2.
pub(crate) fn record_circuit_state(service: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };

    gauge!(
        "tradenav_circuit_state",
        "service" => service.to_string()
    )
    .set(value);
}

/// Point-in-time counters and derived rates for a single circuit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    /// Service name this circuit tracks
    pub service: String,

    /// Current circuit state
    pub state: CircuitState,

    /// Total calls routed through this circuit (including fast-failures)
    pub total_calls: u64,

    /// Calls that completed successfully
    pub success_count: u64,

    /// Calls that failed after exhausting retries
    pub failure_count: u64,

    /// Calls rejected without execution while the circuit was open
    pub rejected_count: u64,

    /// Current consecutive failure count toward the open threshold
    pub consecutive_failures: u64,

    /// Total wall-clock time spent in executed calls
    pub total_duration: Duration,

    /// Failure rate over executed calls (0.0 to 1.0)
    pub failure_rate: f64,

    /// Average duration of executed calls
    pub average_duration: Duration,
}

impl CircuitSnapshot {
    /// Check if this circuit looks healthy
    ///
    /// Closed with a low failure rate is healthy; Half-Open is treated as
    /// healthy (recovery in progress); Open is not.
    pub fn is_healthy(&self) -> bool {
        match self.state {
            CircuitState::Closed => {
                if self.total_calls < 10 {
                    // Too few calls to judge
                    return true;
                }
                self.failure_rate < 0.1
            }
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: CircuitState, total: u64, failures: u64) -> CircuitSnapshot {
        CircuitSnapshot {
            service: "test".to_string(),
            state,
            total_calls: total,
            success_count: total.saturating_sub(failures),
            failure_count: failures,
            rejected_count: 0,
            consecutive_failures: 0,
            total_duration: Duration::from_secs(1),
            failure_rate: if total > 0 {
                failures as f64 / total as f64
            } else {
                0.0
            },
            average_duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_closed_with_low_failure_rate_is_healthy() {
        assert!(snapshot(CircuitState::Closed, 100, 5).is_healthy());
    }

    #[test]
    fn test_closed_with_high_failure_rate_is_unhealthy() {
        assert!(!snapshot(CircuitState::Closed, 100, 50).is_healthy());
    }

    #[test]
    fn test_closed_with_few_calls_is_healthy() {
        assert!(snapshot(CircuitState::Closed, 5, 5).is_healthy());
    }

    #[test]
    fn test_open_is_unhealthy() {
        assert!(!snapshot(CircuitState::Open, 100, 0).is_healthy());
    }

    #[test]
    fn test_half_open_is_healthy() {
        assert!(snapshot(CircuitState::HalfOpen, 100, 50).is_healthy());
    }

    #[test]
    fn test_label_values() {
        assert_eq!(CallOutcome::Success.as_str(), "success");
        assert_eq!(CallOutcome::Rejected.as_str(), "rejected");
        assert_eq!(ErrorClass::CircuitOpen.as_str(), "circuit_open");
        assert_eq!(ErrorClass::Timeout.as_str(), "timeout");
    }
}
