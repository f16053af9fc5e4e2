//! # Circuit Breaker Implementation
//!
//! Per-service fault isolation for TradeNavigator's external API calls.
//! One [`CircuitBreaker`] owns a registry of independent circuits keyed by
//! service name; each circuit follows the classic three-state pattern:
//! Closed (normal operation), Open (failing fast), and Half-Open (testing
//! recovery).
//!
//! Every executed operation runs through a retry-with-timeout loop. The
//! circuit observes only the final outcome of that loop, so a string of
//! failed retries counts as a single failure toward the open threshold.
//!
//! ## Concurrency
//!
//! Circuit state lives in lock-free atomics. Individual field updates are
//! atomic, but multi-step transitions are not serialized across await
//! points: two concurrent probes in Half-Open may both record a success and
//! both believe they closed the circuit. The end state is the same, so this
//! imprecision is accepted rather than paying for a per-service mutex on
//! the hot path.

use crate::resilience::config::{CircuitBreakerConfig, ResilienceConfig};
use crate::resilience::metrics::{
    record_circuit_state, record_error, record_rejected, record_request, CallOutcome,
    CircuitSnapshot, ErrorClass,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Service key used when a caller does not supply a service name
pub const DEFAULT_SERVICE: &str = "default";

/// Circuit states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed = 0,
    /// Failure mode - calls fail fast without executing
    Open = 1,
    /// Testing recovery - probe calls are attempted
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            // Default to the safest state
            _ => CircuitState::Open,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Errors surfaced to callers of [`CircuitBreaker::execute`]
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the operation was not invoked
    #[error("circuit breaker is open for {service}")]
    CircuitOpen { service: String },

    /// Every attempt ended with a timed-out operation
    #[error("operation timed out for {service} after {attempts} attempts")]
    Timeout { service: String, attempts: u32 },

    /// Every attempt failed; this is the final attempt's error
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    /// True when the error is a fast-fail rejection (no call was attempted)
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }
}

/// Outcome of a single retry sequence, before mapping to the public error type
enum AttemptError<E> {
    Timeout,
    Operation(E),
}

/// Lock-free state record for one named service
///
/// `next_attempt_ms` is milliseconds since the owning breaker's start
/// instant; 0 means "not open".
#[derive(Debug)]
struct ServiceCircuit {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    next_attempt_ms: AtomicU64,

    // Lifetime totals for snapshots
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl ServiceCircuit {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            next_attempt_ms: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    fn record_executed(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }
}

/// Per-service circuit breaker registry with retry/timeout execution
///
/// Records are created lazily in the Closed state on first use and persist
/// for the process lifetime; [`CircuitBreaker::reset`] returns a record to
/// Closed with zeroed counters.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: ResilienceConfig,
    services: DashMap<String, Arc<ServiceCircuit>>,
    start: Instant,
}

impl CircuitBreaker {
    /// Create a breaker registry from a resolved resilience configuration
    pub fn new(config: ResilienceConfig) -> Self {
        info!(
            failure_threshold = config.default_config.failure_threshold,
            reset_timeout_ms = config.default_config.reset_timeout.as_millis() as u64,
            max_retries = config.default_config.max_retries,
            service_overrides = config.service_configs.len(),
            "Circuit breaker registry initialized"
        );

        Self {
            config,
            services: DashMap::new(),
            start: Instant::now(),
        }
    }

    /// Create a breaker registry with a single policy for every service
    pub fn with_defaults(default_config: CircuitBreakerConfig) -> Self {
        Self::new(ResilienceConfig {
            default_config,
            service_configs: Default::default(),
        })
    }

    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn circuit(&self, service: &str) -> Arc<ServiceCircuit> {
        if let Some(existing) = self.services.get(service) {
            return Arc::clone(existing.value());
        }

        let created = self
            .services
            .entry(service.to_string())
            .or_insert_with(|| {
                debug!(service = service, "Circuit created (closed)");
                record_circuit_state(service, CircuitState::Closed);
                Arc::new(ServiceCircuit::new())
            });
        Arc::clone(created.value())
    }

    fn config_for(&self, service: &str) -> &CircuitBreakerConfig {
        self.config.config_for_service(service)
    }

    /// Get the current state for a service (Closed when never seen)
    pub fn state(&self, service: &str) -> CircuitState {
        self.services
            .get(service)
            .map(|c| c.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Execute an operation under the default (unnamed) circuit
    pub async fn execute_default<F, Fut, T, E>(
        &self,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(DEFAULT_SERVICE, operation).await
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// The operation must be re-invokable: it is called once per retry
    /// attempt, up to `max_retries + 1` times, each raced against the
    /// configured per-attempt timeout with a fixed delay between attempts.
    /// The circuit observes only the final outcome.
    pub async fn execute<F, Fut, T, E>(
        &self,
        service: &str,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let circuit = self.circuit(service);
        let config = self.config_for(service);

        if !self.allow_call(service, &circuit) {
            circuit.rejected_count.fetch_add(1, Ordering::Relaxed);
            record_rejected(service);
            record_error(service, ErrorClass::CircuitOpen);
            debug!(service = service, "Circuit open, failing fast");
            return Err(CircuitBreakerError::CircuitOpen {
                service: service.to_string(),
            });
        }

        let started = Instant::now();
        let result = self.run_with_retry(service, config, &operation).await;
        let duration = started.elapsed();

        match result {
            Ok(value) => {
                self.observe_success(service, &circuit, config, duration);
                Ok(value)
            }
            Err(attempt_error) => {
                self.observe_failure(service, &circuit, config, duration);
                match attempt_error {
                    AttemptError::Timeout => {
                        record_error(service, ErrorClass::Timeout);
                        Err(CircuitBreakerError::Timeout {
                            service: service.to_string(),
                            attempts: config.max_retries + 1,
                        })
                    }
                    AttemptError::Operation(e) => {
                        record_error(service, ErrorClass::Operation);
                        Err(CircuitBreakerError::OperationFailed(e))
                    }
                }
            }
        }
    }

    /// Retry loop: up to `max_retries + 1` attempts, each with a deadline
    ///
    /// The timeout cancels waiting for an attempt's result, not the
    /// underlying work; a timed-out operation may still run to completion
    /// in the background and its result is discarded.
    async fn run_with_retry<F, Fut, T, E>(
        &self,
        service: &str,
        config: &CircuitBreakerConfig,
        operation: &F,
    ) -> Result<T, AttemptError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let failure = match tokio::time::timeout(config.timeout, operation()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => AttemptError::Operation(e),
                Err(_elapsed) => {
                    debug!(
                        service = service,
                        attempt = attempt,
                        timeout_ms = config.timeout.as_millis() as u64,
                        "Attempt timed out"
                    );
                    AttemptError::Timeout
                }
            };

            if attempt > config.max_retries {
                return Err(failure);
            }

            debug!(
                service = service,
                attempt = attempt,
                max_retries = config.max_retries,
                retry_delay_ms = config.retry_delay.as_millis() as u64,
                "Attempt failed, retrying after delay"
            );
            tokio::time::sleep(config.retry_delay).await;
        }
    }

    /// Check whether a call should proceed, transitioning Open circuits to
    /// Half-Open once their reset timeout has elapsed
    fn allow_call(&self, service: &str, circuit: &ServiceCircuit) -> bool {
        match circuit.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let next_attempt = circuit.next_attempt_ms.load(Ordering::Acquire);
                if self.now_ms() >= next_attempt {
                    self.transition_to_half_open(service, circuit);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn observe_success(
        &self,
        service: &str,
        circuit: &ServiceCircuit,
        config: &CircuitBreakerConfig,
        duration: Duration,
    ) {
        circuit.record_executed(duration);
        circuit.success_count.fetch_add(1, Ordering::Relaxed);
        record_request(service, CallOutcome::Success, duration);

        debug!(
            service = service,
            duration_ms = duration.as_millis() as u64,
            "Operation succeeded"
        );

        match circuit.state() {
            CircuitState::Closed => {
                circuit.consecutive_failures.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                let successes = circuit.half_open_successes.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= config.half_open_success_threshold {
                    self.transition_to_closed(service, circuit);
                }
            }
            CircuitState::Open => {
                // Possible when a timed-out probe resolved after a relapse
                warn!(service = service, "Success recorded while circuit is open");
            }
        }
    }

    fn observe_failure(
        &self,
        service: &str,
        circuit: &ServiceCircuit,
        config: &CircuitBreakerConfig,
        duration: Duration,
    ) {
        circuit.record_executed(duration);
        circuit.failure_count.fetch_add(1, Ordering::Relaxed);
        record_request(service, CallOutcome::Failure, duration);

        error!(
            service = service,
            duration_ms = duration.as_millis() as u64,
            "Operation failed after retries"
        );

        match circuit.state() {
            CircuitState::Closed => {
                let failures = circuit.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= config.failure_threshold {
                    self.transition_to_open(service, circuit, config);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure during recovery re-opens immediately
                self.transition_to_open(service, circuit, config);
            }
            CircuitState::Open => {}
        }
    }

    fn transition_to_open(
        &self,
        service: &str,
        circuit: &ServiceCircuit,
        config: &CircuitBreakerConfig,
    ) {
        let next_attempt = self.now_ms() + config.reset_timeout.as_millis() as u64;
        circuit
            .next_attempt_ms
            .store(next_attempt, Ordering::Release);
        circuit.half_open_successes.store(0, Ordering::Relaxed);
        circuit.state.store(CircuitState::Open as u8, Ordering::Release);

        record_circuit_state(service, CircuitState::Open);
        error!(
            service = service,
            consecutive_failures = circuit.consecutive_failures.load(Ordering::Relaxed),
            failure_threshold = config.failure_threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "Circuit opened (failing fast)"
        );
    }

    fn transition_to_half_open(&self, service: &str, circuit: &ServiceCircuit) {
        // Success count restarts; the failure count that opened the circuit
        // is kept until the circuit fully closes.
        circuit.half_open_successes.store(0, Ordering::Relaxed);
        circuit
            .state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);

        record_circuit_state(service, CircuitState::HalfOpen);
        info!(service = service, "Circuit half-open (testing recovery)");
    }

    fn transition_to_closed(&self, service: &str, circuit: &ServiceCircuit) {
        circuit.consecutive_failures.store(0, Ordering::Relaxed);
        circuit.half_open_successes.store(0, Ordering::Relaxed);
        circuit.next_attempt_ms.store(0, Ordering::Release);
        circuit
            .state
            .store(CircuitState::Closed as u8, Ordering::Release);

        record_circuit_state(service, CircuitState::Closed);
        info!(service = service, "Circuit closed (recovered)");
    }

    /// Force a service's circuit back to Closed with zeroed counters
    ///
    /// Bypasses normal transition rules; used for manual recovery and tests.
    pub fn reset(&self, service: &str) {
        let circuit = self.circuit(service);
        warn!(service = service, "Circuit manually reset to closed");
        self.transition_to_closed(service, &circuit);
    }

    /// Reset every known circuit to Closed
    pub fn reset_all(&self) {
        for entry in self.services.iter() {
            self.transition_to_closed(entry.key(), entry.value());
        }
        warn!("All circuits manually reset to closed");
    }

    /// Force a service's circuit open (emergency stop for one dependency)
    pub fn force_open(&self, service: &str) {
        let circuit = self.circuit(service);
        let config = self.config_for(service);
        warn!(service = service, "Circuit forced open");
        self.transition_to_open(service, &circuit, config);
    }

    /// Pre-flight check for callers doing manual outcome recording
    ///
    /// Transitions Open circuits to Half-Open when their reset timeout has
    /// elapsed, mirroring [`CircuitBreaker::execute`].
    pub fn should_allow(&self, service: &str) -> bool {
        let circuit = self.circuit(service);
        self.allow_call(service, &circuit)
    }

    /// Manually record a successful operation
    ///
    /// For callers that need fine-grained control over outcome recording
    /// (the cache provider records backend health this way rather than
    /// routing every cache command through `execute`).
    pub fn record_success_manual(&self, service: &str, duration: Duration) {
        let circuit = self.circuit(service);
        let config = self.config_for(service);
        self.observe_success(service, &circuit, config, duration);
    }

    /// Manually record a failed operation
    pub fn record_failure_manual(&self, service: &str, duration: Duration) {
        let circuit = self.circuit(service);
        let config = self.config_for(service);
        self.observe_failure(service, &circuit, config, duration);
    }

    /// Names of every service with a circuit record
    pub fn services(&self) -> Vec<String> {
        self.services.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of a single service's circuit, if one exists
    pub fn snapshot(&self, service: &str) -> Option<CircuitSnapshot> {
        self.services
            .get(service)
            .map(|c| self.snapshot_circuit(service, c.value()))
    }

    /// Snapshots of every known circuit
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        self.services
            .iter()
            .map(|e| self.snapshot_circuit(e.key(), e.value()))
            .collect()
    }

    fn snapshot_circuit(&self, service: &str, circuit: &ServiceCircuit) -> CircuitSnapshot {
        let total_calls = circuit.total_calls.load(Ordering::Relaxed);
        let success_count = circuit.success_count.load(Ordering::Relaxed);
        let failure_count = circuit.failure_count.load(Ordering::Relaxed);
        let total_duration_nanos = circuit.total_duration_nanos.load(Ordering::Relaxed);
        let total_duration = Duration::from_nanos(total_duration_nanos);

        let (failure_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                Duration::from_nanos(total_duration_nanos / total_calls),
            )
        } else {
            (0.0, Duration::ZERO)
        };

        CircuitSnapshot {
            service: service.to_string(),
            state: circuit.state(),
            total_calls,
            success_count,
            failure_count,
            rejected_count: circuit.rejected_count.load(Ordering::Relaxed),
            consecutive_failures: circuit.consecutive_failures.load(Ordering::Relaxed) as u64,
            total_duration,
            failure_rate,
            average_duration,
        }
    }
}
