//! Per-backend circuit breaker.
//!
//! Closed until `failure_threshold` consecutive failures, then Open for
//! `cooldown`. After the cool-down one trial call is let through (HalfOpen):
//! success closes the circuit, failure reopens it and restarts the cool-down.
//! State is in memory only.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit state for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct BackendCircuit {
    consecutive_failures: u32,
    state: CircuitState,
    opened_at: Option<Instant>,
    trial_granted_at: Option<Instant>,
}

impl Default for BackendCircuit {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            state: CircuitState::Closed,
            opened_at: None,
            trial_granted_at: None,
        }
    }
}

/// Tracks failures per backend and gates calls.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, BackendCircuit>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn circuits(&self) -> MutexGuard<'_, HashMap<String, BackendCircuit>> {
        self.circuits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a call to `backend` may proceed now.
    ///
    /// Moving from Open to HalfOpen grants exactly one trial. A trial that
    /// never reports back is re-granted after another cool-down.
    pub fn allow(&self, backend: &str) -> bool {
        let now = Instant::now();
        let mut circuits = self.circuits();
        let circuit = circuits.entry(backend.to_string()).or_default();

        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = circuit
                    .opened_at
                    .is_none_or(|at| now.duration_since(at) >= self.config.cooldown);
                if cooled {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.trial_granted_at = Some(now);
                    tracing::info!(backend, "circuit half-open, granting trial call");
                }
                cooled
            }
            CircuitState::HalfOpen => {
                let stale = circuit
                    .trial_granted_at
                    .is_none_or(|at| now.duration_since(at) >= self.config.cooldown);
                if stale {
                    circuit.trial_granted_at = Some(now);
                    tracing::warn!(backend, "half-open trial never reported, granting another");
                }
                stale
            }
        }
    }

    /// Record a successful call; closes the circuit.
    pub fn record_success(&self, backend: &str) {
        let mut circuits = self.circuits();
        let circuit = circuits.entry(backend.to_string()).or_default();
        if circuit.state != CircuitState::Closed {
            tracing::info!(backend, "circuit closed");
        }
        *circuit = BackendCircuit::default();
    }

    /// Record a failed call; may open the circuit.
    pub fn record_failure(&self, backend: &str) {
        let now = Instant::now();
        let mut circuits = self.circuits();
        let circuit = circuits.entry(backend.to_string()).or_default();
        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(now);
                circuit.trial_granted_at = None;
                tracing::warn!(backend, "trial call failed, circuit reopened");
            }
            CircuitState::Closed
                if circuit.consecutive_failures >= self.config.failure_threshold =>
            {
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(now);
                tracing::warn!(
                    backend,
                    failures = circuit.consecutive_failures,
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "circuit opened"
                );
            }
            _ => {}
        }
    }

    /// How long until `allow` could return true. Zero when closed.
    pub fn retry_after(&self, backend: &str) -> Duration {
        let now = Instant::now();
        let circuits = self.circuits();
        let Some(circuit) = circuits.get(backend) else {
            return Duration::ZERO;
        };

        let since = match circuit.state {
            CircuitState::Closed => return Duration::ZERO,
            CircuitState::Open => circuit.opened_at,
            CircuitState::HalfOpen => circuit.trial_granted_at,
        };
        since.map_or(Duration::ZERO, |at| {
            self.config
                .cooldown
                .saturating_sub(now.duration_since(at))
        })
    }

    /// Current state of a backend's circuit.
    pub fn state(&self, backend: &str) -> CircuitState {
        self.circuits()
            .get(backend)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    /// Consecutive failures recorded for a backend.
    pub fn consecutive_failures(&self, backend: &str) -> u32 {
        self.circuits()
            .get(backend)
            .map_or(0, |c| c.consecutive_failures)
    }
}
