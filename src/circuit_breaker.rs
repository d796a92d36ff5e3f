//! Three-state circuit breaker guarding the upstream API.
//!
//! ```text
//! Closed ──(threshold failures)──> Open ──(cooldown, on allow())──> HalfOpen
//!   ▲                                ▲                                 │
//!   │                                └──────────(probe fails)──────────┤
//!   └──────────────────────────────(probe succeeds)────────────────────┘
//! ```
//!
//! The breaker never retries anything itself; rejections are returned to the
//! caller's retry loop, which decides what to do with them.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Source of monotonic time for the breaker.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// [`Clock`] backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow through; failures are counted.
    Closed,
    /// Requests are rejected until the cooldown elapses.
    Open,
    /// A single probe request is allowed through.
    HalfOpen,
}

impl CircuitState {
    /// Returns `"closed"`, `"open"` or `"half-open"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How [`CircuitBreaker::allow`] let a request through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The circuit is closed.
    Normal,
    /// The caller is the half-open probe. The number identifies this probe
    /// so that only its own holder can release it.
    Probe(u64),
}

impl Admission {
    /// Returns `true` for a half-open probe admission.
    pub fn is_probe(&self) -> bool {
        matches!(self, Admission::Probe(_))
    }
}

/// Why [`CircuitBreaker::allow`] refused a request.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitRejection {
    /// The circuit is open; `remaining` is what is left of the cooldown.
    #[error("circuit breaker is open, retry after {:.1}s", .remaining.as_secs_f64())]
    Open {
        /// Time until the next probe will be allowed.
        remaining: Duration,
    },
    /// The circuit is half-open and another caller's probe is in flight.
    #[error("circuit breaker is half-open, probe in progress")]
    ProbeInProgress,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    probing: bool,
    probe_id: u64,
}

/// A circuit breaker shared by every call made through one client.
///
/// All transitions happen under a single mutex and no method performs I/O, so
/// the breaker is cheap to consult before every attempt.
///
/// # Examples
///
/// ```
/// use slshop::circuit_breaker::{CircuitBreaker, CircuitState};
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(2, Duration::from_secs(30));
/// breaker.record_failure();
/// breaker.record_failure();
///
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(breaker.allow().is_err());
/// ```
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a breaker that opens after `threshold` consecutive failures and
    /// stays open for `cooldown`. A threshold of zero behaves like one.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self::with_clock(threshold, cooldown, Arc::new(SystemClock))
    }

    /// Creates a breaker that reads time from `clock`.
    pub fn with_clock(threshold: u32, cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                probing: false,
                probe_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks whether a request may proceed.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and lets
    /// this caller through as the probe.
    pub fn allow(&self) -> Result<Admission, CircuitRejection> {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let now = self.clock.now();
                let elapsed = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(self.cooldown);
                if elapsed >= self.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!("Circuit breaker half-open, allowing probe request");
                    return Ok(Self::start_probe(&mut inner));
                }
                Err(CircuitRejection::Open {
                    remaining: self.cooldown - elapsed,
                })
            }
            CircuitState::HalfOpen => {
                if inner.probing {
                    return Err(CircuitRejection::ProbeInProgress);
                }
                Ok(Self::start_probe(&mut inner))
            }
        }
    }

    fn start_probe(inner: &mut BreakerState) -> Admission {
        inner.probing = true;
        inner.probe_id = inner.probe_id.wrapping_add(1);
        Admission::Probe(inner.probe_id)
    }

    /// Records a successful outcome: closes the circuit and resets the counter.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(from = %inner.state, "Circuit breaker closed");
        }
        inner.failures = 0;
        inner.probing = false;
        inner.state = CircuitState::Closed;
    }

    /// Records a failed outcome.
    ///
    /// Closed circuits open once the threshold is reached; a failed half-open
    /// probe reopens the circuit and restarts the cooldown.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.probing = false;
        inner.last_failure = Some(self.clock.now());

        match inner.state {
            CircuitState::Closed => {
                inner.failures = inner.failures.saturating_add(1);
                if inner.failures >= self.threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        failures = inner.failures,
                        cooldown_ms = self.cooldown.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                tracing::warn!("Circuit breaker probe failed, reopening");
            }
            CircuitState::Open => {}
        }
    }

    /// Ends an in-flight half-open probe without deciding the outcome.
    ///
    /// Used when a probe's response says nothing about upstream health (a 404,
    /// say), so the next caller may probe again. Only the admission of the
    /// probe currently in flight clears the marker; a [`Admission::Normal`]
    /// or an older probe's admission is ignored.
    pub fn release_probe(&self, admission: Admission) {
        let Admission::Probe(id) = admission else {
            return;
        };
        let mut inner = self.lock();
        if inner.probing && inner.probe_id == id {
            inner.probing = false;
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Returns the consecutive failure count of the closed circuit.
    pub fn failures(&self) -> u32 {
        self.lock().failures
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("threshold", &self.threshold)
            .field("cooldown", &self.cooldown)
            .field("state", &self.state())
            .finish()
    }
}
