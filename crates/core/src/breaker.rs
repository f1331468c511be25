//! Per-provider circuit breaker.
//!
//! All state lives behind one mutex so every operation is an atomic
//! read-modify-write. Transitions are reported to an optional listener after
//! the lock is released; the listener is for logging only and never changes
//! the outcome of a call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;
const MAX_COOLDOWN_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: DEFAULT_FAILURE_THRESHOLD, cooldown_secs: DEFAULT_COOLDOWN_SECS }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs.min(MAX_COOLDOWN_SECS) as i64)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerTransition {
    pub provider: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub failure_count: u32,
    pub open_until: Option<DateTime<Utc>>,
}

pub trait BreakerListener: Send + Sync {
    fn on_transition(&self, transition: &BreakerTransition);
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<DateTime<Utc>>,
    probe_started_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    provider: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    listener: Option<Arc<dyn BreakerListener>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("provider", &self.provider)
            .field("config", &self.config)
            .field("inner", &*self.lock())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_started_at: None,
            }),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn BreakerListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn can_request(&self) -> bool {
        self.can_request_at(Utc::now())
    }

    /// Admits a call. In half-open only one probe is admitted; a probe whose
    /// outcome never arrives is treated as abandoned after one cool-down.
    pub fn can_request_at(&self, now: DateTime<Utc>) -> bool {
        let (allowed, transition) = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => (true, None),
                CircuitState::Open => {
                    if self.cooldown_elapsed(inner.opened_at, now) {
                        let transition = self.move_to(&mut inner, CircuitState::HalfOpen, now);
                        inner.probe_started_at = Some(now);
                        (true, transition)
                    } else {
                        (false, None)
                    }
                }
                CircuitState::HalfOpen => {
                    let free = match inner.probe_started_at {
                        None => true,
                        Some(started) => now - started >= self.config.cooldown(),
                    };
                    if free {
                        inner.probe_started_at = Some(now);
                    }
                    (free, None)
                }
            }
        };
        self.notify(transition);
        allowed
    }

    pub fn record_success(&self) {
        self.record_success_at(Utc::now());
    }

    pub fn record_success_at(&self, now: DateTime<Utc>) {
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.failure_count = 0;
                    inner.opened_at = None;
                    inner.probe_started_at = None;
                    self.move_to(&mut inner, CircuitState::Closed, now)
                }
                // A late success from before the trip does not close the circuit.
                CircuitState::Open => None,
            }
        };
        self.notify(transition);
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Utc::now());
    }

    pub fn record_failure_at(&self, now: DateTime<Utc>) {
        let transition = {
            let mut inner = self.lock();
            inner.failure_count = inner.failure_count.saturating_add(1);
            match inner.state {
                CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                    inner.opened_at = Some(now);
                    self.move_to(&mut inner, CircuitState::Open, now)
                }
                CircuitState::Closed | CircuitState::Open => None,
                CircuitState::HalfOpen => {
                    inner.opened_at = Some(now);
                    inner.probe_started_at = None;
                    self.move_to(&mut inner, CircuitState::Open, now)
                }
            }
        };
        self.notify(transition);
    }

    pub fn state(&self) -> CircuitState {
        self.state_at(Utc::now())
    }

    /// Reading the state after the cool-down moves an open circuit to half-open.
    pub fn state_at(&self, now: DateTime<Utc>) -> CircuitState {
        let (state, transition) = {
            let mut inner = self.lock();
            let transition = if inner.state == CircuitState::Open
                && self.cooldown_elapsed(inner.opened_at, now)
            {
                inner.probe_started_at = None;
                self.move_to(&mut inner, CircuitState::HalfOpen, now)
            } else {
                None
            };
            (inner.state, transition)
        };
        self.notify(transition);
        state
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.retry_after_seconds_at(Utc::now())
    }

    /// Whole seconds (rounded up) until a request could be admitted again.
    pub fn retry_after_seconds_at(&self, now: DateTime<Utc>) -> Option<u64> {
        let inner = self.lock();
        let reopens_at = match inner.state {
            CircuitState::Closed => return None,
            CircuitState::Open => inner.opened_at? + self.config.cooldown(),
            CircuitState::HalfOpen => inner.probe_started_at? + self.config.cooldown(),
        };
        let remaining_ms = (reopens_at - now).num_milliseconds();
        if remaining_ms <= 0 {
            return None;
        }
        Some(((remaining_ms + 999) / 1000) as u64)
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> BreakerSnapshot {
        let state = self.state_at(now);
        BreakerSnapshot {
            provider: self.provider.clone(),
            state,
            failure_count: self.failure_count(),
            retry_after_secs: self.retry_after_seconds_at(now),
        }
    }

    fn cooldown_elapsed(&self, opened_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        opened_at.map_or(true, |opened| now - opened >= self.config.cooldown())
    }

    fn move_to(
        &self,
        inner: &mut BreakerInner,
        to: CircuitState,
        now: DateTime<Utc>,
    ) -> Option<BreakerTransition> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        let open_until = (to == CircuitState::Open)
            .then(|| inner.opened_at.unwrap_or(now) + self.config.cooldown());
        Some(BreakerTransition {
            provider: self.provider.clone(),
            from,
            to,
            failure_count: inner.failure_count,
            open_until,
        })
    }

    fn notify(&self, transition: Option<BreakerTransition>) {
        if let (Some(listener), Some(transition)) = (&self.listener, transition) {
            listener.on_transition(&transition);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out one shared breaker per provider name.
#[derive(Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    listener: Option<Arc<dyn BreakerListener>>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, listener: None, breakers: Mutex::new(HashMap::new()) }
    }

    pub fn with_listener(mut self, listener: Arc<dyn BreakerListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn breaker_for(&self, provider: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| {
                let breaker = CircuitBreaker::new(provider, self.config.clone());
                let breaker = match &self.listener {
                    Some(listener) => breaker.with_listener(Arc::clone(listener)),
                    None => breaker,
                };
                Arc::new(breaker)
            })
            .clone()
    }

    pub fn snapshots_at(&self, now: DateTime<Utc>) -> Vec<BreakerSnapshot> {
        let breakers = {
            let guard = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
            guard.values().cloned().collect::<Vec<_>>()
        };
        let mut snapshots =
            breakers.iter().map(|breaker| breaker.snapshot_at(now)).collect::<Vec<_>>();
        snapshots.sort_by(|left, right| left.provider.cmp(&right.provider));
        snapshots
    }
}
