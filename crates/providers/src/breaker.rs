//! Per-provider circuit breaker.
//!
//! Closed counts consecutive failures; at the threshold the breaker opens
//! and calls fail fast until the reset timeout elapses, after which a single
//! probe is allowed (half-open). A probe success closes the breaker, a probe
//! failure re-opens it.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use bs_domain::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_success_threshold: 1,
        }
    }
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    provider: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(provider: impl Into<String>) -> Self {
        Self::with_config(provider, BreakerConfig::default())
    }

    pub fn with_config(provider: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Gate a call. Fails fast with [`Error::BreakerOpen`] while open; after
    /// the reset timeout the breaker moves to half-open and lets the call
    /// through as a probe.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.reset_timeout {
                    tracing::info!(provider = %self.provider, "breaker half-open, probing");
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                    Ok(())
                } else {
                    Err(Error::BreakerOpen {
                        provider: self.provider.clone(),
                    })
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_success_threshold {
                    tracing::info!(provider = %self.provider, "breaker closed");
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        provider = %self.provider,
                        failures = inner.failure_count,
                        "breaker opened"
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!(provider = %self.provider, "probe failed, breaker re-opened");
                inner.state = BreakerState::Open;
            }
            BreakerState::Open => {}
        }
    }

    /// Run a future inside the breaker. [`Error::BreakerOpen`] from the gate
    /// is returned without touching the counters.
    pub async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.try_acquire()?;
        match fut.await {
            Ok(v) => {
                self.record_success();
                Ok(v)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}
