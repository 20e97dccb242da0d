//! Resiliency primitives (spec.md §4.7): circuit breaker → retry-with-jitter
//! → timeout, composed outer-to-inner around calls to storage backends.
//! Grounded on `examples/original_source/src/nexus/core/resiliency.py`
//! (named policy objects, infrastructure-vs-application error split)
//! translated into the teacher's async/`tracing` idiom.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use crate::config::ResiliencyConfig;
use crate::error::{BackendUnavailableTag, NexusError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Marks whether an error observed by a resiliency-wrapped call counts as
/// "infrastructure" (trips the breaker, retried) or "application" (passes
/// through untouched).
pub trait InfraClassify {
    fn is_infra(&self) -> bool;
}

impl InfraClassify for NexusError {
    fn is_infra(&self) -> bool {
        matches!(self, NexusError::BackendUnavailable { .. })
    }
}

struct BreakerInner {
    state: BreakerState,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

/// CLOSED / OPEN / HALF_OPEN circuit breaker. OPEN calls short-circuit
/// immediately without retrying or timing out; a single in-flight probe is
/// permitted in HALF_OPEN.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
    open_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
            consecutive_failures: AtomicU32::new(0),
            failure_threshold,
            open_duration,
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.open_duration {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_probe_in_flight = false;
                }
            }
        }
        inner.state
    }

    /// Returns `true` if the caller may proceed (acquiring the sole
    /// half-open probe slot if applicable).
    fn admit(&self) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                let mut inner = self.inner.lock();
                if inner.half_open_probe_in_flight {
                    false
                } else {
                    inner.half_open_probe_in_flight = true;
                    true
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
        inner.half_open_probe_in_flight = false;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            inner.half_open_probe_in_flight = false;
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// Exponential backoff with jitter, bounded attempts (spec.md §4.1, §4.7).
pub async fn retry_with_jitter<T, E, F>(
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    mut f: F,
) -> Result<T, E>
where
    F: AsyncFnMut() -> Result<T, E>,
    E: InfraClassify,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_infra() => {
                let exp = base_delay.saturating_mul(1u32 << attempt.min(16));
                let capped = exp.min(max_delay);
                let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64);
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Synchronous counterpart to [`retry_with_jitter`], for callers on a
/// blocking I/O path (CAS/metadata, both built on blocking `sled`/`std::fs`
/// calls) that cannot await a future. Same backoff math, `std::thread::sleep`
/// instead of `tokio::time::sleep`.
pub fn retry_blocking<T, E, F>(max_retries: u32, base_delay: Duration, max_delay: Duration, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: InfraClassify,
{
    let mut attempt = 0u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_infra() => {
                let exp = base_delay.saturating_mul(1u32 << attempt.min(16));
                let capped = exp.min(max_delay);
                let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64);
                std::thread::sleep(Duration::from_millis(jitter_ms));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A named resiliency policy wrapping a single outward call:
/// circuit breaker (outer) → retry-with-jitter → timeout (inner).
pub struct ResiliencyPolicy {
    name: String,
    breaker: CircuitBreaker,
    config: ResiliencyConfig,
}

impl ResiliencyPolicy {
    pub fn new(name: impl Into<String>, config: ResiliencyConfig) -> Self {
        Self {
            name: name.into(),
            breaker: CircuitBreaker::new(config.failure_threshold, config.open_duration),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Executes `f`, applying the breaker, retry and timeout layers.
    /// Infrastructure errors trip the breaker; application errors pass
    /// through untouched and never affect breaker state.
    pub async fn call<T, F, Fut>(&self, mut f: F) -> Result<T, NexusError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NexusError>>,
    {
        if !self.breaker.admit() {
            tracing::warn!(policy = %self.name, "circuit open, short-circuiting call");
            return Err(NexusError::backend_unavailable(
                format!("policy '{}' circuit is open", self.name),
                BackendUnavailableTag::CircuitOpen,
            ));
        }

        let timeout = self.config.call_timeout;
        let retries = self.config.max_retries;
        let base_delay = self.config.base_delay;
        let max_delay = self.config.max_delay;

        let result = retry_with_jitter(retries, base_delay, max_delay, async || {
            match tokio::time::timeout(timeout, f()).await {
                Ok(inner) => inner,
                Err(_) => Err(NexusError::backend_unavailable(
                    format!("call exceeded {timeout:?}"),
                    BackendUnavailableTag::Timeout,
                )),
            }
        })
        .await;

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(e) if e.is_infra() => self.breaker.record_failure(),
            Err(_) => {}
        }
        result
    }

    /// Blocking counterpart to [`Self::call`]: breaker → retry, no timeout
    /// layer (a blocking call has no cooperative cancellation point to
    /// enforce one against).
    pub fn call_blocking<T, F>(&self, mut f: F) -> Result<T, NexusError>
    where
        F: FnMut() -> Result<T, NexusError>,
    {
        if !self.breaker.admit() {
            tracing::warn!(policy = %self.name, "circuit open, short-circuiting call");
            return Err(NexusError::backend_unavailable(
                format!("policy '{}' circuit is open", self.name),
                BackendUnavailableTag::CircuitOpen,
            ));
        }

        let result = retry_blocking(self.config.max_retries, self.config.base_delay, self.config.max_delay, &mut f);

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(e) if e.is_infra() => self.breaker.record_failure(),
            Err(_) => {}
        }
        result
    }
}

/// Per-policy registry, keyed by name (e.g. `"blob-store"`,
/// `"metadata-commit"`), matching `resiliency.py`'s named-policy usage.
pub struct ResiliencyRegistry {
    policies: Mutex<std::collections::HashMap<String, std::sync::Arc<ResiliencyPolicy>>>,
    default_config: ResiliencyConfig,
}

impl ResiliencyRegistry {
    pub fn new(default_config: ResiliencyConfig) -> Self {
        Self {
            policies: Mutex::new(std::collections::HashMap::new()),
            default_config,
        }
    }

    pub fn policy(&self, name: &str) -> std::sync::Arc<ResiliencyPolicy> {
        let mut policies = self.policies.lock();
        policies
            .entry(name.to_owned())
            .or_insert_with(|| std::sync::Arc::new(ResiliencyPolicy::new(name, self.default_config)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_short_circuits() {
        let policy = ResiliencyPolicy::new(
            "test",
            ResiliencyConfig {
                failure_threshold: 2,
                max_retries: 0,
                call_timeout: Duration::from_millis(50),
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                open_duration: Duration::from_secs(60),
            },
        );
        for _ in 0..2 {
            let _ = policy
                .call(|| async {
                    Err::<(), _>(NexusError::backend_unavailable(
                        "boom",
                        BackendUnavailableTag::RetriesExhausted,
                    ))
                })
                .await;
        }
        assert_eq!(policy.breaker_state(), BreakerState::Open);
        let result = policy.call(|| async { Ok::<_, NexusError>(1) }).await;
        assert!(matches!(
            result,
            Err(NexusError::BackendUnavailable {
                tag: Some(BackendUnavailableTag::CircuitOpen),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn successful_call_keeps_breaker_closed() {
        let policy = ResiliencyPolicy::new("test", ResiliencyConfig::default());
        let result = policy.call(|| async { Ok::<_, NexusError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(policy.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn application_error_does_not_trip_breaker() {
        let policy = ResiliencyPolicy::new(
            "test",
            ResiliencyConfig {
                failure_threshold: 1,
                ..ResiliencyConfig::default()
            },
        );
        let result = policy
            .call(|| async { Err::<(), _>(NexusError::NotFound("x".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(policy.breaker_state(), BreakerState::Closed);
    }
}
