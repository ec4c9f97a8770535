//! # Circuit Breaker Registry
//!
//! One breaker per [`Dependency`], all behind a single lock. The state
//! machine itself lives in `couponsync_core::resilience`; this module adds
//! the clock, the per-call timeout, logging and the decay task.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use couponsync_core::resilience::{
    Admission, BreakerConfig, BreakerStatus, CircuitBreakerState, Dependency, Transition,
};

use crate::config::Config;

/// Why a protected call produced no value.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker short-circuited the call; the operation never ran.
    #[error("Circuit open for {dependency}, retry in {}ms", retry_in.as_millis())]
    Open {
        dependency: Dependency,
        retry_in: Duration,
    },

    /// The operation exceeded the dependency's call timeout.
    #[error("Call to {dependency} timed out after {}ms", timeout.as_millis())]
    Timeout {
        dependency: Dependency,
        timeout: Duration,
    },

    /// The operation ran and failed.
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// True when the operation was never invoked.
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Registry of per-dependency circuit breakers.
///
/// Every dependency registered at construction gets its own independent
/// state. A dependency left out of the registry runs unprotected.
#[derive(Debug)]
pub struct CircuitBreaker {
    breakers: Mutex<HashMap<Dependency, CircuitBreakerState>>,
}

/// Frees the half-open slot if a probe is dropped before it settles.
struct ProbeGuard<'a> {
    registry: &'a CircuitBreaker,
    dependency: Dependency,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Some(state) = self.registry.lock().get_mut(&self.dependency) {
                state.release_probe();
            }
        }
    }
}

fn log_transition(dependency: Dependency, transition: Option<Transition>) {
    if let Some(Transition { from, to }) = transition {
        info!(
            dependency = %dependency,
            from = ?from,
            to = ?to,
            "Circuit breaker state changed"
        );
    }
}

impl CircuitBreaker {
    pub fn new(configs: impl IntoIterator<Item = (Dependency, BreakerConfig)>) -> Self {
        let breakers = configs
            .into_iter()
            .map(|(dependency, config)| {
                debug!(
                    dependency = %dependency,
                    threshold = config.threshold,
                    open_timeout_secs = config.open_timeout.as_secs(),
                    call_timeout_ms = config.call_timeout.as_millis() as u64,
                    "Circuit breaker registered"
                );
                (dependency, CircuitBreakerState::new(config))
            })
            .collect();

        Self {
            breakers: Mutex::new(breakers),
        }
    }

    /// Registers every dependency with its configured thresholds.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Dependency::all()
                .into_iter()
                .map(|dependency| (dependency, config.breaker(dependency))),
        )
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Dependency, CircuitBreakerState>> {
        // State stays consistent across a panic: every mutation is a
        // single method call on CircuitBreakerState.
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `operation` under the breaker of `dependency`.
    ///
    /// While open the operation is not invoked and `BreakerError::Open` is
    /// returned. Operation errors and timeouts count as failures.
    pub async fn call<T, E, F, Fut>(
        &self,
        dependency: Dependency,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = {
            let mut breakers = self.lock();
            breakers.get_mut(&dependency).map(|state| {
                let (admission, transition) = state.admit(Instant::now());
                log_transition(dependency, transition);
                (admission, state.config().call_timeout)
            })
        };

        let Some((admission, timeout)) = admission else {
            debug!(dependency = %dependency, "No breaker registered, calling unprotected");
            return operation().await.map_err(BreakerError::Operation);
        };

        if let Admission::Rejected { retry_in } = admission {
            debug!(
                dependency = %dependency,
                retry_in_ms = retry_in.as_millis() as u64,
                "Circuit open, short-circuiting call"
            );
            return Err(BreakerError::Open {
                dependency,
                retry_in,
            });
        }

        let mut guard = ProbeGuard {
            registry: self,
            dependency,
            armed: admission == Admission::Probe,
        };
        let outcome = tokio::time::timeout(timeout, operation()).await;
        guard.armed = false;

        match outcome {
            Ok(Ok(value)) => {
                self.record_success(dependency);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(dependency);
                Err(BreakerError::Operation(e))
            }
            Err(_) => {
                warn!(
                    dependency = %dependency,
                    timeout_ms = timeout.as_millis() as u64,
                    "Protected call timed out"
                );
                self.record_failure(dependency);
                Err(BreakerError::Timeout {
                    dependency,
                    timeout,
                })
            }
        }
    }

    /// Like [`call`](Self::call), but resolves every failure through `fallback`.
    ///
    /// The fallback receives the reason the call produced no value. Whatever
    /// the fallback returns is handed back unchanged.
    pub async fn call_with_fallback<T, E, F, Fut, G, GFut>(
        &self,
        dependency: Dependency,
        operation: F,
        fallback: G,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce(BreakerError<E>) -> GFut,
        GFut: Future<Output = T>,
    {
        match self.call(dependency, operation).await {
            Ok(value) => value,
            Err(err) => fallback(err).await,
        }
    }

    fn record_success(&self, dependency: Dependency) {
        if let Some(state) = self.lock().get_mut(&dependency) {
            log_transition(dependency, state.record_success());
        }
    }

    fn record_failure(&self, dependency: Dependency) {
        if let Some(state) = self.lock().get_mut(&dependency) {
            let transition = state.record_failure(Instant::now(), Utc::now());
            warn!(
                dependency = %dependency,
                consecutive_failures = state.consecutive_failures(),
                threshold = state.config().threshold,
                "Protected call failed"
            );
            log_transition(dependency, transition);
        }
    }

    /// Snapshot of every registered breaker.
    pub fn status(&self) -> BTreeMap<Dependency, BreakerStatus> {
        self.lock()
            .iter()
            .map(|(dependency, state)| (*dependency, state.status()))
            .collect()
    }

    /// Wears down the consecutive-failure count of every closed breaker by one.
    pub fn decay(&self) {
        for (dependency, state) in self.lock().iter_mut() {
            if state.decay() {
                debug!(
                    dependency = %dependency,
                    consecutive_failures = state.consecutive_failures(),
                    "Decayed consecutive failures"
                );
            }
        }
    }

    /// Spawns the periodic decay tick. It stops when `shutdown_rx` fires.
    pub fn spawn_decay_task(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => registry.decay(),
                    _ = shutdown_rx.recv() => {
                        debug!("Breaker decay task shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use couponsync_core::resilience::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn registry(threshold: u32, open_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new([(
            Dependency::Cache,
            BreakerConfig::new(
                threshold,
                Duration::from_secs(open_secs),
                Duration::from_secs(2),
            ),
        )])
    }

    async fn fail(registry: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        registry
            .call(Dependency::Cache, || async { Err("backend down") })
            .await
    }

    fn cache_state(registry: &CircuitBreaker) -> BreakerStatus {
        registry.status()[&Dependency::Cache].clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_nth_failure_opens_not_before() {
        let registry = registry(3, 30);

        fail(&registry).await.unwrap_err();
        fail(&registry).await.unwrap_err();
        assert_eq!(cache_state(&registry).state, CircuitState::Closed);

        fail(&registry).await.unwrap_err();
        assert_eq!(cache_state(&registry).state, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_never_invokes_operation() {
        let registry = registry(1, 30);
        fail(&registry).await.unwrap_err();

        let invoked = AtomicU32::new(0);
        for _ in 0..5 {
            let result: Result<(), BreakerError<&str>> = registry
                .call(Dependency::Cache, || async {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
            assert!(result.unwrap_err().is_short_circuit());
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let registry = registry(2, 30);
        fail(&registry).await.unwrap_err();
        fail(&registry).await.unwrap_err();

        tokio::time::advance(Duration::from_secs(30)).await;
        let result: Result<u8, BreakerError<&str>> =
            registry.call(Dependency::Cache, || async { Ok(7) }).await;

        assert_eq!(result.unwrap(), 7);
        let status = cache_state(&registry);
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let registry = registry(1, 30);
        fail(&registry).await.unwrap_err();

        tokio::time::advance(Duration::from_secs(31)).await;
        let probe = fail(&registry).await.unwrap_err();
        assert!(matches!(probe, BreakerError::Operation("backend down")));
        assert_eq!(cache_state(&registry).state, CircuitState::Open);

        // The failed probe refreshed the timestamp, so the window restarts.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(fail(&registry).await.unwrap_err().is_short_circuit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_outage_scenario() {
        let registry = &registry(3, 30);
        let invoked = &AtomicU32::new(0);

        let attempt = move || {
            registry.call_with_fallback(
                Dependency::Cache,
                move || async move {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Err::<&str, _>("cache unreachable")
                },
                |err| async move {
                    if err.is_short_circuit() {
                        "fallback:open"
                    } else {
                        "fallback:failed"
                    }
                },
            )
        };

        for _ in 0..3 {
            assert_eq!(attempt().await, "fallback:failed");
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(attempt().await, "fallback:open");
        assert_eq!(invoked.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(attempt().await, "fallback:failed");
        assert_eq!(invoked.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let registry = registry(1, 30);

        let result: Result<(), BreakerError<&str>> = registry
            .call(Dependency::Cache, || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Timeout { .. })));
        assert_eq!(cache_state(&registry).state, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_frees_slot() {
        let registry = Arc::new(registry(1, 5));
        fail(&registry).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(6)).await;

        let probe = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _: Result<(), BreakerError<&str>> = registry
                    .call(Dependency::Cache, || std::future::pending())
                    .await;
            })
        };
        tokio::task::yield_now().await;
        probe.abort();
        let _ = probe.await;

        let result: Result<(), BreakerError<&str>> =
            registry.call(Dependency::Cache, || async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cache_state(&registry).state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_unregistered_dependency_runs_unprotected() {
        let registry = registry(1, 30);

        for _ in 0..3 {
            let result: Result<(), BreakerError<&str>> = registry
                .call(Dependency::Revalidation, || async { Err("down") })
                .await;
            assert!(matches!(result, Err(BreakerError::Operation("down"))));
        }
        assert!(!registry.status().contains_key(&Dependency::Revalidation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decay_task_wears_down_failures() {
        let registry = Arc::new(registry(5, 30));
        fail(&registry).await.unwrap_err();
        fail(&registry).await.unwrap_err();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = registry.spawn_decay_task(Duration::from_secs(60), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(cache_state(&registry).consecutive_failures, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(cache_state(&registry).consecutive_failures, 0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_reports_every_dependency() {
        let registry = CircuitBreaker::from_config(&Config::from_env());
        let status = registry.status();

        assert_eq!(status.len(), 3);
        assert_eq!(status[&Dependency::Notification].threshold, 5);
        assert_eq!(status[&Dependency::Revalidation].success_rate, 1.0);
    }

    #[test]
    fn test_error_display() {
        let open: BreakerError<String> = BreakerError::Open {
            dependency: Dependency::Notification,
            retry_in: Duration::from_millis(1500),
        };
        assert_eq!(
            open.to_string(),
            "Circuit open for notification, retry in 1500ms"
        );

        let timeout: BreakerError<String> = BreakerError::Timeout {
            dependency: Dependency::Cache,
            timeout: Duration::from_secs(2),
        };
        assert_eq!(timeout.to_string(), "Call to cache timed out after 2000ms");
    }
}
