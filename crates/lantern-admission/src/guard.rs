//! Guarded invocation: the only sanctioned way callers touch a pool.
//!
//! Couples permit acquisition to the wrapped operation so release can never
//! be forgotten. The permit is a scoped handle held across the operation's
//! await, released on return, error, panic, and future drop alike.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::pool::AcquireOutcome;
use crate::registry::{PoolKind, PoolRegistry};

/// Failure surface of a guarded invocation.
///
/// `Overloaded` is the only failure this layer introduces; `Operation`
/// carries the wrapped call's own error unchanged. Nothing is retried here:
/// blind retry under overload is the thundering herd the pools exist to
/// prevent, so backoff belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// Every permit was held for the full acquisition timeout. Callers map
    /// this to a user-facing "system busy" response.
    #[error("pool `{pool}` overloaded: timed out waiting for a permit")]
    Overloaded { pool: PoolKind },

    /// The caller's context was cancelled while queued. A normal outcome,
    /// not an error condition.
    #[error("cancelled while waiting for a `{pool}` permit")]
    Cancelled { pool: PoolKind },

    /// The wrapped operation's own failure, passed through unchanged.
    #[error(transparent)]
    Operation(E),
}

impl<E> GuardError<E> {
    pub fn is_overloaded(&self) -> bool {
        matches!(self, Self::Overloaded { .. })
    }
}

/// Per-call options for a guarded invocation.
#[derive(Debug, Clone, Default)]
pub struct GuardOptions {
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl GuardOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the registry's default acquisition timeout for this call.
    /// Latency-sensitive paths pass a shorter timeout, batch paths a longer
    /// one, against the same pool.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abandon the queued wait when `cancel` fires. Once the permit is
    /// granted the operation runs; dropping the guarded future still
    /// releases the permit.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl PoolRegistry {
    /// Run `op` while holding a permit from `pool`, with the registry's
    /// default acquisition timeout.
    pub async fn guarded<T, E, F, Fut>(&self, pool: PoolKind, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.guarded_with(pool, GuardOptions::default(), op).await
    }

    /// [`guarded`](Self::guarded) with a per-call timeout override and/or
    /// cancellation token.
    pub async fn guarded_with<T, E, F, Fut>(
        &self,
        pool: PoolKind,
        options: GuardOptions,
        op: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let gate = self.pool(pool);
        let timeout = options.timeout.unwrap_or(self.default_timeout());
        let outcome = match options.cancel {
            Some(ref token) => gate.acquire_with_cancel(timeout, token).await,
            None => gate.acquire(timeout).await,
        };
        match outcome {
            AcquireOutcome::Acquired(permit) => {
                let result = op().await;
                drop(permit);
                result.map_err(GuardError::Operation)
            }
            AcquireOutcome::TimedOut => Err(GuardError::Overloaded { pool }),
            AcquireOutcome::Cancelled => Err(GuardError::Cancelled { pool }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use futures::future::join_all;

    use crate::config::{AdmissionConfig, PoolLimit};

    #[derive(Debug, thiserror::Error)]
    #[error("llm backend unavailable")]
    struct BackendError;

    async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[tokio::test]
    async fn guarded_runs_the_operation_and_releases() {
        let registry = PoolRegistry::new(&AdmissionConfig::default()).unwrap();
        let result: Result<u32, GuardError<BackendError>> =
            registry.guarded(PoolKind::Llm, || async { Ok(7) }).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(registry.pool(PoolKind::Llm).available(), 5);
        assert_eq!(registry.pool(PoolKind::Llm).snapshot().released, 1);
    }

    #[tokio::test]
    async fn overload_surfaces_as_guard_error() {
        let config = AdmissionConfig {
            llm: PoolLimit { max: 1 },
            ..Default::default()
        };
        let registry = PoolRegistry::new(&config).unwrap();
        let held = registry.pool(PoolKind::Llm).try_acquire().unwrap();

        let result: Result<(), GuardError<BackendError>> = registry
            .guarded_with(
                PoolKind::Llm,
                GuardOptions::new().with_timeout(Duration::from_millis(50)),
                || async { Ok(()) },
            )
            .await;

        match result {
            Err(GuardError::Overloaded { pool }) => assert_eq!(pool, PoolKind::Llm),
            other => panic!("expected overload, got {other:?}"),
        }
        drop(held);
        assert_eq!(registry.pool(PoolKind::Llm).available(), 1);
    }

    #[tokio::test]
    async fn operation_error_passes_through_unchanged() {
        let registry = PoolRegistry::new(&AdmissionConfig::default()).unwrap();
        let result: Result<(), GuardError<BackendError>> = registry
            .guarded(PoolKind::Llm, || async { Err(BackendError) })
            .await;

        let err = result.unwrap_err();
        assert!(!err.is_overloaded());
        assert!(matches!(err, GuardError::Operation(BackendError)));
        assert_eq!(registry.pool(PoolKind::Llm).available(), 5);
    }

    #[tokio::test]
    async fn failing_operations_never_leak_permits() {
        let config = AdmissionConfig {
            llm: PoolLimit { max: 2 },
            acquire_timeout_secs: 0.2,
            ..Default::default()
        };
        let registry = PoolRegistry::new(&config).unwrap();

        // One more round than there are permits: a leak would overload here.
        for _ in 0..3 {
            let result: Result<(), GuardError<BackendError>> = registry
                .guarded(PoolKind::Llm, || async { Err(BackendError) })
                .await;
            assert!(!result.unwrap_err().is_overloaded());
        }
        assert_eq!(registry.pool(PoolKind::Llm).available(), 2);
    }

    #[tokio::test]
    async fn panicking_operation_still_releases() {
        let config = AdmissionConfig {
            llm: PoolLimit { max: 1 },
            ..Default::default()
        };
        let registry = Arc::new(PoolRegistry::new(&config).unwrap());

        let task_registry = Arc::clone(&registry);
        let joined = tokio::spawn(async move {
            let _: Result<(), GuardError<BackendError>> = task_registry
                .guarded(PoolKind::Llm, || async { panic!("model crashed mid-call") })
                .await;
        })
        .await;

        assert!(joined.unwrap_err().is_panic());
        assert_eq!(registry.pool(PoolKind::Llm).available(), 1);

        let result: Result<u32, GuardError<BackendError>> =
            registry.guarded(PoolKind::Llm, || async { Ok(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancelled_wait_propagates_as_cancelled() {
        let config = AdmissionConfig {
            chat: PoolLimit { max: 1 },
            ..Default::default()
        };
        let registry = Arc::new(PoolRegistry::new(&config).unwrap());
        let held = registry.pool(PoolKind::Chat).try_acquire().unwrap();

        let token = CancellationToken::new();
        let task_registry = Arc::clone(&registry);
        let task_token = token.clone();
        let call = tokio::spawn(async move {
            task_registry
                .guarded_with::<(), BackendError, _, _>(
                    PoolKind::Chat,
                    GuardOptions::new()
                        .with_timeout(Duration::from_secs(5))
                        .with_cancel(task_token),
                    || async { Ok(()) },
                )
                .await
        });
        wait_until("caller to queue", || {
            registry.pool(PoolKind::Chat).waiting() == 1
        })
        .await;

        token.cancel();
        let result = call.await.unwrap();
        assert!(matches!(
            result,
            Err(GuardError::Cancelled {
                pool: PoolKind::Chat
            })
        ));
        // A cancelled wait is not an overload.
        assert_eq!(registry.pool(PoolKind::Chat).snapshot().timed_out, 0);

        drop(held);
        assert_eq!(registry.pool(PoolKind::Chat).available(), 1);
    }

    #[tokio::test]
    async fn pools_are_independent() {
        let config = AdmissionConfig {
            llm: PoolLimit { max: 1 },
            ..Default::default()
        };
        let registry = PoolRegistry::new(&config).unwrap();
        let _held = registry.pool(PoolKind::Llm).try_acquire().unwrap();

        // llm is saturated; vector search must be unaffected.
        let result: Result<(), GuardError<BackendError>> = registry
            .guarded_with(
                PoolKind::VectorSearch,
                GuardOptions::new().with_timeout(Duration::from_millis(50)),
                || async { Ok(()) },
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn chat_scenario_bounds_concurrency_and_completes_all() {
        let config = AdmissionConfig {
            chat: PoolLimit { max: 2 },
            ..Default::default()
        };
        let registry = Arc::new(PoolRegistry::new(&config).unwrap());

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let calls = (0..5).map(|_| {
            let registry = Arc::clone(&registry);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                registry
                    .guarded::<(), BackendError, _, _>(PoolKind::Chat, move || async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        });

        for result in join_all(calls).await {
            assert!(result.unwrap().is_ok());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2, "admission limit exceeded");
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "scenario took too long: {:?}",
            started.elapsed()
        );
    }
}
