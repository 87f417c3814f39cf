//! Ordered, bounded teardown of telemetry subsystems
//!
//! Every subsystem that starts successfully pushes one [`ShutdownFn`] onto the
//! [`ShutdownStack`]. Stages are released in reverse start order. The stack is
//! drained on first use, so calling [`ShutdownStack::shutdown`] again is a
//! no-op.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{timeout_at, Instant};

use crate::error::{ShutdownErrors, TelemetryError};

type ShutdownAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), TelemetryError>> + Send>;

/// A named, one-shot release action for one subsystem.
pub struct ShutdownFn {
    name: String,
    action: ShutdownAction,
}

impl ShutdownFn {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TelemetryError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Box::new(move || Box::pin(action())),
        }
    }

    /// Wrap a blocking release (SDK flushes) so it runs off the async workers.
    pub fn blocking<F>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Result<(), TelemetryError> + Send + 'static,
    {
        let name = name.into();
        let stage = name.clone();
        Self::new(name, move || async move {
            tokio::task::spawn_blocking(action)
                .await
                .map_err(|e| TelemetryError::Task {
                    stage,
                    message: e.to_string(),
                })?
        })
    }

    async fn run(self, deadline: Instant, budget: Duration) -> Result<(), TelemetryError> {
        let name = self.name;
        match timeout_at(deadline, (self.action)()).await {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::ShutdownTimeout {
                stage: name,
                timeout: budget,
            }),
        }
    }
}

impl fmt::Debug for ShutdownFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownFn").field("name", &self.name).finish()
    }
}

/// Composes the shutdown actions of every started subsystem.
#[derive(Debug)]
pub struct ShutdownStack {
    stages: Mutex<Vec<ShutdownFn>>,
    timeout: Duration,
}

impl ShutdownStack {
    pub fn new(timeout: Duration) -> Self {
        Self {
            stages: Mutex::new(Vec::new()),
            timeout,
        }
    }

    pub fn push(&self, stage: ShutdownFn) {
        self.lock().push(stage);
    }

    /// Release every stage in reverse order within one shared deadline.
    ///
    /// A failing or hung stage does not stop the remaining ones; every
    /// failure is returned together.
    pub async fn shutdown(&self) -> Result<(), TelemetryError> {
        let stages = std::mem::take(&mut *self.lock());
        if stages.is_empty() {
            return Ok(());
        }

        let deadline = Instant::now() + self.timeout;
        let mut errors = ShutdownErrors::default();

        for stage in stages.into_iter().rev() {
            let name = stage.name.clone();
            tracing::debug!(stage = %name, "Shutting down telemetry stage");
            if let Err(e) = stage.run(deadline, self.timeout).await {
                tracing::error!(stage = %name, error = %e, "Telemetry stage failed to shut down");
                errors.push(name, e);
            }
        }

        errors.into_result()
    }

    /// Unwind after a failed setup: failures are logged and unwinding goes on.
    pub async fn rollback(&self) {
        if let Err(e) = self.shutdown().await {
            tracing::warn!(error = %e, "Telemetry rollback was incomplete");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ShutdownFn>> {
        self.stages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn counting(name: &str, calls: Arc<AtomicUsize>) -> ShutdownFn {
        ShutdownFn::new(name, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_shutdown_twice_runs_actions_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stack = ShutdownStack::new(Duration::from_secs(1));
        stack.push(counting("tracer", calls.clone()));
        stack.push(counting("metrics", calls.clone()));

        assert!(stack.shutdown().await.is_ok());
        assert!(stack.shutdown().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stages_run_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let stack = ShutdownStack::new(Duration::from_secs(1));
        for name in ["propagator", "tracer", "metrics", "logging"] {
            let order = order.clone();
            stack.push(ShutdownFn::new(name, move || async move {
                order.lock().unwrap().push(name);
                Ok(())
            }));
        }

        stack.shutdown().await.unwrap();
        assert_eq!(
            *order.lock().unwrap(),
            vec!["logging", "metrics", "tracer", "propagator"]
        );
    }

    #[tokio::test]
    async fn test_hung_stage_is_abandoned_within_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stack = ShutdownStack::new(Duration::from_millis(100));
        stack.push(counting("tracer", calls.clone()));
        stack.push(ShutdownFn::new("stuck", || async {
            futures::future::pending::<()>().await;
            Ok(())
        }));

        let started = std::time::Instant::now();
        let result = stack.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(2));

        match result {
            Err(TelemetryError::Shutdown(errors)) => {
                assert_eq!(errors.len(), 1);
                let failure = errors.iter().next().unwrap();
                assert_eq!(failure.stage, "stuck");
                assert!(matches!(failure.error, TelemetryError::ShutdownTimeout { .. }));
            }
            other => panic!("expected timeout error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_every_failure_is_collected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stack = ShutdownStack::new(Duration::from_secs(1));
        stack.push(ShutdownFn::new("tracer", || async {
            Err(TelemetryError::TraceFlush("collector gone".into()))
        }));
        stack.push(counting("sampler", calls.clone()));
        stack.push(ShutdownFn::blocking("metrics", || {
            Err(TelemetryError::MetricsRegistry("closed".into()))
        }));

        let err = stack.shutdown().await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match err {
            TelemetryError::Shutdown(errors) => {
                let stages: Vec<_> = errors.iter().map(|f| f.stage.as_str()).collect();
                assert_eq!(stages, vec!["metrics", "tracer"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rollback_logs_and_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stack = ShutdownStack::new(Duration::from_secs(1));
        stack.push(counting("tracer", calls.clone()));
        stack.push(ShutdownFn::new("metrics listener", || async {
            Err(TelemetryError::Task {
                stage: "metrics listener".into(),
                message: "join failed".into(),
            })
        }));

        stack.rollback().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(logs_contain("Telemetry rollback was incomplete"));
    }
}
