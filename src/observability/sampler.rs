//! Background runtime statistics sampler
//!
//! Publishes process resident memory to the registry on a fixed interval
//! until its cancellation token fires.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TelemetryError;

use super::recorder::MetricsRegistry;

pub struct RuntimeSampler {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RuntimeSampler {
    pub fn spawn(registry: MetricsRegistry, interval: Duration, token: CancellationToken) -> Self {
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        tracing::debug!("Runtime sampler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Some(bytes) = sample_resident_bytes() {
                            registry.set_memory_resident(bytes);
                        }
                    }
                }
            }
        });

        Self { token, task }
    }

    /// Cancel the sampling loop and wait for it to exit.
    pub async fn stop(self) -> Result<(), TelemetryError> {
        self.token.cancel();
        self.task.await.map_err(|e| TelemetryError::Task {
            stage: "runtime sampler".to_string(),
            message: e.to_string(),
        })
    }
}

/// Resident set size of this process, where the platform exposes it.
pub fn sample_resident_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| parse_vm_rss(&status))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Parse the `VmRSS:` line of a `/proc/<pid>/status` document into bytes.
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| {
            let mut parts = rest.split_whitespace();
            let value: u64 = parts.next()?.parse().ok()?;
            match parts.next() {
                Some("kB") | None => Some(value * 1024),
                Some(_) => None,
            }
        })
}
