use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::browser::{classify, log_failure, FailureKind, FailureLog, SurfaceFactory};
use crate::config::RecoverySection;

use super::error::{HarvestError, HarvestResult};
use super::models::TargetSummary;
use super::traversal::{TargetTraversal, TraversalContext};

#[derive(Debug)]
pub enum TargetOutcome {
    Completed(TargetSummary),
    Abandoned {
        summary: TargetSummary,
        rebuilds: usize,
        last_error: String,
    },
}

/// Recreates the surface after a fatal session failure and replays the
/// traversal from its durable checkpoint. The traversal context is shared
/// across rebuilds, so per-target counters keep accumulating. Non-fatal
/// errors are handed straight back to the caller.
pub struct SessionRecovery {
    factory: Arc<dyn SurfaceFactory>,
    config: RecoverySection,
    failure_log: Option<Arc<FailureLog>>,
}

impl SessionRecovery {
    pub fn new(
        factory: Arc<dyn SurfaceFactory>,
        config: RecoverySection,
        failure_log: Option<Arc<FailureLog>>,
    ) -> Self {
        Self {
            factory,
            config,
            failure_log,
        }
    }

    pub async fn run_target(&self, traversal: &TargetTraversal) -> HarvestResult<TargetOutcome> {
        let target = traversal.target().clone();
        let mut ctx = TraversalContext::new();
        let mut rebuilds = 0usize;

        loop {
            let fatal = match self.factory.create().await {
                Ok(mut surface) => {
                    let result = traversal.run(surface.as_mut(), &mut ctx).await;
                    if let Err(error) = surface.close().await {
                        debug!(target = %target.id, error = %error, "surface close failed");
                    }
                    match result {
                        Ok(summary) => return Ok(TargetOutcome::Completed(summary)),
                        Err(HarvestError::Browser(error))
                            if classify(&error) == FailureKind::Fatal =>
                        {
                            error
                        }
                        Err(other) => return Err(other),
                    }
                }
                // No session exists to retry in place; a failed launch
                // consumes a rebuild attempt like any dead session.
                Err(error) => error,
            };

            rebuilds += 1;
            if let Some(log) = &self.failure_log {
                if let Err(log_error) =
                    log_failure(log, &target.id, &target.root_url, &fatal, rebuilds)
                {
                    warn!(error = %log_error, "failure log append failed");
                }
            }

            if rebuilds > self.config.max_attempts {
                warn!(
                    target = %target.id,
                    rebuilds,
                    error = %fatal,
                    "recovery attempts exhausted, abandoning target"
                );
                return Ok(TargetOutcome::Abandoned {
                    summary: ctx.summary(&target),
                    rebuilds,
                    last_error: fatal.to_string(),
                });
            }

            let delay = self.rebuild_delay();
            warn!(
                target = %target.id,
                rebuild = rebuilds,
                wait_ms = delay.as_millis() as u64,
                error = %fatal,
                "fatal session failure, rebuilding surface"
            );
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
    }

    fn rebuild_delay(&self) -> Duration {
        let [lower, upper] = self.config.rebuild_backoff_ms;
        if upper == 0 {
            return Duration::from_millis(0);
        }
        let ms = rand::thread_rng().gen_range(lower..=upper.max(lower));
        Duration::from_millis(ms)
    }
}
