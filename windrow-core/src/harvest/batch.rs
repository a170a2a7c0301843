use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::{FailureLog, PageModel, SurfaceFactory};
use crate::config::HarvestConfig;

use super::models::{CompletedTarget, Target, TargetSummary};
use super::output::RecordWriter;
use super::recover::{SessionRecovery, TargetOutcome};
use super::retrieve::Retriever;
use super::store::ProgressStore;
use super::traversal::TargetTraversal;

#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    pub run_id: String,
    pub targets_total: usize,
    pub targets_skipped: usize,
    pub targets_completed: usize,
    pub targets_abandoned: usize,
    pub targets_failed: usize,
    pub items_processed: usize,
    pub items_succeeded: usize,
    pub items_failed: usize,
    pub downloads_succeeded: usize,
    pub total_wait_ms: u64,
    pub duration_secs: u64,
    pub errors: Vec<String>,
}

impl BatchStats {
    fn new(targets_total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            targets_total,
            targets_skipped: 0,
            targets_completed: 0,
            targets_abandoned: 0,
            targets_failed: 0,
            items_processed: 0,
            items_succeeded: 0,
            items_failed: 0,
            downloads_succeeded: 0,
            total_wait_ms: 0,
            duration_secs: 0,
            errors: Vec::new(),
        }
    }

    fn absorb(&mut self, summary: &TargetSummary) {
        self.items_processed += summary.processed;
        self.items_succeeded += summary.succeeded;
        self.items_failed += summary.failed;
        self.downloads_succeeded += summary.downloads_succeeded;
    }
}

/// Runs a list of targets sequentially: already-completed targets are
/// skipped, every other outcome is recorded in the audit table, and no
/// single target failure stops the batch.
pub struct BatchOrchestrator {
    model: Arc<dyn PageModel>,
    store: Arc<dyn ProgressStore>,
    writer: Arc<RecordWriter>,
    retriever: Option<Arc<Retriever>>,
    recovery: SessionRecovery,
    config: HarvestConfig,
    rate_limiter: RateLimiter,
}

impl BatchOrchestrator {
    pub fn new(
        factory: Arc<dyn SurfaceFactory>,
        model: Arc<dyn PageModel>,
        store: Arc<dyn ProgressStore>,
        writer: Arc<RecordWriter>,
        retriever: Option<Arc<Retriever>>,
        failure_log: Option<Arc<FailureLog>>,
        config: HarvestConfig,
    ) -> Self {
        let recovery = SessionRecovery::new(factory, config.recovery.clone(), failure_log);
        let rate_limiter = RateLimiter::new(config.batch.target_delay_ms);
        Self {
            model,
            store,
            writer,
            retriever,
            recovery,
            config,
            rate_limiter,
        }
    }

    pub async fn run(&mut self, targets: &[Target]) -> BatchStats {
        let start = Instant::now();
        let mut stats = BatchStats::new(targets.len());
        info!(
            run_id = %stats.run_id,
            targets = targets.len(),
            downloads = self.retriever.is_some(),
            "batch harvest starting"
        );

        let mut first = true;
        for target in targets {
            match self.store.is_completed(&target.id).await {
                Ok(true) => {
                    info!(target = %target.id, "target already completed, skipping");
                    stats.targets_skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(error) => {
                    // Reads are advisory: harvesting a finished target twice
                    // is idempotent, skipping a fresh one loses data.
                    warn!(target = %target.id, error = %error, "completed-set lookup failed");
                }
            }

            if !first {
                let waited = self.rate_limiter.wait().await;
                stats.total_wait_ms += waited;
                debug!(target = %target.id, delay_ms = waited, "pacing before target");
            }
            first = false;

            let traversal = TargetTraversal::new(
                target.clone(),
                Arc::clone(&self.model),
                Arc::clone(&self.store),
                Arc::clone(&self.writer),
                self.retriever.clone(),
                &self.config,
            );

            match self.recovery.run_target(&traversal).await {
                Ok(TargetOutcome::Completed(summary)) => {
                    stats.targets_completed += 1;
                    stats.absorb(&summary);
                    self.finish_target(&mut stats, target, &summary).await;
                }
                Ok(TargetOutcome::Abandoned {
                    summary,
                    rebuilds,
                    last_error,
                }) => {
                    stats.targets_abandoned += 1;
                    stats.absorb(&summary);
                    warn!(
                        target = %target.id,
                        rebuilds,
                        error = %last_error,
                        "target abandoned"
                    );
                    stats.errors.push(format!(
                        "{}: abandoned after {rebuilds} rebuilds: {last_error}",
                        target.id
                    ));
                    self.record_run(
                        &mut stats,
                        &target.id,
                        "abandoned",
                        summary.processed,
                        summary.failed,
                        Some(&last_error),
                    )
                    .await;
                }
                Err(error) => {
                    stats.targets_failed += 1;
                    warn!(target = %target.id, error = %error, "target failed");
                    let message = error.to_string();
                    stats.errors.push(format!("{}: {message}", target.id));
                    self.record_run(&mut stats, &target.id, "failed", 0, 0, Some(&message))
                        .await;
                }
            }
        }

        stats.duration_secs = start.elapsed().as_secs();
        info!(
            run_id = %stats.run_id,
            completed = stats.targets_completed,
            abandoned = stats.targets_abandoned,
            failed = stats.targets_failed,
            skipped = stats.targets_skipped,
            items = stats.items_processed,
            downloads = stats.downloads_succeeded,
            duration = stats.duration_secs,
            errors = stats.errors.len(),
            "batch harvest finished"
        );
        stats
    }

    async fn finish_target(
        &self,
        stats: &mut BatchStats,
        target: &Target,
        summary: &TargetSummary,
    ) {
        let completed = CompletedTarget {
            target_id: target.id.clone(),
            root_url: target.root_url.clone(),
            items_harvested: summary.processed as i64,
            completed_at: Utc::now(),
        };
        if let Err(error) = self.store.mark_completed(&completed).await {
            warn!(target = %target.id, error = %error, "failed to mark target completed");
            stats.errors.push(format!("{}: {error}", target.id));
        } else if let Err(error) = self.store.delete_checkpoint(&target.id).await {
            // The completed set wins over a stale checkpoint; a lost delete
            // only leaves clutter behind.
            debug!(target = %target.id, error = %error, "checkpoint cleanup failed");
        }
        self.record_run(
            stats,
            &target.id,
            "completed",
            summary.processed,
            summary.failed,
            None,
        )
        .await;
        info!(
            target = %target.id,
            processed = summary.processed,
            downloads = summary.downloads_succeeded,
            exhausted = summary.exhausted,
            "target completed"
        );
    }

    async fn record_run(
        &self,
        stats: &mut BatchStats,
        target_id: &str,
        outcome: &str,
        processed: usize,
        failed: usize,
        detail: Option<&str>,
    ) {
        if let Err(error) = self
            .store
            .record_run(target_id, outcome, processed as i64, failed as i64, detail)
            .await
        {
            warn!(target = %target_id, error = %error, "run audit insert failed");
            stats.errors.push(format!("{target_id}: {error}"));
        }
    }
}

struct RateLimiter {
    range: [u64; 2],
}

impl RateLimiter {
    fn new(range: [u64; 2]) -> Self {
        Self { range }
    }

    async fn wait(&mut self) -> u64 {
        let [a, b] = self.range;
        if a == 0 && b == 0 {
            return 0;
        }
        let lower = a.min(b);
        let upper = a.max(b);
        let delay = rand::thread_rng().gen_range(lower..=upper);
        sleep(Duration::from_millis(delay)).await;
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_range_waits_nothing() {
        let mut limiter = RateLimiter::new([0, 0]);
        assert_eq!(limiter.wait().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_stays_within_bounds() {
        let mut limiter = RateLimiter::new([100, 200]);
        let waited = limiter.wait().await;
        assert!((100..=200).contains(&waited));
    }

    #[test]
    fn stats_fold_target_summaries() {
        let mut stats = BatchStats::new(2);
        let summary = TargetSummary {
            target_id: "clip-0011aabb".into(),
            root_url: "https://sora.example.com/p/clip".into(),
            total_items: 10,
            processed: 8,
            succeeded: 7,
            failed: 1,
            downloads_succeeded: 6,
            exhausted: true,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        stats.absorb(&summary);
        stats.absorb(&summary);

        assert_eq!(stats.items_processed, 16);
        assert_eq!(stats.items_succeeded, 14);
        assert_eq!(stats.items_failed, 2);
        assert_eq!(stats.downloads_succeeded, 12);
        assert_eq!(stats.targets_total, 2);
    }
}
