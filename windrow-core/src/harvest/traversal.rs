use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::browser::{
    classify, BrowserError, DetailNormalizer, FailureKind, ListSurface, PageModel, RetryPolicy,
};
use crate::config::{HarvestConfig, MaterializerSection, TraversalSection};

use super::error::HarvestResult;
use super::materializer::materialize;
use super::models::{Checkpoint, ItemMetadata, ItemRecord, Target, TargetSummary};
use super::output::RecordWriter;
use super::retrieve::Retriever;
use super::store::ProgressStore;

/// Stages of the per-item pipeline. The cursor only ever moves forward, so
/// the machine loops through these until the window runs out or the desired
/// count is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalPhase {
    LoadingWindow,
    Selecting,
    Activating,
    Validating,
    Extracting,
    Retrieving,
    Checkpointing,
    Advancing,
    Exhausted,
    Fatal,
}

/// Mutable state for one target. Created once per target and passed by
/// reference, so counters survive a surface rebuild mid-target.
#[derive(Debug)]
pub struct TraversalContext {
    pub phase: TraversalPhase,
    pub cursor: usize,
    pub materialized: usize,
    pub window_exhausted: bool,
    pub root_done: bool,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub downloads_succeeded: usize,
    pub started_at: DateTime<Utc>,
    records: Vec<ItemRecord>,
}

impl TraversalContext {
    pub fn new() -> Self {
        Self {
            phase: TraversalPhase::LoadingWindow,
            cursor: 0,
            materialized: 0,
            window_exhausted: false,
            root_done: false,
            processed: 0,
            succeeded: 0,
            failed: 0,
            downloads_succeeded: 0,
            started_at: Utc::now(),
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[ItemRecord] {
        &self.records
    }

    /// Re-recording a label replaces the earlier entry, mirroring the
    /// overwrite-idempotent record files on disk.
    fn push_record(&mut self, record: ItemRecord) {
        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|current| current.label == record.label)
        {
            *existing = record;
        } else {
            self.records.push(record);
        }
    }

    pub fn summary(&self, target: &Target) -> TargetSummary {
        TargetSummary {
            target_id: target.id.clone(),
            root_url: target.root_url.clone(),
            total_items: self.materialized,
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            downloads_succeeded: self.downloads_succeeded,
            exhausted: self.window_exhausted,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

impl Default for TraversalContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks one target's window item by item: activate, validate the detail
/// view, extract, optionally download, checkpoint, advance. Item-level
/// failures are recorded and skipped; only fatal surface errors abort.
pub struct TargetTraversal {
    target: Target,
    store: Arc<dyn ProgressStore>,
    writer: Arc<RecordWriter>,
    retriever: Option<Arc<Retriever>>,
    normalizer: DetailNormalizer,
    model: Arc<dyn PageModel>,
    activation: RetryPolicy,
    traversal: TraversalSection,
    materializer: MaterializerSection,
}

impl TargetTraversal {
    pub fn new(
        target: Target,
        model: Arc<dyn PageModel>,
        store: Arc<dyn ProgressStore>,
        writer: Arc<RecordWriter>,
        retriever: Option<Arc<Retriever>>,
        config: &HarvestConfig,
    ) -> Self {
        let activation = RetryPolicy::new(
            config.traversal.activation_attempts,
            config.traversal.activation_backoff_ms,
        );
        Self {
            target,
            store,
            writer,
            retriever,
            normalizer: DetailNormalizer::new(Arc::clone(&model)),
            model,
            activation,
            traversal: config.traversal.clone(),
            materializer: config.materializer.clone(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub async fn run(
        &self,
        surface: &mut dyn ListSurface,
        ctx: &mut TraversalContext,
    ) -> HarvestResult<TargetSummary> {
        match self.drive(surface, ctx).await {
            Ok(summary) => Ok(summary),
            Err(error) => {
                ctx.phase = TraversalPhase::Fatal;
                warn!(
                    target = %self.target.id,
                    cursor = ctx.cursor,
                    error = %error,
                    "traversal interrupted"
                );
                Err(error)
            }
        }
    }

    async fn drive(
        &self,
        surface: &mut dyn ListSurface,
        ctx: &mut TraversalContext,
    ) -> HarvestResult<TargetSummary> {
        ctx.phase = TraversalPhase::LoadingWindow;
        let checkpoint = self.store.load_checkpoint(&self.target.id).await?;

        surface.open_root(&self.target.root_url).await?;
        let outcome = materialize(surface, self.target.desired, &self.materializer).await?;
        ctx.materialized = outcome.materialized;
        ctx.window_exhausted = outcome.exhausted;
        info!(
            target = %self.target.id,
            materialized = ctx.materialized,
            exhausted = ctx.window_exhausted,
            reveals = outcome.reveals,
            "window materialized"
        );

        match &checkpoint {
            Some(checkpoint) => {
                ctx.root_done = checkpoint.root_done();
                ctx.cursor = checkpoint.resume_index();
                info!(
                    target = %self.target.id,
                    resume_index = ctx.cursor,
                    "resuming from checkpoint"
                );
            }
            None => {
                // The root view is itself an item; record it before the
                // cursor ever moves so a resume never repeats it.
                self.record_detail(surface, ctx, None, self.target.root_url.clone())
                    .await?;
                ctx.root_done = true;
                ctx.cursor = 0;
            }
        }

        loop {
            if self.target.desired.is_reached(ctx.cursor) {
                debug!(target = %self.target.id, cursor = ctx.cursor, "desired count reached");
                ctx.phase = TraversalPhase::Exhausted;
                break;
            }

            ctx.phase = TraversalPhase::LoadingWindow;
            if ctx.cursor >= ctx.materialized {
                let outcome =
                    materialize(surface, self.target.desired, &self.materializer).await?;
                ctx.materialized = outcome.materialized;
                ctx.window_exhausted = outcome.exhausted;
                if ctx.cursor >= ctx.materialized {
                    // The window may have been lost to a detail view; one
                    // pass from the root decides between a shrunken window
                    // and real exhaustion.
                    self.reopen_root(surface, ctx).await?;
                }
                if ctx.cursor >= ctx.materialized {
                    ctx.phase = TraversalPhase::Exhausted;
                    break;
                }
            }

            if ctx.processed > 0 {
                surface.idle(self.traversal.item_delay_ms).await?;
            }

            ctx.phase = TraversalPhase::Selecting;
            let cursor = ctx.cursor;
            let before = surface.current_location().await?;
            debug!(target = %self.target.id, cursor, "selecting item");

            ctx.phase = TraversalPhase::Activating;
            let activated = self.activate_with_retry(surface, cursor, &before).await?;

            let Some(detail_url) = activated else {
                let record = ItemRecord::failed_activation(&self.target.id, cursor);
                self.writer.write_record(&record).await?;
                ctx.push_record(record);
                ctx.failed += 1;
                ctx.processed += 1;
                ctx.phase = TraversalPhase::Advancing;
                ctx.cursor += 1;
                // A half-finished activation can leave the surface off the
                // window; only then is a reload from the root needed.
                let here = surface.current_location().await?;
                if here != before {
                    self.reopen_root(surface, ctx).await?;
                }
                continue;
            };

            ctx.phase = TraversalPhase::Validating;
            let count = self.await_window_reload(surface, cursor).await?;
            ctx.materialized = count;

            self.record_detail(surface, ctx, Some(cursor), detail_url)
                .await?;

            ctx.phase = TraversalPhase::Advancing;
            ctx.cursor += 1;
        }

        self.writer
            .write_manifest(&self.target.id, &self.target.root_url, ctx.records())
            .await?;
        let summary = ctx.summary(&self.target);
        info!(
            target = %self.target.id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            downloads = summary.downloads_succeeded,
            exhausted = summary.exhausted,
            "target traversal finished"
        );
        Ok(summary)
    }

    /// Activation is valid only when the location changed and landed on a
    /// detail view. Anything else is retried with jittered backoff and then
    /// reported as a skipped item; fatal surface errors propagate.
    async fn activate_with_retry(
        &self,
        surface: &mut dyn ListSurface,
        cursor: usize,
        before: &str,
    ) -> HarvestResult<Option<String>> {
        let model = Arc::clone(&self.model);
        let root = self.target.root_url.clone();
        let origin = before.to_string();
        let attempt = self
            .activation
            .run_on("activate item", surface, move |surface, _attempt| {
                let model = Arc::clone(&model);
                let root = root.clone();
                let origin = origin.clone();
                Box::pin(async move {
                    surface.activate_item(cursor).await?;
                    let after = surface.current_location().await?;
                    if after == origin {
                        return Err(BrowserError::Timeout(format!(
                            "navigation after activating index {cursor}"
                        )));
                    }
                    if !model.is_detail_location(&after, &root) {
                        return Err(BrowserError::Unexpected(format!(
                            "activation landed outside detail view: {after}"
                        )));
                    }
                    Ok(after)
                })
            })
            .await;

        match attempt {
            Ok(outcome) => Ok(Some(outcome.result)),
            Err(error) => {
                if classify(&error) == FailureKind::Fatal {
                    return Err(error.into());
                }
                warn!(
                    target = %self.target.id,
                    cursor,
                    error = %error,
                    "activation failed after retries"
                );
                Ok(None)
            }
        }
    }

    /// The surface re-renders the window on the detail view after an
    /// activation. Polls until the cursor's slot is visible again or the
    /// timeout lapses; a shortfall is settled by the next loading step.
    async fn await_window_reload(
        &self,
        surface: &mut dyn ListSurface,
        cursor: usize,
    ) -> HarvestResult<usize> {
        let poll = Duration::from_millis(self.traversal.reload_poll_ms.max(1));
        let deadline = Instant::now() + Duration::from_millis(self.traversal.reload_timeout_ms);
        let mut last = 0usize;
        loop {
            match surface.materialized_count().await {
                Ok(count) => {
                    last = count;
                    if count > cursor {
                        return Ok(count);
                    }
                }
                Err(error) => {
                    if classify(&error) == FailureKind::Fatal {
                        return Err(error.into());
                    }
                    debug!(error = %error, "window recount failed while reloading");
                }
            }
            if Instant::now() >= deadline {
                warn!(
                    target = %self.target.id,
                    cursor,
                    count = last,
                    "window did not reload in time"
                );
                return Ok(last);
            }
            sleep(poll).await;
        }
    }

    async fn reopen_root(
        &self,
        surface: &mut dyn ListSurface,
        ctx: &mut TraversalContext,
    ) -> HarvestResult<()> {
        surface.open_root(&self.target.root_url).await?;
        let outcome = materialize(surface, self.target.desired, &self.materializer).await?;
        ctx.materialized = outcome.materialized;
        ctx.window_exhausted = outcome.exhausted;
        Ok(())
    }

    /// Shared tail of the pipeline for the root item and cursor items:
    /// extract, optionally download, write the record, checkpoint.
    async fn record_detail(
        &self,
        surface: &mut dyn ListSurface,
        ctx: &mut TraversalContext,
        cursor_index: Option<usize>,
        detail_url: String,
    ) -> HarvestResult<()> {
        ctx.phase = TraversalPhase::Extracting;
        let (metadata, extracted) = match self.extract_detail(surface).await? {
            Some(metadata) => (metadata, true),
            None => (ItemMetadata::empty(), false),
        };
        let mut record = ItemRecord::new(&self.target.id, cursor_index, Some(detail_url), metadata);

        ctx.phase = TraversalPhase::Retrieving;
        if let Some(retriever) = &self.retriever {
            if let Some(media_url) = record.metadata.media.payload.clone() {
                let dest = self.writer.payload_path(&self.target.id, &record.label);
                let outcome = retriever.fetch(&media_url, &dest).await;
                if outcome.succeeded {
                    ctx.downloads_succeeded += 1;
                }
                record.download = Some(outcome);
            }
        }

        self.writer.write_record(&record).await?;

        ctx.phase = TraversalPhase::Checkpointing;
        let checkpoint = Checkpoint {
            target_id: self.target.id.clone(),
            root_url: self.target.root_url.clone(),
            last_completed_index: cursor_index.map(|index| index as i64).unwrap_or(-1),
            updated_at: Utc::now(),
        };
        self.store.save_checkpoint(&checkpoint).await?;

        if extracted {
            ctx.succeeded += 1;
        } else {
            ctx.failed += 1;
        }
        ctx.processed += 1;
        debug!(
            target = %self.target.id,
            label = %record.label,
            extracted,
            downloaded = record
                .download
                .as_ref()
                .map_or(false, |outcome| outcome.succeeded),
            "item recorded"
        );
        ctx.push_record(record);
        Ok(())
    }

    /// Collection failures degrade to an empty metadata record instead of
    /// aborting the target; the fatal class still propagates.
    async fn extract_detail(
        &self,
        surface: &mut dyn ListSurface,
    ) -> HarvestResult<Option<ItemMetadata>> {
        match surface.collect_detail().await {
            Ok(raw) => Ok(Some(self.normalizer.normalize(&raw))),
            Err(error) => {
                if classify(&error) == FailureKind::Fatal {
                    return Err(error.into());
                }
                warn!(target = %self.target.id, error = %error, "detail collection failed");
                Ok(None)
            }
        }
    }
}
