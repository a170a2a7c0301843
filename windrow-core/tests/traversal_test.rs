use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use windrow_core::browser::{
    resolve_model, BrowserError, BrowserResult, ListSurface, RawItemDetail,
};
use windrow_core::config::{
    BatchSection, DownloadsSection, HarvestConfig, MaterializerSection, RecoverySection,
    SiteSection, StorageSection, TraversalSection,
};
use windrow_core::harvest::{
    Checkpoint, CompletedTarget, CountBound, HarvestError, HarvestResult, ProgressStore,
    RecordWriter, Retriever, Target, TargetTraversal, TraversalContext, TraversalPhase,
};

#[derive(Default)]
struct MemoryStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    saved_indexes: Mutex<Vec<i64>>,
    completed: Mutex<HashMap<String, CompletedTarget>>,
    runs: Mutex<Vec<(String, String, i64, i64)>>,
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn load_checkpoint(&self, target_id: &str) -> HarvestResult<Option<Checkpoint>> {
        Ok(self.checkpoints.lock().await.get(target_id).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> HarvestResult<()> {
        self.saved_indexes
            .lock()
            .await
            .push(checkpoint.last_completed_index);
        self.checkpoints
            .lock()
            .await
            .insert(checkpoint.target_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn delete_checkpoint(&self, target_id: &str) -> HarvestResult<()> {
        self.checkpoints.lock().await.remove(target_id);
        Ok(())
    }

    async fn is_completed(&self, target_id: &str) -> HarvestResult<bool> {
        Ok(self.completed.lock().await.contains_key(target_id))
    }

    async fn mark_completed(&self, completed: &CompletedTarget) -> HarvestResult<()> {
        self.completed
            .lock()
            .await
            .insert(completed.target_id.clone(), completed.clone());
        Ok(())
    }

    async fn record_run(
        &self,
        target_id: &str,
        outcome: &str,
        items_processed: i64,
        items_failed: i64,
        _detail: Option<&str>,
    ) -> HarvestResult<()> {
        self.runs.lock().await.push((
            target_id.to_string(),
            outcome.to_string(),
            items_processed,
            items_failed,
        ));
        Ok(())
    }
}

/// Scripted surface. Activating index `i` normally navigates to a synthetic
/// detail url; `dead_clicks` leave the location unchanged and `fatal_clicks`
/// kill the session.
struct MockSurface {
    location: String,
    window: usize,
    max_window: usize,
    grow_step: usize,
    window_on_detail: Option<usize>,
    media_url: Option<String>,
    dead_clicks: HashSet<usize>,
    fatal_clicks: HashSet<usize>,
    activations: Vec<usize>,
    open_roots: usize,
}

impl MockSurface {
    fn new(window: usize) -> Self {
        Self {
            location: "about:blank".into(),
            window,
            max_window: window,
            grow_step: 0,
            window_on_detail: None,
            media_url: None,
            dead_clicks: HashSet::new(),
            fatal_clicks: HashSet::new(),
            activations: Vec::new(),
            open_roots: 0,
        }
    }

    fn on_detail(&self) -> bool {
        self.location.contains("/p/")
    }
}

#[async_trait(?Send)]
impl ListSurface for MockSurface {
    async fn open_root(&mut self, url: &str) -> BrowserResult<()> {
        self.open_roots += 1;
        self.location = url.to_string();
        Ok(())
    }

    async fn current_location(&mut self) -> BrowserResult<String> {
        Ok(self.location.clone())
    }

    async fn materialized_count(&mut self) -> BrowserResult<usize> {
        if self.on_detail() {
            if let Some(count) = self.window_on_detail {
                return Ok(count);
            }
        }
        Ok(self.window)
    }

    async fn reveal_more(&mut self) -> BrowserResult<bool> {
        if self.window >= self.max_window {
            return Ok(false);
        }
        self.window = (self.window + self.grow_step).min(self.max_window);
        Ok(true)
    }

    async fn activate_item(&mut self, index: usize) -> BrowserResult<()> {
        self.activations.push(index);
        if self.fatal_clicks.contains(&index) {
            return Err(BrowserError::SessionClosed("tab crashed".into()));
        }
        if self.dead_clicks.contains(&index) {
            return Ok(());
        }
        self.location = format!("https://sora.example.com/p/item-{index:03}");
        Ok(())
    }

    async fn collect_detail(&mut self) -> BrowserResult<RawItemDetail> {
        let media_candidates = if self.on_detail() {
            self.media_url.clone().into_iter().collect()
        } else {
            Vec::new()
        };
        Ok(RawItemDetail {
            location: self.location.clone(),
            title_candidates: vec!["Harvest clip".into()],
            media_candidates,
            ..RawItemDetail::default()
        })
    }

    async fn idle(&mut self, _bounds: [u64; 2]) -> BrowserResult<()> {
        Ok(())
    }
}

fn harvest_config(output_dir: &Path) -> HarvestConfig {
    HarvestConfig {
        site: SiteSection {
            page_model: "sora".into(),
        },
        materializer: MaterializerSection {
            max_reveals: 10,
            reveal_wait_ms: [0, 0],
            settle_wait_ms: [0, 0],
        },
        traversal: TraversalSection {
            activation_attempts: 2,
            activation_backoff_ms: [0, 0],
            item_delay_ms: [0, 0],
            reload_poll_ms: 1,
            reload_timeout_ms: 20,
        },
        recovery: RecoverySection {
            max_attempts: 2,
            rebuild_backoff_ms: [0, 0],
        },
        batch: BatchSection {
            target_delay_ms: [0, 0],
        },
        storage: StorageSection {
            db_path: "windrow.sqlite".into(),
            output_dir: output_dir.display().to_string(),
        },
        downloads: DownloadsSection {
            connect_timeout_seconds: 2,
        },
    }
}

fn build_traversal(
    target: &Target,
    store: &Arc<MemoryStore>,
    output_dir: &Path,
    retriever: Option<Arc<Retriever>>,
) -> TargetTraversal {
    TargetTraversal::new(
        target.clone(),
        resolve_model("sora").expect("sora model registered"),
        store.clone(),
        Arc::new(RecordWriter::new(output_dir)),
        retriever,
        &harvest_config(output_dir),
    )
}

fn record_json(output_dir: &Path, target: &Target, file: &str) -> serde_json::Value {
    let path = output_dir.join(&target.id).join(file);
    serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_cursor_covers_each_index_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let target = Target::new(
        "https://sora.example.com/profile/ana",
        CountBound::Bounded(5),
    );
    let traversal = build_traversal(&target, &store, dir.path(), None);
    let mut surface = MockSurface::new(8);
    let mut ctx = TraversalContext::new();

    let summary = traversal.run(&mut surface, &mut ctx).await.unwrap();

    assert_eq!(surface.activations, vec![0, 1, 2, 3, 4]);
    assert_eq!(surface.open_roots, 1);
    // Pre-traversal root item plus the five indexed items.
    assert_eq!(summary.processed, 6);
    assert_eq!(summary.succeeded, 6);
    assert_eq!(summary.failed, 0);

    let saved = store.saved_indexes.lock().await.clone();
    assert_eq!(saved, vec![-1, 0, 1, 2, 3, 4]);

    let root = record_json(dir.path(), &target, "item_0000_root.json");
    assert_eq!(root["cursor_index"], serde_json::Value::Null);
    assert_eq!(root["metadata"]["title"], "Harvest clip");
    let last = record_json(dir.path(), &target, "item_0005.json");
    assert_eq!(last["cursor_index"], 4);
    let manifest = record_json(dir.path(), &target, "harvest_summary.json");
    assert_eq!(manifest["total_items"], 6);
}

#[tokio::test]
async fn test_resume_skips_the_completed_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let target = Target::new(
        "https://sora.example.com/profile/bruno",
        CountBound::Bounded(4),
    );
    store.checkpoints.lock().await.insert(
        target.id.clone(),
        Checkpoint {
            target_id: target.id.clone(),
            root_url: target.root_url.clone(),
            last_completed_index: 1,
            updated_at: Utc::now(),
        },
    );
    let traversal = build_traversal(&target, &store, dir.path(), None);
    let mut surface = MockSurface::new(8);
    let mut ctx = TraversalContext::new();

    let summary = traversal.run(&mut surface, &mut ctx).await.unwrap();

    assert_eq!(surface.activations, vec![2, 3]);
    assert_eq!(summary.processed, 2);
    assert_eq!(store.saved_indexes.lock().await.clone(), vec![2, 3]);
    // The root item was covered by the checkpoint; this run never redoes it.
    assert!(ctx.records().iter().all(|record| record.cursor_index.is_some()));
}

#[tokio::test]
async fn test_failed_activation_is_recorded_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let target = Target::new(
        "https://sora.example.com/profile/carla",
        CountBound::Bounded(3),
    );
    let traversal = build_traversal(&target, &store, dir.path(), None);
    let mut surface = MockSurface::new(8);
    surface.dead_clicks.insert(1);
    let mut ctx = TraversalContext::new();

    let summary = traversal.run(&mut surface, &mut ctx).await.unwrap();

    // Two attempts on the dead index, then the cursor moves on.
    assert_eq!(surface.activations, vec![0, 1, 1, 2]);
    assert_eq!(surface.open_roots, 1);
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 1);

    // The skipped item is never checkpointed, so a restart retries it.
    assert_eq!(store.saved_indexes.lock().await.clone(), vec![-1, 0, 2]);

    let failed = record_json(dir.path(), &target, "item_0002.json");
    assert_eq!(failed["activation_failed"], true);
    assert_eq!(failed["detail_url"], serde_json::Value::Null);
    let manifest = record_json(dir.path(), &target, "harvest_summary.json");
    assert_eq!(manifest["total_items"], 4);
}

#[tokio::test]
async fn test_unbounded_traversal_stops_at_window_end() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let target = Target::new(
        "https://sora.example.com/profile/diego",
        CountBound::Unbounded,
    );
    let traversal = build_traversal(&target, &store, dir.path(), None);
    let mut surface = MockSurface::new(2);
    let mut ctx = TraversalContext::new();

    let summary = traversal.run(&mut surface, &mut ctx).await.unwrap();

    assert_eq!(surface.activations, vec![0, 1]);
    // One reload from the root to tell a lost window from a finished list.
    assert_eq!(surface.open_roots, 2);
    assert!(summary.exhausted);
    assert_eq!(summary.processed, 3);
    assert_eq!(store.saved_indexes.lock().await.clone(), vec![-1, 0, 1]);
}

#[tokio::test]
async fn test_fatal_activation_aborts_without_checkpointing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let target = Target::new(
        "https://sora.example.com/profile/eva",
        CountBound::Bounded(4),
    );
    let traversal = build_traversal(&target, &store, dir.path(), None);
    let mut surface = MockSurface::new(8);
    surface.fatal_clicks.insert(1);
    let mut ctx = TraversalContext::new();

    let error = traversal.run(&mut surface, &mut ctx).await.unwrap_err();

    assert!(matches!(
        error,
        HarvestError::Browser(BrowserError::SessionClosed(_))
    ));
    assert_eq!(ctx.phase, TraversalPhase::Fatal);
    // The retry policy burns its attempts before the error escapes.
    assert_eq!(surface.activations, vec![0, 1, 1]);
    assert_eq!(store.saved_indexes.lock().await.clone(), vec![-1, 0]);
}

#[tokio::test]
async fn test_restart_reprocesses_only_the_unfinished_item() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let target = Target::new(
        "https://sora.example.com/profile/flor",
        CountBound::Bounded(4),
    );
    let traversal = build_traversal(&target, &store, dir.path(), None);

    let mut crashed = MockSurface::new(8);
    crashed.fatal_clicks.insert(2);
    let mut ctx = TraversalContext::new();
    traversal.run(&mut crashed, &mut ctx).await.unwrap_err();
    assert_eq!(store.saved_indexes.lock().await.clone(), vec![-1, 0, 1]);

    let mut fresh = MockSurface::new(8);
    let mut resumed = TraversalContext::new();
    let summary = traversal.run(&mut fresh, &mut resumed).await.unwrap();

    // Item 2 is replayed exactly once; nothing before it is touched again.
    assert_eq!(fresh.activations, vec![2, 3]);
    assert_eq!(summary.processed, 2);
    assert_eq!(store.saved_indexes.lock().await.clone(), vec![-1, 0, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_window_lost_on_detail_recovers_from_root() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let target = Target::new(
        "https://sora.example.com/profile/gabi",
        CountBound::Bounded(2),
    );
    let traversal = build_traversal(&target, &store, dir.path(), None);
    let mut surface = MockSurface::new(4);
    // The grid never re-renders on detail views; every reload times out.
    surface.window_on_detail = Some(0);
    let mut ctx = TraversalContext::new();

    let summary = traversal.run(&mut surface, &mut ctx).await.unwrap();

    assert_eq!(surface.activations, vec![0, 1]);
    assert!(surface.open_roots >= 2);
    assert_eq!(summary.processed, 3);
    assert_eq!(store.saved_indexes.lock().await.clone(), vec![-1, 0, 1]);
}

#[tokio::test]
async fn test_media_payloads_land_next_to_records() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.mp4");
    std::fs::write(&source, b"binary payload").unwrap();

    let store = Arc::new(MemoryStore::default());
    let target = Target::new(
        "https://sora.example.com/profile/hugo",
        CountBound::Bounded(2),
    );
    let output = dir.path().join("out");
    let retriever = Retriever::new(&harvest_config(&output).downloads).unwrap();
    let traversal = build_traversal(&target, &store, &output, Some(Arc::new(retriever)));
    let mut surface = MockSurface::new(4);
    surface.media_url = Some(format!("file://{}", source.display()));
    let mut ctx = TraversalContext::new();

    let summary = traversal.run(&mut surface, &mut ctx).await.unwrap();

    // The root view exposes no payload; both indexed items do.
    assert_eq!(summary.downloads_succeeded, 2);
    let payload = output.join(&target.id).join("item_0001.mp4");
    assert_eq!(std::fs::read(&payload).unwrap(), b"binary payload");
    assert!(output.join(&target.id).join("item_0002.mp4").exists());

    let record = record_json(&output, &target, "item_0001.json");
    assert_eq!(record["download"]["succeeded"], true);
    assert_eq!(record["download"]["skipped"], false);
}
