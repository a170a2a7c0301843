use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;

use super::error::HarvestResult;
use super::models::ItemRecord;

/// Writes one JSON record per item plus a per-target manifest. Payload files
/// land next to the records under `<output>/<target_id>/`.
pub struct RecordWriter {
    output_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct TargetManifest<'a> {
    harvested_at: DateTime<Utc>,
    target_id: &'a str,
    root_url: &'a str,
    total_items: usize,
    successful_downloads: usize,
    items: &'a [ItemRecord],
}

impl RecordWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn target_dir(&self, target_id: &str) -> PathBuf {
        self.output_dir.join(target_id)
    }

    pub fn payload_path(&self, target_id: &str, label: &str) -> PathBuf {
        self.target_dir(target_id).join(format!("{label}.mp4"))
    }

    pub async fn write_record(&self, record: &ItemRecord) -> HarvestResult<PathBuf> {
        let dir = self.target_dir(&record.target_id);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", record.label));
        fs::write(&path, serde_json::to_vec_pretty(record)?).await?;
        Ok(path)
    }

    pub async fn write_manifest(
        &self,
        target_id: &str,
        root_url: &str,
        items: &[ItemRecord],
    ) -> HarvestResult<PathBuf> {
        let dir = self.target_dir(target_id);
        fs::create_dir_all(&dir).await?;
        let manifest = TargetManifest {
            harvested_at: Utc::now(),
            target_id,
            root_url,
            total_items: items.len(),
            successful_downloads: items
                .iter()
                .filter(|item| {
                    item.download
                        .as_ref()
                        .map_or(false, |outcome| outcome.succeeded)
                })
                .count(),
            items,
        };
        let path = dir.join("harvest_summary.json");
        fs::write(&path, serde_json::to_vec_pretty(&manifest)?).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::models::{DownloadOutcome, ItemMetadata};

    #[tokio::test]
    async fn record_and_manifest_land_under_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RecordWriter::new(dir.path());

        let mut record = ItemRecord::new(
            "demo-target",
            Some(0),
            Some("https://example.com/p/abc".into()),
            ItemMetadata::empty(),
        );
        record.download = Some(DownloadOutcome {
            local_path: writer.payload_path("demo-target", &record.label),
            byte_size: 12,
            succeeded: true,
            skipped: false,
        });

        let record_path = writer.write_record(&record).await.unwrap();
        assert!(record_path.ends_with("demo-target/item_0001.json"));
        assert!(record_path.exists());

        let manifest_path = writer
            .write_manifest("demo-target", "https://example.com/profile/demo", &[record])
            .await
            .unwrap();
        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(manifest_path).unwrap()).unwrap();
        assert_eq!(manifest["total_items"], 1);
        assert_eq!(manifest["successful_downloads"], 1);
    }
}
