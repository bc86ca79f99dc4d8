//! Snapshot persistence
//!
//! Best-effort JSON snapshots of the store, written to a temp file and
//! atomically renamed so a reader never observes a half-written file.
//! Reload is best-effort: a missing or corrupt snapshot starts the store
//! empty and the live feed repopulates it.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

use crate::store::PriceStore;
use crate::types::PricePoint;

const SNAPSHOT_FILE: &str = "prices.json";

pub struct Persister {
    data_dir: PathBuf,
}

impl Persister {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(Self { data_dir })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    /// Serialize the store's current contents and atomically replace the
    /// snapshot file. Returns the number of points written.
    pub fn snapshot(&self, store: &PriceStore) -> Result<usize> {
        let points = store.dump();
        let body = serde_json::to_vec_pretty(&points).context("Failed to serialize snapshot")?;

        let tmp = self
            .data_dir
            .join(format!("{}.{}.tmp", SNAPSHOT_FILE, uuid::Uuid::new_v4()));
        fs::write(&tmp, &body).with_context(|| format!("Failed to write {}", tmp.display()))?;

        if let Err(e) = fs::rename(&tmp, self.snapshot_path()) {
            let _ = fs::remove_file(&tmp);
            return Err(e)
                .with_context(|| format!("Failed to replace {}", self.snapshot_path().display()));
        }

        Ok(points.len())
    }

    /// Best-effort reload of the last snapshot.
    pub fn load(&self) -> Vec<PricePoint> {
        let path = self.snapshot_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read snapshot, starting empty");
                return Vec::new();
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(points) => points,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt snapshot, starting empty");
                Vec::new()
            }
        }
    }
}
