// ============================================================
// Layer 6 — Snapshot Writer
// ============================================================
// Saves model weights in full precision with Burn's
// NamedMpkGzFileRecorder, so a run restarted from a snapshot
// sees exactly the weights that were trained.
//
// File naming convention (one directory per run family):
//   output/snapshots/
//     {tag}_epoch_1.mpk.gz   ← weights after epoch 1
//     {tag}_epoch_2.mpk.gz
//     ...
//     {tag}_config.json      ← the TrainConfig of the run
//
// Existing files with the same name are overwritten. Writes are
// not atomic: a crash mid-write can leave a truncated snapshot.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{bail, Context, Result};
use std::{fs, path::{Path, PathBuf}};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::Hopenet;

/// Extension the recorder puts on every file it writes
pub const SNAPSHOT_EXT: &str = "mpk.gz";

type SnapshotRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

pub struct SnapshotWriter {
    dir: PathBuf,
    tag: String,
}

impl SnapshotWriter {
    /// Create the writer and its directory (like `mkdir -p`).
    pub fn new(dir: impl AsRef<Path>, tag: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let tag = tag.into();
        // The recorder replaces everything after the last '.' with its
        // own extension, which would collapse "a.b_epoch_1" to "a.mpk.gz".
        if tag.contains('.') || tag.contains('/') {
            bail!("Output string '{}' must not contain '.' or '/'", tag);
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create snapshot directory '{}'", dir.display()))?;
        Ok(Self { dir, tag })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot for `epoch`, including the recorder extension
    pub fn snapshot_path(&self, epoch: usize) -> PathBuf {
        self.stem(epoch).with_extension(SNAPSHOT_EXT)
    }

    fn stem(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}_epoch_{}", self.tag, epoch))
    }

    /// Record every parameter of `model` as `{tag}_epoch_{epoch}`.
    pub fn save<B: Backend>(&self, model: &Hopenet<B>, epoch: usize) -> Result<PathBuf> {
        let stem = self.stem(epoch);
        SnapshotRecorder::new()
            .record(model.clone().into_record(), stem.clone())
            .with_context(|| format!("Failed to save snapshot '{}'", stem.display()))?;

        let path = self.snapshot_path(epoch);
        tracing::info!("Taking snapshot... '{}'", path.display());
        Ok(path)
    }

    /// Load the snapshot for `epoch` into a model of the same architecture.
    pub fn load<B: Backend>(
        &self,
        model:  Hopenet<B>,
        epoch:  usize,
        device: &B::Device,
    ) -> Result<Hopenet<B>> {
        let stem   = self.stem(epoch);
        let record = SnapshotRecorder::new()
            .load(stem.clone(), device)
            .with_context(|| format!("Cannot load snapshot '{}'", stem.display()))?;
        Ok(model.load_record(record))
    }

    /// Write the run configuration next to the snapshots.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}_config.json", self.tag));
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(path)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{model::tiny_config, state_dict::NamedParams};
    use burn::backend::NdArray;

    #[test]
    fn test_snapshot_names() {
        let dir = tempfile::tempdir().unwrap();
        let w   = SnapshotWriter::new(dir.path().join("snaps"), "run").unwrap();
        assert!(dir.path().join("snaps").is_dir());
        assert_eq!(
            w.snapshot_path(3),
            dir.path().join("snaps").join("run_epoch_3.mpk.gz")
        );
    }

    #[test]
    fn test_dotted_tag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SnapshotWriter::new(dir.path(), "lr0.1").is_err());
    }

    #[test]
    fn test_save_overwrites_and_restores_weights() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let w      = SnapshotWriter::new(dir.path(), "run").unwrap();

        let first: Hopenet<NdArray> = tiny_config().init(&device);
        let second: Hopenet<NdArray> = tiny_config().init(&device);
        w.save(&first, 1).unwrap();
        let path = w.save(&second, 1).unwrap();
        assert!(path.is_file());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let restored = w.load(tiny_config().init::<NdArray>(&device), 1, &device).unwrap();
        assert_eq!(restored.state_dict().unwrap(), second.state_dict().unwrap());
    }
}
