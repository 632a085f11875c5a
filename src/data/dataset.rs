// ============================================================
// Layer 4 — Pose Dataset
// ============================================================
// Implements Burn's Dataset trait over the annotated records.
// Each `get` decodes the image and runs the Preprocessor, so a
// fresh random crop is drawn every epoch.
//
// The DataLoader stops an epoch at the first `None`; the trainer
// compares the number of samples it saw against `len()` and
// fails the run when an item could not be produced.
//
// Reference: Burn Book §4 (Datasets)

use burn::data::dataset::Dataset;
use anyhow::Result;
use std::path::Path;

use crate::data::{
    loader::{AflwLoader, PoseRecord},
    preprocessor::Preprocessor,
};

/// One preprocessed training sample.
/// `image` is a normalised [3, size, size] buffer in CHW order.
#[derive(Debug, Clone)]
pub struct PoseItem {
    pub image:  Vec<f32>,
    pub size:   usize,
    pub bins:   [usize; 3],
    pub angles: [f32; 3],
    pub name:   String,
}

/// Annotated samples plus the preprocessing applied on access.
/// Random crops differ on every `get`, so each epoch sees new views.
pub struct PoseDataset {
    records:      Vec<PoseRecord>,
    preprocessor: Preprocessor,
}

impl PoseDataset {
    pub fn new(records: Vec<PoseRecord>, preprocessor: Preprocessor) -> Self {
        Self { records, preprocessor }
    }

    /// Parse the manifest and every annotation under `data_dir`.
    pub fn open(
        data_dir:      impl AsRef<Path>,
        filename_list: impl AsRef<Path>,
        preprocessor:  Preprocessor,
    ) -> Result<Self> {
        let records = AflwLoader::new(data_dir, filename_list).load_all()?;
        Ok(Self::new(records, preprocessor))
    }

    pub fn sample_count(&self) -> usize { self.records.len() }

    fn load_item(&self, record: &PoseRecord) -> Result<PoseItem> {
        let img = image::open(&record.image_path)?.to_rgb8();
        let mut rng = rand::thread_rng();
        Ok(PoseItem {
            image:  self.preprocessor.process(&img, &mut rng),
            size:   self.preprocessor.output_size(),
            bins:   record.pose.bins(),
            angles: record.pose.angles(),
            name:   record.name.clone(),
        })
    }
}

impl Dataset<PoseItem> for PoseDataset {
    fn get(&self, index: usize) -> Option<PoseItem> {
        let record = self.records.get(index)?;
        match self.load_item(record) {
            Ok(item) => Some(item),
            Err(e) => {
                // Headers were checked at open time; the file changed
                // or its pixel data is corrupt.
                tracing::error!("Cannot load '{}': {e:#}", record.image_path.display());
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
