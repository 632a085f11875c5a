// ============================================================
// Layer 4 — Pose Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<PoseItem>
// into the tensors one training step consumes.
//
//   Input:  N PoseItems, each a [3, S, S] image + 3 labels
//   Output: PoseBatch
//             images  [N, 3, S, S]  float
//             bins    [N, 3]        int    (yaw, pitch, roll classes)
//             angles  [N, 3]        float  (degrees)
//             names   N strings
//
// All images already have the same size (the preprocessor crops
// to a fixed square), so stacking is a flat concatenation
// followed by a reshape.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::dataset::PoseItem;

/// A batch of pose samples ready for the forward pass.
#[derive(Debug, Clone)]
pub struct PoseBatch<B: Backend> {
    /// Normalised images — shape: [batch_size, 3, size, size]
    pub images: Tensor<B, 4>,

    /// Bin classes — shape: [batch_size, 3], columns yaw/pitch/roll
    pub bins: Tensor<B, 2, Int>,

    /// Continuous angles in degrees — shape: [batch_size, 3]
    pub angles: Tensor<B, 2>,

    /// Manifest names, in batch order
    pub names: Vec<String>,
}

impl<B: Backend> PoseBatch<B> {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Bin classes of one axis (0 = yaw, 1 = pitch, 2 = roll) — shape: [batch_size]
    pub fn axis_bins(&self, axis: usize) -> Tensor<B, 1, Int> {
        let [n, _] = self.bins.dims();
        self.bins.clone().slice([0..n, axis..axis + 1]).reshape([n])
    }
}

/// Stateless: the target device is handed in by the DataLoader.
#[derive(Clone, Debug, Default)]
pub struct PoseBatcher;

impl<B: Backend> Batcher<B, PoseItem, PoseBatch<B>> for PoseBatcher {
    fn batch(&self, items: Vec<PoseItem>, device: &B::Device) -> PoseBatch<B> {
        let batch_size = items.len();
        let size       = items.first().map(|i| i.size).unwrap_or(0);

        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|i| i.image.iter().copied())
            .collect();

        let bins: Vec<i64> = items
            .iter()
            .flat_map(|i| i.bins.iter().map(|&b| b as i64))
            .collect();

        let angles: Vec<f32> = items
            .iter()
            .flat_map(|i| i.angles.iter().copied())
            .collect();

        let names = items.into_iter().map(|i| i.name).collect();

        PoseBatch {
            images: Tensor::from_data(
                TensorData::new(pixels, [batch_size, 3, size, size]),
                device,
            ),
            bins: Tensor::from_data(TensorData::new(bins, [batch_size, 3]), device),
            angles: Tensor::from_data(TensorData::new(angles, [batch_size, 3]), device),
            names,
        }
    }
}
