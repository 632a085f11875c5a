// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from files on disk to tensor batches:
//
//   filename_list + data_dir
//       │
//       ▼
//   AflwLoader    → manifest + annotations → PoseRecords
//       │
//       ▼
//   PoseDataset   → implements Burn's Dataset trait; decodes
//       │           the image and runs the Preprocessor per item
//       ▼
//   PoseBatcher   → stacks items into PoseBatch tensors
//       │
//       ▼
//   DataLoader    → shuffles, prefetches on worker threads
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads the manifest and AFLW pose annotations
pub mod loader;

/// Scale, random crop and normalise face images
pub mod preprocessor;

/// Implements Burn's Dataset trait for pose samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
