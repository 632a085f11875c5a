// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a full Hopenet training run in order:
//
//   Step 1: Prepare the snapshot directory   (Layer 6 - infra)
//   Step 2: Save the run config              (Layer 6 - infra)
//   Step 3: Build the network                (Layer 5 - ml)
//   Step 4: Merge pretrained weights         (Layer 6 + 5)
//   Step 5: Open the AFLW dataset            (Layer 4 - data)
//   Step 6: Run both training phases         (Layer 5 - ml)
//
// The backend is chosen once, here, from the RuntimeConfig;
// everything below is generic over B: AutodiffBackend.
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::{ensure, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::data::{dataset::PoseDataset, preprocessor::Preprocessor};
use crate::domain::traits::WeightSource;
use crate::infra::{
    checkpoint::SnapshotWriter,
    metrics::MetricsLogger,
    pretrained::PretrainedSource,
};
use crate::ml::{
    model::{Arch, Hopenet},
    state_dict::load_filtered_state_dict,
    trainer::run_training,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run.
// Serialisable so it is stored next to the snapshots it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub gpu:           usize,
    pub num_epochs:    usize,
    pub num_epochs_ft: usize,
    pub batch_size:    usize,
    pub lr:            f64,
    pub data_dir:      String,
    pub filename_list: String,
    pub output_string: String,
    pub alpha:         f64,
    pub arch:          Arch,
    pub pretrained:    String,
    pub output_dir:    String,
    pub cpu:           bool,
    pub seed:          u64,
    pub num_workers:   usize,
    pub image_size:    u32,
    pub scale_size:    u32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            gpu:           0,
            num_epochs:    5,
            num_epochs_ft: 5,
            batch_size:    16,
            lr:            0.001,
            data_dir:      String::new(),
            filename_list: String::new(),
            output_string: String::new(),
            alpha:         0.0,
            arch:          Arch::Resnet50,
            pretrained:    "hub".to_string(),
            output_dir:    "output/snapshots".to_string(),
            cpu:           false,
            seed:          42,
            num_workers:   2,
            image_size:    224,
            scale_size:    224,
        }
    }
}

// ─── Runtime Configuration ───────────────────────────────────────────────────
/// Where the tensors live. Picked from the config and passed down
/// explicitly; nothing reads a global device.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeConfig {
    /// Autodiff<Wgpu> on the given discrete GPU
    Wgpu { gpu: usize },
    /// Autodiff<NdArray> on the CPU
    Cpu,
}

impl RuntimeConfig {
    pub fn from_config(cfg: &TrainConfig) -> Self {
        if cfg.cpu {
            Self::Cpu
        } else {
            Self::Wgpu { gpu: cfg.gpu }
        }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
// Owns the config and runs the full training pipeline.
pub struct TrainUseCase {
    config:  TrainConfig,
    runtime: RuntimeConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        let runtime = RuntimeConfig::from_config(&config);
        Self { config, runtime }
    }

    /// Execute the full training pipeline on the selected backend
    pub fn execute(&self) -> Result<()> {
        match &self.runtime {
            RuntimeConfig::Wgpu { gpu } => {
                let device = WgpuDevice::DiscreteGpu(*gpu);
                tracing::info!("Using WGPU device: {:?}", device);
                self.execute_on::<Autodiff<Wgpu>>(&device)
            }
            RuntimeConfig::Cpu => {
                let device = NdArrayDevice::Cpu;
                tracing::info!("Using NdArray device: {:?}", device);
                self.execute_on::<Autodiff<NdArray>>(&device)
            }
        }
    }

    fn execute_on<B: AutodiffBackend>(&self, device: &B::Device) -> Result<()> {
        let cfg = &self.config;
        ensure!(cfg.batch_size > 0, "Batch size must be at least 1");

        // ── Step 1 + 2: Snapshot directory and config ───────────────────────
        let snapshots = SnapshotWriter::new(&cfg.output_dir, cfg.output_string.as_str())?;
        snapshots.save_config(cfg)?;

        // ── Step 3: Build Hopenet for the chosen depth ──────────────────────
        let model: Hopenet<B> = cfg.arch.config().init(device);
        tracing::info!("Built Hopenet on {}", cfg.arch);

        // ── Step 4: Pretrained backbone ─────────────────────────────────────
        // Only tensors whose names exist in the model are copied; the
        // heads and any shape-compatible leftovers keep their init.
        let source = PretrainedSource::parse(&cfg.pretrained, cfg.arch);
        tracing::info!("Loading pretrained weights from {}", source.describe());
        let (model, report) = load_filtered_state_dict(model, source.fetch()?)?;
        tracing::info!(
            "Pretrained merge: {} loaded, {} kept at init, {} dropped",
            report.loaded, report.kept, report.dropped.len(),
        );

        // ── Step 5: Dataset ─────────────────────────────────────────────────
        tracing::info!("Loading data.");
        let preprocessor = Preprocessor::new(cfg.scale_size, cfg.image_size)?;
        let dataset      = PoseDataset::open(&cfg.data_dir, &cfg.filename_list, preprocessor)?;
        tracing::info!("Loaded {} samples from '{}'", dataset.sample_count(), cfg.data_dir);

        // ── Step 6: Train ───────────────────────────────────────────────────
        let metrics = MetricsLogger::new(snapshots.dir(), &cfg.output_string)?;
        run_training(cfg, model, dataset, &snapshots, &metrics, device)?;
        tracing::info!("Loss history written to '{}'", metrics.csv_path().display());

        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_selection() {
        let cfg = TrainConfig { gpu: 1, ..TrainConfig::default() };
        assert_eq!(RuntimeConfig::from_config(&cfg), RuntimeConfig::Wgpu { gpu: 1 });

        let cfg = TrainConfig { cpu: true, ..TrainConfig::default() };
        assert_eq!(RuntimeConfig::from_config(&cfg), RuntimeConfig::Cpu);
    }

    #[test]
    fn test_config_json_roundtrip_keeps_arch_name() {
        let cfg  = TrainConfig { arch: Arch::Resnet18, ..TrainConfig::default() };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"arch\":\"resnet18\""));
        let back: TrainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.arch, Arch::Resnet18);
        assert_eq!(back.num_epochs_ft, 5);
    }

    #[test]
    fn test_zero_batch_size_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            cpu:        true,
            batch_size: 0,
            output_dir: dir.path().join("out").display().to_string(),
            ..TrainConfig::default()
        };
        let err = TrainUseCase::new(cfg).execute().unwrap_err();
        assert!(err.to_string().contains("Batch size"));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            cpu:           true,
            arch:          Arch::Resnet18,
            pretrained:    "none".into(),
            output_string: "run".into(),
            output_dir:    dir.path().join("out").display().to_string(),
            data_dir:      dir.path().display().to_string(),
            filename_list: dir.path().join("missing.txt").display().to_string(),
            ..TrainConfig::default()
        };
        assert!(TrainUseCase::new(cfg).execute().is_err());
        // The config is written before the data is touched
        assert!(dir.path().join("out/run_config.json").exists());
    }
}
