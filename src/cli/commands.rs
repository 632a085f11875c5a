// ============================================================
// Layer 1 — CLI Arguments
// ============================================================
// The training flags. Long names keep their underscores
// (--num_epochs, --data_dir, ...) so existing launch scripts
// work unchanged.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for malformed values
//   - type conversion (string → usize, f64, Arch, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::Args;
use crate::application::train_use_case::TrainConfig;
use crate::ml::model::Arch;

/// All arguments of a training run.
/// Each field becomes a --flag on the command line.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// GPU device id to use
    #[arg(long, default_value_t = 0)]
    pub gpu: usize,

    /// Maximum number of training epochs
    #[arg(long = "num_epochs", default_value_t = 5)]
    pub num_epochs: usize,

    /// Number of finetuning epochs after pretraining
    #[arg(long = "num_epochs_ft", default_value_t = 5)]
    pub num_epochs_ft: usize,

    /// Batch size (at least 1)
    #[arg(
        long = "batch_size",
        default_value_t = 16,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
    )]
    pub batch_size: usize,

    /// Base learning rate; the pose heads train at twice this
    #[arg(long, default_value_t = 0.001)]
    pub lr: f64,

    /// Directory path for data
    #[arg(long = "data_dir", default_value = "")]
    pub data_dir: String,

    /// Path to text file containing relative paths for every example
    #[arg(long = "filename_list", default_value = "")]
    pub filename_list: String,

    /// Prefix of the snapshot files
    #[arg(long = "output_string", default_value = "")]
    pub output_string: String,

    /// Regression loss coefficient
    #[arg(long, default_value_t = 0.0)]
    pub alpha: f64,

    /// ResNet backbone depth
    #[arg(long, default_value = "resnet50")]
    pub arch: Arch,

    /// Pretrained weights: `hub`, `none`, or a .safetensors path
    #[arg(long, default_value = "hub")]
    pub pretrained: String,

    /// Directory the snapshots, config and loss CSV are written to
    #[arg(long = "output_dir", default_value = "output/snapshots")]
    pub output_dir: String,

    /// Train on the CPU (NdArray backend) instead of the GPU
    #[arg(long)]
    pub cpu: bool,

    /// Seed of the per-epoch shuffle
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Data loader worker threads
    #[arg(long = "num_workers", default_value_t = 2)]
    pub num_workers: usize,

    /// Side of the square random crop fed to the network
    #[arg(long = "image_size", default_value_t = 224)]
    pub image_size: u32,

    /// Shorter image side after resizing, before cropping
    #[arg(long = "scale_size", default_value_t = 224)]
    pub scale_size: u32,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// This is the boundary between Layer 1 and Layer 2 —
/// the application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            gpu:           a.gpu,
            num_epochs:    a.num_epochs,
            num_epochs_ft: a.num_epochs_ft,
            batch_size:    a.batch_size,
            lr:            a.lr,
            data_dir:      a.data_dir,
            filename_list: a.filename_list,
            output_string: a.output_string,
            alpha:         a.alpha,
            arch:          a.arch,
            pretrained:    a.pretrained,
            output_dir:    a.output_dir,
            cpu:           a.cpu,
            seed:          a.seed,
            num_workers:   a.num_workers,
            image_size:    a.image_size,
            scale_size:    a.scale_size,
        }
    }
}
