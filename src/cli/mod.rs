// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Uses `clap` to parse
// the training flags; all work is delegated to Layer 2.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::TrainArgs;

use crate::application::train_use_case::TrainUseCase;

/// Head pose estimation using the Hopenet network.
#[derive(Parser, Debug)]
#[command(
    name = "hopenet-train",
    version = "0.1.0",
    about = "Head pose estimation using the Hopenet network."
)]
pub struct Cli {
    #[command(flatten)]
    pub train: TrainArgs,
}

impl Cli {
    /// Convert the flags into a TrainConfig and hand off to Layer 2.
    pub fn run(self) -> Result<()> {
        tracing::info!(
            "Training on '{}' listed in '{}'",
            self.train.data_dir, self.train.filename_list,
        );
        TrainUseCase::new(self.train.into()).execute()?;

        println!("Training complete. Snapshots saved.");
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::TrainConfig;
    use crate::ml::model::Arch;

    #[test]
    fn test_defaults_match_train_config() {
        let cli = Cli::try_parse_from(["hopenet-train"]).unwrap();
        let cfg: TrainConfig = cli.train.into();
        let def = TrainConfig::default();
        assert_eq!(cfg.num_epochs, def.num_epochs);
        assert_eq!(cfg.num_epochs_ft, def.num_epochs_ft);
        assert_eq!(cfg.batch_size, def.batch_size);
        assert_eq!(cfg.lr, def.lr);
        assert_eq!(cfg.arch, def.arch);
        assert_eq!(cfg.output_dir, def.output_dir);
        assert_eq!(cfg.seed, def.seed);
    }

    #[test]
    fn test_underscore_flags() {
        let cli = Cli::try_parse_from([
            "hopenet-train",
            "--gpu", "1",
            "--num_epochs", "25",
            "--num_epochs_ft", "3",
            "--batch_size", "128",
            "--lr", "0.00001",
            "--data_dir", "data/300W_LP",
            "--filename_list", "data/300W_LP/files.txt",
            "--output_string", "alpha_1",
            "--alpha", "1",
            "--arch", "resnet18",
            "--cpu",
        ])
        .unwrap();
        let cfg: TrainConfig = cli.train.into();
        assert_eq!(cfg.gpu, 1);
        assert_eq!(cfg.num_epochs, 25);
        assert_eq!(cfg.num_epochs_ft, 3);
        assert_eq!(cfg.batch_size, 128);
        assert_eq!(cfg.alpha, 1.0);
        assert_eq!(cfg.arch, Arch::Resnet18);
        assert_eq!(cfg.output_string, "alpha_1");
        assert!(cfg.cpu);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        assert!(Cli::try_parse_from(["hopenet-train", "--batch_size", "0"]).is_err());
        assert!(Cli::try_parse_from(["hopenet-train", "--batch_size", "1"]).is_ok());
    }

    #[test]
    fn test_unknown_arch_is_rejected() {
        assert!(Cli::try_parse_from(["hopenet-train", "--arch", "vgg16"]).is_err());
    }
}
