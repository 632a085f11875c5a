// ============================================================
// Layer 6 — Loss Logger
// ============================================================
// Appends the mean training losses of every epoch to a CSV file
// next to the snapshots, so learning curves of both phases can
// be plotted after (or during) a run.
//
// Output file: {output_dir}/{tag}_losses.csv
//
//   phase,epoch,yaw,pitch,roll,finetune
//   pretrain,1,3.912000,3.874100,3.501200,
//   pretrain,2,2.810400,2.904300,2.611000,
//   finetune,3,2.401200,2.588000,2.301700,812.554000
//
// `epoch` is the cumulative index used in snapshot names; the
// finetune column is empty during pretraining.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::ml::losses::LossValues;

/// Running mean of the losses of one epoch.
#[derive(Debug, Clone, Default)]
pub struct EpochLosses {
    sum:     LossValues,
    batches: usize,
}

impl EpochLosses {
    pub fn add(&mut self, v: &LossValues) {
        self.sum.yaw   += v.yaw;
        self.sum.pitch += v.pitch;
        self.sum.roll  += v.roll;
        if let Some(ft) = v.finetune {
            *self.sum.finetune.get_or_insert(0.0) += ft;
        }
        self.batches += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Per-batch mean; NaN for an epoch without batches
    pub fn mean(&self) -> LossValues {
        let n = self.batches as f64;
        if self.batches == 0 {
            return LossValues { yaw: f64::NAN, pitch: f64::NAN, roll: f64::NAN, finetune: None };
        }
        LossValues {
            yaw:      self.sum.yaw / n,
            pitch:    self.sum.pitch / n,
            roll:     self.sum.roll / n,
            finetune: self.sum.finetune.map(|f| f / n),
        }
    }
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Open (or create with header) the run's loss CSV.
    pub fn new(dir: impl AsRef<Path>, tag: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let csv_path = dir.join(format!("{tag}_losses.csv"));

        // Appending across runs with the same tag keeps earlier rows
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "phase,epoch,yaw,pitch,roll,finetune")?;
            tracing::debug!("Created loss CSV: '{}'", csv_path.display());
        }
        Ok(Self { csv_path })
    }

    pub fn log(&self, phase: &str, epoch: usize, m: &LossValues) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot append to '{}'", self.csv_path.display()))?;

        let finetune = m.finetune.map(|v| format!("{v:.6}")).unwrap_or_default();
        writeln!(
            f,
            "{},{},{:.6},{:.6},{:.6},{}",
            phase, epoch, m.yaw, m.pitch, m.roll, finetune,
        )?;
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_mean() {
        let mut e = EpochLosses::default();
        e.add(&LossValues { yaw: 1.0, pitch: 2.0, roll: 3.0, finetune: None });
        e.add(&LossValues { yaw: 3.0, pitch: 4.0, roll: 5.0, finetune: None });
        let m = e.mean();
        assert_eq!((m.yaw, m.pitch, m.roll), (2.0, 3.0, 4.0));
        assert_eq!(m.finetune, None);
        assert!(EpochLosses::default().mean().yaw.is_nan());
    }

    #[test]
    fn test_csv_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = MetricsLogger::new(dir.path(), "run").unwrap();
        log.log("pretrain", 1, &LossValues { yaw: 1.0, pitch: 2.0, roll: 3.0, finetune: None }).unwrap();
        log.log("finetune", 2, &LossValues { yaw: 1.0, pitch: 2.0, roll: 3.0, finetune: Some(0.5) }).unwrap();

        let text = std::fs::read_to_string(log.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "phase,epoch,yaw,pitch,roll,finetune");
        assert_eq!(lines[1], "pretrain,1,1.000000,2.000000,3.000000,");
        assert_eq!(lines[2], "finetune,2,1.000000,2.000000,3.000000,0.500000");
    }
}
