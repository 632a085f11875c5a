// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Two-phase Hopenet training with Burn's DataLoader and Adam.
//
//   Phase 1 (pretrain)  num_epochs epochs
//     loss per axis = CE(bins) + alpha · MSE(soft-argmax, bin)
//   Phase 2 (finetune)  num_epochs_ft epochs
//     soft-argmax from detached logits, plus the MSE of the
//     finetuning head against the continuous angles
//
// Every batch is one backward pass of the summed losses and one
// Adam update per non-ignored parameter group.
//
// Key Burn 0.20 insight:
//   - loss.backward() returns B::Gradients; GradientsParams::
//     from_params pulls out one group's gradients at a time
//   - all batch norms are frozen, so there is no train/valid
//     switch and no validation pass
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam
//            Ruiz et al. (2018) Fine-Grained Head Pose Estimation

use anyhow::{bail, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    optim::{AdamConfig, Optimizer},
    tensor::backend::AutodiffBackend,
};
use std::fmt;

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{PoseBatch, PoseBatcher},
    dataset::PoseDataset,
};
use crate::infra::{
    checkpoint::SnapshotWriter,
    metrics::{EpochLosses, MetricsLogger},
};
use crate::ml::{
    losses::{LossValues, PoseCriterion},
    model::Hopenet,
    param_groups::{freeze_norms, ParamGroups},
};

/// Iterations between two progress lines
const LOG_EVERY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pretrain,
    Finetune,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pretrain => write!(f, "pretrain"),
            Phase::Finetune => write!(f, "finetune"),
        }
    }
}

// ─── Snapshot Schedule ───────────────────────────────────────────────────────
// Snapshot indices are cumulative over both phases:
//   pretrain epoch e (0-based)  → e + 1
//   finetune epoch e (0-based)  → num_epochs + e + 1, except the last
//   after training              → num_epochs + num_epochs_ft
#[derive(Debug, Clone, Copy)]
pub struct SnapshotSchedule {
    pub num_epochs:    usize,
    pub num_epochs_ft: usize,
}

impl SnapshotSchedule {
    pub fn new(num_epochs: usize, num_epochs_ft: usize) -> Self {
        Self { num_epochs, num_epochs_ft }
    }

    /// Cumulative index of a 0-based epoch within its phase
    pub fn index(&self, phase: Phase, epoch: usize) -> usize {
        match phase {
            Phase::Pretrain => epoch + 1,
            Phase::Finetune => self.num_epochs + epoch + 1,
        }
    }

    /// Snapshot to take when `epoch` of `phase` has finished, if any.
    pub fn after_epoch(&self, phase: Phase, epoch: usize) -> Option<usize> {
        match phase {
            Phase::Pretrain => Some(self.index(phase, epoch)),
            Phase::Finetune if epoch + 1 < self.num_epochs_ft => Some(self.index(phase, epoch)),
            Phase::Finetune => None,
        }
    }

    pub fn final_index(&self) -> usize {
        self.num_epochs + self.num_epochs_ft
    }

    /// Every snapshot index in the order they are written
    pub fn all(&self) -> Vec<usize> {
        let pre = (0..self.num_epochs).filter_map(|e| self.after_epoch(Phase::Pretrain, e));
        let ft  = (0..self.num_epochs_ft).filter_map(|e| self.after_epoch(Phase::Finetune, e));
        pre.chain(ft).chain(std::iter::once(self.final_index())).collect()
    }
}

// ─── Training ────────────────────────────────────────────────────────────────

/// Run both phases on `model` and return the trained network.
/// Snapshots and per-epoch loss rows are written as training goes.
pub fn run_training<B: AutodiffBackend>(
    cfg:       &TrainConfig,
    model:     Hopenet<B>,
    dataset:   PoseDataset,
    snapshots: &SnapshotWriter,
    metrics:   &MetricsLogger,
    device:    &B::Device,
) -> Result<Hopenet<B>> {
    let num_samples     = dataset.sample_count();
    let iters_per_epoch = num_samples / cfg.batch_size.max(1);

    // ── Freeze norms and split parameters into lr groups ────────────────────
    let mut model = freeze_norms(model);
    let groups    = ParamGroups::from_model(&model);
    for g in groups.iter() {
        tracing::info!(
            "Param group '{}': {} tensors, {} values, lr × {}",
            g.name, g.params.len(), g.numel(), g.lr_multiplier,
        );
    }

    // ── Adam optimiser ──────────────────────────────────────────────────────
    // m = β1*m + (1-β1)*g        (mean)
    // v = β2*v + (1-β2)*g²       (variance)
    // θ = θ - lr * m / (√v + ε)  (update)
    let mut optim = AdamConfig::new().init::<B, Hopenet<B>>();
    let criterion = PoseCriterion::<B>::new(cfg.alpha, device);

    // ── Data loader ─────────────────────────────────────────────────────────
    let loader = DataLoaderBuilder::new(PoseBatcher)
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(cfg.num_workers)
        .set_device(device.clone())
        .build(dataset);

    let schedule = SnapshotSchedule::new(cfg.num_epochs, cfg.num_epochs_ft);
    tracing::info!("Ready to train network.");

    for (phase, epochs) in [(Phase::Pretrain, cfg.num_epochs), (Phase::Finetune, cfg.num_epochs_ft)] {
        for epoch in 0..epochs {
            let progress = Progress {
                phase, epoch, epochs, iters_per_epoch, num_samples,
                batch_size: cfg.batch_size,
            };
            let (trained, losses) = train_epoch(
                model, &mut optim, &groups, &criterion, cfg.lr, loader.iter(), &progress,
            )?;
            model = trained;

            let index = schedule.index(phase, epoch);
            metrics.log(&phase.to_string(), index, &losses.mean())?;

            if let Some(index) = schedule.after_epoch(phase, epoch) {
                snapshots.save(&model, index)?;
            }
        }
    }

    snapshots.save(&model, schedule.final_index())?;
    tracing::info!("Training complete!");
    Ok(model)
}

struct Progress {
    phase:           Phase,
    epoch:           usize,
    epochs:          usize,
    iters_per_epoch: usize,
    num_samples:     usize,
    batch_size:      usize,
}

impl Progress {
    fn report(&self, iter: usize, v: &LossValues) {
        match v.finetune {
            None => tracing::info!(
                "Epoch [{}/{}], Iter [{}/{}] Losses: Yaw {:.4}, Pitch {:.4}, Roll {:.4}",
                self.epoch + 1, self.epochs, iter + 1, self.iters_per_epoch,
                v.yaw, v.pitch, v.roll,
            ),
            Some(ft) => tracing::info!(
                "Epoch [{}/{}], Iter [{}/{}] Losses: Yaw {:.4}, Pitch {:.4}, Roll {:.4}, Finetune {:.4}",
                self.epoch + 1, self.epochs, iter + 1, self.iters_per_epoch,
                v.yaw, v.pitch, v.roll, ft,
            ),
        }
    }
}

/// One pass over `batches`. Returns the updated model and the epoch's losses.
///
/// Fails when the loader stops before every sample was seen: the
/// DataLoader ends an epoch early when the dataset cannot produce
/// an item.
fn train_epoch<B, O>(
    mut model: Hopenet<B>,
    optim:     &mut O,
    groups:    &ParamGroups,
    criterion: &PoseCriterion<B>,
    lr:        f64,
    batches:   impl Iterator<Item = PoseBatch<B>>,
    progress:  &Progress,
) -> Result<(Hopenet<B>, EpochLosses)>
where
    B: AutodiffBackend,
    O: Optimizer<Hopenet<B>, B>,
{
    let mut epoch_losses = EpochLosses::default();
    let mut seen         = 0usize;

    for (i, batch) in batches.enumerate() {
        let output = model.forward(batch.images.clone());
        let losses = match progress.phase {
            Phase::Pretrain => criterion.pretrain(&output, &batch),
            Phase::Finetune => criterion.finetune(&output, &batch),
        };

        seen += batch.len();
        let values = losses.values();
        epoch_losses.add(&values);

        let mut grads = losses.total().backward();
        model = groups.step(model, optim, &mut grads, lr);

        if (i + 1) % LOG_EVERY == 0 {
            progress.report(i, &values);
        }
    }

    if seen != progress.num_samples {
        bail!(
            "{} epoch {} saw {} of {} samples; a sample failed to load",
            progress.phase, progress.epoch + 1, seen, progress.num_samples,
        );
    }

    tracing::debug!(
        "{} epoch {} done: {} batches of up to {}",
        progress.phase, progress.epoch + 1, epoch_losses.batches(), progress.batch_size,
    );
    Ok((model, epoch_losses))
}
