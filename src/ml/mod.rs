// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// The network, its losses and everything that updates weights.
//
// What's in this layer:
//
//   model.rs        — Hopenet
//                     ResNet backbone (basic or bottleneck
//                     blocks) with three 66-bin classification
//                     heads and a finetuning head that refines
//                     the soft-argmax angles
//
//   losses.rs       — Soft-argmax and the per-axis
//                     CE + alpha · MSE loss of both phases
//
//   state_dict.rs   — torchvision-style parameter names,
//                     export/import of flat state dicts and
//                     the filtered pretrained-weight merge
//
//   param_groups.rs — ignored / backbone / heads partition
//                     with per-group learning-rate multipliers
//
//   trainer.rs      — The two-phase training loop and the
//                     snapshot schedule
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            He et al. (2016) Deep Residual Learning

/// Hopenet architecture (ResNet backbone + pose heads)
pub mod model;

/// Binned classification + soft-argmax regression losses
pub mod losses;

/// Named parameter access and pretrained weight loading
pub mod state_dict;

/// Parameter groups with learning-rate multipliers
pub mod param_groups;

/// Two-phase training loop with snapshotting
pub mod trainer;
