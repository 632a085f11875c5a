// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that touch the filesystem or network:
//
//   checkpoint.rs  — Snapshot writer
//                    Records model weights with Burn's
//                    CompactRecorder at epoch boundaries and
//                    stores the run's TrainConfig as JSON.
//
//   metrics.rs     — Loss logging
//                    Appends per-epoch mean losses of both
//                    phases to a CSV file.
//
//   pretrained.rs  — Pretrained weights
//                    Downloads (or reads) torchvision ImageNet
//                    weights as safetensors and converts them
//                    into a named StateDict.
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Model snapshot saving and loading
pub mod checkpoint;

/// Per-epoch loss CSV logger
pub mod metrics;

/// ImageNet weights from the Hub or disk
pub mod pretrained;
