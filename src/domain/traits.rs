// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The training workflow needs a pretrained backbone but does
// not care where its weights come from. Programming against a
// trait lets the application layer treat a Hub download, a
// local file and "no pretraining" identically.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

// ─── WeightSource ─────────────────────────────────────────────────────────────
/// Anything that can produce a named mapping of pretrained tensors.
///
/// Implementations:
///   - PretrainedSource::Hub   → downloads torchvision weights from the HF Hub
///   - PretrainedSource::Local → reads a safetensors file from disk
///   - PretrainedSource::None  → empty mapping, model keeps its init
///
/// `S` is the state mapping type so this layer stays free of
/// framework types.
pub trait WeightSource<S> {
    /// Short human readable description for logs
    fn describe(&self) -> String;

    /// Fetch the full state mapping.
    fn fetch(&self) -> Result<S>;
}
