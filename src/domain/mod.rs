// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust types that define what the training program talks
// about: head-pose angles, their discretisation into bins, and
// the abstraction over where pretrained weights come from.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O or network calls
//   - Only plain Rust structs, enums, functions and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Head-pose angles and the 66-bin discretisation
pub mod pose;

// Core abstractions (traits) that other layers implement
pub mod traits;
