//! Error types for the dispatch layer.

use timvx_core::CoreError;

use crate::KernelType;

/// Errors raised while registering, binding or executing kernels.
///
/// Unsupported dtype combinations and failed preconditions are not errors:
/// setup reports them as `Ok(None)` so the selector can try the next backend.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// Two variants of one backend table share a key.
    #[error("duplicate variant {key} for {operator} on {kernel_type}")]
    DuplicateKey {
        operator: String,
        kernel_type: KernelType,
        key: String,
    },

    /// A backend for the same operator and kernel type is already registered.
    #[error("{operator} already has a {kernel_type} backend")]
    DuplicateBackend {
        operator: String,
        kernel_type: KernelType,
    },

    /// A tensor handle does not belong to the graph.
    #[error("tensor #{0} not found")]
    MissingTensor(usize),

    /// A node handle does not belong to the graph.
    #[error("node #{0} not found")]
    MissingNode(usize),

    /// A graph holds more tensors or nodes than a handle can address.
    #[error("graph is full: {0} entries")]
    ArenaFull(usize),

    /// A parameter slot index is past the end of the parameter list.
    #[error("{kernel}: slot {slot} out of range ({len} params)")]
    SlotOutOfRange {
        kernel: String,
        slot: usize,
        len: usize,
    },

    /// The bound parameter count differs from the descriptor signature.
    #[error("{kernel}: expected {expected} params, got {actual}")]
    Arity {
        kernel: String,
        expected: usize,
        actual: usize,
    },

    /// More tensors were packed than the signature has slots for.
    #[error("{kernel}: {count} tensors do not fit {slots} slots")]
    TooManyTensors {
        kernel: String,
        count: usize,
        slots: usize,
    },

    /// A required slot was left empty.
    #[error("{kernel}: required slot {slot} is absent")]
    RequiredAbsent { kernel: String, slot: usize },

    /// A slot holds the wrong kind of parameter.
    #[error("{kernel}: slot {slot} expects a {expected}")]
    SlotKind {
        kernel: String,
        slot: usize,
        expected: &'static str,
    },

    /// A scalar holds a different type than requested.
    #[error("scalar type mismatch: expected {expected}, found {found}")]
    ScalarType {
        expected: &'static str,
        found: String,
    },

    /// A scalar carries a value the kernel has no implementation for.
    #[error("{kernel}: unsupported {what}")]
    Unsupported { kernel: String, what: String },

    /// The node has no host executor.
    #[error("kernel {0} is not executable on the host")]
    NotExecutable(String),

    /// A dispatch configuration could not be read.
    #[error("invalid config: {0}")]
    Config(String),

    /// A tensor-level failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}
