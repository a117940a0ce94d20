#![warn(missing_docs)]
//! Kernel registry, selection engine and parameter marshaling.
//!
//! Each operator implementation is a [`KernelBackend`] for one
//! [`KernelType`]. A backend lists its specialized variants under
//! structural [`VariantKey`]s; the [`KernelRegistry`] indexes them and, for
//! a concrete set of tensors, tries backends in priority order until one
//! binds a [`Node`] into the [`Graph`].

pub mod arena;
mod backend;
mod config;
mod constants;
mod descriptor;
mod error;
mod graph;
mod key;
mod pack;
mod partition;
mod registry;
mod scalar;
mod types;

pub use backend::{KernelBackend, SetupContext};
pub use config::{DEFAULT_PRIORITY, DispatchConfig, EvisVersion, Priority};
pub use constants::{ConstValue, ConstantTable};
pub use descriptor::{
    Direction, Executor, Initializer, KernelDescriptor, ParamSlot, SlotKind, SlotState, signature,
};
pub use error::KernelError;
pub use graph::{ExecContext, Graph, InitContext, Node, NodeId, Param, TensorEntry, TensorId};
pub use key::{VariantKey, cl_dtype, evis_dtype};
pub use pack::pack_io;
pub use partition::{
    GPU_TENSOR_MAX_WIDTH, WorkPartition, align_np2, align_p2, gpu_check_shape, grid_dim,
    is_image_2d,
};
pub use registry::{KernelRegistry, SelectFn, VariantTable};
pub use scalar::{Scalar, ScalarValue};
pub use types::KernelType;
