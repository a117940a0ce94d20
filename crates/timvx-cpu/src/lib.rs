//! CPU reference kernels.
//!
//! Every operator here has a pure algorithm over `f32` buffers and a
//! [`KernelBackend`] that binds it into a host-executable node. CPU
//! kernels compute in the float domain regardless of storage type, so
//! each backend registers a single dtype-agnostic variant.

#![warn(missing_docs)]

pub mod box_with_nms_limit;
pub mod conv1d;
pub mod detect_post_nms;
pub mod grucell_activation;
pub mod instance_norm;
pub mod nms;
pub mod one_hot;
pub mod resize_bilinear;
pub mod resize_nearest;
pub mod select;
pub mod topk;
pub mod upsample;
pub mod warp_affine;

use timvx_kernel::{
    Executor, KernelBackend, KernelDescriptor, KernelError, KernelRegistry, ParamSlot, VariantKey,
};

pub use box_with_nms_limit::BoxWithNmsLimit;
pub use conv1d::Conv1d;
pub use detect_post_nms::DetectPostNms;
pub use grucell_activation::GrucellActivation;
pub use instance_norm::InstanceNorm;
pub use nms::Nms;
pub use one_hot::OneHot;
pub use resize_bilinear::ResizeBilinear;
pub use resize_nearest::ResizeNearest;
pub use topk::TopK;
pub use upsample::Upsample;
pub use warp_affine::WarpAffine;

/// Every CPU backend in this crate.
pub fn backends() -> Vec<Box<dyn KernelBackend>> {
    vec![
        Box::new(BoxWithNmsLimit),
        Box::new(Conv1d),
        Box::new(DetectPostNms),
        Box::new(GrucellActivation),
        Box::new(InstanceNorm),
        Box::new(Nms),
        Box::new(OneHot),
        Box::new(ResizeBilinear),
        Box::new(ResizeNearest),
        Box::new(TopK),
        Box::new(Upsample),
        Box::new(WarpAffine),
    ]
}

/// Register every CPU backend.
pub fn register_all(registry: &mut KernelRegistry) -> Result<(), KernelError> {
    for backend in backends() {
        registry.register(backend)?;
    }
    Ok(())
}

/// The single variant of a dtype-agnostic host kernel.
pub(crate) fn host_variant(
    name: &str,
    params: &[ParamSlot],
    exec: Executor,
) -> Vec<(VariantKey, KernelDescriptor)> {
    vec![(
        VariantKey::default(),
        KernelDescriptor::new(name, params).with_executor(exec),
    )]
}
