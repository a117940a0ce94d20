//! Shader-backed dispatch for the TIM-VX kernel layer.
//!
//! Each backend here picks a named shader variant, binds its parameters
//! and fills the work partition and constant table the driver would
//! receive. [`cl`] covers OpenCL kernels and [`evis`] the vision-extension
//! instruction set.

#![warn(missing_docs)]

pub mod cl;
pub mod evis;

use timvx_kernel::{KernelBackend, KernelError, KernelRegistry};

/// Every shader backend in this crate.
pub fn backends() -> Vec<Box<dyn KernelBackend>> {
    vec![
        Box::new(cl::OneHot),
        Box::new(cl::TopK),
        Box::new(cl::Upsample),
        Box::new(evis::InstanceNorm),
    ]
}

/// Register every shader backend, plus the selectors that route between
/// them and the CPU.
pub fn register_all(registry: &mut KernelRegistry) -> Result<(), KernelError> {
    for backend in backends() {
        registry.register(backend)?;
    }
    registry.register_selector("upsample", cl::upsample::select);
    Ok(())
}
