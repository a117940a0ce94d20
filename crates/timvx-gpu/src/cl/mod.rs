//! OpenCL backends.
//!
//! CL variant tables compute F16 as F32, so keys are built from collapsed
//! dtypes. None of these nodes run on the host.

pub mod one_hot;
pub mod topk;
pub mod upsample;

pub use one_hot::OneHot;
pub use topk::TopK;
pub use upsample::Upsample;
