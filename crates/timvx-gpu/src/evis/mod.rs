//! EVIS backends.
//!
//! EVIS variant tables keep F16 and BF16 distinct. Their nodes carry host
//! executors that follow the shader passes, so a planned pipeline can run
//! without a device.

pub mod instance_norm;

pub use instance_norm::InstanceNorm;
