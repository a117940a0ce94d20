//! Work partition and GPU shape helpers.
//!
//! A shader node is launched over a 2D or 3D grid. Each grid axis covers
//! `global_scale[i]` tensor elements per work item, so the global size is
//! the tensor extent divided by the scale and rounded up to the vector
//! alignment the kernel expects.

use std::fmt;

use serde::Serialize;

/// Widest tensor dimension a GPU image can address.
pub const GPU_TENSOR_MAX_WIDTH: usize = 65536;

/// Launch geometry of a shader node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkPartition {
    /// Number of grid dimensions in use (2 or 3; 0 for host kernels).
    pub dim: usize,
    /// Offset of the first work item.
    pub global_offset: [usize; 3],
    /// Tensor elements covered per work item on each axis.
    pub global_scale: [usize; 3],
    /// Work-group size.
    pub local_size: [usize; 3],
    /// Total work items on each axis.
    pub global_size: [usize; 3],
}

impl WorkPartition {
    /// Partition of the given dimensionality with unit scale.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            global_scale: [1, 1, 1],
            ..Self::default()
        }
    }

    /// Whether an initializer has filled in a launch grid.
    pub fn is_set(&self) -> bool {
        self.dim > 0
    }
}

impl fmt::Display for WorkPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_set() {
            return f.write_str("host");
        }
        let g = &self.global_size;
        let l = &self.local_size;
        let s = &self.global_scale;
        if self.dim == 2 {
            write!(
                f,
                "global [{}x{}] local [{}x{}] scale [{}x{}]",
                g[0], g[1], l[0], l[1], s[0], s[1]
            )
        } else {
            write!(
                f,
                "global [{}x{}x{}] local [{}x{}x{}] scale [{}x{}x{}]",
                g[0], g[1], g[2], l[0], l[1], l[2], s[0], s[1], s[2]
            )
        }
    }
}

/// Round `n` up to a power-of-two `align`.
pub fn align_p2(n: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (n + align - 1) & !(align - 1)
}

/// Round `n` up to any positive multiple of `align`.
pub fn align_np2(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

/// Whether a shader can address a tensor of this shape: the first two
/// dimensions must be non-empty and narrower than [`GPU_TENSOR_MAX_WIDTH`].
pub fn gpu_check_shape(shape: &[usize]) -> bool {
    shape
        .iter()
        .take(2)
        .all(|&d| d != 0 && d < GPU_TENSOR_MAX_WIDTH)
}

/// Whether the tensor can be bound as a 2D image (no depth).
pub fn is_image_2d(shape: &[usize]) -> bool {
    shape.len() == 2 || shape.get(2).copied() == Some(1)
}

/// Grid dimensionality for a shape: 2 when everything past the first two
/// dimensions is 1, else 3.
pub fn grid_dim(shape: &[usize]) -> usize {
    if shape.iter().skip(2).all(|&d| d == 1) { 2 } else { 3 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment() {
        assert_eq!(align_p2(5, 4), 8);
        assert_eq!(align_p2(8, 4), 8);
        assert_eq!(align_p2(0, 16), 0);
        assert_eq!(align_np2(7, 3), 9);
        assert_eq!(align_np2(9, 3), 9);
    }

    #[test]
    fn shape_limits() {
        assert!(gpu_check_shape(&[65535, 4, 100_000]));
        assert!(!gpu_check_shape(&[65536, 4]));
        assert!(!gpu_check_shape(&[4, 0]));
        assert!(gpu_check_shape(&[3]));
    }

    #[test]
    fn image_and_grid_dims() {
        assert!(is_image_2d(&[8, 8]));
        assert!(is_image_2d(&[8, 8, 1, 4]));
        assert!(!is_image_2d(&[8, 8, 3]));
        assert_eq!(grid_dim(&[8, 8, 1, 1]), 2);
        assert_eq!(grid_dim(&[8, 8, 1, 2]), 3);
    }

    #[test]
    fn display_partition() {
        let mut p = WorkPartition::new(3);
        p.local_size = [16, 1, 1];
        p.global_size = [32, 4, 1];
        assert_eq!(
            p.to_string(),
            "global [32x4x1] local [16x1x1] scale [1x1x1]"
        );
        assert_eq!(WorkPartition::default().to_string(), "host");
        let mut p = WorkPartition::new(2);
        p.global_size = [4, 2, 0];
        assert_eq!(p.to_string(), "global [4x2] local [0x0] scale [1x1]");
    }
}
