//! Nearest-neighbour resize of the two innermost dimensions.

use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, SetupContext,
    VariantKey, signature,
};

use crate::resize_bilinear::{
    ResizeFlags, ResizeGeometry, geometry, read_flags, resize_scale, setup_resize,
};

/// Source index of output sample `i`.
///
/// Half-pixel centers shift by half a source pixel before scaling;
/// align-corners rounds half away from zero, otherwise the position is
/// floored.
fn nearest(i: usize, scale: f32, len: usize, flags: ResizeFlags) -> usize {
    let pos = if flags.half_pixel_centers {
        (i as f32 + 0.5) * scale
    } else {
        i as f32 * scale
    };
    let snapped = if flags.align_corners {
        pos.round()
    } else {
        pos.floor()
    };
    (snapped.max(0.0) as usize).min(len - 1)
}

/// Resize every plane of `input` by picking the nearest source sample.
pub fn resize_nearest(input: &[f32], g: &ResizeGeometry, flags: ResizeFlags) -> Vec<f32> {
    let sx = resize_scale(g.in_w, g.out_w, flags.align_corners);
    let sy = resize_scale(g.in_h, g.out_h, flags.align_corners);
    let xs: Vec<usize> = (0..g.out_w).map(|x| nearest(x, sx, g.in_w, flags)).collect();

    let mut out = Vec::with_capacity(g.planes * g.out_w * g.out_h);
    for plane in input.chunks_exact(g.in_w * g.in_h).take(g.planes) {
        for y in 0..g.out_h {
            let row = &plane[nearest(y, sy, g.in_h, flags) * g.in_w..][..g.in_w];
            out.extend(xs.iter().map(|&x| row[x]));
        }
    }
    out.resize(g.planes * g.out_w * g.out_h, 0.0);
    out
}

fn execute(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let flags = read_flags(ctx)?;
    let g = geometry(ctx)?;
    let out = resize_nearest(&ctx.read_f32(0)?, &g, flags);
    ctx.write_f32(1, &out)
}

/// CPU `resize_nearest`: `(input) -> (output)`, scalars `align_corners`,
/// `half_pixel_centers`.
#[derive(Debug)]
pub struct ResizeNearest;

impl KernelBackend for ResizeNearest {
    fn operator(&self) -> &str {
        "resize_nearest"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        crate::host_variant("cpu.resize_nearest", &signature(1, 1, 2), execute)
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        setup_resize(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom(input: &[usize], output: &[usize]) -> ResizeGeometry {
        ResizeGeometry::new(input, output).unwrap()
    }

    #[test]
    fn upscale_repeats() {
        let g = geom(&[2, 2], &[4, 4]);
        let out = resize_nearest(&[1.0, 2.0, 3.0, 4.0], &g, ResizeFlags::default());
        assert_eq!(
            out,
            vec![
                1.0, 1.0, 2.0, 2.0, //
                1.0, 1.0, 2.0, 2.0, //
                3.0, 3.0, 4.0, 4.0, //
                3.0, 3.0, 4.0, 4.0,
            ]
        );
    }

    #[test]
    fn downscale_floors() {
        let g = geom(&[5, 1], &[2, 1]);
        let out = resize_nearest(&[0.0, 1.0, 2.0, 3.0, 4.0], &g, ResizeFlags::default());
        assert_eq!(out, vec![0.0, 2.0]);
    }

    #[test]
    fn half_pixel_centers_shift() {
        let g = geom(&[4, 1], &[2, 1]);
        let flags = ResizeFlags {
            half_pixel_centers: true,
            ..ResizeFlags::default()
        };
        assert_eq!(resize_nearest(&[0.0, 1.0, 2.0, 3.0], &g, flags), vec![1.0, 3.0]);
    }

    #[test]
    fn align_corners_rounds() {
        let g = geom(&[3, 1], &[5, 1]);
        let flags = ResizeFlags {
            align_corners: true,
            ..ResizeFlags::default()
        };
        // Scale 0.5: positions 0, 0.5, 1, 1.5, 2.
        assert_eq!(
            resize_nearest(&[10.0, 20.0, 30.0], &g, flags),
            vec![10.0, 20.0, 20.0, 30.0, 30.0]
        );
    }

    #[test]
    fn planes_are_independent() {
        let g = geom(&[2, 1, 2], &[1, 1, 2]);
        assert_eq!(
            resize_nearest(&[1.0, 2.0, 3.0, 4.0], &g, ResizeFlags::default()),
            vec![1.0, 3.0]
        );
    }
}
