//! Max-unpooling: scatter pooled values back to the positions recorded by
//! the matching max-pool.

use timvx_core::DType;
use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, ScalarValue,
    SetupContext, VariantKey, signature,
};

/// How the index tensor addresses the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexMode {
    /// Offset inside the `scale_x * scale_y` window of the source pixel.
    Relative,
    /// Flat index into the whole output.
    Absolute,
}

impl IndexMode {
    /// Narrow index types can only hold window offsets.
    pub fn for_dtype(dtype: DType) -> Self {
        match dtype {
            DType::I8 | DType::U8 | DType::I16 => Self::Relative,
            _ => Self::Absolute,
        }
    }
}

/// Extents of one unpooling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpsampleShape {
    /// Input width.
    pub width: usize,
    /// Input height.
    pub height: usize,
    /// Output width.
    pub out_width: usize,
    /// Output height.
    pub out_height: usize,
    /// Depth times batch.
    pub planes: usize,
    /// Horizontal window.
    pub scale_x: usize,
    /// Vertical window.
    pub scale_y: usize,
}

impl UpsampleShape {
    fn out_len(&self) -> usize {
        self.out_width * self.out_height * self.planes
    }
}

/// Scatter `values` into a zeroed output using `indices`.
///
/// Targets outside the output are skipped and counted; the count is the
/// second element of the result.
pub fn upsample(
    values: &[f32],
    indices: &[f64],
    s: &UpsampleShape,
    mode: IndexMode,
) -> (Vec<f32>, usize) {
    let mut out = vec![0.0; s.out_len()];
    let mut dropped = 0;
    let kx = s.scale_x.max(1) as i64;
    let ky = s.scale_y.max(1) as i64;
    let plane_in = s.width * s.height;
    let plane_out = s.out_width * s.out_height;
    for p in 0..s.planes {
        for j in 0..s.height {
            for i in 0..s.width {
                let at = p * plane_in + j * s.width + i;
                let (Some(&value), Some(&raw)) = (values.get(at), indices.get(at)) else {
                    continue;
                };
                let index = raw as i64;
                let target = match mode {
                    IndexMode::Relative => {
                        let row = j as i64 * ky + index.div_euclid(kx);
                        let col = i as i64 * kx + index.rem_euclid(kx);
                        if index < 0
                            || row >= s.out_height as i64
                            || col >= s.out_width as i64
                        {
                            dropped += 1;
                            continue;
                        }
                        (p * plane_out) as i64 + row * s.out_width as i64 + col
                    }
                    IndexMode::Absolute => index,
                };
                match usize::try_from(target).ok().and_then(|t| out.get_mut(t)) {
                    Some(slot) => *slot = value,
                    None => dropped += 1,
                }
            }
        }
    }
    (out, dropped)
}

fn execute(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let (input, index, output) = (ctx.desc(0)?, ctx.desc(1)?, ctx.desc(2)?);
    let shape = UpsampleShape {
        width: input.dim(0),
        height: input.dim(1),
        out_width: output.dim(0),
        out_height: output.dim(1),
        planes: input.dim(2) * input.dim(3),
        scale_x: ctx.scalar_i32(3)?.max(1) as usize,
        scale_y: ctx.scalar_i32(4)?.max(1) as usize,
    };
    let mode = IndexMode::for_dtype(index.dtype);
    let (out, dropped) = upsample(&ctx.read_f32(0)?, &ctx.read_raw(1)?, &shape, mode);
    if dropped > 0 {
        log::warn!("{}: {dropped} indices fall outside the output", ctx.kernel());
    }
    ctx.write_f32(2, &out)
}

/// CPU `upsample`: `(values, indices) -> (output)`, scalars `scale_x`,
/// `scale_y`.
#[derive(Debug)]
pub struct Upsample;

impl KernelBackend for Upsample {
    fn operator(&self) -> &str {
        "upsample"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        crate::host_variant("cpu.upsample", &signature(2, 1, 2), execute)
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let (Some(input), Some(index), Some(output)) =
            (ctx.input_desc(0), ctx.input_desc(1), ctx.output_desc(0))
        else {
            return Ok(None);
        };
        if index.shape != input.shape || input.dim(2) * input.dim(3) != output.dim(2) * output.dim(3)
        {
            return Ok(None);
        }
        let p = ctx.params();
        let scale_x = p.i32_or("scale_x", 2);
        let scale_y = p.i32_or("scale_y", 2);
        if scale_x < 1 || scale_y < 1 {
            return Ok(None);
        }
        let Some(kernel) = ctx.resolve(&VariantKey::default()) else {
            return Ok(None);
        };
        ctx.bind(kernel, &[ScalarValue::I32(scale_x), ScalarValue::I32(scale_y)])
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(width: usize, height: usize, scale: usize) -> UpsampleShape {
        UpsampleShape {
            width,
            height,
            out_width: width * scale,
            out_height: height * scale,
            planes: 1,
            scale_x: scale,
            scale_y: scale,
        }
    }

    #[test]
    fn index_mode_follows_dtype() {
        assert_eq!(IndexMode::for_dtype(DType::U8), IndexMode::Relative);
        assert_eq!(IndexMode::for_dtype(DType::I16), IndexMode::Relative);
        assert_eq!(IndexMode::for_dtype(DType::I32), IndexMode::Absolute);
        assert_eq!(IndexMode::for_dtype(DType::F32), IndexMode::Absolute);
    }

    #[test]
    fn relative_offsets_land_in_window() {
        // One pixel per 2x2 window: top-left, top-right, bottom-left, bottom-right.
        let (out, dropped) = upsample(
            &[1.0, 2.0, 3.0, 4.0],
            &[0.0, 1.0, 2.0, 3.0],
            &shape(2, 2, 2),
            IndexMode::Relative,
        );
        assert_eq!(dropped, 0);
        assert_eq!(
            out,
            vec![
                1.0, 0.0, 0.0, 2.0, //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
                3.0, 0.0, 0.0, 4.0,
            ]
        );
    }

    #[test]
    fn absolute_indices_address_output() {
        let (out, dropped) =
            upsample(&[7.0, 8.0], &[3.0, 0.0], &shape(2, 1, 2), IndexMode::Absolute);
        assert_eq!(dropped, 0);
        assert_eq!(out, vec![8.0, 0.0, 0.0, 7.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn out_of_range_is_dropped() {
        let (out, dropped) =
            upsample(&[1.0, 2.0], &[99.0, -1.0], &shape(2, 1, 2), IndexMode::Absolute);
        assert_eq!(dropped, 2);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn relative_offsets_never_leave_their_row_or_plane() {
        // A negative offset must not reach back into the previous row, and
        // an offset past the window must not spill into the next plane.
        let s = UpsampleShape {
            planes: 2,
            ..shape(2, 1, 2)
        };
        let (out, dropped) = upsample(
            &[1.0, 2.0, 3.0, 4.0],
            &[0.0, -1.0, 9.0, 1.0],
            &s,
            IndexMode::Relative,
        );
        assert_eq!(dropped, 2);
        assert_eq!(
            out,
            vec![
                1.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 4.0, //
                0.0, 0.0, 0.0, 0.0,
            ]
        );
    }

    #[test]
    fn planes_use_their_own_base() {
        let s = UpsampleShape {
            planes: 2,
            ..shape(1, 1, 2)
        };
        let (out, _) = upsample(&[5.0, 6.0], &[3.0, 0.0], &s, IndexMode::Relative);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 5.0, 6.0, 0.0, 0.0, 0.0]);
    }
}
