//! Affine warp of the two innermost dimensions.
//!
//! Each output pixel `(x, y)` samples the source at
//! `(x*m0 + y*m2 + m4, x*m1 + y*m3 + m5)`. Samples outside the source
//! read [`OUT_OF_BOUNDS`] instead of clamping to the border.

use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, ScalarValue,
    SetupContext, VariantKey, signature,
};

/// Value read for source coordinates outside the image.
pub const OUT_OF_BOUNDS: f32 = 205.0;

/// Sampling mode, from the `type` parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
    /// Truncate to the containing source pixel.
    Nearest,
    /// Blend the four surrounding source pixels.
    Bilinear,
}

impl Interpolation {
    /// Code `0` is nearest; anything else is bilinear.
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            Self::Nearest
        } else {
            Self::Bilinear
        }
    }
}

/// Source coordinates of output pixel `(x, y)`.
pub fn transform(m: &[f32; 6], x: usize, y: usize) -> (f32, f32) {
    let (x, y) = (x as f32, y as f32);
    (x * m[0] + y * m[2] + m[4], x * m[1] + y * m[3] + m[5])
}

fn pixel(plane: &[f32], width: usize, height: usize, x: f32, y: f32) -> f32 {
    if x < 0.0 || y < 0.0 || x >= width as f32 || y >= height as f32 {
        return OUT_OF_BOUNDS;
    }
    plane
        .get(y as usize * width + x as usize)
        .copied()
        .unwrap_or(OUT_OF_BOUNDS)
}

/// Warp every `[w, h]` plane of `input` into an `out_w` by `out_h` grid.
pub fn warp_affine(
    input: &[f32],
    in_shape: (usize, usize),
    out_shape: (usize, usize),
    planes: usize,
    matrix: &[f32; 6],
    mode: Interpolation,
) -> Vec<f32> {
    let (in_w, in_h) = in_shape;
    let (out_w, out_h) = out_shape;
    let mut out = Vec::with_capacity(planes * out_w * out_h);
    for p in 0..planes {
        let plane = input.get(p * in_w * in_h..).unwrap_or(&[]);
        let read = |x: f32, y: f32| pixel(plane, in_w, in_h, x, y);
        for y in 0..out_h {
            for x in 0..out_w {
                let (sx, sy) = transform(matrix, x, y);
                let value = match mode {
                    Interpolation::Nearest => read(sx, sy),
                    Interpolation::Bilinear => {
                        let (fx, fy) = (sx.floor(), sy.floor());
                        let (ar, ab) = (sx - fx, sy - fy);
                        let (al, at) = (1.0 - ar, 1.0 - ab);
                        read(fx, fy) * al * at
                            + read(fx + 1.0, fy) * ar * at
                            + read(fx, fy + 1.0) * al * ab
                            + read(fx + 1.0, fy + 1.0) * ar * ab
                    }
                };
                out.push(value);
            }
        }
    }
    out
}

const TYPE: usize = 2;
const MATRIX: usize = 3;

fn execute(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let mode = Interpolation::from_code(ctx.scalar_i32(TYPE)?);
    let mut matrix = [0.0; 6];
    for (i, m) in matrix.iter_mut().enumerate() {
        *m = ctx.scalar_f32(MATRIX + i)?;
    }
    let (input, output) = (ctx.desc(0)?, ctx.desc(1)?);
    let in_shape = (input.dim(0), input.dim(1));
    let out_shape = (output.dim(0), output.dim(1));
    let planes = output.shape.iter().skip(2).product();
    let out = warp_affine(&ctx.read_f32(0)?, in_shape, out_shape, planes, &matrix, mode);
    ctx.write_f32(1, &out)
}

/// Decode the `matrix` parameter: six little-endian `f32`s.
pub fn parse_matrix(bytes: &[u8]) -> Option<[f32; 6]> {
    if bytes.len() != 24 {
        return None;
    }
    let mut m = [0.0; 6];
    for (v, chunk) in m.iter_mut().zip(bytes.chunks_exact(4)) {
        *v = f32::from_le_bytes(chunk.try_into().ok()?);
    }
    Some(m)
}

/// CPU `custom_warp_affine`: `(input) -> (output)`, scalars `type` and
/// the six matrix entries.
#[derive(Debug)]
pub struct WarpAffine;

impl KernelBackend for WarpAffine {
    fn operator(&self) -> &str {
        "custom_warp_affine"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        crate::host_variant("cpu.custom_warp_affine", &signature(1, 1, 7), execute)
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let (Some(input), Some(output)) = (ctx.input_desc(0), ctx.output_desc(0)) else {
            return Ok(None);
        };
        let outer = |shape: &[usize]| shape.iter().skip(2).product::<usize>();
        if outer(&input.shape) != outer(&output.shape) {
            return Ok(None);
        }
        let p = ctx.params();
        let Some(matrix) = p.get_buffer("matrix").and_then(parse_matrix) else {
            log::warn!("custom_warp_affine: \"matrix\" must hold six f32 values");
            return Ok(None);
        };
        let mut scalars = vec![ScalarValue::I32(p.i32_or("type", 0))];
        scalars.extend(matrix.map(ScalarValue::F32));
        let Some(kernel) = ctx.resolve(&VariantKey::default()) else {
            return Ok(None);
        };
        ctx.bind(kernel, &scalars).map(Some)
    }
}
