//! Bilinear resize of the two innermost dimensions.
//!
//! Also hosts the plane geometry and scale rule shared with
//! [`resize_nearest`](crate::resize_nearest).

use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, ScalarValue,
    SetupContext, VariantKey, signature,
};

/// Source-to-destination ratio along one axis.
///
/// With `align_corners` the corner samples of both grids coincide, which
/// needs at least two output samples; otherwise the plain size ratio is used.
pub fn resize_scale(input: usize, output: usize, align_corners: bool) -> f32 {
    if align_corners && output > 1 {
        (input as f32 - 1.0) / (output as f32 - 1.0)
    } else {
        input as f32 / output as f32
    }
}

/// Width, height and plane count of a resize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResizeGeometry {
    /// Input width.
    pub in_w: usize,
    /// Input height.
    pub in_h: usize,
    /// Output width.
    pub out_w: usize,
    /// Output height.
    pub out_h: usize,
    /// Number of `[w, h]` planes (depth times batch).
    pub planes: usize,
}

impl ResizeGeometry {
    /// Geometry of `input` resized into `output`, or `None` when the outer
    /// dimensions differ or a plane is empty.
    pub fn new(input: &[usize], output: &[usize]) -> Option<Self> {
        let dim = |s: &[usize], i: usize| s.get(i).copied().unwrap_or(1);
        let outer = |s: &[usize]| s.iter().skip(2).product::<usize>();
        let g = Self {
            in_w: dim(input, 0),
            in_h: dim(input, 1),
            out_w: dim(output, 0),
            out_h: dim(output, 1),
            planes: outer(output),
        };
        let empty = g.in_w == 0 || g.in_h == 0 || g.out_w == 0 || g.out_h == 0;
        (outer(input) == g.planes && !empty).then_some(g)
    }
}

/// Sampling options shared by both resize modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResizeFlags {
    /// Map corner samples onto each other.
    pub align_corners: bool,
    /// Sample at pixel centers.
    pub half_pixel_centers: bool,
}

/// Resize every plane of `input` bilinearly.
pub fn resize_bilinear(input: &[f32], g: &ResizeGeometry, flags: ResizeFlags) -> Vec<f32> {
    let sx = resize_scale(g.in_w, g.out_w, flags.align_corners);
    let sy = resize_scale(g.in_h, g.out_h, flags.align_corners);
    let source = |i: usize, scale: f32| {
        if flags.half_pixel_centers {
            (i as f32 + 0.5) * scale - 0.5
        } else {
            i as f32 * scale
        }
    };
    // Lower and upper neighbours of a source coordinate.
    let taps = |pos: f32, len: usize| {
        let lo = (pos.max(0.0) as usize).min(len - 1);
        let hi = if pos < 0.0 { 0 } else { (lo + 1).min(len - 1) };
        (lo, hi, pos - lo as f32)
    };

    let mut out = Vec::with_capacity(g.planes * g.out_w * g.out_h);
    for plane in input.chunks_exact(g.in_w * g.in_h).take(g.planes) {
        for y in 0..g.out_h {
            let (y0, y1, dy) = taps(source(y, sy), g.in_h);
            for x in 0..g.out_w {
                let (x0, x1, dx) = taps(source(x, sx), g.in_w);
                let at = |yy: usize, xx: usize| plane[yy * g.in_w + xx];
                out.push(
                    at(y0, x0) * (1.0 - dy) * (1.0 - dx)
                        + at(y1, x0) * dy * (1.0 - dx)
                        + at(y0, x1) * (1.0 - dy) * dx
                        + at(y1, x1) * dy * dx,
                );
            }
        }
    }
    out.resize(g.planes * g.out_w * g.out_h, 0.0);
    out
}

pub(crate) fn read_flags(ctx: &ExecContext<'_>) -> Result<ResizeFlags, KernelError> {
    Ok(ResizeFlags {
        align_corners: ctx.scalar_i32(2)? != 0,
        half_pixel_centers: ctx.scalar_i32(3)? != 0,
    })
}

pub(crate) fn geometry(ctx: &ExecContext<'_>) -> Result<ResizeGeometry, KernelError> {
    let (input, output) = (ctx.desc(0)?, ctx.desc(1)?);
    ResizeGeometry::new(&input.shape, &output.shape).ok_or_else(|| KernelError::Unsupported {
        kernel: ctx.kernel().to_string(),
        what: format!("resize {:?} -> {:?}", input.shape, output.shape),
    })
}

fn execute(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let flags = read_flags(ctx)?;
    let g = geometry(ctx)?;
    let out = resize_bilinear(&ctx.read_f32(0)?, &g, flags);
    ctx.write_f32(1, &out)
}

/// Shape check and scalar binding shared by both resize backends.
pub(crate) fn setup_resize(ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
    let (Some(input), Some(output)) = (ctx.input_desc(0), ctx.output_desc(0)) else {
        return Ok(None);
    };
    if ResizeGeometry::new(&input.shape, &output.shape).is_none() {
        log::debug!(
            "{}: cannot resize {:?} into {:?}",
            ctx.operator(),
            input.shape,
            output.shape
        );
        return Ok(None);
    }
    let Some(kernel) = ctx.resolve(&VariantKey::default()) else {
        return Ok(None);
    };
    let p = ctx.params();
    let scalars = [
        ScalarValue::I32(p.get_bool("align_corners").unwrap_or(false) as i32),
        ScalarValue::I32(p.get_bool("half_pixel_centers").unwrap_or(false) as i32),
    ];
    ctx.bind(kernel, &scalars).map(Some)
}

/// CPU `resize_bilinear`: `(input) -> (output)`, scalars `align_corners`,
/// `half_pixel_centers`.
#[derive(Debug)]
pub struct ResizeBilinear;

impl KernelBackend for ResizeBilinear {
    fn operator(&self) -> &str {
        "resize_bilinear"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        crate::host_variant("cpu.resize_bilinear", &signature(1, 1, 2), execute)
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        setup_resize(ctx)
    }
}
