//! One-hot expansion.

use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, ScalarValue,
    SetupContext, VariantKey, signature,
};

/// Split `shape` around `axis` into `(prefix, suffix)` element counts.
///
/// `axis == -1` makes depth the fastest-varying output dimension; larger
/// values move it outward.
pub fn split_axis(shape: &[usize], axis: i32) -> (usize, usize) {
    let rank = shape.len();
    let cut = if axis == -1 {
        rank
    } else {
        (rank as i64 - axis as i64).clamp(0, rank as i64) as usize
    };
    let prefix: usize = shape[..cut].iter().product();
    let total: usize = shape.iter().product();
    (prefix, total / prefix.max(1))
}

/// Expand each index into `depth` values of `on` / `off`.
pub fn one_hot(
    input: &[f32],
    shape: &[usize],
    depth: usize,
    on: f32,
    off: f32,
    axis: i32,
) -> Vec<f32> {
    let (prefix, suffix) = split_axis(shape, axis);
    let mut out = Vec::with_capacity(prefix * depth * suffix);
    for i in 0..prefix {
        for j in 0..depth {
            for k in 0..suffix {
                let value = input.get(i * suffix + k).map_or(-1, |&v| v as i32);
                out.push(if value == j as i32 { on } else { off });
            }
        }
    }
    out
}

const DEPTH: usize = 2;
const ON_VALUE: usize = 3;
const OFF_VALUE: usize = 4;
const AXIS: usize = 5;

fn execute(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let depth = ctx.scalar_i32(DEPTH)?.max(0) as usize;
    let on = ctx.scalar_f32(ON_VALUE)?;
    let off = ctx.scalar_f32(OFF_VALUE)?;
    let axis = ctx.scalar_i32(AXIS)?;
    let shape = ctx.desc(0)?.shape.clone();
    let input = ctx.read_f32(0)?;
    let mut out = one_hot(&input, &shape, depth, on, off, axis);
    out.resize(ctx.desc(1)?.num_elements(), off);
    ctx.write_f32(1, &out)
}

/// CPU `one_hot`: `(indices) -> (output)`, scalars `depth`, `on_value`,
/// `off_value`, `axis`.
#[derive(Debug)]
pub struct OneHot;

impl KernelBackend for OneHot {
    fn operator(&self) -> &str {
        "one_hot"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        crate::host_variant("cpu.one_hot", &signature(1, 1, 4), execute)
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let Some(depth) = ctx.params().get_i32("depth") else {
            log::warn!("one_hot: missing \"depth\"");
            return Ok(None);
        };
        let (Some(input), Some(output)) = (ctx.input_desc(0), ctx.output_desc(0)) else {
            return Ok(None);
        };
        if depth < 0 || output.num_elements() != input.num_elements() * depth as usize {
            return Ok(None);
        }
        let Some(kernel) = ctx.resolve(&VariantKey::default()) else {
            return Ok(None);
        };
        let p = ctx.params();
        let scalars = [
            ScalarValue::I32(depth),
            ScalarValue::F32(p.f32_or("on_value", 1.0)),
            ScalarValue::F32(p.f32_or("off_value", 0.0)),
            ScalarValue::I32(p.i32_or("axis", -1)),
        ];
        ctx.bind(kernel, &scalars).map(Some)
    }
}
