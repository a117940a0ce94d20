//! Instance normalization over the two innermost dimensions.

use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, ScalarValue,
    SetupContext, VariantKey, signature,
};

/// Normalize every `(channel, batch)` plane of `input` (`[w, h, c, n]`)
/// to zero mean and unit variance, then apply `gamma[c]` and `beta[c]`.
pub fn instance_norm(
    input: &[f32],
    shape: &[usize],
    beta: &[f32],
    gamma: &[f32],
    eps: f32,
) -> Vec<f32> {
    let dim = |i: usize| shape.get(i).copied().unwrap_or(1);
    let plane = dim(0) * dim(1);
    let channels = dim(2);
    let mut out = vec![0.0; input.len()];
    if plane == 0 {
        return out;
    }
    for (p, (src, dst)) in input
        .chunks_exact(plane)
        .zip(out.chunks_exact_mut(plane))
        .enumerate()
    {
        let c = p % channels.max(1);
        let mean = src.iter().sum::<f32>() / plane as f32;
        let var = src.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / plane as f32;
        let inv = 1.0 / (var + eps).sqrt();
        let scale = gamma.get(c).copied().unwrap_or(1.0);
        let bias = beta.get(c).copied().unwrap_or(0.0);
        for (x, y) in src.iter().zip(dst.iter_mut()) {
            *y = (x - mean) * inv * scale + bias;
        }
    }
    out
}

fn execute(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let eps = ctx.scalar_f32(4)?;
    let shape = ctx.desc(0)?.shape.clone();
    let out = instance_norm(
        &ctx.read_f32(0)?,
        &shape,
        &ctx.read_f32(1)?,
        &ctx.read_f32(2)?,
        eps,
    );
    ctx.write_f32(3, &out)
}

/// CPU `instance_norm`: `(input, beta, gamma) -> (output)`, scalar `eps`.
#[derive(Debug)]
pub struct InstanceNorm;

impl KernelBackend for InstanceNorm {
    fn operator(&self) -> &str {
        "instance_norm"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        crate::host_variant("cpu.instance_norm", &signature(3, 1, 1), execute)
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let (Some(input), Some(beta), Some(gamma), Some(output)) = (
            ctx.input_desc(0),
            ctx.input_desc(1),
            ctx.input_desc(2),
            ctx.output_desc(0),
        ) else {
            return Ok(None);
        };
        let channels = input.dim(2);
        if output.shape != input.shape
            || beta.num_elements() < channels
            || gamma.num_elements() < channels
        {
            return Ok(None);
        }
        let Some(kernel) = ctx.resolve(&VariantKey::default()) else {
            return Ok(None);
        };
        let eps = ctx.params().f32_or("eps", 1e-5);
        ctx.bind(kernel, &[ScalarValue::F32(eps)]).map(Some)
    }
}
