//! Top-k along the innermost axis.
//!
//! The input is viewed as `[block_size, block_count]`. Each block is
//! narrowed with quickselect until position `k` is a partition point,
//! then the leading `k` indices are fully sorted.

use timvx_kernel::{
    ExecContext, KernelBackend, KernelDescriptor, KernelError, KernelType, NodeId, ScalarValue,
    SetupContext, VariantKey, signature,
};

use crate::select::{partition, sort_range};

/// Top `k` values of `input` in descending order, with their positions.
///
/// `k` is clamped to the input length.
pub fn top_k_1d(input: &[f32], k: usize) -> (Vec<f32>, Vec<usize>) {
    let len = input.len();
    let k = k.min(len);
    if k == 0 {
        return (Vec::new(), Vec::new());
    }
    let ahead = |a: usize, b: usize| input[a].total_cmp(&input[b]).is_ge();
    let mut indices: Vec<usize> = (0..len).collect();

    let (mut low, mut high) = (0, len - 1);
    let mut j = partition(&mut indices, low, high, &ahead);
    while j != k {
        if k > j {
            low = j + 1;
        } else {
            high = j - 1;
        }
        j = partition(&mut indices, low, high, &ahead);
    }
    sort_range(&mut indices, 0, k - 1, &ahead);

    indices.truncate(k);
    let values = indices.iter().map(|&i| input[i]).collect();
    (values, indices)
}

/// Top-k of every block of `block_size` consecutive elements.
pub fn top_k(input: &[f32], block_size: usize, k: usize) -> (Vec<f32>, Vec<usize>) {
    if block_size == 0 {
        return (Vec::new(), Vec::new());
    }
    let mut values = Vec::with_capacity(input.len() / block_size * k);
    let mut indices = Vec::with_capacity(values.capacity());
    for block in input.chunks_exact(block_size) {
        let (v, i) = top_k_1d(block, k);
        values.extend(v);
        indices.extend(i);
    }
    (values, indices)
}

const TOP_K: usize = 3;

fn execute(ctx: &mut ExecContext<'_>) -> Result<(), KernelError> {
    let k = ctx.scalar_i32(TOP_K)?.max(0) as usize;
    let block_size = ctx.desc(0)?.dim(0);
    let input = ctx.read_f32(0)?;
    let (values, indices) = top_k(&input, block_size, k);
    let indices: Vec<f32> = indices.iter().map(|&i| i as f32).collect();
    ctx.write_f32(1, &values)?;
    ctx.write_f32(2, &indices)
}

/// CPU top-k: `(input) -> (values, indices)`, scalar `top_k`.
#[derive(Debug)]
pub struct TopK;

impl KernelBackend for TopK {
    fn operator(&self) -> &str {
        "topk"
    }

    fn kernel_type(&self) -> KernelType {
        KernelType::Cpu
    }

    fn variants(&self) -> Vec<(VariantKey, KernelDescriptor)> {
        crate::host_variant("cpu.topk", &signature(1, 2, 1), execute)
    }

    fn setup(&self, ctx: &mut SetupContext<'_>) -> Result<Option<NodeId>, KernelError> {
        let Some(k) = ctx.params().get_i32("top_k") else {
            log::warn!("topk: missing \"top_k\"");
            return Ok(None);
        };
        let (Some(input), Some(values), Some(indices)) =
            (ctx.input_desc(0), ctx.output_desc(0), ctx.output_desc(1))
        else {
            return Ok(None);
        };
        let block_size = input.dim(0);
        if k < 0 || k as usize > block_size {
            return Ok(None);
        }
        let expected = input.num_elements() / block_size.max(1) * k as usize;
        if values.num_elements() != expected || indices.num_elements() != expected {
            return Ok(None);
        }
        let Some(kernel) = ctx.resolve(&VariantKey::default()) else {
            return Ok(None);
        };
        ctx.bind(kernel, &[ScalarValue::I32(k)]).map(Some)
    }
}
